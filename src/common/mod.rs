//! Common types and abstractions
//!
//! - Stream: unified async I/O abstraction every layer operates on
//! - Address: where a transport connects to
//! - Error: unified error types

mod address;
mod stream;

pub use address::Address;
pub use stream::{AsyncReadWrite, IntoStream, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
