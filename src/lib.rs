//! nio - async duplex connections with read/write middleware
//!
//! # Architecture
//!
//! ```text
//! Transport (TCP/Unix)
//! → Session (plain/TLS)
//! → Channel
//!     ├── read loop  → [read chain]  → application
//!     └── write loop ← queue ← [write chain] ← Writer
//! ```
//!
//! ## Core Principles
//!
//! - A Channel owns exactly one connection and closes it exactly once
//! - Stages see accumulated bytes and may hold them back until more arrive
//! - Errors are values handed to stages and completion callbacks
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Stream, Address
//! ├── transport/       # Transport layer: TCP, Unix
//! ├── session/         # Session layer: plain, TLS
//! ├── channel/         # Channel, Writer, read and write loops
//! ├── chain.rs         # Stage trait and ordered chains
//! ├── stages.rs        # Stock stages
//! └── config.rs        # ChannelConfig
//! ```

// Core types
pub mod common;
pub mod error;

// Layered architecture
pub mod transport;
pub mod session;
pub mod channel;

// Middleware
pub mod chain;
pub mod stages;

// Supporting modules
pub mod config;

// Re-exports for convenience
pub use common::{Address, Stream};
pub use error::{Error, Result};
pub use config::{ChannelConfig, QueuePolicy};

pub use chain::{Chain, Stage, Step};
pub use channel::{Channel, WeakChannel, WriteJob, Writer};
pub use session::{Session, TlsConfig, TlsVersion};
pub use stages::{UpperCase, WaitForBytes};
pub use transport::{Transport, TransportKind};
