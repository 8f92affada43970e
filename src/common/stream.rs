//! Stream abstraction
//!
//! Unified stream type for all layers to operate on. Transports produce a
//! Stream, sessions wrap it, and a Channel consumes it.

use tokio::io::{AsyncRead, AsyncWrite};

/// The duplex byte stream a Channel owns.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Trait for types that can be converted into a Stream
pub trait IntoStream {
    fn into_stream(self) -> Stream;
}

impl<T> IntoStream for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn into_stream(self) -> Stream {
        Box::new(self)
    }
}
