//! Stock stages

use bytes::Bytes;

use crate::chain::{Stage, Step};
use crate::error::Error;

/// Uppercases the data.
///
/// Valid UTF-8 is uppercased with full Unicode rules, anything else byte by
/// byte as ASCII. An incoming error holds the pass and is handed on.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpperCase;

impl Stage for UpperCase {
    fn apply(&self, data: Bytes, error: Option<Error>) -> Step {
        if error.is_some() {
            return Step::hold().with_error(error);
        }

        let upper = match std::str::from_utf8(&data) {
            Ok(text) => text.to_uppercase().into_bytes(),
            Err(_) => data.to_ascii_uppercase(),
        };
        Step::pass(upper)
    }

    fn name(&self) -> &'static str {
        "uppercase"
    }
}

/// Holds the pass until at least `n` bytes have accumulated.
#[derive(Debug, Clone, Copy)]
pub struct WaitForBytes(pub usize);

impl Stage for WaitForBytes {
    fn apply(&self, data: Bytes, error: Option<Error>) -> Step {
        if data.len() < self.0 {
            return Step::hold().with_error(error);
        }
        Step::pass(data).with_error(error)
    }

    fn name(&self) -> &'static str {
        "wait-for-bytes"
    }
}
