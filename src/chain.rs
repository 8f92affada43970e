//! Chain - ordered byte transformation stages
//!
//! A chain is the middleware pipeline of one direction of a Channel. Each
//! stage receives the data produced by the stage before it together with the
//! error carried so far, and decides whether the pass goes on.
//!
//! ```text
//! accumulated bytes ─► [stage 0] ─► [stage 1] ─► ... ─► [stage n]
//!                           │
//!                           └─ hold: stop here, keep the accumulator
//! ```
//!
//! A stage that holds ("drops") ends the pass early. The owner of the
//! accumulator then keeps the bytes and offers them again, extended with
//! whatever arrives next, on the following pass.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::error::{Error, Result};

/// One transformation step in a read or write chain.
///
/// Implemented for every `Fn(Bytes, Option<Error>) -> Step` closure, so plain
/// functions can be chained directly.
pub trait Stage: Send + Sync {
    /// Transform `data`, given the error produced earlier in this pass.
    fn apply(&self, data: Bytes, error: Option<Error>) -> Step;

    /// Name used in trace output.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F> Stage for F
where
    F: Fn(Bytes, Option<Error>) -> Step + Send + Sync,
{
    fn apply(&self, data: Bytes, error: Option<Error>) -> Step {
        self(data, error)
    }
}

/// Outcome of a single stage, and of a whole chain pass.
#[derive(Debug)]
pub struct Step {
    /// Data handed to the next stage
    pub data: Bytes,
    /// Stop the pass and retain the accumulator
    pub hold: bool,
    /// Error handed to the next stage
    pub error: Option<Error>,
}

impl Step {
    pub fn new(data: impl Into<Bytes>, hold: bool, error: Option<Error>) -> Self {
        Self {
            data: data.into(),
            hold,
            error,
        }
    }

    /// Continue the pass with `data`.
    pub fn pass(data: impl Into<Bytes>) -> Self {
        Self::new(data, false, None)
    }

    /// Stop the pass and keep the accumulated bytes for the next one.
    pub fn hold() -> Self {
        Self::new(Bytes::new(), true, None)
    }

    /// Attach an error for the next stage.
    pub fn with_error(mut self, error: Option<Error>) -> Self {
        self.error = error;
        self
    }
}

/// Ordered, indexable sequence of stages.
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn with<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a closure stage.
    pub fn with_fn<F>(self, f: F) -> Self
    where
        F: Fn(Bytes, Option<Error>) -> Step + Send + Sync + 'static,
    {
        self.with(f)
    }

    /// Append a shared stage.
    pub fn with_arc(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Remove the stage at `index`, shifting later stages left.
    ///
    /// A populated chain never becomes empty through removal.
    pub fn remove(&mut self, index: usize) -> Result<()> {
        if index >= self.stages.len() {
            return Err(Error::InvalidIndex(index));
        }
        if self.stages.len() == 1 {
            return Err(Error::EmptyChain);
        }
        self.stages.remove(index);
        Ok(())
    }

    /// Run one pass over `data`.
    ///
    /// Stages run in order until one of them holds. The returned step carries
    /// the last produced data, the hold flag and the error left at the end.
    pub fn run(&self, data: Bytes, error: Option<Error>) -> Step {
        let mut step = Step::new(data, false, error);
        for (index, stage) in self.stages.iter().enumerate() {
            step = stage.apply(step.data, step.error);
            if step.hold {
                trace!("chain held at stage {} ({})", index, stage.name());
                break;
            }
        }
        step
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.name()))
            .finish()
    }
}

impl FromIterator<Arc<dyn Stage>> for Chain {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Stage>>>(iter: I) -> Self {
        Self {
            stages: iter.into_iter().collect(),
        }
    }
}
