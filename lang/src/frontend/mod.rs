//! The two-phase interface between the driver and a language front end.

use std::ops::Range;

use crate::{context::CompileContext, unused::UnusedMethods};

pub mod constant;
pub mod outline;

pub use outline::OutlineCompiler;

/// A front-end failure located by byte offsets into the current source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PositionedError {
    pub message: String,
    pub start: usize,
    pub end: usize,
}

impl PositionedError {
    pub fn new(message: impl Into<String>, span: Range<usize>) -> Self {
        Self {
            message: message.into(),
            start: span.start,
            end: span.end,
        }
    }

    /// An error at the source terminator.
    pub fn at_end(message: impl Into<String>, source: &str) -> Self {
        Self::new(message, source.len()..source.len())
    }
}

/// Compiles the object held by a [`CompileContext`].
///
/// `discover` establishes the object's structure: sizes, symbols and the
/// child-object and data-file reference lists. It may run twice on the same
/// source and must produce the same references both times. `finish` runs
/// once the driver has placed the finished children in
/// [`CompileContext::children`] and the data files in
/// [`CompileContext::data`]; it emits [`CompileContext::code`] and must not
/// touch the reference lists.
pub trait FrontEnd {
    fn discover(
        &mut self,
        ctx: &mut CompileContext,
        methods: &mut UnusedMethods,
    ) -> Result<(), PositionedError>;

    fn finish(
        &mut self,
        ctx: &mut CompileContext,
        methods: &UnusedMethods,
    ) -> Result<(), PositionedError>;
}
