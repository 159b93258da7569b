//! Run context threaded through command entry points

use tokio_util::sync::CancellationToken;

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
}

/// Explicit per-invocation state shared by all commands.
///
/// There is no global console or verbosity singleton; every entry point
/// receives a `RunContext` and passes it down.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub verbosity: Verbosity,
    pub color: bool,
    /// Cooperative cancellation signal. Workers observe it between work
    /// items; in-flight subprocesses run to completion or timeout.
    pub cancellation: CancellationToken,
}

impl RunContext {
    pub fn new(verbosity: Verbosity, color: bool) -> Self {
        Self {
            verbosity,
            color,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn quiet(&self) -> bool {
        self.verbosity == Verbosity::Quiet
    }

    pub fn verbose(&self) -> bool {
        self.verbosity >= Verbosity::Verbose
    }
}
