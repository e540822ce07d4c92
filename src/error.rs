//! Error taxonomy for the fuzzer core.
//!
//! Mirrors the recoverable/fatal split from the design: the search loop
//! matches on [`FuzzError`] to decide whether to skip an iteration, restart
//! a handle, or abort and flush the CSV sink.

use std::io;

/// Errors produced anywhere in the solver/generator orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum FuzzError {
    /// The B-parser rejected a predicate. Recoverable: skip the iteration.
    #[error("predicate parse error: {0}")]
    PredicateParseError(String),

    /// A solver did not answer within its configured timeout.
    #[error("solver {solver_id} timed out after {timeout_ms}ms")]
    SolverTimeout {
        /// The id of the solver that timed out.
        solver_id: String,
        /// The configured timeout that was exceeded.
        timeout_ms: u64,
    },

    /// The generator did not answer within its request timeout.
    #[error("generator timed out after {timeout_ms}ms")]
    GeneratorTimeout {
        /// The configured timeout that was exceeded.
        timeout_ms: u64,
    },

    /// The generator sent a reply that could not be parsed or did not match
    /// the expected shape. Fatal: the generator's RNG state can no longer be
    /// trusted to correspond to the caller's view of it.
    #[error("generator protocol error: {0}")]
    GeneratorProtocolError(String),

    /// A solver subprocess printed an unexpected startup banner line. Fatal.
    #[error("solver {solver_id} startup error: {detail}")]
    SolverStartupError {
        /// The id of the solver that failed to start.
        solver_id: String,
        /// The offending banner line, or a description of what was missing.
        detail: String,
    },

    /// `Bandit::receive_reward` was called with a reward outside `{0, 1}`.
    /// Programmer error: always fatal.
    #[error("invalid reward {0}, expected 0 or 1")]
    InvalidReward(i32),

    /// A configuration file was missing a required key, named an unknown
    /// solver id, or pointed at a path that does not exist.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Term-level parse failure from [`crate::term::parser`], wrapped when it
    /// escapes a reply that is not a predicate (e.g. a malformed solver
    /// answer rather than a malformed predicate).
    #[error(transparent)]
    TermParse(#[from] crate::term::ParseFailure),

    /// A parsed term could not be translated into a [`crate::solution::SolutionValue`].
    #[error("translation error: {0}")]
    Translation(String),

    /// Transport-level I/O failure (socket read/write, subprocess spawn).
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the orchestration layer.
pub type FuzzResult<T> = Result<T, FuzzError>;

impl FuzzError {
    /// Whether the search loop may recover by skipping the current iteration
    /// (possibly after restarting a handle), per spec.md §7.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FuzzError::PredicateParseError(_)
                | FuzzError::SolverTimeout { .. }
                | FuzzError::GeneratorTimeout { .. }
        )
    }
}
