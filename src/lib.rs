//! A differential performance fuzzer for constraint solvers.
//!
//! This crate drives an external predicate generator and a set of "target"
//! and "reference" `probcli` solver subprocesses through a bandit-guided
//! search loop, looking for predicates on which the targets are
//! significantly slower (or faster) than the references. See
//! [`search::SearchLoop`] for the core algorithm and [`replay`] for
//! re-evaluating a previous run's results CSV.

pub mod bandit;
pub mod config;
pub mod csv_sink;
pub mod error;
pub mod generator;
pub mod replay;
pub mod search;
pub mod solution;
pub mod solver;
pub mod term;
pub mod transport;

pub use error::FuzzError;
pub use error::FuzzResult;
