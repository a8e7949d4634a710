//! kudo-engine - plan execution engine for operator lifecycle plans
//!
//! Operators package their day-1 (install) and day-2 (upgrade, backup,
//! scale, ...) procedures as named plans: ordered phases of steps that
//! reference tasks, which in turn bundle parameterized resource templates.
//! This crate is the reconciler core that drives one plan instance from
//! pending to complete, one tick at a time: it renders the templates,
//! stamps the standard conventions (labels, annotations, name prefix,
//! namespace, owner reference) onto every resource, applies them to the
//! cluster, and observes health.
//!
//! The engine is a library with no I/O of its own beyond the injected
//! cluster client: the outer reconciliation loop owns watching, queueing
//! and status persistence, and re-invokes [`engine::execute_plan`] until
//! the returned status is terminal. Invocations are idempotent; progress
//! across ticks comes from the status tree mutating monotonically.
//!
//! # Modules
//!
//! - [`plan`] - Plan/phase/step/task definitions and the execution status tree
//! - [`template`] - Resource template rendering
//! - [`engine`] - Resource preparation, convention application, and the
//!   phase/step state machine
//! - [`client`] - Cluster client abstraction and error predicates
//! - [`health`] - Health oracle for applied resources
//! - [`error`] - Error taxonomy for the engine

#![deny(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod health;
pub mod plan;
pub mod template;

pub use error::{EngineError, ExecutionFailure};

/// Result type alias using the engine error type
pub type Result<T> = std::result::Result<T, EngineError>;
