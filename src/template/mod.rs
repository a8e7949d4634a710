//! Resource template rendering
//!
//! Operator authors write their Kubernetes manifests as Jinja-style
//! templates; the engine expands them once per step against a fixed set of
//! configuration keys before conventions are applied. Rendering is pure
//! (no I/O) and strict: referencing an undefined key fails, and any render
//! failure is treated as an authoring bug by the caller.

mod context;
mod engine;

pub use context::RenderContext;
pub use engine::{TemplateEngine, TemplateError};
