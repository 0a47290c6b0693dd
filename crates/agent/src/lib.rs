//! Dialogue runtime for the course adviser.
//!
//! This crate plugs concrete collaborators into the pure dialogue core:
//! - `extraction` reads slot values and dialogue acts out of free text
//! - `picker` turns a filled slot set into course plans
//! - `templates` renders template keys with `tera`
//! - `runtime` owns sessions, applies timeouts and commits transitions
//!
//! # Ground Rule
//!
//! Collaborators only translate. Which slot is asked next, whether an answer is
//! acceptable and when the conversation restarts are decided by the core flow engine.

pub mod extraction;
pub mod picker;
pub mod runtime;
pub mod telemetry;
pub mod templates;

pub use extraction::KeywordExtractor;
pub use picker::{CatalogError, Course, CourseCatalog, CoursePicker, PickerSettings};
pub use runtime::{DialogueRuntime, RenderedPrompt, RuntimeSettings, TurnOutput};
pub use telemetry::TracingAuditSink;
pub use templates::{TemplateCatalog, TemplateCatalogError};
