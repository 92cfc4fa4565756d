//! # ys-core
//!
//! Shared building blocks for yieldscan: the workspace error type and the
//! contracts between the scan engine and the event stores it reads.
//!
//! An *event source* is an opaque row store (`row_count`, `load_row`) whose
//! currently loaded row is exposed as an [`Event`] with named scalar and vector
//! fields. Selections and figures only ever see `&dyn Event`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod event;

pub use error::{Error, Result};
pub use event::{Event, EventSource, FieldKind, SourceFactory};
