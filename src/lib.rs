//! Chapter Engine: content blocks for interactive, gamified chapter reading.
//!
//! Authored pages are arrays of typed blocks. The engine validates them,
//! expands templates into them, renders them against a reader's responses,
//! scores self-assessments, and delivers progress writes through a
//! retrying queue.

pub mod core;
pub mod schema;
