pub mod autosave;
pub mod condition;
pub mod config;
pub mod pipeline;
#[cfg(feature = "queue")]
pub mod queue;
pub mod registry;
pub mod render;
pub mod scoring;
pub mod sequence;
pub mod session;
pub mod source;
pub mod template;
pub mod variable;
