pub mod block;
pub mod content;
pub mod effect;
pub mod response;
