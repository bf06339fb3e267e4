pub mod clash;
pub mod compiler;
pub mod graph;
pub mod properties;
pub mod source;
pub mod walker;
