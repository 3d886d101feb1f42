//! Pipeline module - end-to-end system prompt experiment runs.

mod system_prompt;

pub use system_prompt::*;
