//! Prompt matrix construction and the system prompt harness.

mod matrix;
mod system_prompt;

pub use matrix::*;
pub use system_prompt::*;
