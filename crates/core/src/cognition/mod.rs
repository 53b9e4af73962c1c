pub mod normalizer;
pub mod prompt;
pub mod response;
pub mod tool_call;
