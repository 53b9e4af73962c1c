mod orchestrator;
mod shutdown;

pub use orchestrator::{Collaborators, Orchestrator};
pub use shutdown::ShutdownGuard;
