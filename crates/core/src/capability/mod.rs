pub mod automation;
pub mod backend;
pub mod router;

pub use automation::{AutomationConfig, AutomationError, AutomationStore, MemoryAutomationStore, YamlAutomationStore};
pub use backend::{BackendError, DryRunBackend, HomeBackend, HomeDirectory, HttpHomeBackend, ServiceCall};
pub use router::{Action, RouteTable, RouteTableError, ToolOutcome, Translator};
