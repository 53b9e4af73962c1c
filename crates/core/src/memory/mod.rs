pub mod conversation;
pub mod session;

pub use conversation::{MessageStore, StoredMessage};
pub use session::{MemorySessionStore, PgSessionStore, SessionStore, StoreError};
