pub mod cache;
pub mod status;

pub use cache::{CacheEntry, CacheError, CacheService, DisabledCache, HttpCacheService};
pub use status::{ChannelStatusPublisher, NoopStatus, SpeakerStatus, StatusPublisher, StatusReceiver};
