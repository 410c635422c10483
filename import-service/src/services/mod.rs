pub mod cache;
pub mod entries;
pub mod entry_store;
pub mod metrics;
pub mod partial_json;
pub mod providers;

pub use cache::{cache_tag_for_team, InMemoryTagCache, RedisTagCache, TagCache};
pub use entries::EntryService;
pub use entry_store::{EntryStore, InMemoryEntryStore, PgEntryStore};
pub use metrics::{get_metrics, init_metrics};
pub use providers::{MappingStream, ProviderError, SuggestionProvider};
