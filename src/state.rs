use std::sync::Arc;

use crate::config::EngineConfig;
use crate::domain::ports::{BookingFeed, BookingStore, EventSink, NullSink};
use crate::engine::cache::BookingCache;

/// Shared wiring for every booking session: the abstract document store,
/// its subscription feed, the outbound event sink, and the one shared cache.
#[derive(Clone)]
pub struct EngineState {
    pub config: EngineConfig,
    pub store: Arc<dyn BookingStore>,
    pub feed: Arc<dyn BookingFeed>,
    pub events: Arc<dyn EventSink>,
    pub cache: Arc<BookingCache>,
}

impl EngineState {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn BookingStore>,
        feed: Arc<dyn BookingFeed>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            store,
            feed,
            events,
            cache: Arc::new(BookingCache::new()),
        }
    }

    pub fn with_null_sink(
        config: EngineConfig,
        store: Arc<dyn BookingStore>,
        feed: Arc<dyn BookingFeed>,
    ) -> Self {
        Self::new(config, store, feed, Arc::new(NullSink))
    }
}
