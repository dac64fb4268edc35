pub mod active_view;
pub mod api;
pub mod cache;
pub mod config;
pub mod knowledge;
pub mod locations;
pub mod responder;
pub mod session;

use crate::active_view::ActiveView;
use crate::cache::TtlCache;
use crate::config::Config;
use crate::locations::LocationProvider;
use crate::responder::ResponderCache;
use crate::session::SessionStore;

/// Everything a request handler needs, built once at startup and passed
/// by reference. No module-level singletons.
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub locations: LocationProvider,
    pub responders: ResponderCache,
    pub active_view: ActiveView,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let cache = TtlCache::new();
        let sessions = SessionStore::new(cache, config.session_ttl());
        let locations = LocationProvider::new(&config.data_dir);
        Self {
            config,
            sessions,
            locations,
            responders: ResponderCache::new(),
            active_view: ActiveView::new(),
        }
    }
}
