use crate::config::AppConfig;
use crate::markers::MarkerSet;
use crate::transport::HttpTransport;

/// Shared application state, one instance behind an `Arc` for the process
/// lifetime. The marker set is immutable after construction; nothing else is
/// shared between requests.
pub struct AppState {
    pub config: AppConfig,
    pub markers: MarkerSet,
    pub transport: HttpTransport,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            markers: MarkerSet::generate(),
            transport: HttpTransport::new(),
        }
    }
}
