//! Application state for the HTTP server.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::AttributeCatalog;
use crate::sap::{DataSink, DataSource, Transport};
use crate::services::WritebackService;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub source: Arc<dyn DataSource>,
    pub sink: Arc<dyn DataSink>,
    pub catalog: Arc<AttributeCatalog>,
    pub writeback: Arc<WritebackService>,
}

impl AppState {
    /// State over `transport` with the SAP IBP attribute catalog.
    pub fn new(config: AppConfig, transport: Transport) -> Self {
        Self::with_catalog(config, transport, AttributeCatalog::sap_ibp())
    }

    pub fn with_catalog(config: AppConfig, transport: Transport, catalog: AttributeCatalog) -> Self {
        let catalog = Arc::new(catalog);
        let writeback = WritebackService::new(
            Arc::clone(&transport.source),
            Arc::clone(&transport.sink),
            Arc::clone(&catalog),
            &config,
        );
        Self {
            config: Arc::new(config),
            source: transport.source,
            sink: transport.sink,
            catalog,
            writeback: Arc::new(writeback),
        }
    }
}
