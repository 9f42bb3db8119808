//! Transport construction from configuration.

use std::fs;
use std::str::FromStr;
use std::sync::Arc;

use super::error::{TransportError, TransportResult};
use super::local::{LocalSink, LocalSource};
use super::{DataSink, DataSource};
use crate::config::SapSettings;
use crate::models::RawObservation;

/// Transport backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// SAP IBP OData services
    OData,
    /// In-memory source and sink
    Local,
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "odata" | "sap" => Ok(Self::OData),
            "local" | "memory" => Ok(Self::Local),
            _ => Err(format!("Unknown backend type: {}", s)),
        }
    }
}

/// A matched source and sink.
#[derive(Clone)]
pub struct Transport {
    pub source: Arc<dyn DataSource>,
    pub sink: Arc<dyn DataSink>,
}

pub struct TransportFactory;

impl TransportFactory {
    pub fn create(backend: BackendType, settings: &SapSettings) -> TransportResult<Transport> {
        match backend {
            BackendType::OData => {
                #[cfg(feature = "odata")]
                {
                    let source = super::odata::ODataSource::new(settings)?;
                    let sink = super::odata::ODataSink::new(settings)?;
                    Ok(Transport {
                        source: Arc::new(source),
                        sink: Arc::new(sink),
                    })
                }
                #[cfg(not(feature = "odata"))]
                {
                    let _ = settings;
                    Err(TransportError::configuration(
                        "OData backend feature not enabled",
                    ))
                }
            }
            BackendType::Local => {
                let observations = match &settings.local_data {
                    Some(path) => load_observations(path)?,
                    None => Vec::new(),
                };
                log::info!("Local backend seeded with {} observations", observations.len());
                Ok(Self::create_local(observations))
            }
        }
    }

    pub fn create_local(observations: Vec<RawObservation>) -> Transport {
        Transport {
            source: Arc::new(LocalSource::new(observations)),
            sink: Arc::new(LocalSink::new()),
        }
    }

    pub fn from_settings(settings: &SapSettings) -> TransportResult<Transport> {
        let backend = settings
            .backend
            .parse()
            .map_err(TransportError::configuration)?;
        Self::create(backend, settings)
    }
}

fn load_observations(path: &std::path::Path) -> TransportResult<Vec<RawObservation>> {
    let content = fs::read_to_string(path).map_err(|e| {
        TransportError::configuration(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        TransportError::decode(format!("Failed to parse {}: {}", path.display(), e))
    })
}
