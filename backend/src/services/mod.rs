//! Service layer: analysis orchestration, discovery, payload building and
//! write-back dispatch.
//!
//! Services are plain functions and structs over the [`crate::sap`] traits;
//! the HTTP layer and tests drive them with any source or sink.

pub mod analysis;
pub mod attributes;
pub mod dispatcher;
pub mod payload;
pub mod preview;
pub mod segmentation;
pub mod writeback;

pub use analysis::{blocking, fetch_observations, run_analysis};
pub use attributes::{discover_attributes, AttributeDiscovery, AttributeInfo, RecommendedCombination};
pub use dispatcher::{batch_ranges, BatchDispatcher, DispatchOptions};
pub use payload::{normalize_period, parse_records, PayloadBuilder};
pub use preview::preview;
pub use segmentation::{analyze, check_catalog, check_required, missing_attributes, segment_details};
pub use writeback::{DebugPayload, ResolvedWrite, WriteDefaults, WritebackService};
