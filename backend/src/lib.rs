//! # IBP XYZ Segmentation Backend
//!
//! Demand-variability segmentation for SAP IBP planning data, with
//! transactional write-back of the resulting segments.
//!
//! Each combination of grouping attributes (product, product-location,
//! product-customer, ...) is classified by its coefficient of variation into
//! X (stable), Y (moderate) or Z (highly variable) demand. The result can be
//! written back to a key figure through the planning data import API in one
//! request, in sequential batches, or in concurrent batches.
//!
//! ## Architecture
//!
//! - [`algorithms`]: group statistics, outlier removal and CV classification
//! - [`models`]: observations, configuration, results and write payloads
//! - [`services`]: segmentation engine, preview, payload building, dispatch
//!   and the write-back orchestration
//! - [`sap`]: `DataSource`/`DataSink` transport traits with OData and
//!   in-memory implementations
//! - [`config`]: settings from the environment and an optional TOML file
//! - [`http`]: Axum-based HTTP server and request handlers
//!

// Allow large error types - TransportError carries rich context for debugging
#![allow(clippy::result_large_err)]

pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod sap;
pub mod services;

#[cfg(feature = "http-server")]
pub mod http;
