//! Attribute discovery over fetched data.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::{AttributeCatalog, GroupKey, RawObservation};

/// Catalog attribute present in the data, with its cardinality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub field: String,
    pub name: String,
    pub description: String,
    pub required: bool,
    pub unique_values: usize,
}

/// A catalog recommendation whose attributes all occur in the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedCombination {
    pub level: String,
    pub attributes: Vec<String>,
    pub description: String,
    pub estimated_segments: usize,
    pub use_case: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttributeDiscovery {
    pub available_attributes: Vec<AttributeInfo>,
    pub current_data_attributes: Vec<String>,
    pub recommended_combinations: Vec<RecommendedCombination>,
}

fn distinct_keys(observations: &[RawObservation], attributes: &[String]) -> usize {
    observations
        .iter()
        .map(|obs| GroupKey::from_observation(obs, attributes))
        .collect::<HashSet<_>>()
        .len()
}

/// Distinct non-null values of one dimension.
fn unique_values(observations: &[RawObservation], attribute: &str) -> usize {
    observations
        .iter()
        .filter_map(|obs| obs.dimension(attribute))
        .collect::<HashSet<_>>()
        .len()
}

/// Which catalog attributes the data carries, and which recommended
/// groupings are possible with them.
pub fn discover_attributes(observations: &[RawObservation], catalog: &AttributeCatalog) -> AttributeDiscovery {
    let present: Vec<&str> = catalog
        .fields()
        .into_iter()
        .filter(|field| observations.iter().any(|obs| obs.has_dimension(field)))
        .collect();

    let available_attributes = catalog
        .attributes
        .iter()
        .filter(|a| present.contains(&a.field.as_str()))
        .map(|a| AttributeInfo {
            field: a.field.clone(),
            name: a.name.clone(),
            description: a.description.clone(),
            required: a.required,
            unique_values: unique_values(observations, &a.field),
        })
        .collect();

    let recommended_combinations = catalog
        .recommendations
        .iter()
        .filter(|r| r.attributes.iter().all(|a| present.contains(&a.as_str())))
        .map(|r| RecommendedCombination {
            level: r.level.clone(),
            attributes: r.attributes.clone(),
            description: r.description.clone(),
            estimated_segments: distinct_keys(observations, &r.attributes),
            use_case: r.use_case.clone(),
        })
        .collect();

    AttributeDiscovery {
        available_attributes,
        current_data_attributes: present.iter().map(|s| s.to_string()).collect(),
        recommended_combinations,
    }
}
