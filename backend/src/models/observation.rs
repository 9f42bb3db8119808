use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One time-series data point fetched from the planning system.
///
/// Dimension values are keyed by attribute name (e.g. `PRDID`, `LOCID`). A
/// dimension that was requested but has no value is present with `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub dimensions: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub period: Option<String>,
    pub quantity: f64,
}

impl RawObservation {
    pub fn new(quantity: f64) -> Self {
        Self {
            dimensions: BTreeMap::new(),
            period: None,
            quantity,
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(name.into(), Some(value.into()));
        self
    }

    pub fn with_null_dimension(mut self, name: impl Into<String>) -> Self {
        self.dimensions.insert(name.into(), None);
        self
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    /// Value of a dimension, `None` when absent or null.
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions.get(name).and_then(|v| v.as_deref())
    }

    /// Whether the dimension key is present (even with a null value).
    pub fn has_dimension(&self, name: &str) -> bool {
        self.dimensions.contains_key(name)
    }
}

/// Tuple of dimension values identifying one group.
///
/// Values are positional and follow the order of the grouping attributes the
/// key was built from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(pub Vec<Option<String>>);

impl GroupKey {
    pub fn from_observation(observation: &RawObservation, attributes: &[String]) -> Self {
        GroupKey(
            attributes
                .iter()
                .map(|attr| observation.dimension(attr).map(str::to_string))
                .collect(),
        )
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|v| v.as_deref())
    }

    /// Pair each value with its attribute name.
    pub fn labelled<'a>(&'a self, attributes: &'a [String]) -> Vec<(&'a str, Option<&'a str>)> {
        attributes
            .iter()
            .zip(self.0.iter())
            .map(|(attr, value)| (attr.as_str(), value.as_deref()))
            .collect()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .0
            .iter()
            .map(|v| v.as_deref().unwrap_or("<null>"))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_follows_attribute_order() {
        let obs = RawObservation::new(5.0)
            .with_dimension("PRDID", "P1")
            .with_dimension("LOCID", "L1");
        let key = GroupKey::from_observation(&obs, &["LOCID".to_string(), "PRDID".to_string()]);
        assert_eq!(key.get(0), Some("L1"));
        assert_eq!(key.get(1), Some("P1"));
        assert_eq!(key.to_string(), "(L1, P1)");
    }

    #[test]
    fn test_null_dimension_is_present_but_valueless() {
        let obs = RawObservation::new(1.0).with_null_dimension("CUSTID");
        assert!(obs.has_dimension("CUSTID"));
        assert_eq!(obs.dimension("CUSTID"), None);
        let key = GroupKey::from_observation(&obs, &["CUSTID".to_string()]);
        assert_eq!(key.values(), &[None]);
    }
}
