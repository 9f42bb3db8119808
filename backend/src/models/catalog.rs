//! Universe of attributes that may be used for segmentation.
//!
//! The catalog is an explicit value passed to the services and the data
//! source, so tests and deployments can substitute an alternate attribute
//! universe.

use serde::{Deserialize, Serialize};

/// Description of one segmentation attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub field: String,
    pub name: String,
    pub description: String,
    /// Must always appear among the grouping attributes.
    #[serde(default)]
    pub required: bool,
    /// May anchor an analysis as its primary key.
    #[serde(default = "default_true")]
    pub primary_key_eligible: bool,
}

fn default_true() -> bool {
    true
}

/// A suggested grouping, reported with its estimated cardinality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationTemplate {
    pub level: String,
    pub attributes: Vec<String>,
    pub description: String,
    pub use_case: String,
}

/// Attribute universe and recommended groupings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeCatalog {
    pub attributes: Vec<AttributeDescriptor>,
    #[serde(default)]
    pub recommendations: Vec<CombinationTemplate>,
}

impl AttributeCatalog {
    pub fn new(attributes: Vec<AttributeDescriptor>) -> Self {
        Self {
            attributes,
            recommendations: Vec::new(),
        }
    }

    pub fn with_recommendations(mut self, recommendations: Vec<CombinationTemplate>) -> Self {
        self.recommendations = recommendations;
        self
    }

    /// The SAP IBP attributes commonly used for XYZ segmentation.
    pub fn sap_ibp() -> Self {
        let attr = |field: &str, name: &str, description: &str, required: bool| AttributeDescriptor {
            field: field.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            required,
            primary_key_eligible: true,
        };
        let combo = |level: &str, attributes: &[&str], description: &str, use_case: &str| {
            CombinationTemplate {
                level: level.to_string(),
                attributes: attributes.iter().map(|a| a.to_string()).collect(),
                description: description.to_string(),
                use_case: use_case.to_string(),
            }
        };

        Self::new(vec![
            attr("PRDID", "Product ID", "Individual product identifier", true),
            attr("LOCID", "Location ID", "Warehouse/distribution center", false),
            attr("CUSTID", "Customer ID", "Customer identifier", false),
            attr("PRDGRPID", "Product Group", "Product category/family", false),
            attr("REGIONID", "Region ID", "Geographic region", false),
            attr("SALESORGID", "Sales Organization", "Sales organization unit", false),
            attr("CHANID", "Channel ID", "Sales channel", false),
            attr("DIVID", "Division ID", "Business division", false),
        ])
        .with_recommendations(vec![
            combo(
                "Product Level",
                &["PRDID"],
                "Basic product-level segmentation",
                "Global product classification, basic inventory policies",
            ),
            combo(
                "Product-Location Level",
                &["PRDID", "LOCID"],
                "Location-specific product segmentation",
                "Location-specific safety stock, replenishment strategies",
            ),
            combo(
                "Product-Customer Level",
                &["PRDID", "CUSTID"],
                "Customer-specific product segmentation",
                "Customer-specific service levels, demand forecasting",
            ),
        ])
    }

    pub fn contains(&self, field: &str) -> bool {
        self.attributes.iter().any(|a| a.field == field)
    }

    pub fn get(&self, field: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.field == field)
    }

    pub fn fields(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.field.as_str()).collect()
    }

    pub fn primary_keys(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.primary_key_eligible)
            .map(|a| a.field.as_str())
            .collect()
    }

    pub fn is_primary_key_eligible(&self, field: &str) -> bool {
        self.get(field).map(|a| a.primary_key_eligible).unwrap_or(false)
    }

    pub fn required(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.required)
            .map(|a| a.field.as_str())
            .collect()
    }
}

impl Default for AttributeCatalog {
    fn default() -> Self {
        Self::sap_ibp()
    }
}
