//! Value objects for bucketed moment aggregates and derived gauge metrics

use std::collections::HashMap;

/// Attribute that must be present for a record to be emitted downstream.
pub const IDENTITY_ATTRIBUTE: &str = "entity.guid";

/// Attribute inspected to derive the `platform` dimension.
pub const PLATFORM_SOURCE_ATTRIBUTE: &str = "appName";

/// One time bucket's raw moments plus identifying attributes.
///
/// Built fresh from each query response, never mutated, dropped after one
/// estimation pass.
#[derive(Debug, Clone)]
pub struct AggregateRecord {
    /// Seconds since epoch; the moment the time bucket ends
    pub bucket_timestamp: i64,
    /// Number of raw samples folded into this bucket
    pub count: f64,
    /// Sum of raw sample values
    pub total: f64,
    /// Sum of squared raw sample values
    pub sum_of_squares: f64,
    /// Dimension name → value (facets plus the identity attribute)
    pub attributes: HashMap<String, String>,
}

impl AggregateRecord {
    /// Mean of the bucket's raw samples, or `None` when the bucket is empty.
    pub fn mean(&self) -> Option<f64> {
        if self.count > 0.0 {
            Some(self.total / self.count)
        } else {
            None
        }
    }

    /// True when the record carries the identity attribute with a
    /// non-empty value.
    pub fn has_identity(&self) -> bool {
        self.attributes
            .get(IDENTITY_ATTRIBUTE)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Cauchy-Schwarz check: `sumOfSquares >= total² / count` must hold for
    /// any real sample set. A violation indicates an upstream data defect
    /// and is logged by the controller, never panicked on.
    pub fn violates_cauchy_schwarz(&self) -> bool {
        if self.count <= 0.0 {
            return false;
        }
        self.sum_of_squares < (self.total * self.total) / self.count
    }
}

/// Derived gauge metric: the estimated breach count for one bucket.
///
/// Owned by the controller until handed to a sink, then released.
#[derive(Debug, Clone)]
pub struct DerivedMetric {
    pub name: String,
    /// Estimated breach count
    pub value: f64,
    /// Copied from the source bucket
    pub timestamp: i64,
    /// The source bucket's raw sample count
    pub total_count: f64,
    /// Derived dimension from the app-name attribute, when recognizable
    pub platform: Option<String>,
    /// Copied from the source record
    pub attributes: HashMap<String, String>,
}

impl DerivedMetric {
    /// Identity attribute value, empty string when absent.
    pub fn identity(&self) -> &str {
        self.attributes
            .get(IDENTITY_ATTRIBUTE)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Derive the platform dimension from the app-name attribute.
///
/// App names carry their platform as a substring (`myapp-android`,
/// `myapp ios production`). Anything else yields `None`.
pub fn derive_platform(attributes: &HashMap<String, String>) -> Option<String> {
    let app_name = attributes.get(PLATFORM_SOURCE_ATTRIBUTE)?;
    if app_name.contains("android") {
        Some("android".to_string())
    } else if app_name.contains("ios") {
        Some("ios".to_string())
    } else {
        None
    }
}
