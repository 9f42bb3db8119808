//! Z-score outlier filtering within groups.

use std::collections::BTreeMap;

use super::statistics::{mean, partition, population_std};
use crate::models::{GroupKey, RawObservation};

/// Groups smaller than this pass through untouched.
pub const MIN_GROUP_SIZE_FOR_OUTLIERS: usize = 3;

/// Observations that survived filtering, in input order.
#[derive(Debug, Clone)]
pub struct OutlierRemoval<'a> {
    pub retained: Vec<&'a RawObservation>,
    pub removed: usize,
}

/// Drop observations whose |z| within their group reaches `threshold`.
///
/// z is computed against the group's population standard deviation. A group
/// whose values are all equal has no spread and keeps every row. Filtering is
/// applied once and is not repeated on the reduced data.
pub fn remove_outliers<'a>(
    observations: &'a [RawObservation],
    attributes: &[String],
    threshold: f64,
) -> OutlierRemoval<'a> {
    let bounds: BTreeMap<GroupKey, Option<(f64, f64)>> = partition(observations, attributes)
        .into_iter()
        .map(|(key, values)| {
            let spread = if values.len() < MIN_GROUP_SIZE_FOR_OUTLIERS {
                None
            } else {
                match (mean(&values), population_std(&values)) {
                    (Some(m), Some(s)) if s > 0.0 => Some((m, s)),
                    _ => None,
                }
            };
            (key, spread)
        })
        .collect();

    let mut retained = Vec::with_capacity(observations.len());
    let mut removed = 0;
    for obs in observations {
        let key = GroupKey::from_observation(obs, attributes);
        let keep = match bounds.get(&key).copied().flatten() {
            Some((m, s)) => ((obs.quantity - m) / s).abs() < threshold,
            None => true,
        };
        if keep {
            retained.push(obs);
        } else {
            removed += 1;
        }
    }

    if removed > 0 {
        log::info!("Removed {} outliers (|z| >= {})", removed, threshold);
    }

    OutlierRemoval { retained, removed }
}
