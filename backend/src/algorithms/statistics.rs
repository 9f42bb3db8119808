//! Per-group descriptive statistics.

use std::collections::BTreeMap;

use crate::models::{GroupKey, GroupStats, RawObservation};

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn sum_squared_deviations(values: &[f64], mean: f64) -> f64 {
    values
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum()
}

/// Sample standard deviation (n−1 denominator). Undefined below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    Some((sum_squared_deviations(values, m) / (values.len() - 1) as f64).sqrt())
}

/// Population standard deviation (n denominator).
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some((sum_squared_deviations(values, m) / values.len() as f64).sqrt())
}

/// Quantities partitioned by group key, in observation order within a group.
pub fn partition<'a, I>(observations: I, attributes: &[String]) -> BTreeMap<GroupKey, Vec<f64>>
where
    I: IntoIterator<Item = &'a RawObservation>,
{
    let mut groups: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();
    for obs in observations {
        groups
            .entry(GroupKey::from_observation(obs, attributes))
            .or_default()
            .push(obs.quantity);
    }
    groups
}

/// Mean, sample std and count for every combination of `attributes`.
///
/// The result is ordered by group key so repeated runs over the same input
/// yield identical output.
pub fn group_statistics<'a, I>(observations: I, attributes: &[String]) -> BTreeMap<GroupKey, GroupStats>
where
    I: IntoIterator<Item = &'a RawObservation>,
{
    partition(observations, attributes)
        .into_iter()
        .filter_map(|(key, values)| {
            let stats = GroupStats {
                mean: mean(&values)?,
                std: sample_std(&values),
                count: values.len(),
            };
            Some((key, stats))
        })
        .collect()
}

/// First non-null period seen for each group, in observation order.
pub fn first_period_by_group<'a, I>(observations: I, attributes: &[String]) -> BTreeMap<GroupKey, String>
where
    I: IntoIterator<Item = &'a RawObservation>,
{
    let mut periods = BTreeMap::new();
    for obs in observations {
        if let Some(period) = &obs.period {
            periods
                .entry(GroupKey::from_observation(obs, attributes))
                .or_insert_with(|| period.clone());
        }
    }
    periods
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(product: &str, quantity: f64) -> RawObservation {
        RawObservation::new(quantity).with_dimension("PRDID", product)
    }

    #[test]
    fn test_sample_and_population_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), Some(5.0));
        assert!((population_std(&values).unwrap() - 2.0).abs() < 1e-12);
        assert!((sample_std(&values).unwrap() - 2.138089935).abs() < 1e-9);
    }

    #[test]
    fn test_single_value_has_no_sample_std() {
        assert_eq!(sample_std(&[42.0]), None);
        assert_eq!(population_std(&[42.0]), Some(0.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_group_statistics_partitions_by_key() {
        let rows = vec![obs("B", 10.0), obs("A", 1.0), obs("A", 3.0), obs("B", 10.0)];
        let stats = group_statistics(&rows, &["PRDID".to_string()]);
        let keys: Vec<String> = stats.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["(A)", "(B)"]);

        let a = stats[&GroupKey(vec![Some("A".into())])];
        assert_eq!(a.count, 2);
        assert_eq!(a.mean, 2.0);
        assert!((a.std.unwrap() - std::f64::consts::SQRT_2).abs() < 1e-12);

        let b = stats[&GroupKey(vec![Some("B".into())])];
        assert_eq!(b.std, Some(0.0));
    }

    #[test]
    fn test_null_dimension_forms_its_own_group() {
        let rows = vec![
            obs("A", 1.0),
            RawObservation::new(5.0).with_null_dimension("PRDID"),
        ];
        let stats = group_statistics(&rows, &["PRDID".to_string()]);
        assert_eq!(stats.len(), 2);
        assert!(stats.contains_key(&GroupKey(vec![None])));
    }

    #[test]
    fn test_first_period_skips_missing() {
        let rows = vec![
            obs("A", 1.0),
            obs("A", 2.0).with_period("2024-02-01T00:00:00"),
            obs("A", 3.0).with_period("2024-01-01T00:00:00"),
        ];
        let periods = first_period_by_group(&rows, &["PRDID".to_string()]);
        assert_eq!(
            periods.get(&GroupKey(vec![Some("A".into())])).map(String::as_str),
            Some("2024-02-01T00:00:00")
        );
    }
}
