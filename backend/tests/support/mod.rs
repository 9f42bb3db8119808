#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use ibp_xyz::config::AppConfig;
use ibp_xyz::models::RawObservation;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// This is panic-safe (restores variables on unwind) and also serializes access to
/// process-global env vars to avoid flaky tests when Rust runs tests in parallel.
///
/// `changes` is a list of `(key, value)` pairs:
/// - `Some(v)` sets the variable to `v`
/// - `None` removes the variable
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

/// Monthly history of one product at one location.
pub fn series(product: &str, location: &str, values: &[f64]) -> Vec<RawObservation> {
    values
        .iter()
        .enumerate()
        .map(|(i, q)| {
            RawObservation::new(*q)
                .with_dimension("PRDID", product)
                .with_dimension("LOCID", location)
                .with_period(format!("2024-{:02}-01T00:00:00", i + 1))
        })
        .collect()
}

/// Four products: A stable (X), B moderate (Y), C volatile (Z) and D with
/// only three periods.
pub fn demand_history() -> Vec<RawObservation> {
    let mut rows = series("A", "1720", &[100.0, 102.0, 98.0, 101.0, 99.0, 100.0]);
    rows.extend(series("B", "1720", &[100.0, 120.0, 80.0, 110.0, 90.0, 100.0]));
    rows.extend(series("C", "1720", &[10.0, 100.0, 20.0, 90.0, 5.0, 75.0]));
    rows.extend(series("D", "1720", &[10.0, 12.0, 11.0]));
    rows
}

/// `n` stable products with six periods each.
pub fn many_products(n: usize) -> Vec<RawObservation> {
    (0..n)
        .flat_map(|i| series(&format!("P{:04}", i), "1720", &[50.0, 51.0, 49.0, 50.0, 52.0, 48.0]))
        .collect()
}

/// Local-backend configuration with write-back settings filled in.
pub fn write_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.sap.backend = "local".to_string();
    config.sap.planning_area = Some("SAPIBP1".to_string());
    config.sap.key_figure = Some("XYZSEGMENT".to_string());
    config
}
