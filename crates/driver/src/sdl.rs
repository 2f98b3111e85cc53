//! Shared-data layer seam
//!
//! Per-UE signal metrics live in an external key/value store. The real
//! backend is deployment-provided; this module defines the lookup contract
//! and an in-memory implementation used for testing and degraded mode.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use qpdriver_common::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key/value lookup contract for the shared-data layer
///
/// `get` blocks on external I/O in the real backend, so callers run it off
/// the async runtime's core threads.
pub trait SharedData: Send + Sync {
    /// Fetch the raw record stored under `namespace` / `key`, if any
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Signal-quality measurements for one UE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UeMetrics {
    /// Reference signal received power
    pub rsrp: i64,

    /// Reference signal received quality
    pub rsrq: i64,

    /// Received signal strength to interference-and-noise ratio
    pub rssinr: i64,
}

lazy_static! {
    /// Static fallback metrics for degraded/test mode
    ///
    /// Values mirror the reference data set for one cell's active UE set.
    static ref FALLBACK_UE_METRICS: Vec<(&'static str, UeMetrics)> = vec![
        ("257", UeMetrics { rsrp: 74, rsrq: 65, rssinr: 113 }),
        ("258", UeMetrics { rsrp: 45, rsrq: 28, rssinr: 78 }),
        ("259", UeMetrics { rsrp: 57, rsrq: 47, rssinr: 89 }),
        ("260", UeMetrics { rsrp: 98, rsrq: 83, rssinr: 134 }),
        ("261", UeMetrics { rsrp: 85, rsrq: 69, rssinr: 99 }),
        ("262", UeMetrics { rsrp: 34, rsrq: 19, rssinr: 59 }),
        ("264", UeMetrics { rsrp: 67, rsrq: 46, rssinr: 82 }),
        ("265", UeMetrics { rsrp: 36, rsrq: 22, rssinr: 70 }),
    ];
}

/// In-memory shared-data store
///
/// Used for unit tests and local runs with `use_fake_sdl` enabled.
#[derive(Debug, Default)]
pub struct FakeSdl {
    store: RwLock<HashMap<String, Vec<u8>>>,
}

impl FakeSdl {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the fallback UE metrics
    pub fn with_fallback_metrics(namespace: &str) -> Self {
        let sdl = Self::new();
        for (ueid, metrics) in FALLBACK_UE_METRICS.iter() {
            // Serializing a plain metrics struct cannot fail
            let bytes = serde_json::to_vec(metrics).unwrap_or_default();
            sdl.put(namespace, ueid, bytes);
        }
        sdl
    }

    /// Store a record
    pub fn put(&self, namespace: &str, key: &str, value: Vec<u8>) {
        self.store
            .write()
            .insert(Self::storage_key(namespace, key), value);
    }

    /// Remove a record
    pub fn remove(&self, namespace: &str, key: &str) {
        self.store.write().remove(&Self::storage_key(namespace, key));
    }

    fn storage_key(namespace: &str, key: &str) -> String {
        format!("{}|{}", namespace, key)
    }
}

impl SharedData for FakeSdl {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .store
            .read()
            .get(&Self::storage_key(namespace, key))
            .cloned())
    }
}
