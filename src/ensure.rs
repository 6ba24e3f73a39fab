//! Ensure comparison for ManifestWorks
//!
//! Decides whether an existing ManifestWork already satisfies the desired one
//! and, if not, produces the object to write. Only fields the desired builder
//! authors are compared:
//!
//! - `metadata.labels` and `metadata.annotations`: every desired entry must be
//!   present in the existing object (extra existing entries are fine)
//! - `spec`: semantic-derivative comparison, fields the desired object leaves
//!   unset are ignored, lists must have the same length
//!
//! System-managed fields (resourceVersion, uid, generation, managedFields,
//! status) never cause a write.
//!
//! Comparisons are memoised in a [`ComparisonCache`] shared by all workers.
//! A cache miss only costs a recomputation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aws_lc_rs::digest::{digest, SHA256};
use dashmap::DashMap;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::crd::{ManifestWork, ManifestWorkSpec};
use crate::Result;

/// Default number of memoised comparisons
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Default lifetime of a memoised comparison
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Clone, Copy, Debug)]
struct CachedComparison {
    needs_write: bool,
    recorded_at: Instant,
}

/// Bounded, concurrency-safe memo of comparison results keyed by fingerprint
///
/// Entries expire after `ttl`. When full, expired entries are dropped first,
/// then the oldest entry. A capacity of zero disables caching.
pub struct ComparisonCache {
    entries: DashMap<String, CachedComparison>,
    capacity: usize,
    ttl: Duration,
}

impl Default for ComparisonCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}

impl ComparisonCache {
    /// Create a cache holding at most `capacity` entries for `ttl` each
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Cached result for `fingerprint`, if present and fresh
    pub fn get(&self, fingerprint: &str) -> Option<bool> {
        // Copy out before touching the map again; holding a Ref across
        // remove() on the same shard deadlocks.
        let entry = self.entries.get(fingerprint).map(|e| *e)?;
        if entry.recorded_at.elapsed() > self.ttl {
            self.entries.remove(fingerprint);
            return None;
        }
        Some(entry.needs_write)
    }

    /// Record the comparison result for `fingerprint`
    pub fn insert(&self, fingerprint: String, needs_write: bool) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&fingerprint) && self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.insert(
            fingerprint,
            CachedComparison {
                needs_write,
                recorded_at: Instant::now(),
            },
        );
    }

    fn evict(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.recorded_at.elapsed() <= ttl);
        if self.entries.len() < self.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().recorded_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of an ensure comparison
#[derive(Clone, Debug)]
pub struct EnsureOutcome {
    /// True if the existing object diverges from the desired one
    pub needs_write: bool,
    /// Existing object with the desired authored fields overlaid
    ///
    /// Keeps the existing name, namespace, uid and resourceVersion, so it can
    /// be sent as an update as-is.
    pub merged: ManifestWork,
}

/// The fields of a ManifestWork the desired builder authors
#[derive(Serialize)]
struct Authored<'a> {
    labels: &'a BTreeMap<String, String>,
    annotations: &'a BTreeMap<String, String>,
    spec: &'a ManifestWorkSpec,
}

impl<'a> Authored<'a> {
    fn of(work: &'a ManifestWork) -> Self {
        Self {
            labels: work.labels(),
            annotations: work.annotations(),
            spec: &work.spec,
        }
    }
}

/// Compares existing and desired ManifestWorks on authored fields
#[derive(Clone, Default)]
pub struct EnsureEngine {
    cache: Arc<ComparisonCache>,
}

impl EnsureEngine {
    /// Create an engine sharing the given comparison cache
    pub fn new(cache: Arc<ComparisonCache>) -> Self {
        Self { cache }
    }

    /// Decide whether `existing` must be rewritten to match `desired`
    pub fn ensure(&self, existing: &ManifestWork, desired: &ManifestWork) -> Result<EnsureOutcome> {
        let desired_bytes = serde_json::to_vec(&Authored::of(desired))?;
        let key = fingerprint(existing, &desired_bytes)?;

        let needs_write = match self.cache.get(&key) {
            Some(cached) => {
                trace!(work = %existing.name_any(), "comparison cache hit");
                cached
            }
            None => {
                let diverged = diverges(existing, desired)?;
                self.cache.insert(key, diverged);
                diverged
            }
        };

        let merged = if needs_write {
            merge(existing, desired)
        } else {
            existing.clone()
        };

        Ok(EnsureOutcome {
            needs_write,
            merged,
        })
    }
}

/// Fingerprint of (existing, desired authored content)
///
/// The existing side is identified by its resourceVersion, which changes on
/// every write. Objects without one (never persisted) are hashed by content.
fn fingerprint(existing: &ManifestWork, desired_authored: &[u8]) -> Result<String> {
    let mut input = Vec::with_capacity(desired_authored.len() + 128);
    input.extend_from_slice(existing.namespace().unwrap_or_default().as_bytes());
    input.push(b'/');
    input.extend_from_slice(existing.name_any().as_bytes());
    input.push(0);
    match existing.resource_version() {
        Some(rv) => {
            input.extend_from_slice(b"rv:");
            input.extend_from_slice(rv.as_bytes());
        }
        None => {
            input.extend_from_slice(b"content:");
            input.extend_from_slice(&serde_json::to_vec(&Authored::of(existing))?);
        }
    }
    input.push(0);
    input.extend_from_slice(desired_authored);

    let hash = digest(&SHA256, &input);
    Ok(hash
        .as_ref()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        }))
}

fn diverges(existing: &ManifestWork, desired: &ManifestWork) -> Result<bool> {
    if !map_contains(existing.labels(), desired.labels())
        || !map_contains(existing.annotations(), desired.annotations())
    {
        return Ok(true);
    }
    let desired_spec = serde_json::to_value(&desired.spec)?;
    let existing_spec = serde_json::to_value(&existing.spec)?;
    Ok(!derivative_eq(&desired_spec, &existing_spec))
}

fn map_contains(existing: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> bool {
    desired
        .iter()
        .all(|(k, v)| existing.get(k).is_some_and(|ev| ev == v))
}

fn merge(existing: &ManifestWork, desired: &ManifestWork) -> ManifestWork {
    let mut merged = existing.clone();
    merged
        .labels_mut()
        .extend(desired.labels().iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
        .annotations_mut()
        .extend(desired.annotations().iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.spec = desired.spec.clone();
    merged
}

/// True if `existing` satisfies every field set in `desired`
///
/// `null` and absent fields in `desired` match anything; arrays must match
/// element-wise with equal length; scalars must be equal.
pub fn derivative_eq(desired: &Value, existing: &Value) -> bool {
    match (desired, existing) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(e)) => d.iter().all(|(key, dv)| match e.get(key) {
            Some(ev) => derivative_eq(dv, ev),
            None => dv.is_null(),
        }),
        (Value::Array(d), Value::Array(e)) => {
            d.len() == e.len() && d.iter().zip(e).all(|(dv, ev)| derivative_eq(dv, ev))
        }
        (d, e) => d == e,
    }
}
