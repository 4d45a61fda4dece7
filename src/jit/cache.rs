use std::sync::{Arc, RwLock, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap};
use tracing::{debug, trace};

use crate::cpu::{Mode};
use crate::graph::{Run};
use super::{CodeBlock, Procedure};

/// Counts how the cache has been used.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Lookups that found an equal procedure.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Lookups that found only procedures with the same hash.
    pub collisions: u64,
    /// Procedures added.
    pub publishes: u64,
}

/// The [`Procedure`]s of one [`Mode`] whose microcodes have the same hash.
#[derive(Debug, Default)]
struct Bucket {
    procedures: Vec<Arc<Procedure>>,
    /// The number of procedures ever added. Never decreases, so that names
    /// are not reused after an eviction.
    added: usize,
}

impl Bucket {
    /// Returns the procedure compiled from the same run as `procedure`.
    fn find(&self, procedure: &Procedure) -> Option<Arc<Procedure>> {
        self.procedures.iter()
            .find(|p| p.microcodes() == procedure.microcodes() && p.positions() == procedure.positions())
            .cloned()
    }
}

/// The shared store of compiled [`Procedure`]s. Each [`Mode`] has its own
/// namespace. Within a namespace, procedures are bucketed by the hash of
/// their microcodes, and a bucket is searched by full equality of the
/// microcodes and positions.
///
/// Construct one and share it through an `Arc`.
#[derive(Debug, Default)]
pub struct ProcedureCache {
    buckets: RwLock<IndexMap<(Mode, i32), Bucket>>,
    hits: AtomicU64,
    misses: AtomicU64,
    collisions: AtomicU64,
    publishes: AtomicU64,
}

impl ProcedureCache {
    pub fn new() -> Self { Self::default() }

    /// Returns the [`Procedure`] compiled from exactly `run` in `mode`.
    pub fn lookup(&self, mode: Mode, run: &Run) -> Option<Arc<Procedure>> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        match buckets.get(&(mode, run.hash())) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            },
            Some(bucket) => {
                if let Some(p) = bucket.procedures.iter().find(|p| p.matches(run)) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(name = p.name(), "cache hit");
                    Some(p.clone())
                } else {
                    self.collisions.fetch_add(1, Ordering::Relaxed);
                    debug!(hash = run.hash(), candidates = bucket.procedures.len(), "hash collision");
                    None
                }
            },
        }
    }

    /// Adds `procedure` under its own name, unless an equal one was added
    /// first, in which case that one is returned instead.
    pub fn publish(&self, procedure: Arc<Procedure>) -> Arc<Procedure> {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry((procedure.mode(), procedure.hash())).or_default();
        if let Some(existing) = bucket.find(&procedure) { return existing; }
        self.add(bucket, procedure)
    }

    /// Like [`publish()`](Self::publish), but names `procedure` after its
    /// mode and hash, with a `_n` suffix for all but the first procedure
    /// ever added to its bucket. The name is chosen with the cache locked,
    /// so racing publishers never get the same one.
    pub fn publish_generated(&self, mut procedure: Procedure) -> Arc<Procedure> {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry((procedure.mode(), procedure.hash())).or_default();
        if let Some(existing) = bucket.find(&procedure) { return existing; }
        let mut name = format!("{}{}", procedure.mode().prefix(), procedure.hash());
        if bucket.added > 0 { name.push_str(&format!("_{}", bucket.added)); }
        procedure.set_name(name);
        self.add(bucket, Arc::new(procedure))
    }

    fn add(&self, bucket: &mut Bucket, procedure: Arc<Procedure>) -> Arc<Procedure> {
        self.publishes.fetch_add(1, Ordering::Relaxed);
        trace!(name = procedure.name(), "published");
        bucket.procedures.push(procedure.clone());
        bucket.added += 1;
        procedure
    }

    /// The number of [`Procedure`]s in all namespaces.
    pub fn len(&self) -> usize {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.values().map(|b| b.procedures.len()).sum()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// The names of all [`Procedure`]s, in the order they were added to their
    /// buckets.
    pub fn names(&self) -> Vec<String> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.values().flat_map(|b| &b.procedures).map(|p| p.name().to_owned()).collect()
    }

    /// Removes the [`Procedure`] called `name` from the namespace of `mode`.
    /// Returns whether there was one. Holders of it can still run it.
    pub fn evict(&self, mode: Mode, name: &str) -> bool {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        for (&(m, _), bucket) in buckets.iter_mut() {
            if m != mode { continue; }
            if let Some(i) = bucket.procedures.iter().position(|p| p.name() == name) {
                bucket.procedures.remove(i);
                return true;
            }
        }
        false
    }

    pub fn clear(&self) {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
        }
    }
}
