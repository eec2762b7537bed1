//! Per-document in-flight markers.
//!
//! When enabled (`pool.exclusive_documents`), a document can only have one
//! processing run in flight. A marker older than the configured timeout is
//! treated as abandoned and taken over, so a crashed run never blocks a
//! document forever.

use crate::types::DocumentId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Marker {
    started: Instant,
    generation: u64,
}

/// Tracks which documents currently have a run in flight.
#[derive(Debug)]
pub struct InFlightGuard {
    markers: Arc<DashMap<DocumentId, Marker>>,
    timeout: Duration,
    generation: AtomicU64,
}

impl InFlightGuard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            markers: Arc::new(DashMap::new()),
            timeout,
            generation: AtomicU64::new(0),
        }
    }

    /// Mark `id` as in flight. Returns `None` if a live marker already exists.
    pub fn try_acquire(&self, id: DocumentId) -> Option<InFlightTicket> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let marker = Marker {
            started: Instant::now(),
            generation,
        };

        match self.markers.entry(id) {
            Entry::Occupied(mut occupied) => {
                let age = occupied.get().started.elapsed();
                if age < self.timeout {
                    return None;
                }
                tracing::warn!(
                    document_id = %id,
                    age_secs = age.as_secs(),
                    "Taking over stale in-flight marker"
                );
                occupied.insert(marker);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(marker);
            }
        }

        Some(InFlightTicket {
            markers: Arc::clone(&self.markers),
            id,
            generation,
        })
    }

    pub fn is_in_flight(&self, id: DocumentId) -> bool {
        self.markers
            .get(&id)
            .is_some_and(|marker| marker.started.elapsed() < self.timeout)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// Releases the in-flight marker when dropped.
///
/// A ticket whose marker was taken over after a timeout leaves the newer
/// marker in place.
#[derive(Debug)]
pub struct InFlightTicket {
    markers: Arc<DashMap<DocumentId, Marker>>,
    id: DocumentId,
    generation: u64,
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.markers
            .remove_if(&self.id, |_, marker| marker.generation == self.generation);
    }
}
