//! Stream registry and cross-stream rendezvous barrier.
//!
//! The registry owns one `BoundedFrameBuffer` per connected stream and a barrier
//! that a subset of streams (the sync set) passes through once per capture
//! iteration, so those streams advance in lockstep.
//!
//! # Barrier rounds
//!
//! Each round is identified by a generation number. A participant calling `sync`
//! records itself in the current round's arrival set and parks until the
//! generation moves on. The round completes when sync is enabled and every
//! member of the sync set has arrived; the completing caller bumps the
//! generation, clears the arrival set and wakes everyone. Because waiters only
//! watch the generation, a fast participant re-entering `sync` for the next
//! round cannot be confused with a stale arrival from the previous one.
//!
//! While sync is disabled, participants are held at the barrier. Enabling sync
//! releases a round whose participants have all arrived.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::{bail, Result};

use crate::buffer::BoundedFrameBuffer;
use crate::frame::Frame;
use crate::StreamId;

/// How a call to `StreamRegistry::sync` returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The stream is not in the sync set; `sync` returned immediately.
    NotParticipant,
    /// This caller completed the round and released the others.
    LastArrival,
    /// The round completed after this caller arrived.
    Released,
    /// Released early by `wake_all` or by unregistering a waiting stream.
    Woken,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReleaseCause {
    Complete,
    Forced,
}

struct BarrierState {
    sync_set: HashSet<StreamId>,
    arrived: HashSet<StreamId>,
    generation: u64,
    enabled: bool,
    last_release: ReleaseCause,
}

impl BarrierState {
    fn round_complete(&self) -> bool {
        self.enabled && !self.arrived.is_empty() && self.sync_set.is_subset(&self.arrived)
    }

    fn release(&mut self, cause: ReleaseCause) {
        self.generation = self.generation.wrapping_add(1);
        self.arrived.clear();
        self.last_release = cause;
    }
}

/// Registry of per-stream frame buffers with an optional rendezvous barrier.
///
/// Shared between capture loops, processing loops and the lifecycle owner as
/// `Arc<StreamRegistry>`.
pub struct StreamRegistry<T = Frame> {
    buffers: RwLock<HashMap<StreamId, Arc<BoundedFrameBuffer<T>>>>,
    barrier: Mutex<BarrierState>,
    released: Condvar,
}

impl<T> StreamRegistry<T> {
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            barrier: Mutex::new(BarrierState {
                sync_set: HashSet::new(),
                arrived: HashSet::new(),
                generation: 0,
                enabled: false,
                last_release: ReleaseCause::Complete,
            }),
            released: Condvar::new(),
        }
    }

    fn barrier(&self) -> MutexGuard<'_, BarrierState> {
        self.barrier.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a stream's buffer. With `participates_in_sync`, the stream joins the sync set.
    pub fn register(
        &self,
        id: StreamId,
        buffer: Arc<BoundedFrameBuffer<T>>,
        participates_in_sync: bool,
    ) -> Result<()> {
        let mut buffers = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
        if buffers.contains_key(&id) {
            bail!("stream {} is already registered", id);
        }
        if participates_in_sync {
            self.barrier().sync_set.insert(id.clone());
        }
        log::debug!(
            "registry: registered stream {} (capacity={}, sync={})",
            id,
            buffer.capacity(),
            participates_in_sync
        );
        buffers.insert(id, buffer);
        Ok(())
    }

    /// Remove a stream's buffer and drop it from the sync set.
    ///
    /// If the remaining arrivals now cover the whole sync set, or the removed stream
    /// was itself parked in `sync`, the current round is released.
    pub fn unregister(&self, id: &StreamId) -> Option<Arc<BoundedFrameBuffer<T>>> {
        let removed = self
            .buffers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        let mut state = self.barrier();
        if state.sync_set.remove(id) {
            let was_waiting = state.arrived.remove(id);
            if was_waiting {
                state.release(ReleaseCause::Forced);
                self.released.notify_all();
            } else if state.round_complete() {
                state.release(ReleaseCause::Complete);
                self.released.notify_all();
            }
        }
        drop(state);

        if removed.is_some() {
            log::debug!("registry: unregistered stream {}", id);
        }
        removed
    }

    /// Rendezvous with the other streams of the sync set.
    ///
    /// Returns immediately for streams outside the sync set. Otherwise blocks until
    /// the current round completes or the owner calls `wake_all`.
    pub fn sync(&self, id: &StreamId) -> SyncOutcome {
        let mut state = self.barrier();
        if !state.sync_set.contains(id) {
            return SyncOutcome::NotParticipant;
        }

        state.arrived.insert(id.clone());
        if state.round_complete() {
            state.release(ReleaseCause::Complete);
            drop(state);
            self.released.notify_all();
            return SyncOutcome::LastArrival;
        }

        let generation = state.generation;
        while state.generation == generation {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match state.last_release {
            ReleaseCause::Complete => SyncOutcome::Released,
            ReleaseCause::Forced => SyncOutcome::Woken,
        }
    }

    pub fn set_sync_enabled(&self, enable: bool) {
        let mut state = self.barrier();
        state.enabled = enable;
        if state.round_complete() {
            state.release(ReleaseCause::Complete);
            self.released.notify_all();
        }
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.barrier().enabled
    }

    /// Release every participant currently parked in `sync`, e.g. before joining threads.
    pub fn wake_all(&self) {
        let mut state = self.barrier();
        if !state.arrived.is_empty() {
            state.release(ReleaseCause::Forced);
        }
        drop(state);
        self.released.notify_all();
    }

    /// True when `id` is a member of the sync set.
    pub fn is_participant(&self, id: &StreamId) -> bool {
        self.barrier().sync_set.contains(id)
    }

    pub fn get(&self, id: &StreamId) -> Option<Arc<BoundedFrameBuffer<T>>> {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &StreamId) -> bool {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of participants parked in the current round.
    pub fn arrived_count(&self) -> usize {
        self.barrier().arrived.len()
    }

    /// Number of completed or forced barrier rounds so far.
    pub fn generation(&self) -> u64 {
        self.barrier().generation
    }

    /// Registered stream ids, sorted.
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self
            .buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Members of the sync set, sorted.
    pub fn participants(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.barrier().sync_set.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for StreamRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
