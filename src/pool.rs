//! Pool of exclusive compute workers.
//!
//! Each worker wraps one externally loaded resource (typically a detector model bound
//! to one accelerator). Workers are built once by `initialize` and live as long as the
//! pool; only their busy flags change.
//!
//! # Permit pairs
//!
//! The general pool is accounted by two semaphores:
//!
//! - `available`: workers that can be handed out right now
//! - `vacant`: workers currently handed out that may be given back
//!
//! `acquire` takes `available`, marks a worker leased under the pool mutex, then gives
//! `vacant`. `release` never waits: it takes the leased worker's `vacant` token, marks it
//! idle and gives `available`. A worker that started parked (beyond `capacity_limit`) has
//! no token to take; releasing it just adds it to the pool. The optional fast-path worker
//! has its own single-slot pair, so the stream using it never queues behind general-pool
//! contention.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail, Context, Result};

use crate::semaphore::{Interrupted, Semaphore};
use crate::DeviceId;

/// Identifies one worker: the device it is bound to and its index on that device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerKey {
    pub device: DeviceId,
    pub index: usize,
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.device, self.index)
    }
}

/// Pool sizing.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Workers created per device.
    pub workers_per_device: usize,
    /// Set the last created worker aside for `acquire_fast_path`.
    pub reserve_fast_path: bool,
    /// Cap on general-pool capacity. Workers beyond the cap start unavailable.
    pub capacity_limit: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers_per_device: 1,
            reserve_fast_path: true,
            capacity_limit: None,
        }
    }
}

struct WorkerSlot<W> {
    key: WorkerKey,
    resource: Mutex<W>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Idle,
    Leased,
    /// Created beyond `capacity_limit`; joins the pool on its first `release`.
    Parked,
}

pub struct WorkerPool<W> {
    slots: Vec<WorkerSlot<W>>,
    /// Per slot, same order as `slots`.
    states: Mutex<Vec<SlotState>>,
    capacity: AtomicUsize,
    reserved: Option<usize>,
    available: Semaphore,
    vacant: Semaphore,
    fast_available: Semaphore,
    fast_vacant: Semaphore,
}

impl<W> WorkerPool<W> {
    /// Build one worker per (device, index) pair.
    ///
    /// `factory` loads whatever the worker wraps. The first failure aborts initialization
    /// and every worker built so far is dropped; no partial pool is returned.
    pub fn initialize<F>(devices: &[DeviceId], config: &PoolConfig, mut factory: F) -> Result<Self>
    where
        F: FnMut(DeviceId, usize) -> Result<W>,
    {
        if devices.is_empty() {
            bail!("worker pool needs at least one device");
        }
        if config.workers_per_device == 0 {
            bail!("workers_per_device must be greater than zero");
        }
        let mut seen = HashSet::new();
        for device in devices {
            if !seen.insert(*device) {
                bail!("device {} is listed twice", device);
            }
        }

        let total = devices.len() * config.workers_per_device;
        let mut slots = Vec::with_capacity(total);
        for &device in devices {
            for index in 0..config.workers_per_device {
                let key = WorkerKey { device, index };
                let resource = factory(device, index)
                    .with_context(|| format!("failed to initialize worker {}", key))?;
                log::debug!("worker pool: created worker {}", key);
                slots.push(WorkerSlot {
                    key,
                    resource: Mutex::new(resource),
                });
            }
        }

        let reserved = config.reserve_fast_path.then(|| total - 1);
        let general = total - usize::from(reserved.is_some());
        let capacity = config
            .capacity_limit
            .map_or(general, |limit| limit.min(general));
        if capacity == 0 {
            log::warn!(
                "worker pool: general capacity is zero; only the fast path can run detections"
            );
        }

        // The first `capacity` general workers start idle, the rest start parked.
        let states = (0..total)
            .map(|i| {
                if Some(i) != reserved && i >= capacity {
                    SlotState::Parked
                } else {
                    SlotState::Idle
                }
            })
            .collect();

        let fast_permits = usize::from(reserved.is_some());
        log::info!(
            "worker pool: {} workers on {} devices, capacity={}, fast_path={}",
            total,
            devices.len(),
            capacity,
            reserved.map_or_else(|| "none".to_string(), |i| slots[i].key.to_string())
        );

        Ok(Self {
            slots,
            states: Mutex::new(states),
            capacity: AtomicUsize::new(capacity),
            reserved,
            available: Semaphore::new(capacity),
            vacant: Semaphore::new(0),
            fast_available: Semaphore::new(fast_permits),
            fast_vacant: Semaphore::new(0),
        })
    }

    fn states(&self) -> MutexGuard<'_, Vec<SlotState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_of(&self, key: WorkerKey) -> Option<usize> {
        self.slots.iter().position(|slot| slot.key == key)
    }

    /// Borrow a general-pool worker, blocking while none is available.
    ///
    /// # Panics
    ///
    /// Panics if a permit was granted but no worker is idle; that means the permit
    /// count and the slot states diverged.
    pub fn acquire(&self) -> Result<WorkerKey, Interrupted> {
        self.available.acquire()?;
        let mut states = self.states();
        let index = (0..self.slots.len())
            .find(|&i| Some(i) != self.reserved && states[i] == SlotState::Idle)
            .unwrap_or_else(|| panic!("worker pool granted a permit but no worker is idle"));
        states[index] = SlotState::Leased;
        // Give the token while the slot lock is held so a leased slot always has one.
        self.vacant.release();
        Ok(self.slots[index].key)
    }

    /// Return a general-pool worker. Never blocks.
    ///
    /// Returning a worker that started parked adds it to the pool and grows `capacity`.
    pub fn release(&self, key: WorkerKey) -> Result<()> {
        let index = self
            .index_of(key)
            .ok_or_else(|| anyhow!("unknown worker {}", key))?;
        if Some(index) == self.reserved {
            bail!("worker {} is reserved for the fast path", key);
        }

        let mut states = self.states();
        match states[index] {
            SlotState::Idle => bail!("worker {} released while not busy", key),
            SlotState::Leased => {
                if !self.vacant.try_acquire() {
                    panic!("worker {} is leased but holds no vacant permit", key);
                }
            }
            SlotState::Parked => {
                let capacity = self.capacity.fetch_add(1, Ordering::SeqCst) + 1;
                log::info!("worker pool: {} joined the pool (capacity={})", key, capacity);
            }
        }
        states[index] = SlotState::Idle;
        drop(states);
        self.available.release();
        Ok(())
    }

    /// Borrow the reserved fast-path worker.
    pub fn acquire_fast_path(&self) -> Result<WorkerKey> {
        let index = self
            .reserved
            .ok_or_else(|| anyhow!("worker pool has no reserved fast-path worker"))?;
        self.fast_available.acquire()?;
        let mut states = self.states();
        states[index] = SlotState::Leased;
        self.fast_vacant.release();
        Ok(self.slots[index].key)
    }

    /// Return the reserved fast-path worker. Never blocks.
    pub fn release_fast_path(&self) -> Result<()> {
        let index = self
            .reserved
            .ok_or_else(|| anyhow!("worker pool has no reserved fast-path worker"))?;
        let mut states = self.states();
        if states[index] != SlotState::Leased {
            bail!("fast-path worker released while not busy");
        }
        if !self.fast_vacant.try_acquire() {
            panic!("fast-path worker is leased but holds no vacant permit");
        }
        states[index] = SlotState::Idle;
        drop(states);
        self.fast_available.release();
        Ok(())
    }

    /// Borrow a general-pool worker, returned automatically when the lease drops.
    pub fn lease(&self) -> Result<WorkerLease<'_, W>, Interrupted> {
        let key = self.acquire()?;
        Ok(WorkerLease {
            pool: self,
            key,
            fast_path: false,
        })
    }

    /// Borrow the fast-path worker, returned automatically when the lease drops.
    pub fn lease_fast_path(&self) -> Result<WorkerLease<'_, W>> {
        let key = self.acquire_fast_path()?;
        Ok(WorkerLease {
            pool: self,
            key,
            fast_path: true,
        })
    }

    /// Run `f` with exclusive access to a borrowed worker's resource.
    pub fn with_worker<R>(&self, key: WorkerKey, f: impl FnOnce(&mut W) -> R) -> Result<R> {
        let index = self
            .index_of(key)
            .ok_or_else(|| anyhow!("unknown worker {}", key))?;
        if self.states()[index] != SlotState::Leased {
            bail!("worker {} is not borrowed", key);
        }
        let mut resource = self.slots[index]
            .resource
            .lock()
            .map_err(|_| anyhow!("worker {} lock poisoned", key))?;
        Ok(f(&mut resource))
    }

    /// Interrupt every caller blocked on a pool permit.
    pub fn wake_all(&self) {
        self.available.wake_all();
        self.vacant.wake_all();
        self.fast_available.wake_all();
        self.fast_vacant.wake_all();
    }

    /// General-pool capacity (excludes the fast-path worker and parked workers).
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// General-pool permits currently available.
    pub fn available(&self) -> usize {
        self.available.available()
    }

    /// General-pool workers that are leased or still parked.
    pub fn busy_count(&self) -> usize {
        self.states()
            .iter()
            .enumerate()
            .filter(|&(i, &state)| state != SlotState::Idle && Some(i) != self.reserved)
            .count()
    }

    pub fn has_fast_path(&self) -> bool {
        self.reserved.is_some()
    }

    pub fn fast_path_key(&self) -> Option<WorkerKey> {
        self.reserved.map(|i| self.slots[i].key)
    }

    pub fn device_of(&self, key: WorkerKey) -> Option<DeviceId> {
        self.index_of(key).map(|i| self.slots[i].key.device)
    }

    /// Every worker key, fast-path worker included.
    pub fn keys(&self) -> Vec<WorkerKey> {
        self.slots.iter().map(|slot| slot.key).collect()
    }

    /// Total workers, fast-path worker included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A borrowed worker. Dropping the lease returns the worker to its pool.
pub struct WorkerLease<'a, W> {
    pool: &'a WorkerPool<W>,
    key: WorkerKey,
    fast_path: bool,
}

impl<W> WorkerLease<'_, W> {
    pub fn key(&self) -> WorkerKey {
        self.key
    }

    pub fn is_fast_path(&self) -> bool {
        self.fast_path
    }

    /// Run `f` with exclusive access to the leased worker.
    pub fn run<R>(&self, f: impl FnOnce(&mut W) -> R) -> Result<R> {
        self.pool.with_worker(self.key, f)
    }
}

impl<W> Drop for WorkerLease<'_, W> {
    fn drop(&mut self) {
        let result = if self.fast_path {
            self.pool.release_fast_path()
        } else {
            self.pool.release(self.key)
        };
        if let Err(err) = result {
            log::error!("worker pool: failed to return worker {}: {:#}", self.key, err);
        }
    }
}
