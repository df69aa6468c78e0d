//! # Ingestion buffer
//!
//! A bounded queue between producer threads and the flush worker. Producers
//! call [`IngestionBuffer::enqueue`], which never waits on I/O and never
//! grows the queue past its capacity; the worker calls
//! [`IngestionBuffer::drain`] to take everything queued so far.
//!
//! What happens when the buffer is full is fixed per instance by its
//! [`OverflowPolicy`]:
//!
//! - [`OverflowPolicy::DropNewest`] (the default) discards the incoming entry;
//! - [`OverflowPolicy::OverwriteOldest`] evicts the oldest queued entry to make room.
//!
//! Either way the discarded entry is counted in [`IngestionBuffer::dropped_count`].
//! `drain` always returns entries oldest first.
use crate::logs::Entry;
use crate::metrics::Gauge;
use crate::obs_warn;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What [`IngestionBuffer::enqueue`] does when the buffer is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the new entry and keep the queued ones.
    #[default]
    DropNewest,
    /// Evict the oldest queued entry and keep the new one.
    OverwriteOldest,
}

impl OverflowPolicy {
    /// The configuration name: `drop_newest` or `overwrite_oldest`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::DropNewest => "drop_newest",
            OverflowPolicy::OverwriteOldest => "overwrite_oldest",
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            "overwrite_oldest" => Ok(OverflowPolicy::OverwriteOldest),
            other => Err(format!("unknown overflow policy: {}", other)),
        }
    }
}

/// Result of a single [`IngestionBuffer::enqueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    /// The entry was queued; `len` is the queue length afterwards.
    Accepted {
        /// Queue length after the enqueue
        len: usize,
    },
    /// The buffer was full and the entry was discarded.
    Dropped,
    /// The buffer was full and the oldest entry was evicted for this one.
    Overwrote {
        /// Queue length after the enqueue
        len: usize,
    },
}

impl Enqueued {
    /// Queue length after the enqueue, `None` when the entry was dropped.
    pub fn queue_len(&self) -> Option<usize> {
        match self {
            Enqueued::Accepted { len } | Enqueued::Overwrote { len } => Some(*len),
            Enqueued::Dropped => None,
        }
    }
}

/// Bounded multi-producer queue of [`Entry`] values.
pub struct IngestionBuffer {
    queue: Mutex<VecDeque<Entry>>,
    capacity: usize,
    policy: OverflowPolicy,
    accepted: AtomicU64,
    dropped: AtomicU64,
    // Set under the queue lock so it never lags behind a drain.
    size_gauge: Option<Gauge>,
}

impl IngestionBuffer {
    /// Creates a buffer holding at most `capacity` entries. A capacity of 0
    /// is raised to 1.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        IngestionBuffer {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            size_gauge: None,
        }
    }

    /// Reports the queue length to `gauge` after every enqueue and drain.
    pub(crate) fn with_size_gauge(self, gauge: Gauge) -> Self {
        IngestionBuffer {
            size_gauge: Some(gauge),
            ..self
        }
    }

    fn sample_size(&self, len: usize) {
        if let Some(gauge) = &self.size_gauge {
            gauge.set(len as f64);
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an entry, applying the overflow policy when the buffer is full.
    ///
    /// The critical section is a push onto the queue: producers contend only
    /// with each other and with the swap in [`drain`](Self::drain).
    pub fn enqueue(&self, entry: Entry) -> Enqueued {
        let outcome = {
            let mut queue = self.queue();
            if queue.len() < self.capacity {
                queue.push_back(entry);
                self.sample_size(queue.len());
                Enqueued::Accepted { len: queue.len() }
            } else {
                match self.policy {
                    OverflowPolicy::DropNewest => Enqueued::Dropped,
                    OverflowPolicy::OverwriteOldest => {
                        let _ = queue.pop_front();
                        queue.push_back(entry);
                        self.sample_size(queue.len());
                        Enqueued::Overwrote { len: queue.len() }
                    }
                }
            }
        };

        match outcome {
            Enqueued::Accepted { .. } => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Enqueued::Dropped | Enqueued::Overwrote { .. } => {
                if matches!(outcome, Enqueued::Overwrote { .. }) {
                    self.accepted.fetch_add(1, Ordering::Relaxed);
                }
                // Warn on the first loss only; the total is reported at shutdown.
                if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    obs_warn!(
                        name: "IngestionBuffer.EntryDroppingStarted",
                        capacity = self.capacity,
                        policy = self.policy,
                        message = "Buffer is full, entries are being discarded. No further warning is emitted until shutdown."
                    );
                }
            }
        }
        outcome
    }

    /// Removes and returns every queued entry, oldest first, leaving the
    /// buffer empty.
    pub fn drain(&self) -> Vec<Entry> {
        let mut queue = self.queue();
        if queue.is_empty() {
            return Vec::new();
        }
        let drained = std::mem::take(&mut *queue);
        self.sample_size(0);
        drop(queue);
        drained.into()
    }

    /// Number of entries currently queued.
    pub fn len(&self) -> usize {
        self.queue().len()
    }

    /// Whether no entries are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The overflow policy, fixed for the buffer's lifetime.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Entries discarded by the overflow policy so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Entries queued so far, including ones later evicted.
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for IngestionBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}
