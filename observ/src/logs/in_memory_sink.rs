use crate::error::{SinkError, SinkResult};
use crate::logs::{Entry, Sink};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A sink that keeps every entry it receives in memory.
///
/// This sink is useful for testing and debugging. It is a cheaply cloneable
/// handle: register one clone with the observer and inspect another.
///
/// # Example
/// ```
/// use observ::logs::{InMemorySink, Level};
/// use observ::trace::CorrelationContext;
/// use observ::Observer;
///
/// let sink = InMemorySink::default();
/// let observer = Observer::builder().with_sink(sink.clone()).build();
///
/// observer.log(&CorrelationContext::new(), Level::Info, "hello");
/// observer.flush().unwrap();
///
/// assert_eq!(sink.last_entry().unwrap().message(), "hello");
/// # observer.close().unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySink {
    state: Arc<Mutex<CaptureState>>,
}

#[derive(Debug, Default)]
struct CaptureState {
    entries: Vec<Entry>,
    batches: Vec<Vec<Entry>>,
    max_entries: Option<usize>,
    total: u64,
    evicted: u64,
    flushes: usize,
    closes: usize,
}

impl InMemorySink {
    /// Creates a sink that keeps at most `max_entries` entries, evicting the
    /// oldest ones. Batches are not bounded by this limit.
    pub fn with_max_entries(max_entries: usize) -> Self {
        let sink = InMemorySink::default();
        sink.lock().max_entries = Some(max_entries);
        sink
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every kept entry, oldest first.
    pub fn entries(&self) -> Vec<Entry> {
        self.lock().entries.clone()
    }

    /// The most recently received entry.
    pub fn last_entry(&self) -> Option<Entry> {
        self.lock().entries.last().cloned()
    }

    /// Whether any entry is kept.
    pub fn has_entries(&self) -> bool {
        !self.lock().entries.is_empty()
    }

    /// Every non-empty batch received, one per write call.
    pub fn batches(&self) -> Vec<Vec<Entry>> {
        self.lock().batches.clone()
    }

    /// `(total received, currently kept, evicted by the entry limit)`.
    pub fn stats(&self) -> (u64, usize, u64) {
        let state = self.lock();
        (state.total, state.entries.len(), state.evicted)
    }

    /// Number of flush calls received.
    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }

    /// Number of close calls received.
    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    /// Forgets every entry, batch and counter. The entry limit is kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        let max_entries = state.max_entries;
        *state = CaptureState {
            max_entries,
            ..CaptureState::default()
        };
    }
}

impl Sink for InMemorySink {
    fn write(&mut self, batch: &[Entry]) -> SinkResult {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().map_err(SinkError::from)?;
        state.total += batch.len() as u64;
        state.entries.extend_from_slice(batch);
        state.batches.push(batch.to_vec());

        if let Some(max) = state.max_entries {
            let excess = state.entries.len().saturating_sub(max);
            if excess > 0 {
                state.entries.drain(..excess);
                state.evicted += excess as u64;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> SinkResult {
        self.lock().flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> SinkResult {
        self.lock().closes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::Level;

    fn batch(messages: &[&str]) -> Vec<Entry> {
        messages.iter().map(|m| Entry::new(Level::Info, *m)).collect()
    }

    #[test]
    fn write_records_entries_and_batches() {
        let mut sink = InMemorySink::default();
        sink.write(&batch(&["A", "B"])).unwrap();
        sink.write(&batch(&["C"])).unwrap();

        assert_eq!(sink.entries().len(), 3);
        assert_eq!(sink.batches().len(), 2);
        assert_eq!(sink.last_entry().unwrap().message(), "C");
        assert_eq!(sink.stats(), (3, 3, 0));
    }

    #[test]
    fn empty_write_is_a_no_op() {
        let mut sink = InMemorySink::default();
        sink.write(&[]).unwrap();
        assert!(!sink.has_entries());
        assert!(sink.batches().is_empty());
        assert_eq!(sink.stats(), (0, 0, 0));
    }

    #[test]
    fn max_entries_keeps_the_newest() {
        let mut sink = InMemorySink::with_max_entries(2);
        sink.write(&batch(&["A", "B", "C"])).unwrap();

        let kept: Vec<_> = sink.entries().iter().map(|e| e.message().to_owned()).collect();
        assert_eq!(kept, vec!["B", "C"]);
        assert_eq!(sink.stats(), (3, 2, 1));
    }

    #[test]
    fn reset_clears_everything_but_the_limit() {
        let mut sink = InMemorySink::with_max_entries(1);
        sink.write(&batch(&["A"])).unwrap();
        sink.flush().unwrap();
        sink.reset();

        assert!(!sink.has_entries());
        assert_eq!(sink.flush_count(), 0);
        sink.write(&batch(&["B", "C"])).unwrap();
        assert_eq!(sink.stats(), (2, 1, 1));
    }

    #[test]
    fn clones_share_captured_state() {
        let sink = InMemorySink::default();
        let mut registered = sink.clone();
        registered.write(&batch(&["A"])).unwrap();
        registered.close().unwrap();
        assert!(sink.has_entries());
        assert_eq!(sink.close_count(), 1);
    }
}
