use crate::metrics::Labels;
use crate::obs_debug;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Buckets {
    // One bin per boundary plus the overflow bin; not cumulative.
    counts: Vec<u64>,
    count: u64,
    total: f64,
    labels: Labels,
}

/// Point in time view of a [`Histogram`].
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of observations
    pub count: u64,
    /// Sum of all observations
    pub sum: f64,
    /// `(boundary, observations <= boundary)` in ascending boundary order
    pub buckets: Vec<(f64, u64)>,
}

/// Distribution of observations over fixed bucket boundaries.
///
/// Boundaries are sorted at construction; NaN and duplicate boundaries are
/// removed. Bucket counts are cumulative: the count for boundary `b` is the
/// number of observations `<= b`.
#[derive(Clone)]
pub struct Histogram {
    name: Arc<str>,
    bounds: Arc<[f64]>,
    buckets: Arc<Mutex<Buckets>>,
}

impl Histogram {
    pub(crate) fn new(name: &str, boundaries: &[f64]) -> Self {
        let mut bounds: Vec<f64> = boundaries.iter().copied().filter(|b| !b.is_nan()).collect();
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();

        let bins = bounds.len() + 1;
        Histogram {
            name: name.into(),
            bounds: bounds.into(),
            buckets: Arc::new(Mutex::new(Buckets {
                counts: vec![0; bins],
                count: 0,
                total: 0.0,
                labels: Labels::new(),
            })),
        }
    }

    fn buckets(&self) -> MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one observation. NaN is ignored.
    pub fn observe(&self, value: f64) {
        if value.is_nan() {
            obs_debug!(name: "Histogram.NaNIgnored", histogram_name = self.name);
            return;
        }
        // First boundary >= value; past the end is the overflow bin.
        let index = self.bounds.partition_point(|&b| b < value);

        let mut buckets = self.buckets();
        buckets.counts[index] += 1;
        buckets.count += 1;
        buckets.total += value;
    }

    /// The cumulative counts, sum and count, read atomically.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let buckets = self.buckets();
        let mut cumulative = 0;
        let per_bound = self
            .bounds
            .iter()
            .zip(buckets.counts.iter())
            .map(|(&bound, &count)| {
                cumulative += count;
                (bound, cumulative)
            })
            .collect();

        HistogramSnapshot {
            count: buckets.count,
            sum: buckets.total,
            buckets: per_bound,
        }
    }

    /// The sorted bucket boundaries.
    pub fn boundaries(&self) -> &[f64] {
        &self.bounds
    }

    /// The histogram's registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merges `labels` into the histogram's label set, replacing existing keys.
    pub fn with_labels<K, V>(self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.buckets()
            .labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// A copy of the histogram's labels.
    pub fn labels(&self) -> Labels {
        self.buckets().labels.clone()
    }

    /// Whether both handles refer to the same histogram.
    pub fn ptr_eq(&self, other: &Histogram) -> bool {
        Arc::ptr_eq(&self.buckets, &other.buckets)
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram")
            .field("name", &self.name)
            .field("bounds", &self.bounds)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_counts_are_cumulative() {
        let histogram = Histogram::new("latency", &[10.0, 50.0, 100.0]);
        for value in [5.0, 20.0, 60.0, 150.0] {
            histogram.observe(value);
        }

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.buckets, vec![(10.0, 1), (50.0, 2), (100.0, 3)]);
        assert_eq!(snapshot.sum, 235.0);
        assert_eq!(snapshot.count, 4);
    }

    #[test]
    fn unsorted_boundaries_are_sorted() {
        let histogram = Histogram::new("latency", &[100.0, 10.0, f64::NAN, 50.0, 10.0]);
        assert_eq!(histogram.boundaries(), &[10.0, 50.0, 100.0]);

        for value in [5.0, 20.0, 60.0, 150.0] {
            histogram.observe(value);
        }
        assert_eq!(
            histogram.snapshot().buckets,
            vec![(10.0, 1), (50.0, 2), (100.0, 3)]
        );
    }

    #[test]
    fn value_on_boundary_counts_in_that_bucket() {
        let histogram = Histogram::new("latency", &[10.0, 50.0]);
        histogram.observe(10.0);
        assert_eq!(histogram.snapshot().buckets, vec![(10.0, 1), (50.0, 1)]);
    }

    #[test]
    fn nan_observations_are_ignored() {
        let histogram = Histogram::new("latency", &[1.0]);
        histogram.observe(f64::NAN);
        assert_eq!(histogram.snapshot().count, 0);
    }

    #[test]
    fn no_boundaries_still_counts() {
        let histogram = Histogram::new("latency", &[]);
        histogram.observe(3.0);
        let snapshot = histogram.snapshot();
        assert!(snapshot.buckets.is_empty());
        assert_eq!((snapshot.count, snapshot.sum), (1, 3.0));
    }

    #[test]
    fn concurrent_observations_keep_count_and_sum_consistent() {
        let histogram = Histogram::new("latency", &[1.0, 2.0]);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let histogram = histogram.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        histogram.observe(1.5);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.count, 2_000);
        assert_eq!(snapshot.sum, 3_000.0);
        assert_eq!(snapshot.buckets, vec![(1.0, 0), (2.0, 2_000)]);
    }
}
