use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Window used by `snapshot()` unless the aggregator was built with another.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(10);

/// One successfully decoded datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalRecord {
    /// Taken when the socket handed over the bytes, before decoding.
    pub timestamp: Instant,
    pub port: u16,
}

impl ArrivalRecord {
    pub fn new(timestamp: Instant, port: u16) -> Self {
        Self { timestamp, port }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatisticsSnapshot {
    pub total_count: u64,
    /// Gap between consecutive arrivals, in milliseconds.
    pub latencies: Vec<f64>,
    /// For arrival i, how many arrivals fall in `[t_i, t_i + rate_window)`.
    pub rate_per_window: Vec<u64>,
    pub rate_window: Duration,
    pub mean_latency_ms: f64,
    pub decode_failures: u64,
    pub oversized_dropped: u64,
    /// Datagrams lost because the listener fell behind its sockets.
    pub queue_dropped: u64,
    pub per_port: BTreeMap<u16, u64>,
    /// Time between the first and last arrival.
    pub span: Duration,
}

impl StatisticsSnapshot {
    pub fn peak_rate(&self) -> u64 {
        self.rate_per_window.iter().copied().max().unwrap_or(0)
    }

    /// Nearest-rank percentile of the latency sequence, `pct` in `0..=100`.
    pub fn latency_percentile(&self, pct: f64) -> Option<f64> {
        if self.latencies.is_empty() {
            return None;
        }
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable_by(|a, b| a.total_cmp(b));
        let rank = ((pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64).round();
        Some(sorted[rank as usize])
    }
}

#[derive(Default)]
struct ArrivalLog {
    records: Vec<ArrivalRecord>,
    latencies_ms: Vec<f64>,
    per_port: BTreeMap<u16, u64>,
}

/// Per-session arrival statistics.
///
/// The listener is the only writer; any number of threads may read
/// snapshots while it ingests. The running total is mirrored in an atomic so
/// polling it never waits on the lock.
///
/// Records are kept in timestamp order. Socket readers stamp datagrams on
/// their own threads, so one may reach the aggregator just behind a datagram
/// that was stamped later; it is slotted into place instead of appended.
pub struct StatisticsAggregator {
    log: RwLock<ArrivalLog>,
    total: AtomicU64,
    decode_failures: AtomicU64,
    oversized: AtomicU64,
    queue_dropped: AtomicU64,
    rate_window: Duration,
}

impl Default for StatisticsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::with_rate_window(DEFAULT_RATE_WINDOW)
    }

    pub fn with_rate_window(rate_window: Duration) -> Self {
        Self {
            log: RwLock::new(ArrivalLog::default()),
            total: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            oversized: AtomicU64::new(0),
            queue_dropped: AtomicU64::new(0),
            rate_window,
        }
    }

    pub fn ingest(&self, record: ArrivalRecord) {
        let mut log = self.log.write();
        let log = &mut *log;
        let at = log.records.partition_point(|r| r.timestamp <= record.timestamp);
        log.records.insert(at, record);

        let records = &log.records;
        let latencies = &mut log.latencies_ms;
        if records.len() > 1 {
            if at == records.len() - 1 {
                latencies.push(gap_millis(records[at - 1].timestamp, record.timestamp));
            } else if at == 0 {
                latencies.insert(0, gap_millis(record.timestamp, records[1].timestamp));
            } else {
                latencies[at - 1] = gap_millis(records[at - 1].timestamp, record.timestamp);
                latencies.insert(at, gap_millis(record.timestamp, records[at + 1].timestamp));
            }
        }

        *log.per_port.entry(record.port).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::Release);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_oversized(&self) {
        self.oversized.fetch_add(1, Ordering::Relaxed);
    }

    /// Publishes the transport's running count of queue drops. The count
    /// only grows, so a stale value never overwrites a newer one.
    pub fn record_queue_drops(&self, total: u64) {
        self.queue_dropped.fetch_max(total, Ordering::Relaxed);
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn oversized_dropped(&self) -> u64 {
        self.oversized.load(Ordering::Relaxed)
    }

    pub fn queue_dropped(&self) -> u64 {
        self.queue_dropped.load(Ordering::Relaxed)
    }

    pub fn rate_window(&self) -> Duration {
        self.rate_window
    }

    pub fn mean_latency_ms(&self) -> f64 {
        mean(&self.log.read().latencies_ms)
    }

    /// Arrivals in `[t_i, t_i + window)` for each arrival `t_i`. A zero
    /// window is widened to one nanosecond, so every entry counts at least
    /// its own arrival.
    pub fn rate_series(&self, window: Duration) -> Vec<u64> {
        let timestamps: Vec<Instant> = {
            let log = self.log.read();
            log.records.iter().map(|r| r.timestamp).collect()
        };
        sliding_counts(&timestamps, window)
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let (timestamps, latencies, per_port) = {
            let log = self.log.read();
            (
                log.records.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
                log.latencies_ms.clone(),
                log.per_port.clone(),
            )
        };

        let span = match (timestamps.first(), timestamps.last()) {
            (Some(first), Some(last)) => last.duration_since(*first),
            _ => Duration::ZERO,
        };

        StatisticsSnapshot {
            total_count: timestamps.len() as u64,
            mean_latency_ms: mean(&latencies),
            rate_per_window: sliding_counts(&timestamps, self.rate_window),
            rate_window: self.rate_window,
            latencies,
            decode_failures: self.decode_failures(),
            oversized_dropped: self.oversized_dropped(),
            queue_dropped: self.queue_dropped(),
            per_port,
            span,
        }
    }
}

fn gap_millis(earlier: Instant, later: Instant) -> f64 {
    later.duration_since(earlier).as_secs_f64() * 1000.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

// `timestamps` is sorted, so each window is two binary searches.
fn sliding_counts(timestamps: &[Instant], window: Duration) -> Vec<u64> {
    let window = window.max(Duration::from_nanos(1));
    timestamps
        .iter()
        .map(|&start| {
            let first = timestamps.partition_point(|&t| t < start);
            let end = match start.checked_add(window) {
                Some(end) => timestamps.partition_point(|&t| t < end),
                None => timestamps.len(),
            };
            (end - first) as u64
        })
        .collect()
}
