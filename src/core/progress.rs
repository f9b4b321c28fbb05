/*!
 * Progress aggregation and reporting
 *
 * Byte deltas read from sources and response bodies flow into a
 * [`ProgressAggregator`], which turns them into [`TransferProgress`]
 * snapshots at a configurable interval. Directory transfers fold the
 * per-file snapshots into a [`DirectoryProgressTracker`].
 *
 * Callers observe progress through a [`ProgressReporter`], an unbounded
 * channel: sending never blocks the transfer on a slow observer.
 */

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Progress of one object transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Object key
    pub key: String,
    /// Local file, when the transfer has one
    pub path: Option<PathBuf>,
    /// Bytes since the previous snapshot
    pub incremental: u64,
    /// Bytes transferred so far
    pub transferred: u64,
    /// Total bytes, unknown for forward-only streams
    pub total: Option<u64>,
    /// Bytes previously reported that a restart has discarded
    ///
    /// Upstream totals subtract this so restarted bytes are not counted twice.
    pub compensation: u64,
}

impl TransferProgress {
    /// Percentage complete, when the total is known
    pub fn percent_done(&self) -> Option<f64> {
        self.total.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.transferred as f64 / total as f64) * 100.0
            }
        })
    }

    pub fn is_complete(&self) -> bool {
        self.total == Some(self.transferred)
    }
}

/// The file in flight during a serial directory transfer
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentFile {
    pub key: String,
    pub path: PathBuf,
    pub transferred: u64,
    pub total: Option<u64>,
}

/// Aggregate progress of a directory transfer
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryProgress {
    pub files_done: u64,
    pub total_files: u64,
    pub transferred: u64,
    pub total_bytes: u64,
    /// Only reported when files transfer one at a time
    pub current: Option<CurrentFile>,
}

impl DirectoryProgress {
    pub fn percent_done(&self) -> f64 {
        if self.total_bytes == 0 {
            if self.files_done == self.total_files {
                100.0
            } else {
                0.0
            }
        } else {
            (self.transferred as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

/// Event delivered to a [`ProgressReporter`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Byte progress of a single object
    Transfer(TransferProgress),
    /// Aggregate progress of a directory transfer
    Directory(DirectoryProgress),
    /// One file of a directory transfer finished
    FileCompleted {
        key: String,
        path: PathBuf,
        bytes: u64,
    },
}

/// Fire-and-continue observer handle
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    sender: Arc<UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Create a reporter and the receiver its events arrive on
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    /// Report an event
    pub fn report(&self, event: ProgressEvent) {
        // Receiver may be gone; progress is advisory
        let _ = self.sender.send(event);
    }
}

/// Callback receiving progress snapshots
pub type ProgressSink = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Sink forwarding snapshots to a reporter
pub fn reporter_sink(reporter: ProgressReporter) -> ProgressSink {
    Arc::new(move |progress| reporter.report(ProgressEvent::Transfer(progress)))
}

/// Stored in place of a total that is not known yet
const UNKNOWN_TOTAL: u64 = u64::MAX;

struct EmitState {
    last_emitted: u64,
    compensation: u64,
    emitted_any: bool,
}

/// Turns per-chunk byte deltas into interval-spaced progress snapshots
///
/// Counters are atomics so concurrent parts can record without a lock;
/// only emission is serialized, which keeps reported cumulative values
/// non-decreasing between restarts.
pub struct ProgressAggregator {
    key: String,
    path: Option<PathBuf>,
    total: AtomicU64,
    interval: u64,
    transferred: AtomicU64,
    pending: AtomicU64,
    emit: Mutex<EmitState>,
    sink: Option<ProgressSink>,
}

impl ProgressAggregator {
    pub fn new(
        key: impl Into<String>,
        path: Option<PathBuf>,
        total: Option<u64>,
        interval: u64,
        sink: Option<ProgressSink>,
    ) -> Self {
        Self {
            key: key.into(),
            path,
            total: AtomicU64::new(total.unwrap_or(UNKNOWN_TOTAL)),
            interval: interval.max(1),
            transferred: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            emit: Mutex::new(EmitState {
                last_emitted: 0,
                compensation: 0,
                emitted_any: false,
            }),
            sink,
        }
    }

    /// Aggregator that counts but never reports
    pub fn silent(key: impl Into<String>, total: Option<u64>) -> Self {
        Self::new(key, None, total, u64::MAX, None)
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> Option<u64> {
        match self.total.load(Ordering::SeqCst) {
            UNKNOWN_TOTAL => None,
            total => Some(total),
        }
    }

    /// Set the total from the latest response
    ///
    /// Replaces any earlier value: a restarted transfer may be reading a
    /// different object than the one first sized.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    /// Record `bytes` read from the source or response body
    pub fn record(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let cumulative = self.transferred.fetch_add(bytes, Ordering::SeqCst) + bytes;
        let pending = self.pending.fetch_add(bytes, Ordering::SeqCst) + bytes;

        if pending >= self.interval || self.total() == Some(cumulative) {
            self.emit(false);
        }
    }

    /// Discard progress after the transfer restarted from byte zero
    ///
    /// The total is forgotten too; the restarted transfer sets its own.
    pub fn restart(&self) {
        self.total.store(UNKNOWN_TOTAL, Ordering::SeqCst);
        self.rewind_to(0);
    }

    /// Move the cumulative count back to `offset`
    ///
    /// Used when a resumed transfer continues from fewer bytes than were
    /// read before the failure. Bytes already reported past `offset` are
    /// carried as compensation on the next snapshot.
    pub fn rewind_to(&self, offset: u64) {
        let mut state = match self.emit.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.transferred.load(Ordering::SeqCst) > offset {
            self.transferred.store(offset, Ordering::SeqCst);
        }
        self.pending.store(0, Ordering::SeqCst);
        if state.last_emitted > offset {
            state.compensation += state.last_emitted - offset;
            state.last_emitted = offset;
        }
    }

    /// Emit the final snapshot if it has not been reported yet
    pub fn finish(&self) {
        self.emit(true);
    }

    fn emit(&self, force: bool) {
        let Some(sink) = &self.sink else {
            self.pending.store(0, Ordering::SeqCst);
            return;
        };

        // Held across the sink call so snapshots arrive in order
        let mut state = match self.emit.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.pending.store(0, Ordering::SeqCst);
        let cumulative = self.transferred.load(Ordering::SeqCst);

        let advanced = cumulative > state.last_emitted;
        let owed = force && (!state.emitted_any || state.compensation > 0);
        if !advanced && !owed {
            return;
        }

        let event = TransferProgress {
            key: self.key.clone(),
            path: self.path.clone(),
            incremental: cumulative.saturating_sub(state.last_emitted),
            transferred: cumulative,
            total: self.total(),
            compensation: std::mem::take(&mut state.compensation),
        };
        state.last_emitted = cumulative;
        state.emitted_any = true;

        sink(event);
    }
}

/// Folds per-file snapshots into directory-level progress
pub struct DirectoryProgressTracker {
    reporter: Option<ProgressReporter>,
    total_files: u64,
    total_bytes: AtomicU64,
    serial: bool,
    files_done: AtomicU64,
    transferred: AtomicU64,
    current: Mutex<Option<CurrentFile>>,
}

impl DirectoryProgressTracker {
    /// `serial` is true when files transfer one at a time
    pub fn new(
        reporter: Option<ProgressReporter>,
        total_files: u64,
        total_bytes: u64,
        serial: bool,
    ) -> Self {
        Self {
            reporter,
            total_files,
            total_bytes: AtomicU64::new(total_bytes),
            serial,
            files_done: AtomicU64::new(0),
            transferred: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    /// Sink to hand to the transfer of one file
    ///
    /// `expected` is the size counted for the file in the directory total.
    /// When the file's transfer later reports a different total, the
    /// directory total follows it.
    pub fn file_sink(
        self: &Arc<Self>,
        key: String,
        path: PathBuf,
        expected: u64,
    ) -> ProgressSink {
        let tracker = Arc::clone(self);
        let counted = AtomicU64::new(expected);
        Arc::new(move |progress: TransferProgress| {
            tracker.on_file_progress(&key, &path, &progress, &counted);
        })
    }

    fn on_file_progress(
        &self,
        key: &str,
        path: &Path,
        progress: &TransferProgress,
        counted: &AtomicU64,
    ) {
        if let Some(total) = progress.total {
            let previous = counted.swap(total, Ordering::SeqCst);
            if total > previous {
                self.total_bytes.fetch_add(total - previous, Ordering::SeqCst);
            } else if total < previous {
                self.total_bytes.fetch_sub(previous - total, Ordering::SeqCst);
            }
        }

        self.transferred
            .fetch_add(progress.incremental, Ordering::SeqCst);
        if progress.compensation > 0 {
            self.transferred
                .fetch_sub(progress.compensation, Ordering::SeqCst);
        }

        if self.serial {
            let mut current = match self.current.lock() {
                Ok(current) => current,
                Err(poisoned) => poisoned.into_inner(),
            };
            *current = Some(CurrentFile {
                key: key.to_string(),
                path: path.to_path_buf(),
                transferred: progress.transferred,
                total: progress.total,
            });
        }

        self.report_snapshot();
    }

    /// Record a finished file
    pub fn file_completed(&self, key: String, path: PathBuf, bytes: u64) {
        self.files_done.fetch_add(1, Ordering::SeqCst);
        if let Some(reporter) = &self.reporter {
            reporter.report(ProgressEvent::FileCompleted { key, path, bytes });
        }
        self.report_snapshot();
    }

    pub fn snapshot(&self) -> DirectoryProgress {
        let current = if self.serial {
            match self.current.lock() {
                Ok(current) => current.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        } else {
            None
        };

        DirectoryProgress {
            files_done: self.files_done.load(Ordering::SeqCst),
            total_files: self.total_files,
            transferred: self.transferred.load(Ordering::SeqCst),
            total_bytes: self.total_bytes.load(Ordering::SeqCst),
            current,
        }
    }

    fn report_snapshot(&self) {
        if let Some(reporter) = &self.reporter {
            reporter.report(ProgressEvent::Directory(self.snapshot()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_sink() -> (ProgressSink, Arc<Mutex<Vec<TransferProgress>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let sink: ProgressSink = Arc::new(move |p| captured.lock().unwrap().push(p));
        (sink, events)
    }

    #[test]
    fn test_emits_at_interval_and_on_completion() {
        let (sink, events) = collecting_sink();
        let agg = ProgressAggregator::new("k", None, Some(250), 100, Some(sink));

        for _ in 0..25 {
            agg.record(10);
        }

        let events = events.lock().unwrap();
        let cumulative: Vec<u64> = events.iter().map(|e| e.transferred).collect();
        assert_eq!(cumulative, vec![100, 200, 250]);
        assert_eq!(events.last().unwrap().percent_done(), Some(100.0));
        assert_eq!(events.iter().map(|e| e.incremental).sum::<u64>(), 250);
    }

    #[test]
    fn test_finish_reports_empty_transfer() {
        let (sink, events) = collecting_sink();
        let agg = ProgressAggregator::new("empty", None, Some(0), 100, Some(sink));
        agg.finish();
        agg.finish();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_complete());
        assert_eq!(events[0].percent_done(), Some(100.0));
    }

    #[test]
    fn test_finish_flushes_unknown_total() {
        let (sink, events) = collecting_sink();
        let agg = ProgressAggregator::new("stream", None, None, 1000, Some(sink));
        agg.record(10);
        agg.record(15);
        assert!(events.lock().unwrap().is_empty());

        agg.finish();
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transferred, 25);
        assert_eq!(events[0].percent_done(), None);
    }

    #[test]
    fn test_restart_carries_compensation() {
        let (sink, events) = collecting_sink();
        let agg = ProgressAggregator::new("k", None, Some(100), 10, Some(sink));

        agg.record(40);
        agg.restart();
        agg.record(100);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].transferred, 40);
        assert_eq!(events[1].transferred, 100);
        assert_eq!(events[1].compensation, 40);

        let net: i64 = events
            .iter()
            .map(|e| e.incremental as i64 - e.compensation as i64)
            .sum();
        assert_eq!(net, 100);
    }

    #[test]
    fn test_rewind_compensates_overreported_bytes() {
        let (sink, events) = collecting_sink();
        let agg = ProgressAggregator::new("k", None, None, 10, Some(sink));

        agg.record(60);
        agg.rewind_to(50);
        agg.set_total(100);
        agg.record(50);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].transferred, 100);
        assert_eq!(events[1].incremental, 50);
        assert_eq!(events[1].compensation, 10);
        assert_eq!(events[1].total, Some(100));
    }

    #[test]
    fn test_concurrent_recording_is_monotonic() {
        let (sink, events) = collecting_sink();
        let agg = Arc::new(ProgressAggregator::new("k", None, Some(80_000), 1000, Some(sink)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        agg.record(10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = events.lock().unwrap();
        assert!(events.windows(2).all(|w| w[0].transferred <= w[1].transferred));
        assert_eq!(events.last().unwrap().transferred, 80_000);
    }

    #[tokio::test]
    async fn test_directory_tracker_totals() {
        let (reporter, mut rx) = ProgressReporter::new();
        let tracker = Arc::new(DirectoryProgressTracker::new(Some(reporter), 2, 30, true));

        let sink_a = tracker.file_sink("a".into(), PathBuf::from("a"), 10);
        let agg_a = ProgressAggregator::new("a", None, Some(10), 5, Some(sink_a));
        agg_a.record(10);
        tracker.file_completed("a".into(), PathBuf::from("a"), 10);

        let sink_b = tracker.file_sink("b".into(), PathBuf::from("b"), 20);
        let agg_b = ProgressAggregator::new("b", None, Some(20), 5, Some(sink_b));
        agg_b.record(20);
        tracker.file_completed("b".into(), PathBuf::from("b"), 20);

        let final_snapshot = tracker.snapshot();
        assert_eq!(final_snapshot.files_done, 2);
        assert_eq!(final_snapshot.transferred, 30);
        assert_eq!(final_snapshot.percent_done(), 100.0);
        assert_eq!(final_snapshot.current.as_ref().unwrap().key, "b");

        let mut completions = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ProgressEvent::FileCompleted { .. }) {
                completions += 1;
            }
        }
        assert_eq!(completions, 2);
    }

    #[test]
    fn test_concurrent_directory_has_no_current_file() {
        let tracker = Arc::new(DirectoryProgressTracker::new(None, 1, 10, false));
        let sink = tracker.file_sink("a".into(), PathBuf::from("a"), 10);
        sink(TransferProgress {
            key: "a".into(),
            path: None,
            incremental: 10,
            transferred: 10,
            total: Some(10),
            compensation: 0,
        });
        assert!(tracker.snapshot().current.is_none());
        assert_eq!(tracker.snapshot().transferred, 10);
    }

    #[test]
    fn test_restart_takes_total_of_new_object() {
        let (sink, events) = collecting_sink();
        let agg = ProgressAggregator::new("k", None, Some(300), 100, Some(sink));

        agg.record(100);
        agg.restart();
        assert_eq!(agg.total(), None);
        agg.set_total(400);
        agg.record(400);
        agg.finish();

        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.transferred, 400);
        assert_eq!(last.total, Some(400));
        assert!(last.is_complete());
        assert_eq!(last.percent_done(), Some(100.0));
    }

    #[test]
    fn test_directory_total_follows_resized_file() {
        let tracker = Arc::new(DirectoryProgressTracker::new(None, 2, 30, false));
        let sink = tracker.file_sink("a".into(), PathBuf::from("a"), 10);
        sink(TransferProgress {
            key: "a".into(),
            path: None,
            incremental: 15,
            transferred: 15,
            total: Some(15),
            compensation: 0,
        });
        assert_eq!(tracker.snapshot().total_bytes, 35);

        sink(TransferProgress {
            key: "a".into(),
            path: None,
            incremental: 0,
            transferred: 15,
            total: Some(4),
            compensation: 11,
        });
        assert_eq!(tracker.snapshot().total_bytes, 24);
        assert_eq!(tracker.snapshot().transferred, 4);
    }
}
