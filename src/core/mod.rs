/*!
 * Transfer orchestration primitives
 *
 * Shared building blocks for the commands: part planning, admission
 * control and fan-out, progress aggregation, reader adapters, retry
 * backoff and byte-range resume.
 */

pub mod concurrency;
pub mod fanout;
pub mod part_size;
pub mod progress;
pub mod resume;
pub mod retry;
pub mod stream;

pub use concurrency::{AdmissionGate, GatePermit};
pub use fanout::FanOut;
pub use part_size::{
    effective_part_size, plan_part_size, plan_parts, PartDescriptor, MAX_PARTS, MIN_PART_SIZE,
};
pub use progress::{
    CurrentFile, DirectoryProgress, DirectoryProgressTracker, ProgressAggregator, ProgressEvent,
    ProgressReporter, ProgressSink, TransferProgress,
};
pub use resume::byte_range_remaining;
pub use retry::{backoff_delay, RetryPolicy};
pub use stream::{read_full, ProgressReader};
