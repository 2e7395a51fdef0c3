//! The three-stage crawl pipeline.
//!
//! ```text
//! start_page --discovery--> detail_page --detail--> download_page --download--> files
//! ```
//!
//! Each stage runs a fixed number of worker loops over its own queue and
//! bounds its concurrent fetches with one semaphore shared by those
//! workers. Stages never talk to each other directly: the only channel
//! between them is the queue store.

mod coordinator;
mod stats;
mod worker;

pub use coordinator::{Pipeline, PipelineError, RunningPipeline};
pub use stats::{PipelineStats, StageSnapshot, StageStats, StatsSnapshot};
