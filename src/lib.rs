//! A high-throughput, low-drop asynchronous append-only log writer for
//! process-local event streams.
//!
//! A [`Logger`] shards record admission across a fixed set of
//! lock-free, double-buffered slots ([`shard::Shard`]) so that producer
//! threads never contend on a single mutex. Once enough shards have
//! filled (or a timer elapses), a background task swaps their buffers,
//! batches them into a single aligned vectored write, and rotates the
//! backing file by size.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use shardlog::LoggerConfig;
//!
//! let logger = LoggerConfig::builder("/var/log/events.log")
//!     .num_shards(8)
//!     .build()?;
//!
//! logger.write(b"hello");
//!
//! if let Some(mut uploads) = logger.take_upload_receiver() {
//!     tokio::spawn(async move {
//!         while let Some(completed) = uploads.recv().await {
//!             // hand `completed.path` to an uploader; out of scope here.
//!             let _ = completed;
//!         }
//!     });
//! }
//!
//! logger.close().await?;
//! # Ok(())
//! # }
//! ```

mod alloc;
mod cast_utils;
pub mod config;
pub mod error;
mod file_writer;
mod format;
mod internal_events;
pub mod logger;
mod platform;
mod shard;
mod shard_collection;
pub mod stats;

pub use config::{LoggerConfig, LoggerConfigBuilder};
pub use error::{CloseError, ConfigError, WriteError};
pub use file_writer::CompletedFile;
pub use format::{parse_frame, FrameView, RecordIter, ALIGNMENT, FRAME_HEADER_LEN, RECORD_HEADER_LEN};
pub use logger::Logger;
pub use stats::StatsSnapshot;
