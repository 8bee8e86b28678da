//! Asynchronous message digest feeding.
//!
//! [MessageDigest] queues chunks of data and drives a partial progress [DigestOps] backend, either
//! from a dedicated worker thread or from a cooperative polling task, until the digest is read
//! back. Outcomes are delivered through callbacks in the tokio runtime where the handle was
//! created.

mod digest;
mod error;
mod handle;
pub mod prelude;

pub use digest::{DigestType, SoftwareOps, SoftwareState};
pub use error::Error;
pub use handle::{
    BackendParams,
    Configuration,
    Context,
    ContextFree,
    DigestError,
    DigestOps,
    DigestReadyCallback,
    ErrorKind,
    FeedDoneCallback,
    MessageDigest,
    PendingStats,
    Result,
    SchedulerKind,
    DEFAULT_FEED_BLOCK_SIZE,
};
