//! Export types with less chance to conflict with other crates in case of no renaming.
pub use crate::{
    BackendParams as DigestBackendParams,
    Configuration as DigestConfiguration,
    Context as DigestContext,
    DigestError,
    DigestOps,
    DigestType,
    ErrorKind as DigestErrorKind,
    MessageDigest,
    PendingStats,
    SchedulerKind,
    SoftwareOps,
};
