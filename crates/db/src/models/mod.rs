mod cache;
mod capability;
mod event;

pub use self::cache::CacheEntry;
pub(crate) use self::cache::CacheRow;
pub use self::capability::{CapabilityRecord, Support};
pub(crate) use self::capability::CapabilityRow;
pub use self::event::{QuarantineAction, QuarantineEvent};
pub(crate) use self::event::EventRow;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::OffsetDateTime;

/// Timestamps are stored as unix nanoseconds, which covers 1677 to 2262.
pub(crate) fn to_unix_nanos(at: OffsetDateTime, field: &'static str) -> Result<i64> {
    i64::try_from(at.unix_timestamp_nanos()).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn from_unix_nanos(nanos: i64, field: &'static str) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)).or_raise(|| ErrorKind::InvalidData(field))
}
