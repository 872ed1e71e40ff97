mod cache;
mod capability;
mod quarantine;

pub use self::cache::CacheRepository;
pub use self::capability::CapabilityRepository;
pub use self::quarantine::QuarantineRepository;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;

pub(crate) fn limit(value: usize) -> Result<i64> {
    i64::try_from(value).or_raise(|| ErrorKind::InvalidData("limit"))
}
