mod chapter;
mod scan;
mod work;

pub use self::chapter::{Chapter, Fingerprint};
pub use self::scan::{Scan, ScanSummary};
pub use self::work::{Work, WorkStatus};
