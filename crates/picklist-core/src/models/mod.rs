//! Data models for Picklist

mod change;
mod entry;
mod session;
mod sync_record;

pub use change::{ChangeEvent, Notice, NoticeId};
pub use entry::{ConflictState, ItemId, PullEntry};
pub use session::{Priority, Progress, PullSession, RequestId, SessionMeta};
pub use sync_record::{SyncRecord, SyncStatus};
