pub mod reconciler;
pub mod session;

pub use reconciler::{PendingTask, TaskList};
pub use session::{Session, SessionConfig, SessionHandle, SyncMode, TaskView};
