pub mod principal;
pub mod task;

pub use principal::{Credentials, Principal};
pub use task::{ChangeEvent, NewTask, OldTask, Task, TaskId, TaskPatch};
