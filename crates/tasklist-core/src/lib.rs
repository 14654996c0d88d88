pub mod ids;
pub mod task;

pub use ids::TaskId;
pub use task::{NewTask, Task, TaskPatch};
