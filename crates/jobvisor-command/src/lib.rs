pub mod command_task;

pub use command_task::CommandTask;
