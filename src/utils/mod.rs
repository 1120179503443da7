pub mod async_task;
pub mod time;

#[cfg(test)]
mod async_task_test;
