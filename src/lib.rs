pub mod app;
pub mod config;
pub mod jobs;
pub mod task_host;
