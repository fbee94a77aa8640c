pub mod create_job;
pub mod delete_old_jobs;
pub mod info;
pub mod queue_depth;
pub mod show_job;
pub mod worker;
