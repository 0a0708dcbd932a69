use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("refresh scheduler is already running")]
    AlreadyRunning,
}
