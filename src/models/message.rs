use crate::error::TaskFailure;
use super::task::PivResult;

/// Worker to controller traffic for one task.
#[derive(Debug)]
pub enum TaskEvent {
    Progress { percent: u8 },
    Completed(Result<PivResult, TaskFailure>),
}

/// An uncaught failure, formatted for presentation on the controller.
#[derive(Debug, Clone)]
pub struct ExceptionEvent {
    pub message: String,
}
