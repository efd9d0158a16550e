//! Job lifecycle events broadcast to interested observers.

use crate::jobs::{JobState, JobView};

/// Lifecycle event for a submitted job.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Job accepted into the queue.
    Created { job: JobView },
    /// Job admitted and dispatched to an executor.
    Started { job_id: String, slots: usize },
    /// Job reached a terminal state and was appended to history.
    Finished { job_id: String, state: JobState },
}
