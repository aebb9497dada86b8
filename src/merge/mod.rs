//! The merge job: validate a request, run it on a worker thread and report
//! progress and the terminal outcome back to the owner.

pub mod compose;
pub mod error;
pub mod handle;
pub mod job;
pub mod request;

pub use error::Outcome;
pub use handle::{JobEvent, MergeJobHandle, submit};
pub use job::JobOptions;
pub use request::{MergeRequest, suggest_output_path};
