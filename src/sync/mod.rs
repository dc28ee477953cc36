//! Offline queue replay: decoding, temporary id resolution, validation and
//! the transactional batch coordinator behind `POST /sync`.

pub mod auth;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod job;
pub mod resolver;
pub mod validator;

pub use auth::{AuthError, Caller, Claims, TokenAuthority};
pub use coordinator::BatchCoordinator;
pub use error::{ErrorKind, FieldError, JobError, JobFailure, SyncError};
pub use handler::sync_handler;
pub use job::{Action, Job, JobResult, JobStatus, Operation, SyncRequest};
pub use resolver::{IdResolver, Resolution, is_temporary};
pub use validator::JobValidator;
