//! Domain model (ids, status, task rows, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod state;
pub mod task;

pub use errors::{ErrorKind, PorterError, UploadError};
pub use events::{EventKind, TaskEvent};
pub use ids::TaskId;
pub use state::{ParseStatusError, TaskStatus};
pub use task::{DEFAULT_QUALITY, NewUpload, UploadRequest, UploadTask};
