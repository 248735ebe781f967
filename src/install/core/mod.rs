//! Core installer structures: progress events, filesystem layout and boxed
//! async tasks shared by every pipeline stage.

mod async_task;
mod context;
mod file_ops;
mod progress;

pub use async_task::AsyncTask;
pub use context::{InstallLayout, SERVER_BINARY_NAME, SERVER_INFO_FILE};
pub(crate) use file_ops::write_file_atomic;
pub use progress::{InstallEvent, ProgressReporter};
