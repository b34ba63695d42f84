//! Node task kinds.

mod file;
mod service;

pub use file::{File, FileState, FileType};
pub use service::{Service, ServiceState};
