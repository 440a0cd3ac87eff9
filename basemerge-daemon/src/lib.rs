//! Background sync daemon: interval scheduler, base-file watcher, a single
//! sync processor and a Unix-socket control server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{init_tracing, run, start_blocking, SyncSummary, SyncTimestamps};
