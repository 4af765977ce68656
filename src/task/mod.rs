//! Task tracking
//!
//! Progress reporting to the external task service and monitoring of
//! long-running plugin-side actions.

pub mod monitor;
pub mod reporter;

pub use monitor::{monitor_plugin_task, RemoteTaskStatus};
pub use reporter::TaskReporter;
