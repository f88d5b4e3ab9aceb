//! # Master-side bus subscribers.
//!
//! ```text
//! Supervisor / Scheduler ──► LocalBus::dispatch_now ──┬──► StatusTracker (ServerStatus → Container)
//! children ──► socket ──► LocalBus                     └──► LogWriter (debug log)
//! ```
//!
//! Both subscribers only observe: their handlers always answer `Null`, so
//! they never shadow a reply from another handler.

mod log;
mod status;

pub use log::LogWriter;
pub use status::{ProcessInfo, ServerStatus, StatusTracker, WorkerInfo};
