//! Record lifecycle: periodic expiry sweeps, delete-after-download and the
//! background task tracker both rely on.

mod reaper;
mod sweeper;
mod tasks;

pub use reaper::{Delivery, FetchError, Reaper};
pub use sweeper::{ExpiryDefaults, SweepStats, Sweeper};
pub use tasks::BackgroundTasks;
