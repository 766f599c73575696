mod avg_tracker;
pub mod checkpoint;
mod report;

pub use avg_tracker::AvgTracker;
pub use report::{Report, Reportable};
