// Timers of the pipeline: the scrape cadence and the window-open scheduler

pub mod engine;
pub mod window;

pub use engine::ScrapeEngine;
pub use window::{
    ArmOutcome, WindowCursor, WindowOpenScheduler, WindowSchedulerHandle, WindowSchedulerStatus,
    WindowTimerState,
};
