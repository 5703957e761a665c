//! # Rolekeeper Scheduler
//! Everything driven by the shared periodic timer: the tick fan-out itself,
//! feed polling, scheduled-event reminders and activity snapshots.

pub mod activity;
pub mod fanout;
pub mod feeds;
pub mod reminder;

pub use activity::ActivityTracker;
pub use fanout::TickFanout;
pub use feeds::FeedWatcher;
pub use reminder::ReminderScanner;
