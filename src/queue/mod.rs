pub mod notify;
pub mod work_queue;

pub use notify::NotificationChannel;
pub use work_queue::{ClaimedItem, WorkQueue};
