//! Background workers driven by the librarian daemon

pub mod covers;
pub mod janitor;
pub mod librarian;
pub mod notifier;
pub mod scheduler;
pub mod search;
