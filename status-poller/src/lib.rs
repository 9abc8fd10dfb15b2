pub mod config;
pub mod format;
pub mod poller;
pub mod status;

pub use poller::{Poller, StatusSource};
pub use status::{status_channel, ServerStatus, StatusPublisher, StatusReader, StatusSnapshot};
