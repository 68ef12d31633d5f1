//! Print job coordination.
//!
//! [`PrintJobService`] sits between the frontend and the two managers. It
//! validates requests against the owning session, records every outcome and
//! publishes [`StatusUpdate`]s to registered listeners.

mod listener;
mod service;

pub use listener::{ChannelListener, StatusBroadcaster, StatusListener, StatusUpdate};
pub use service::PrintJobService;
