//! Background synchronization.
//!
//! A [`SyncScheduler`] is created once by the application root and started
//! at boot. It refreshes the cached dataset on a fixed interval and when
//! connectivity comes back, and broadcasts a [`SyncEvent`] for every
//! finished sync so views can pick up fresh data without polling.

pub mod connectivity;
pub mod scheduler;

pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use scheduler::{SyncEvent, SyncOutcome, SyncScheduler, SyncTrigger};
