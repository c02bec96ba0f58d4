//! Background Tasks Module
//!
//! # Tasks
//! - Expiry Sweeper: evicts entries when their deadlines pass

mod sweeper;

pub(crate) use sweeper::SweepWorker;
pub use sweeper::SWEEPER_THREAD_NAME;
