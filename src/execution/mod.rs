// Order execution module
// The reconciler applies strategy batches and keeps the store in step with the venue
pub mod reconciler;
pub mod runner;

pub use reconciler::{realized_pl, ApplyReport, Reconciler, SyncReport, Synced};
pub use runner::{TickReport, TickRunner};
