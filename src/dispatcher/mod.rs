//! Update dispatch module.
//!
//! Runs the long-polling loop, routes updates to handlers, and keeps the
//! cursor of processed update ids.

mod runner;
mod state;

pub use runner::{
    BatchSummary, DispatchError, Dispatcher, DispatcherHandle, DispatcherMessage, DispatcherPhase,
};
pub use state::{Cursor, PersistentState};
