//! Keel - push-to-deploy build and release orchestrator
//!
//! Resolves a pushed reference to an immutable snapshot, claims it in a
//! SQLite ledger so concurrent pushes never duplicate work, runs the
//! plugin's build and release phases, and atomically repoints `latest`
//! at the released build.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod orchestrator;
pub mod pipeline;
pub mod release;
pub mod snapshot;
pub mod store;
pub mod ui;

pub use error::{KeelError, KeelResult};
