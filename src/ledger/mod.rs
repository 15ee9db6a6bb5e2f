//! Append-only ledger of build and release claims
//!
//! The ledger is the only concurrency primitive keel relies on. Every
//! invocation, whether started by the push hook or by an operator, claims
//! `(sha, phase_group)` before doing any work.
//!
//! # Entry lifecycle
//!
//! | From | To | Who |
//! |------|----|-----|
//! | (absent) | claimed | first claimant |
//! | claimed | succeeded / failed | the owner |
//! | claimed (dead owner) | claimed | adopting claimant |
//! | failed | claimed | explicit `--retry` |

mod entry;
mod owner;
mod store;

pub use entry::{ClaimOutcome, ClaimStatus, LedgerEntry, PhaseGroup};
pub use owner::{is_pid_alive, Owner};
pub use store::{HistoryRecord, Ledger};
