//! Pending-operation storage.
//!
//! When a tool call needs human confirmation the tool loop suspends and
//! its state is parked here under an opaque [`ConfirmationToken`]. A later,
//! unrelated invocation takes the record back out to resume or cancel it.
//!
//! # Overview
//!
//! - [`PendingStore`] wraps a SQLite database. Records are stored as JSON
//!   along with a short label and creation time.
//! - [`PendingStore::take`] deletes and returns a record atomically, so a
//!   token can be consumed at most once, whichever of resume or cancel gets
//!   there first.
//! - An optional TTL hides and purges abandoned records.
//!
//! # Example
//!
//! ```no_run
//! use storage::{ConfirmationToken, PendingStore};
//!
//! let store = PendingStore::open("pending.db")?;
//! let token = ConfirmationToken::new();
//! store.insert(token, "close_app", &serde_json::json!({"turn": "t1"}))?;
//!
//! for summary in store.list()? {
//!     println!("{}: {}", summary.token, summary.label);
//! }
//!
//! let record: Option<serde_json::Value> = store.take(&token)?;
//! assert!(record.is_some());
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod pending;
mod token;

pub use error::{Error, Result};
pub use pending::{PendingStore, PendingSummary};
pub use token::ConfirmationToken;
