//! A settle-once value holder with synchronous callback chaining.
//!
//! A [`SettlableFuture`] starts out pending and is settled exactly once:
//! fulfilled with a value or rejected with a reason. Observers attach
//! success ([`SettlableFuture::then`]), failure ([`SettlableFuture::catch`])
//! and completion ([`SettlableFuture::finally`]) handlers before or after
//! settlement. Handlers attached while pending fire at the moment of
//! settlement, in registration order; handlers attached afterwards fire
//! immediately in the registering call.
//!
//! The future performs no asynchronous work of its own. Whatever produces
//! the value (a timer, an I/O completion, another thread) is handed a
//! [`Resolver`]/[`Rejector`] pair by the executor passed to
//! [`SettlableFuture::new`] and reaches the future only through those two
//! entry points.
//!
//! # Examples
//!
//! ```
//! use settlable::{Chained, SettlableFuture};
//!
//! let doubled = SettlableFuture::<i32, String>::new(|resolve, _reject| {
//!     resolve.resolve(5);
//!     Ok(())
//! })
//! .then(|value| Ok(Chained::Value(value * 2)));
//!
//! assert_eq!(doubled.value().as_deref(), Some(&10));
//! ```

pub mod chain;

pub use chain::{Chained, Rejector, Resolver, SettlableFuture, Settlement, State};

use thiserror::Error;

/// Errors surfaced to tasks awaiting a future that can no longer settle.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Every settlement handle was dropped while the future was still
    /// pending, so no settlement can ever arrive.
    #[error("every settlement handle was dropped while the future was still pending")]
    SettlersDropped,
}
