//! Run cancellation.
//!
//! A cancelled run stops dispatching, cancels in-flight instances through the
//! workflow runtime and still executes its OnExit flow.

mod token;

pub use token::{CancelCallback, CancellationToken};
