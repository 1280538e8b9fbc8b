//! Frame-indexed change history.
//!
//! Every completed interception of a tracked entity becomes an immutable [`ChangeRecord`]. The
//! [`ChangeTracker`] keeps these records per frame and per entity for a bounded number of
//! frames and answers the queries a debugging surface needs: what changed in a frame, which
//! call-sites ([`Modifier`]s) did it, which frames hold data.
//!
//! # Key Components
//!
//! - [`ChangeTracker`] - The store, also responsible for (un)tracking entities
//! - [`ChangeRecord`] - One committed change with a weak link to its predecessor
//! - [`Modifier`] / [`ModifierKey`] - Changes grouped by calling entity and method

mod change;
mod store;

pub use change::{ChangeRecord, Modifier, ModifierKey};
pub use store::{ChangeTracker, FrameChanges, FrameMap};
