//! Entry queries over the store's indexes.
//!
//! A [`Filter`] is planned against the current feed list into a set of index
//! ranges plus a residual predicate, then executed by the read and mutation
//! methods on [`Database`](crate::store::Database).

pub mod executor;
pub mod filter;
pub mod merge;
pub mod planner;

pub use filter::{Filter, SortDirection, SortOrder};
pub use planner::{Plan, Planner};
