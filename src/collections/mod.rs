//! Durable Collections. A generic, disk-backed, indexed record store with
//! an in-memory chainable query surface layered on top.

pub mod database;
pub mod durable;

pub use database::Database;
pub use durable::{Collection, QueryBuilder};
