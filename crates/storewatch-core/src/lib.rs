//! # storewatch core
//!
//! Runtime-free logic for storewatch: data models, interval maths and
//! due-set selection, URL heuristics, the error taxonomy, and the store
//! abstraction with its in-memory backend.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies.

pub mod category;
pub mod error;
pub mod interval;
pub mod models;
pub mod naming;
pub mod store;

pub use error::{Result, WatchError};
