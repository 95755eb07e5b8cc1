//! Persistence contracts and the SQLite reference store.
//!
//! # Responsibility
//! - Define what a board session needs from durable storage.
//! - Keep SQL details out of the engine and session layers.
//!
//! # Invariants
//! - Writes validate items before any SQL mutation.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`) in
//!   addition to DB transport errors.

pub mod persistence;
pub mod sqlite_store;
