//! Use-case orchestration over the engine and persistence.
//!
//! # Responsibility
//! - Couple one `BoardEngine` with a `PersistenceStore` and a change
//!   subscription.
//! - Keep presentation callers decoupled from storage details.

pub mod board_session;
