//! Domain model shared by every board projection.
//!
//! # Responsibility
//! - Define the canonical item record used by task board, tool catalog,
//!   shift-claim board and meeting workflow.
//! - Define identifiers, status machines and the remote change envelope.
//!
//! # Invariants
//! - Every item is identified by a stable `ItemId` that is never reused.
//! - Item ordering lives in bucket sequences, never inside the item itself.

pub mod event;
pub mod ids;
pub mod item;
pub mod status;
