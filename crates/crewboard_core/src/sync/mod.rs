//! Change notification plumbing.
//!
//! # Responsibility
//! - Carry `ChangeEvent`s from the persistence side to mounted boards.

pub mod notifier;
