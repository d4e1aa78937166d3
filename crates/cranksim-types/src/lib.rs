//! Shared type definitions for the cranksim signal generator.
//!
//! Types defined here cross crate boundaries: the core engine produces
//! them, output adapters and the control surface consume them. All of
//! them serialize with `serde` so status snapshots and edge traces can be
//! handed to the UI collaborator as JSON.
//!
//! # Modules
//!
//! - [`enums`] -- Sensor channel and signal level.
//! - [`structs`] -- Edge events and engine status snapshots.

pub mod enums;
pub mod structs;

pub use enums::{Channel, Level};
pub use structs::{Edge, EngineStatus};
