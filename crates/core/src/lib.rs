//! `encore-core`: primitives shared by the dispatch engine and its collaborators.
//!
//! This crate contains no IO and no dispatch logic.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CoreError;
pub use id::EventId;
