//! Pure, deterministic workflow logic: run state and the transition table.
//!
//! No I/O here; everything is testable with synthetic states.

pub mod state;
pub mod transition;
