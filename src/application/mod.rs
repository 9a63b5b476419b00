//! Application layer orchestrating the deal lifecycle.
//!
//! Each service owns one concern and talks to storage only through the ports
//! in [`crate::domain::ports`]. [`engine::DealEngine`] wires them together and
//! is the entry point used by the binary.

pub mod activity_log;
pub mod command;
pub mod documents;
pub mod earnout;
pub mod engine;
pub mod milestones;
pub mod nda_gate;
pub mod payments;
pub mod stages;
