//! Domain layer: entities, their state machines and the storage ports.
//!
//! Nothing in here performs I/O. Every time-dependent rule takes `now` from
//! the caller.

pub mod activity;
pub mod deal;
pub mod document;
pub mod earnout;
pub mod ids;
pub mod milestone;
pub mod money;
pub mod nda;
pub mod payment;
pub mod ports;
