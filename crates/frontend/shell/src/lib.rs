//! VM host shell
//!
//! This crate provides the emulation worker thread and the protocol by
//! which a UI thread drives it: command marshaling, lifecycle
//! notifications, display-surface round-trips, and the save-state slot
//! registry.

pub mod command;
pub mod display;
pub mod events;
pub mod save_slots;
pub mod settings;
pub mod worker;
