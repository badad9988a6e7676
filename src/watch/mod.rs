// src/watch/mod.rs

//! Blocking on store changes.
//!
//! [`wait_loop`] turns the store's transactions and change notification
//! into the one waiting primitive the lifecycle code uses. It knows about
//! processing block ownership and terminal status, but nothing about
//! phases or deployments.

pub mod wait_loop;

pub use wait_loop::{Completion, Outcome, Step, WaitLoop};
