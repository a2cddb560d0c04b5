//! mailshot - Personalized batch email dispatch
//!
//! This crate loads a recipient table, renders a campaign's templates for each
//! recipient and sends the messages one at a time through SMTP or the Amazon
//! SES API, reporting per-recipient outcomes as it goes.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;

pub use services::{run_dispatch, spawn_dispatch, AbortReason, DispatchEvent, Dispatcher};
