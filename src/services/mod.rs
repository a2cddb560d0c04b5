//! Dispatch services layer.
//!
//! This module contains the services that turn a recipient table and a
//! campaign into delivered messages, coordinating between providers and
//! domain types.
//!
//! # Architecture
//!
//! Services sit between the entry points and the delivery providers:
//!
//! ```text
//! Entry points (CLI, run_dispatch, spawn_dispatch)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//! Infrastructure (SMTP, SES)
//! ```
//!
//! # Services Overview
//!
//! - [`load_recipients`]: Resolves columns and validates rows into recipients
//! - [`render`]: Personalizes subject and body templates
//! - [`Dispatcher`]: Runs the send loop with throttle, cancellation and progress

mod dispatch_service;
mod recipient_loader;
mod template;

pub use dispatch_service::{
    run_dispatch, spawn_dispatch, AbortReason, DispatchEvent, DispatchHandle,
    Dispatcher, ProgressSink,
};
pub use recipient_loader::{load_recipients, LoadedRecipients, RawTable, SchemaError, TableError};
pub use template::{render, render_message};
