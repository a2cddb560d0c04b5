//! Domain layer types for mailshot.
//!
//! This module contains the values that flow through a dispatch run:
//! recipients, campaigns, per-recipient outcomes and the aggregated report.

mod campaign;
mod outcome;
mod recipient;
mod report;
mod types;

pub use campaign::{Campaign, RenderedMessage, GREETING_TEMPLATE};
pub use outcome::{SendOutcome, SendStatus};
pub use recipient::{is_valid_email, InvalidEmail, Recipient, RowSkip, SkipReason};
pub use report::{DispatchReport, ReportBuilder, RunStatus};
pub use types::RunId;
