//! Index data models
//!
//! Email documents as stored per tenant, and the value types search
//! hands back.

mod candidate;
mod email_document;

pub use candidate::{DateRange, ScoredCandidate};
pub use email_document::{parse_timestamp, render_page, EmailDocument};
