//! Slack Web API access for TeamLink.
//!
//! [`SlackApi`] is the seam the rest of the system talks through.
//! [`SlackClient`] implements it over HTTP; [`MockSlack`] is an in-memory
//! stand-in used by tests in the crates above.

pub mod api;
pub mod blocks;
pub mod client;
pub mod errors;
pub mod mock;

pub use api::{
    Attribution, FileUpload, InviteOutcome, OutgoingMessage, PostedMessage, RawMessage, SlackApi,
};
pub use client::{RetryPolicy, SlackClient};
pub use mock::MockSlack;
