//! Message model for the Sable private messaging layer.
//!
//! This crate provides the plaintext protocol message (`PlainMessage`),
//! attachments, and the `forward` routing message used when envelopes are
//! relayed through intermediaries. The encrypted/signed renditions of these
//! messages are produced by the `sable-agent` crate.

pub mod error;
pub mod message;

pub use error::{Error, Result};
pub use message::{
    Attachment, AttachmentData, Forward, PlainMessage, FORWARD_MESSAGE_TYPE, PLAINTEXT_TYP,
};
