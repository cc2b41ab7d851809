//! Plaintext protocol messages and attachments.
//!
//! A `PlainMessage` is the unit of communication between agents. It is what
//! the packer encrypts or signs on send, and what the unpacker hands back on
//! receipt. Messages of type [`FORWARD_MESSAGE_TYPE`] carry another packed
//! message as an attachment for the next routing hop.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Media type of a plaintext message.
pub const PLAINTEXT_TYP: &str = "application/sable-plain+json";

/// Message type of a routing (forward) message.
pub const FORWARD_MESSAGE_TYPE: &str = "forward";

fn default_typ() -> String {
    PLAINTEXT_TYP.to_string()
}

/// A plaintext protocol message.
///
/// The sender is optional: anonymously encrypted messages carry no `from`
/// at all, so nothing in the message can identify who produced it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct PlainMessage {
    /// Message id. Must be unique to the sender.
    pub id: String,

    /// Media type, always [`PLAINTEXT_TYP`] for plaintext messages.
    #[serde(default = "default_typ")]
    pub typ: String,

    /// Message type identifier. Informs the content of the body and how it
    /// should be processed.
    #[serde(rename = "type")]
    pub type_: String,

    /// Message body.
    pub body: Value,

    /// Sender identifier. Absent for anonymous messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Identifier(s) for the intended recipients.
    #[serde(default)]
    pub to: Vec<String>,

    /// Uniquely identifies the thread the message belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,

    /// When the sender created the message, in UTC epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<u64>,

    /// When the sender considers the message expired, in UTC epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_time: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,

    /// Custom message headers.
    #[serde(flatten)]
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub extra_headers: HashMap<String, Value>,
}

impl PlainMessage {
    /// Create a new message with the given id, type and body.
    pub fn new(id: String, type_: String, body: Value) -> Self {
        Self {
            id,
            typ: default_typ(),
            type_,
            body,
            from: None,
            to: vec![],
            thid: None,
            created_time: Some(chrono::Utc::now().timestamp() as u64),
            expires_time: None,
            attachments: None,
            extra_headers: HashMap::new(),
        }
    }

    /// Create a new message with a generated id.
    pub fn generate(type_: String, body: Value) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), type_, body)
    }

    /// Builder method to set the sender.
    pub fn with_from(mut self, from: &str) -> Self {
        self.from = Some(from.to_string());
        self
    }

    /// Builder method to set recipients.
    pub fn with_recipients(mut self, to: Vec<String>) -> Self {
        self.to = to;
        self
    }

    /// Builder method to add a single recipient.
    pub fn with_recipient(mut self, recipient: &str) -> Self {
        self.to.push(recipient.to_string());
        self
    }

    /// Builder method to set the thread id.
    pub fn with_thread_id(mut self, thid: Option<String>) -> Self {
        self.thid = thid;
        self
    }

    /// Builder method to set expiration time.
    pub fn with_expires_at(mut self, expires_time: u64) -> Self {
        self.expires_time = Some(expires_time);
        self
    }

    /// Builder method to add attachments.
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = Some(attachments);
        self
    }

    /// Builder method to add a custom header.
    pub fn with_header(mut self, key: String, value: Value) -> Self {
        self.extra_headers.insert(key, value);
        self
    }

    /// Check structural invariants of the message.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Validation("message id cannot be empty".to_string()));
        }
        if self.type_.is_empty() {
            return Err(Error::Validation(
                "message type cannot be empty".to_string(),
            ));
        }
        if let (Some(created), Some(expires)) = (self.created_time, self.expires_time) {
            if expires < created {
                return Err(Error::Validation(
                    "message expires before it was created".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether this is a routing message wrapping another packed message.
    pub fn is_forward(&self) -> bool {
        self.type_ == FORWARD_MESSAGE_TYPE
    }

    /// The attachment of a `forward` message carrying the packed message for
    /// the next hop.
    pub fn forward_attachment(&self) -> Result<&AttachmentData> {
        if !self.is_forward() {
            return Err(Error::Validation(
                "not a forward message".to_string(),
            ));
        }
        self.attachments
            .as_deref()
            .and_then(|attachments| attachments.first())
            .map(|attachment| &attachment.data)
            .ok_or_else(|| {
                Error::Validation("forward message carries no attachment".to_string())
            })
    }
}

/// Body of a `forward` routing message.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Forward {
    /// Identifier of the next hop the attached message is destined for.
    pub next: String,
}

impl Forward {
    /// Wrap an already-packed message for delivery to `next`.
    ///
    /// The packed message is attached as embedded JSON; the resulting
    /// message is itself plaintext and is normally encrypted to the
    /// mediator before being sent.
    pub fn wrap(next: &str, packed: Value) -> Result<PlainMessage> {
        let body = serde_json::to_value(Forward {
            next: next.to_string(),
        })?;
        Ok(PlainMessage::generate(FORWARD_MESSAGE_TYPE.to_string(), body)
            .with_recipient(next)
            .with_attachments(vec![Attachment::json(packed)]))
    }
}

/// Attachment to a protocol message.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Attachment {
    /// The actual content of the attachment, embedded as JSON or base64.
    pub data: AttachmentData,

    /// Identifies attached content within the scope of a given message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// A human-readable description of the content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Describes the MIME type of the attached content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl Attachment {
    /// Attachment with directly embedded JSON data.
    pub fn json(json: Value) -> Self {
        Self {
            data: AttachmentData::Json { json },
            id: None,
            description: None,
            media_type: None,
        }
    }

    /// Attachment with base64-encoded data.
    pub fn base64(base64: String) -> Self {
        Self {
            data: AttachmentData::Base64 { base64 },
            id: None,
            description: None,
            media_type: None,
        }
    }

    /// Builder method to set the attachment id.
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Builder method to set the media type.
    pub fn with_media_type(mut self, media_type: &str) -> Self {
        self.media_type = Some(media_type.to_string());
        self
    }
}

// Attention: we are using untagged enum serialization.
// Serde will try each variant in order and return the first that
// deserializes; the `json`/`base64` keys discriminate the two.

/// Represents attachment data in embedded JSON or base64 form.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(untagged)]
pub enum AttachmentData {
    Json {
        /// Directly embedded JSON data.
        json: Value,
    },
    Base64 {
        /// Base64-encoded data.
        base64: String,
    },
}
