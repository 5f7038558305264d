//! Transport-level types shared by the listener and the processor.

/// Most messages a single receive call may return.
pub const MAX_BATCH_SIZE: i32 = 10;

/// Opaque unit returned by a receive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Raw payload, normally an SNS notification envelope in JSON
    pub body: String,
    /// Token used to acknowledge (delete) the message
    pub receipt_handle: String,
    /// Transport message id, used for log correlation only
    pub transport_id: Option<String>,
}

impl RawMessage {
    pub fn new(body: impl Into<String>, receipt_handle: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            receipt_handle: receipt_handle.into(),
            transport_id: None,
        }
    }
}

/// A concrete, pollable queue endpoint owned by one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQueue {
    /// Full queue URL
    pub url: String,
    /// Trailing path segment of the URL
    pub name: String,
    /// Name of the owning listener
    pub listener: String,
}

impl ResolvedQueue {
    pub fn new(url: impl Into<String>, listener: impl Into<String>) -> Self {
        let url = url.into();
        let name = queue_name(&url).to_string();
        Self {
            url,
            name,
            listener: listener.into(),
        }
    }
}

/// Trailing path segment of a queue URL.
pub fn queue_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}
