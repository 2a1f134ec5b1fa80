//! Engine configuration
//!
//! Tunables of the correlation engine and the WebSocket binding.

use std::time::Duration;

/// Correlation engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for an outbound call, unless overridden per call
    pub call_timeout: Duration,

    /// Event queue depth of each connection actor
    pub mailbox_capacity: usize,

    /// Inbound calls buffered while a handler is running. Overflow is
    /// answered with RpcFrameworkError.
    pub max_queued_calls: usize,

    /// Check handler responses against the response shape before sending
    pub validate_responses: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            mailbox_capacity: 64,
            max_queued_calls: 16,
            validate_responses: true,
        }
    }
}

impl EngineConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    pub fn with_max_queued_calls(mut self, max: usize) -> Self {
        self.max_queued_calls = max;
        self
    }

    /// Send handler responses without checking them
    pub fn without_response_validation(mut self) -> Self {
        self.validate_responses = false;
        self
    }
}

/// WebSocket binding settings
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Subprotocol requested by stations and echoed by the CSMS
    pub subprotocol: String,

    pub max_message_size: usize,

    pub max_frame_size: usize,

    /// Outbound frames buffered per link
    pub outbound_buffer: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            subprotocol: crate::ws::OCPP_SUBPROTOCOL.to_string(),
            max_message_size: 64 * 1024,
            max_frame_size: 16 * 1024,
            outbound_buffer: 64,
        }
    }
}

impl WsConfig {
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}
