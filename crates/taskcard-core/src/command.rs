use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// One outbound `callService(domain, service, payload)` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub payload: serde_json::Value,
}

impl ServiceCall {
    pub fn new(domain: &str, service: &str, payload: serde_json::Value) -> Self {
        Self {
            domain: domain.to_string(),
            service: service.to_string(),
            payload,
        }
    }

    /// `input_text.set_value` for a bounded scalar field.
    pub fn set_value(entity_id: &str, value: &str) -> Self {
        Self::new(
            "input_text",
            "set_value",
            json!({ "entity_id": entity_id, "value": value }),
        )
    }

    /// `homeassistant.update_entity`, asking the host to refresh a sensor.
    pub fn update_entity(entity_id: &str) -> Self {
        Self::new(
            "homeassistant",
            "update_entity",
            json!({ "entity_id": entity_id }),
        )
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("entity_id").and_then(|value| value.as_str())
    }

    pub fn value(&self) -> Option<&str> {
        self.payload.get("value").and_then(|value| value.as_str())
    }
}

/// Result of a single write, reported back by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Ok,
    Failed(String),
}

impl WriteOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, WriteOutcome::Ok)
    }
}

/// Write-only command channel into the host.
pub trait CommandChannel {
    fn call_service(&mut self, call: &ServiceCall) -> WriteOutcome;
}

/// In-memory channel that keeps every call it receives.
///
/// Calls whose entity id is listed in `failing` are rejected; everything else succeeds.
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    pub calls: Vec<ServiceCall>,
    failing: Vec<String>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, entity_id: &str) -> Self {
        self.failing.push(entity_id.to_string());
        self
    }

    /// Last value written to `entity_id`, if any.
    pub fn last_value(&self, entity_id: &str) -> Option<&str> {
        self.calls
            .iter()
            .rev()
            .filter(|call| call.entity_id() == Some(entity_id))
            .find_map(|call| call.value())
    }
}

impl CommandChannel for RecordingChannel {
    fn call_service(&mut self, call: &ServiceCall) -> WriteOutcome {
        self.calls.push(call.clone());
        if let Some(entity_id) = call.entity_id()
            && self.failing.iter().any(|failing| failing == entity_id)
        {
            warn!(entity_id, "recording channel rejecting call");
            return WriteOutcome::Failed(format!("{entity_id} is unavailable"));
        }
        debug!(domain = %call.domain, service = %call.service, "recorded call");
        WriteOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandChannel, RecordingChannel, ServiceCall, WriteOutcome};

    #[test]
    fn set_value_payload_shape() {
        let call = ServiceCall::set_value("input_text.closed", "[\"1\"]");
        assert_eq!(call.domain, "input_text");
        assert_eq!(call.service, "set_value");
        assert_eq!(call.entity_id(), Some("input_text.closed"));
        assert_eq!(call.value(), Some("[\"1\"]"));
    }

    #[test]
    fn recording_channel_reports_scripted_failures() {
        let mut channel = RecordingChannel::new().failing_for("input_text.broken");
        assert_eq!(
            channel.call_service(&ServiceCall::set_value("input_text.ok", "a")),
            WriteOutcome::Ok
        );
        assert!(matches!(
            channel.call_service(&ServiceCall::set_value("input_text.broken", "b")),
            WriteOutcome::Failed(_)
        ));
        assert_eq!(channel.calls.len(), 2);
        assert_eq!(channel.last_value("input_text.ok"), Some("a"));
    }
}
