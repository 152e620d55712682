use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TIMER_TICK: &str = "timer_tick";
pub const TIME_UP: &str = "time_up";
pub const TEST_COMPLETED: &str = "test_completed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    pub event: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl WsEnvelope {
    pub fn now(event: &str, payload: Value) -> Self {
        Self {
            event: event.to_string(),
            payload,
            request_id: None,
            ts: Some(Utc::now().to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_envelope_serialization() {
        let env = WsEnvelope::now(TIMER_TICK, serde_json::json!({"remainingSeconds": 5399}));
        let raw = serde_json::to_string(&env).unwrap();
        assert!(!raw.contains("request_id"));
        let parsed: WsEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.event, "timer_tick");
        assert_eq!(parsed.payload["remainingSeconds"], 5399);
        assert!(parsed.ts.is_some());
    }
}
