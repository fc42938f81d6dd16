use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Live reading pushed by the server for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceData {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DeviceData,
    AlertNotification,
    Connected,
    Error,
    Pong,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    DeviceData(DeviceData),
    AlertNotification(Value),
    /// Handshake acknowledgement
    Connected(Value),
    Error(Value),
    Pong,
    Unknown { event: String },
}

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl StreamEvent {
    /// Parses a `{"event": ..., "data": ...}` text frame.
    pub fn from_frame(text: &str) -> Result<Self> {
        let frame: Frame = serde_json::from_str(text)?;
        let event = match frame.event.as_str() {
            "device_data" => StreamEvent::DeviceData(serde_json::from_value(frame.data)?),
            "alert_notification" => StreamEvent::AlertNotification(frame.data),
            "connected" => StreamEvent::Connected(frame.data),
            "error" => StreamEvent::Error(frame.data),
            "pong" => StreamEvent::Pong,
            _ => StreamEvent::Unknown { event: frame.event },
        };
        Ok(event)
    }

    pub fn kind(&self) -> Option<EventKind> {
        match self {
            StreamEvent::DeviceData(_) => Some(EventKind::DeviceData),
            StreamEvent::AlertNotification(_) => Some(EventKind::AlertNotification),
            StreamEvent::Connected(_) => Some(EventKind::Connected),
            StreamEvent::Error(_) => Some(EventKind::Error),
            StreamEvent::Pong => Some(EventKind::Pong),
            StreamEvent::Unknown { .. } => None,
        }
    }
}

pub fn ping_frame() -> String {
    json!({ "event": "ping" }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_data_frame() {
        let event = StreamEvent::from_frame(
            r#"{"event":"device_data","data":{"deviceId":"d1","timestamp":"2024-05-01T08:00:00Z","data":{"temp":{"value":21.5,"unit":"C"}}}}"#,
        )
        .unwrap();

        match event {
            StreamEvent::DeviceData(data) => {
                assert_eq!(data.device_id, "d1");
                assert_eq!(data.data["temp"]["value"], 21.5);
            }
            other => panic!("expected device data, got {other:?}"),
        }
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(
            StreamEvent::from_frame(r#"{"event":"pong"}"#).unwrap(),
            StreamEvent::Pong
        );
        assert_eq!(
            StreamEvent::from_frame(r#"{"event":"connected","data":{"userId":"u1"}}"#)
                .unwrap()
                .kind(),
            Some(EventKind::Connected)
        );
        assert_eq!(
            StreamEvent::from_frame(r#"{"event":"something_else"}"#)
                .unwrap()
                .kind(),
            None
        );
    }

    #[test]
    fn test_malformed_frame() {
        assert!(StreamEvent::from_frame("not json").is_err());
        assert!(StreamEvent::from_frame(r#"{"event":"device_data","data":{}}"#).is_err());
    }

    #[test]
    fn test_ping_frame() {
        assert_eq!(ping_frame(), r#"{"event":"ping"}"#);
    }
}
