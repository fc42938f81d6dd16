use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Authenticated identity as returned by the refresh endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Raw telemetry record stored on a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub telemetry: Vec<TelemetryRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDraft {
    pub name: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A device reference is either a bare id or a populated summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceRef {
    Populated(DeviceSummary),
    Id(String),
}

impl DeviceRef {
    pub fn id(&self) -> &str {
        match self {
            DeviceRef::Populated(summary) => &summary.id,
            DeviceRef::Id(id) => id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            DeviceRef::Populated(summary) => Some(&summary.name),
            DeviceRef::Id(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Line,
    Bar,
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartKind::Line => write!(f, "line"),
            ChartKind::Bar => write!(f, "bar"),
        }
    }
}

/// Chart definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub device: DeviceRef,
    pub field: String,
    #[serde(rename = "type", default)]
    pub kind: ChartKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartDraft {
    pub name: String,
    pub device: String,
    pub field: String,
    #[serde(rename = "type")]
    pub kind: Option<ChartKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    Or,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        };
        f.write_str(symbol)
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub sensor_field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Default for Condition {
    fn default() -> Self {
        Self {
            sensor_field: String::new(),
            operator: Operator::Eq,
            value: Value::String(String::new()),
        }
    }
}

/// Alert rule evaluated server-side
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub name: String,
    pub device: DeviceRef,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub logic: Logic,
    #[serde(default)]
    pub email_notification: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDraft {
    pub name: String,
    pub device: String,
    pub conditions: Vec<Condition>,
    pub logic: Logic,
    pub email_notification: bool,
}

impl Default for AlertDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            device: String::new(),
            conditions: vec![Condition::default()],
            logic: Logic::Or,
            email_notification: true,
        }
    }
}

/// Remote actuator toggled over MQTT by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub name: String,
    pub device: DeviceRef,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub state: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ButtonDraft {
    pub name: String,
    pub device: String,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttCommand {
    pub topic: String,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldsResponse {
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldName {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamedFieldsResponse {
    #[serde(default)]
    pub fields: Vec<FieldName>,
}

/// REST API response wrapper for historical telemetry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryResponse {
    #[serde(default)]
    pub data: Vec<TelemetryRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedAlert {
    pub alert: AlertRule,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonState {
    pub state: bool,
}
