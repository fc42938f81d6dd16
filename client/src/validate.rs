use crate::errors::{Error, Result};
use crate::model::{AlertDraft, ButtonDraft, ChartDraft, DeviceDraft, LoginRequest, MqttCommand};
use serde_json::Value;

fn required(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} is required", what)));
    }
    Ok(())
}

/// Validates credentials before they are sent to the login endpoint
pub fn login(credentials: &LoginRequest) -> Result<()> {
    required(&credentials.email, "Email")?;
    required(&credentials.password, "Password")?;
    if !credentials.email.contains('@') {
        return Err(Error::Validation(format!(
            "Email {} is not a valid address",
            credentials.email
        )));
    }
    Ok(())
}

pub fn device_draft(draft: &DeviceDraft) -> Result<()> {
    required(&draft.name, "Device name")?;
    required(&draft.topic, "Device topic")
}

pub fn chart_draft(draft: &ChartDraft) -> Result<()> {
    if draft.name.trim().is_empty()
        || draft.device.trim().is_empty()
        || draft.field.trim().is_empty()
        || draft.kind.is_none()
    {
        return Err(Error::Validation("All fields must be filled".to_string()));
    }
    Ok(())
}

pub fn alert_draft(draft: &AlertDraft) -> Result<()> {
    required(&draft.name, "Alert name")?;
    required(&draft.device, "Device")?;
    if draft.conditions.is_empty() {
        return Err(Error::Validation(
            "At least one condition is required".to_string(),
        ));
    }
    for (idx, condition) in draft.conditions.iter().enumerate() {
        required(
            &condition.sensor_field,
            &format!("Condition {} sensor field", idx + 1),
        )?;
        let missing = match &condition.value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        };
        if missing {
            return Err(Error::Validation(format!(
                "Condition {} value is required",
                idx + 1
            )));
        }
    }
    Ok(())
}

pub fn button_draft(draft: &ButtonDraft) -> Result<()> {
    required(&draft.name, "Button name")?;
    required(&draft.device, "Device")?;
    required(&draft.topic, "Topic")
}

pub fn mqtt_command(command: &MqttCommand) -> Result<()> {
    if command.topic.trim().is_empty() || command.command.trim().is_empty() {
        return Err(Error::Validation(
            "Topic and Command are required.".to_string(),
        ));
    }
    Ok(())
}

/// Clears the chart field when a reloaded field list no longer offers it.
pub fn retain_offered_field(draft: &mut ChartDraft, offered: &[String]) {
    if !offered.iter().any(|f| *f == draft.field) {
        draft.field.clear();
    }
}

/// Clears each condition's sensor field that a reloaded field list no longer offers.
pub fn retain_offered_sensor_fields(draft: &mut AlertDraft, offered: &[String]) {
    for condition in &mut draft.conditions {
        if !offered.iter().any(|f| *f == condition.sensor_field) {
            condition.sensor_field.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChartKind, Condition, Operator};
    use serde_json::json;

    fn credentials(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_valid_login() {
        assert!(login(&credentials("a@b.com", "x")).is_ok());
    }

    #[test]
    fn test_login_missing_password() {
        assert!(login(&credentials("a@b.com", "")).is_err());
    }

    #[test]
    fn test_login_bad_email() {
        assert!(login(&credentials("not-an-email", "x")).is_err());
    }

    #[test]
    fn test_chart_draft_requires_every_field() {
        let mut draft = ChartDraft {
            name: "Boiler".to_string(),
            device: "d1".to_string(),
            field: "temp".to_string(),
            kind: Some(ChartKind::Line),
        };
        assert!(chart_draft(&draft).is_ok());

        draft.kind = None;
        let err = chart_draft(&draft).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: All fields must be filled");
    }

    #[test]
    fn test_alert_condition_value_required() {
        let mut draft = AlertDraft {
            name: "Too hot".to_string(),
            device: "d1".to_string(),
            ..AlertDraft::default()
        };
        draft.conditions[0].sensor_field = "temp".to_string();
        assert!(alert_draft(&draft).is_err());

        draft.conditions[0].value = json!(40);
        assert!(alert_draft(&draft).is_ok());
    }

    #[test]
    fn test_alert_without_conditions() {
        let draft = AlertDraft {
            name: "Empty".to_string(),
            device: "d1".to_string(),
            conditions: vec![],
            ..AlertDraft::default()
        };
        assert!(alert_draft(&draft).is_err());
    }

    #[test]
    fn test_button_and_device_drafts() {
        assert!(button_draft(&ButtonDraft {
            name: "Pump".to_string(),
            device: "d1".to_string(),
            topic: "home/pump".to_string(),
        })
        .is_ok());
        assert!(button_draft(&ButtonDraft::default()).is_err());
        assert!(device_draft(&DeviceDraft {
            name: "Sensor".to_string(),
            topic: " ".to_string(),
        })
        .is_err());
    }

    #[test]
    fn test_mqtt_command_message() {
        let err = mqtt_command(&MqttCommand {
            topic: "home/light".to_string(),
            command: "".to_string(),
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Topic and Command are required.");
    }

    #[test]
    fn test_field_reconciliation() {
        let offered = vec!["temp".to_string(), "humidity".to_string()];

        let mut chart = ChartDraft {
            field: "pressure".to_string(),
            ..ChartDraft::default()
        };
        retain_offered_field(&mut chart, &offered);
        assert!(chart.field.is_empty());

        let mut alert = AlertDraft::default();
        alert.conditions = vec![
            Condition {
                sensor_field: "temp".to_string(),
                operator: Operator::Gt,
                value: json!(30),
            },
            Condition {
                sensor_field: "co2".to_string(),
                ..Condition::default()
            },
        ];
        retain_offered_sensor_fields(&mut alert, &offered);
        assert_eq!(alert.conditions[0].sensor_field, "temp");
        assert!(alert.conditions[1].sensor_field.is_empty());
    }
}
