//! Typed wrappers over the device, chart, alert, button and command endpoints

use crate::api::ApiClient;
use crate::errors::Result;
use crate::io::ApiRequest;
use crate::model::{
    AlertDraft, AlertRule, Button, ButtonDraft, ButtonState, Chart, ChartDraft, CreatedAlert,
    Device, DeviceDraft, FieldsResponse, MqttCommand, NamedFieldsResponse, TelemetryRecord,
    TelemetryResponse,
};
use crate::validate;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use tracing::info;

/// Parameters for `GET /telemetry/:deviceId`
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryQuery {
    pub device_id: String,
    pub field: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TelemetryQuery {
    pub fn to_request(&self) -> ApiRequest {
        let mut request = ApiRequest::get(format!("/telemetry/{}", self.device_id))
            .query("field", self.field.clone());
        if let Some(start) = self.start {
            request = request.query("startDate", iso_utc(start));
        }
        if let Some(end) = self.end {
            request = request.query("endDate", iso_utc(end));
        }
        if let Some(limit) = self.limit {
            request = request.query("limit", limit.to_string());
        }
        request
    }
}

/// UTC ISO-8601 with millisecond precision, e.g. `2024-05-01T08:00:00.000Z`
pub fn iso_utc(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Charts ordered by name, case-insensitively.
pub fn sort_charts(charts: &mut [Chart]) {
    charts.sort_by_key(|chart| chart.name.to_lowercase());
}

/// Case-insensitive substring match on the chart name; unnamed charts never match.
pub fn filter_charts<'a>(charts: &'a [Chart], query: &str) -> Vec<&'a Chart> {
    let needle = query.to_lowercase();
    charts
        .iter()
        .filter(|chart| !chart.name.is_empty() && chart.name.to_lowercase().contains(&needle))
        .collect()
}

impl ApiClient {
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        self.get_json(ApiRequest::get("/devices")).await
    }

    pub async fn get_device(&self, id: &str) -> Result<Device> {
        self.get_json(ApiRequest::get(format!("/devices/{}", id)))
            .await
    }

    pub async fn create_device(&self, draft: &DeviceDraft) -> Result<Device> {
        validate::device_draft(draft)?;
        let device: Device = self.send_json(ApiRequest::post("/devices"), draft).await?;
        info!("Created device {} ({})", device.name, device.id);
        Ok(device)
    }

    pub async fn update_device(&self, id: &str, draft: &DeviceDraft) -> Result<Device> {
        validate::device_draft(draft)?;
        self.send_json(ApiRequest::put(format!("/devices/{}", id)), draft)
            .await
    }

    pub async fn delete_device(&self, id: &str) -> Result<()> {
        self.send_empty(ApiRequest::delete(format!("/devices/{}", id)))
            .await
    }

    /// Field names offered when building charts and alert conditions.
    pub async fn device_fields(&self, device_id: &str) -> Result<Vec<String>> {
        let response: FieldsResponse = self
            .get_json(ApiRequest::get(format!(
                "/devices/{}/telemetry-field",
                device_id
            )))
            .await?;
        Ok(response.fields)
    }

    pub async fn telemetry_fields(&self, device_id: &str) -> Result<Vec<String>> {
        let response: NamedFieldsResponse = self
            .get_json(ApiRequest::get(format!("/telemetry/fields/{}", device_id)))
            .await?;
        Ok(response.fields.into_iter().map(|f| f.name).collect())
    }

    pub async fn telemetry(&self, query: &TelemetryQuery) -> Result<Vec<TelemetryRecord>> {
        let response: TelemetryResponse = self.get_json(query.to_request()).await?;
        Ok(response.data)
    }

    /// Charts sorted by name.
    pub async fn list_charts(&self) -> Result<Vec<Chart>> {
        let mut charts: Vec<Chart> = self.get_json(ApiRequest::get("/charts")).await?;
        sort_charts(&mut charts);
        Ok(charts)
    }

    /// Creates the chart and returns the refreshed, sorted chart list.
    pub async fn create_chart(&self, draft: &ChartDraft) -> Result<Vec<Chart>> {
        validate::chart_draft(draft)?;
        let chart: Chart = self.send_json(ApiRequest::post("/charts"), draft).await?;
        info!("Created chart {} ({})", chart.name, chart.id);
        self.list_charts().await
    }

    /// Deletes the chart and returns the refreshed chart list.
    pub async fn delete_chart(&self, id: &str) -> Result<Vec<Chart>> {
        self.send_empty(ApiRequest::delete(format!("/charts/{}", id)))
            .await?;
        self.list_charts().await
    }

    pub async fn list_alerts(&self) -> Result<Vec<AlertRule>> {
        self.get_json(ApiRequest::get("/alerts")).await
    }

    pub async fn create_alert(&self, draft: &AlertDraft) -> Result<AlertRule> {
        validate::alert_draft(draft)?;
        let created: CreatedAlert = self.send_json(ApiRequest::post("/alerts"), draft).await?;
        info!("Created alert {} ({})", created.alert.name, created.alert.id);
        Ok(created.alert)
    }

    pub async fn update_alert(&self, id: &str, draft: &AlertDraft) -> Result<AlertRule> {
        validate::alert_draft(draft)?;
        self.send_json(ApiRequest::put(format!("/alerts/{}", id)), draft)
            .await
    }

    pub async fn delete_alert(&self, id: &str) -> Result<()> {
        self.send_empty(ApiRequest::delete(format!("/alerts/{}", id)))
            .await
    }

    pub async fn list_buttons(&self) -> Result<Vec<Button>> {
        self.get_json(ApiRequest::get("/buttons")).await
    }

    /// Creates the button and returns the refreshed button list.
    pub async fn create_button(&self, draft: &ButtonDraft) -> Result<Vec<Button>> {
        validate::button_draft(draft)?;
        let button: Button = self.send_json(ApiRequest::post("/buttons"), draft).await?;
        info!("Created button {} on topic {}", button.name, button.topic);
        self.list_buttons().await
    }

    pub async fn delete_button(&self, id: &str) -> Result<()> {
        self.send_empty(ApiRequest::delete(format!("/buttons/{}", id)))
            .await
    }

    /// Requests the opposite of `current` and returns the state the server settled on.
    pub async fn toggle_button(&self, id: &str, current: bool) -> Result<bool> {
        let response: ButtonState = self
            .send_json(
                ApiRequest::put(format!("/buttons/{}", id)),
                &json!({ "state": !current }),
            )
            .await?;
        info!("Button {} is now {}", id, if response.state { "on" } else { "off" });
        Ok(response.state)
    }

    pub async fn send_command(&self, command: &MqttCommand) -> Result<()> {
        validate::mqtt_command(command)?;
        self.execute(ApiRequest::post("/mqtt/sendcommand").json(command)?)
            .await?;
        info!("Command sent to {}", command.topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::io::{HttpResponse, MockHttpClient};
    use crate::model::{ChartKind, DeviceRef};
    use crate::token::TokenStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn chart(id: &str, name: &str) -> Chart {
        Chart {
            id: id.to_string(),
            name: name.to_string(),
            device: DeviceRef::Id("d1".to_string()),
            field: "temp".to_string(),
            kind: ChartKind::Line,
        }
    }

    #[test]
    fn test_query_params() {
        let query = TelemetryQuery {
            device_id: "d1".to_string(),
            field: "temp".to_string(),
            start: Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()),
            end: None,
            limit: Some(100),
        };
        let request = query.to_request();
        assert_eq!(request.path, "/telemetry/d1");
        assert_eq!(
            request.query,
            vec![
                ("field".to_string(), "temp".to_string()),
                ("startDate".to_string(), "2024-05-01T08:00:00.000Z".to_string()),
                ("limit".to_string(), "100".to_string()),
            ]
        );
    }

    #[test]
    fn test_sort_and_filter_charts() {
        let mut charts = vec![chart("1", "humidity"), chart("2", "Boiler"), chart("3", "")];
        sort_charts(&mut charts);
        let names: Vec<&str> = charts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["", "Boiler", "humidity"]);

        let found = filter_charts(&charts, "BOIL");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "2");
        assert_eq!(filter_charts(&charts, "").len(), 2);
    }

    #[tokio::test]
    async fn test_send_command_validated_before_dispatch() {
        let mut mock = MockHttpClient::new();
        mock.expect_send().times(0);
        let api = ApiClient::with_http(Arc::new(mock), TokenStore::new());

        let err = api
            .send_command(&MqttCommand {
                topic: "".to_string(),
                command: "on".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_toggle_uses_server_state() {
        let mut mock = MockHttpClient::new();
        mock.expect_send()
            .withf(|r| {
                r.path == "/buttons/b1"
                    && r.body.as_ref().map(|b| b["state"] == true).unwrap_or(false)
            })
            .times(1)
            .returning(|_| {
                Box::pin(async {
                    Ok(HttpResponse {
                        status: 200,
                        body: r#"{"_id":"b1","state":false}"#.to_string(),
                    })
                })
            });
        let api = ApiClient::with_http(Arc::new(mock), TokenStore::new());

        assert!(!api.toggle_button("b1", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_chart_refetches_sorted_list() {
        let mut mock = MockHttpClient::new();
        mock.expect_send()
            .withf(|r| r.method == reqwest::Method::POST && r.path == "/charts")
            .times(1)
            .returning(|_| {
                Box::pin(async {
                    Ok(HttpResponse {
                        status: 201,
                        body: r#"{"_id":"c9","name":"b","device":"d1","field":"temp","type":"line"}"#
                            .to_string(),
                    })
                })
            });
        mock.expect_send()
            .withf(|r| r.method == reqwest::Method::GET && r.path == "/charts")
            .times(1)
            .returning(|_| {
                Box::pin(async {
                    Ok(HttpResponse {
                        status: 200,
                        body: r#"[
                            {"_id":"c9","name":"b","device":"d1","field":"temp","type":"line"},
                            {"_id":"c1","name":"A","device":"d1","field":"temp","type":"bar"}
                        ]"#
                        .to_string(),
                    })
                })
            });
        let api = ApiClient::with_http(Arc::new(mock), TokenStore::new());

        let charts = api
            .create_chart(&ChartDraft {
                name: "b".to_string(),
                device: "d1".to_string(),
                field: "temp".to_string(),
                kind: Some(ChartKind::Line),
            })
            .await
            .unwrap();
        assert_eq!(charts[0].id, "c1");
        assert_eq!(charts[1].id, "c9");
    }
}
