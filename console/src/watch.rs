//! Live view of one chart in the terminal

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, Utc};
use dashboard_client::telemetry::parse_local_input;
use dashboard_client::{AppContext, ChartView};
use std::time::Duration;
use tracing::{info, warn};

const PRINT_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(
    ctx: &AppContext,
    chart_id: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<()> {
    let charts = ctx.session.api().list_charts().await?;
    let chart = charts
        .iter()
        .find(|c| c.id == chart_id)
        .ok_or_else(|| anyhow!("No chart {}", chart_id))?;

    let mut dashboard = ctx.mount_dashboard();
    if let Some(mut alerts) = dashboard.take_alerts() {
        tokio::spawn(async move {
            while let Some(alert) = alerts.recv().await {
                println!("ALERT {}", alert);
            }
        });
    }

    dashboard.select_chart(chart).await?;

    let start = start.map(parse_local_input).transpose()?.flatten();
    let end = end.map(parse_local_input).transpose()?.flatten();
    if start.is_some() || end.is_some() {
        dashboard
            .set_range(start, end)
            .await
            .context("Failed to apply date range")?;
    }

    info!("Watching {} (Ctrl-C to stop)", chart.name);
    let printer = async {
        let mut last_printed: Option<DateTime<Utc>> = None;
        let mut ticker = tokio::time::interval(PRINT_INTERVAL);
        loop {
            ticker.tick().await;
            match dashboard.view() {
                ChartView::Waiting => {
                    if last_printed.is_none() {
                        println!("Waiting for data...");
                    }
                }
                ChartView::Chart(frame) => {
                    if last_printed.is_none() {
                        println!("{}", frame.title);
                    }
                    for (at, value) in frame.labels.iter().zip(frame.values.iter()) {
                        if last_printed.is_some_and(|printed| *at <= printed) {
                            continue;
                        }
                        let shown = value.map_or_else(|| "-".to_string(), |v| v.to_string());
                        println!(
                            "{}  {} = {}",
                            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                            frame.label,
                            shown
                        );
                    }
                    last_printed = frame.labels.last().copied().or(last_printed);
                }
            }
            if ctx.stream.is_connected() {
                if let Err(e) = ctx.stream.ping() {
                    warn!("Ping failed: {}", e);
                }
            }
        }
    };

    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    tokio::select! {
        _ = dashboard.poll_history(ctx.config.telemetry_poll, stop) => {}
        _ = printer => {}
    }

    dashboard.unmount();
    Ok(())
}
