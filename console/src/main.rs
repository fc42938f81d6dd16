mod watch;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dashboard_client::model::{ChartDraft, ChartKind, DeviceDraft, LoginRequest, MqttCommand};
use dashboard_client::resources::filter_charts;
use dashboard_client::{metrics, oauth, AppContext, BootstrapOutcome, Config};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dashboard-console", about = "Terminal front-end for the IoT dashboard")]
struct Cli {
    /// REST base URL, e.g. http://localhost:3001/api
    #[arg(long, env = "API_BASE_URL")]
    api: Option<String>,

    #[arg(long, env = "DASHBOARD_EMAIL")]
    email: Option<String>,

    #[arg(long, env = "DASHBOARD_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Access token from an OAuth redirect, used instead of email/password
    #[arg(long, env = "DASHBOARD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print collected metrics before exiting
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the Google sign-in URL
    OauthUrl,
    Devices,
    CreateDevice {
        #[arg(long)]
        name: String,
        #[arg(long)]
        topic: String,
    },
    DeleteDevice { id: String },
    /// Telemetry fields reported by a device
    Fields { device: String },
    Charts {
        /// Case-insensitive name filter
        #[arg(long)]
        search: Option<String>,
    },
    CreateChart {
        #[arg(long)]
        name: String,
        #[arg(long)]
        device: String,
        #[arg(long)]
        field: String,
        #[arg(long, default_value = "line")]
        kind: String,
    },
    DeleteChart { id: String },
    Alerts,
    DeleteAlert { id: String },
    Buttons,
    DeleteButton { id: String },
    /// Flip a button and print the state the server settled on
    Toggle { id: String },
    SendCommand {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        command: String,
    },
    /// Stream a chart's telemetry until Ctrl-C
    Watch {
        chart: String,
        /// Local time, YYYY-MM-DDTHH:MM
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env_with_base(cli.api.as_deref()).context("Invalid configuration")?;

    if let Command::OauthUrl = cli.command {
        println!("{}", oauth::authorization_url(&config)?);
        return Ok(());
    }

    let ctx = AppContext::new(config).context("Failed to build client")?;
    sign_in(&ctx, &cli).await?;

    let result = run(&ctx, cli.command).await;

    if ctx.session.is_logged_in() {
        if let Err(e) = ctx.session.logout().await {
            warn!("Logout failed: {}", e);
        }
    }
    if cli.metrics {
        print!("{}", metrics::gather_metrics());
    }
    result
}

async fn sign_in(ctx: &AppContext, cli: &Cli) -> Result<()> {
    if let BootstrapOutcome::LoggedIn { .. } = ctx.bootstrap().await {
        info!("Session restored");
        return Ok(());
    }

    if let Some(token) = &cli.token {
        ctx.session.sign_in_with_oauth_token(token);
        ctx.navigator.go_home();
        return Ok(());
    }

    match (&cli.email, &cli.password) {
        (Some(email), Some(password)) => {
            ctx.session
                .sign_in(&LoginRequest {
                    email: email.clone(),
                    password: password.clone(),
                })
                .await
                .context("Login failed")?;
            Ok(())
        }
        _ => bail!("Not logged in: pass --email and --password, or --token"),
    }
}

async fn run(ctx: &AppContext, command: Command) -> Result<()> {
    let api = ctx.session.api();
    match command {
        Command::OauthUrl => {}
        Command::Devices => {
            for device in api.list_devices().await? {
                println!("{}\t{}\t{}", device.id, device.name, device.topic);
            }
        }
        Command::CreateDevice { name, topic } => {
            let device = api.create_device(&DeviceDraft { name, topic }).await?;
            println!("Created device {}", device.id);
        }
        Command::DeleteDevice { id } => {
            api.delete_device(&id).await?;
            println!("Deleted device {}", id);
        }
        Command::Fields { device } => {
            for field in api.telemetry_fields(&device).await? {
                println!("{}", field);
            }
        }
        Command::Charts { search } => {
            let charts = api.list_charts().await?;
            let shown = match &search {
                Some(query) => filter_charts(&charts, query),
                None => charts.iter().collect(),
            };
            for chart in shown {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    chart.id,
                    chart.name,
                    chart.device.name().unwrap_or(chart.device.id()),
                    chart.field,
                    chart.kind
                );
            }
        }
        Command::CreateChart {
            name,
            device,
            field,
            kind,
        } => {
            let kind = match kind.to_ascii_lowercase().as_str() {
                "line" => ChartKind::Line,
                "bar" => ChartKind::Bar,
                other => bail!("Unknown chart kind {}", other),
            };
            let charts = api
                .create_chart(&ChartDraft {
                    name,
                    device,
                    field,
                    kind: Some(kind),
                })
                .await?;
            println!("{} charts", charts.len());
        }
        Command::DeleteChart { id } => {
            let charts = api.delete_chart(&id).await?;
            println!("{} charts left", charts.len());
        }
        Command::Alerts => {
            for alert in api.list_alerts().await? {
                let conditions: Vec<String> = alert
                    .conditions
                    .iter()
                    .map(|c| format!("{} {} {}", c.sensor_field, c.operator, c.value))
                    .collect();
                println!(
                    "{}\t{}\t{}\t{}",
                    alert.id,
                    alert.name,
                    alert.device.id(),
                    conditions.join(&format!(" {} ", alert.logic))
                );
            }
        }
        Command::DeleteAlert { id } => {
            api.delete_alert(&id).await?;
            println!("Deleted alert {}", id);
        }
        Command::DeleteButton { id } => {
            api.delete_button(&id).await?;
            println!("Deleted button {}", id);
        }
        Command::Buttons => {
            for button in api.list_buttons().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    button.id,
                    button.name,
                    button.topic,
                    if button.state { "ON" } else { "OFF" }
                );
            }
        }
        Command::Toggle { id } => {
            let buttons = api.list_buttons().await?;
            let Some(button) = buttons.iter().find(|b| b.id == id) else {
                bail!("No button {}", id);
            };
            let state = api.toggle_button(&button.id, button.state).await?;
            println!("{} is now {}", button.name, if state { "ON" } else { "OFF" });
        }
        Command::SendCommand { topic, command } => {
            api.send_command(&MqttCommand { topic, command }).await?;
            println!("Command sent");
        }
        Command::Watch { chart, start, end } => {
            watch::run(ctx, &chart, start.as_deref(), end.as_deref()).await?;
        }
    }
    Ok(())
}
