use anyhow::{Context, Result};
use callmydouble::config::Config;
use callmydouble::listener::{ListenerClient, ListenerObserver};
use callmydouble::protocol::CallbackEnvelope;
use callmydouble::{gateway, store};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

const DEFAULT_SERVER: &str = "http://localhost:3001";

/// Webhook relay: expose a public callback URL for a listener without one.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen port (overrides config file and environment)
        #[arg(short, long)]
        port: Option<u16>,

        /// `memory` or a NATS URL (overrides config file and environment)
        #[arg(long)]
        store_url: Option<String>,

        /// Allowed CORS origin (overrides config file and environment)
        #[arg(long)]
        origin: Option<String>,

        /// Single-instance deployment: skip fan-out subscriptions
        #[arg(long)]
        singleton: bool,
    },

    /// Connect to a relay and print every callback as a JSON line
    Listen {
        #[arg(short, long, env = "CALLMYDOUBLE_SERVER", default_value = DEFAULT_SERVER)]
        server: String,

        #[arg(long, env = "CALLMYDOUBLE_APP_KEY")]
        app_key: String,

        #[arg(long, env = "CALLMYDOUBLE_APP_SECRET")]
        app_secret: String,
    },

    /// Send a test callback through the relay
    Test {
        #[arg(short, long, env = "CALLMYDOUBLE_SERVER", default_value = DEFAULT_SERVER)]
        server: String,

        #[arg(long, env = "CALLMYDOUBLE_APP_KEY")]
        app_key: String,

        /// Route below the application key, e.g. `orders/42`
        route: String,

        /// JSON (or plain text) body to send
        #[arg(short = 'd', long)]
        payload: Option<String>,
    },

    /// Replace the application key pair and print the new one. The session
    /// token is retired with the old pair.
    Refresh {
        #[arg(short, long, env = "CALLMYDOUBLE_SERVER", default_value = DEFAULT_SERVER)]
        server: String,

        /// Session token returned by signup or login
        #[arg(short = 't', long, env = "CALLMYDOUBLE_TOKEN")]
        access_token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Serve {
            config,
            port,
            store_url,
            origin,
            singleton,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(url) = store_url {
                config.store_url = url;
            }
            if let Some(origin) = origin {
                config.origin = origin;
            }
            config.singleton |= singleton;
            serve(config).await
        }
        Command::Listen {
            server,
            app_key,
            app_secret,
        } => listen(&server, &app_key, &app_secret).await,
        Command::Test {
            server,
            app_key,
            route,
            payload,
        } => send_test(&server, &app_key, &route, payload).await,
        Command::Refresh {
            server,
            access_token,
        } => refresh(&server, &access_token).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let store = match store::open(&config.store_url, &config.kv_bucket).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(store = %config.store_url, error = ?e, "Failed to open credential store");
            std::process::exit(1);
        }
    };
    tracing::info!(backend = store.name(), "Credential store ready");

    gateway::run_gateway(&config, store).await
}

struct PrintObserver;

impl ListenerObserver for PrintObserver {
    fn on_connect(&mut self) {
        tracing::debug!("Connected to relay");
    }

    fn on_auth(&mut self, accepted: bool) {
        if !accepted {
            eprintln!("Relay rejected the application key or secret.");
        }
    }

    fn on_callback(&mut self, envelope: CallbackEnvelope) {
        match serde_json::to_string(&envelope) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to print callback"),
        }
    }

    fn on_disconnect(&mut self) {
        tracing::debug!("Disconnected from relay");
    }
}

async fn listen(server: &str, app_key: &str, app_secret: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut client = ListenerClient::new(server, app_key, app_secret);
    client.run(&mut PrintObserver, cancel).await
}

async fn send_test(server: &str, app_key: &str, route: &str, payload: Option<String>) -> Result<()> {
    let url = format!(
        "{}/proxy/{}/{}",
        server.trim_end_matches('/'),
        app_key,
        route.trim_start_matches('/')
    );

    let mut request = reqwest::Client::new().post(&url);
    if let Some(payload) = payload {
        let content_type = if serde_json::from_str::<serde_json::Value>(&payload).is_ok() {
            "application/json"
        } else {
            "text/plain"
        };
        request = request
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(payload);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("Unable to reach {server}"))?;
    println!("Sent callback to {server}. Status: {}", response.status());
    Ok(())
}

async fn refresh(server: &str, access_token: &str) -> Result<()> {
    let url = format!("{}/api/v1/apps/main/generate", server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .query(&[("access_token", access_token)])
        .send()
        .await
        .with_context(|| format!("Unable to reach {server}"))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("Relay refused to regenerate the application key ({status})");
    }

    let body: serde_json::Value = response.json().await.context("Invalid relay response")?;
    println!(
        "appKey={}\nappSecret={}",
        body["appKey"].as_str().unwrap_or_default(),
        body["appSecret"].as_str().unwrap_or_default()
    );
    eprintln!("The session token is no longer valid; log in again for a new one.");
    Ok(())
}
