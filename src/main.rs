//! Globalping CLI - run network measurements from probes around the world
//!
//! Talks to the Globalping API, anonymously or signed in with an account.

mod api;
mod auth;
mod config;
mod models;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::limits::{format_seconds, pluralize};
use api::GlobalpingClient;
use config::Config;
use models::{Location, Measurement, MeasurementCreate};

#[derive(Parser)]
#[command(name = "globalping")]
#[command(about = "Run network measurements from probes all over the world", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage your Globalping account
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Create a measurement and print its results
    Measure {
        /// Measurement type: ping, traceroute, dns, mtr, http
        #[arg(value_name = "TYPE")]
        measurement_type: String,

        /// Hostname or IP address to measure
        target: String,

        /// Probe location (continent, country, city, ASN, network, ...)
        #[arg(short = 'F', long, default_value = "world")]
        from: String,

        /// Number of probes to use
        #[arg(short = 'L', long, default_value = "1")]
        limit: u32,

        /// Print the raw JSON result
        #[arg(short = 'J', long)]
        json: bool,
    },

    /// Print the JSON result of an existing measurement
    Get {
        /// Measurement ID
        id: String,

        /// Wait until the measurement has finished
        #[arg(short, long)]
        wait: bool,
    },

    /// Show your current rate limits and credits
    Limits,
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Sign in through the browser
    Login {
        /// Read an access token from stdin instead
        #[arg(long)]
        with_token: bool,
    },

    /// Show who you are signed in as
    Status,

    /// Sign out and revoke the stored token
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let path = Config::config_path()?;
    let config = Config::load_from(&path)?;
    let access_token = std::env::var(config::TOKEN_ENV).ok();
    let client = GlobalpingClient::new(config.client_config(path, access_token))
        .context("Failed to create HTTP client")?;

    match cli.command {
        Commands::Auth { command } => match command {
            AuthCommands::Login { with_token } => login(&client, with_token).await?,
            AuthCommands::Status => status(&client).await?,
            AuthCommands::Logout => {
                client.logout().await?;
                println!("You are now logged out.");
            }
        },
        Commands::Measure {
            measurement_type,
            target,
            from,
            limit,
            json,
        } => {
            let payload = MeasurementCreate {
                measurement_type,
                target,
                limit,
                locations: vec![Location { magic: from }],
                in_progress_updates: false,
                measurement_options: None,
            };
            let created = client.submit(&payload).await.map_err(explain)?;
            tracing::info!(
                "Measurement {} created with {}",
                created.id,
                pluralize(i64::from(created.probes_count), "probe")
            );
            client
                .await_measurement(&created.id)
                .await
                .map_err(explain)?;
            let body = client
                .get_measurement_raw(&created.id)
                .await
                .map_err(explain)?;
            if json {
                println!("{}", String::from_utf8_lossy(&body));
            } else {
                let measurement: Measurement = serde_json::from_slice(&body)
                    .context("Failed to decode measurement")?;
                print_summary(&measurement);
            }
        }
        Commands::Get { id, wait } => {
            if wait {
                client.await_measurement(&id).await.map_err(explain)?;
            }
            let body = client.get_measurement_raw(&id).await.map_err(explain)?;
            println!("{}", String::from_utf8_lossy(&body));
        }
        Commands::Limits => {
            let limits = client.limits().await.map_err(explain)?;
            let create = &limits.rate_limit.measurements.create;
            let auth = match create.limit_type {
                models::CreateLimitType::Ip => "IP address",
                models::CreateLimitType::User => "account",
            };
            println!("Limits apply to: {}", auth);
            println!(
                "Measurements: {}/{} remaining (resets in {})",
                create.remaining,
                create.limit,
                format_seconds(create.reset)
            );
            println!(
                "Credits: {}",
                pluralize(limits.credits.remaining, "credit")
            );
        }
    }

    Ok(())
}

async fn login(client: &GlobalpingClient, with_token: bool) -> Result<()> {
    let old_refresh_token = client
        .token_store()
        .current()
        .await
        .map(|t| t.refresh_token)
        .unwrap_or_default();

    if with_token {
        println!("Please enter your token:");
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .context("Failed to read token")?;
        let username = client.login_with_token(line.trim()).await?;
        println!("Logged in as {}.", username);
    } else {
        let authorization = client.authorize().await?;
        tracing::debug!("Authorization flow {:?}", authorization.state());
        println!("Please visit the following URL to authenticate:");
        println!("{}", authorization.authorize_url());
        println!();
        println!("Waiting for the browser redirect to {} ...", authorization.callback_url());

        tokio::select! {
            result = authorization.wait() => result?,
            _ = tokio::signal::ctrl_c() => {
                anyhow::bail!("Login cancelled");
            }
        }
        println!("Success! You are now authenticated.");
    }

    if !old_refresh_token.is_empty() {
        if let Err(e) = client.revoke_token(&old_refresh_token).await {
            tracing::warn!("Failed to revoke previous token: {}", e);
        }
    }
    Ok(())
}

async fn status(client: &GlobalpingClient) -> Result<()> {
    match client.token_introspection("").await {
        Ok(res) if res.active => println!("Logged in as {}.", res.username),
        Ok(_) => println!("Not logged in."),
        Err(e) if e.kind() == &auth::AuthErrorKind::NotAuthorized => {
            println!("Not logged in.")
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Point the user at `auth login` when the stored credentials are dead.
fn explain(err: api::MeasurementError) -> anyhow::Error {
    let relogin = err.kind() == api::MeasurementErrorKind::Auth
        && err.source.as_ref().map_or(false, |e| e.requires_login());
    if relogin {
        anyhow::anyhow!("{}\nPlease sign in again with `globalping auth login`.", err)
    } else {
        err.into()
    }
}

fn print_summary(measurement: &Measurement) {
    for result in &measurement.results {
        let probe = &result.probe;
        let mut location = vec![probe.continent.as_str(), probe.country.as_str()];
        if let Some(ref state) = probe.state {
            location.push(state.as_str());
        }
        location.push(probe.city.as_str());
        println!(
            "> {}, ASN:{}, {} ({:?})",
            location.join(", "),
            probe.asn,
            probe.network,
            result.result.status
        );
        println!("{}", result.result.raw_output.trim_end());
        println!();
    }
}
