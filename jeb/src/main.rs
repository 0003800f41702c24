//! # Jeb CLI Entry Point
//!
//! The main executable for the Jeb tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs the
//!    `tracing` subscriber (stderr, `warn` unless `RUST_LOG` says otherwise).
//! 2. **Connection**: Opens an RPC connection to the kRPC server via `jeb_core`.
//! 3. **Execution**: Builds the procedure calls, typing arguments with the service schema.
//! 4. **Presentation**: Formats and prints the results or errors to standard output/error.

mod cli;
mod formatter;
mod json;
mod schema;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use colored::*;
use formatter::{FormattedString, GenericError, ServiceOverview};
use jeb_core::{Call, Connection, ConnectionConfig, TypeDescriptor, Value};
use schema::Services;
use std::path::Path;
use std::process;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    init_tracing();

    let mut config = ConnectionConfig::default().with_client_name(args.client_name);
    if let Some(timeout) = args.timeout_ms.map(Duration::from_millis) {
        config = config
            .with_connect_timeout(timeout)
            .with_call_timeout(timeout);
    }

    match args.command {
        Commands::Status => status(&args.addr, config).await,
        Commands::Call {
            procedure,
            schema,
            args: call_args,
        } => {
            let (service, procedure) = procedure;
            run_call(&args.addr, config, &service, &procedure, &schema, call_args).await
        }
        Commands::Describe { service, schema } => describe(&service, &schema),
        Commands::Altitude { interval_ms, count } => {
            let connection = connect_or_exit(&args.addr, config).await;
            let interval = Duration::from_millis(interval_ms.max(1));

            if let Err(err) = altitude(&connection, interval, count).await {
                eprintln!(
                    "{}",
                    FormattedString::from(GenericError("Altitude polling failed", format!("{err:#}")))
                );
                process::exit(1);
            }
        }
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn or_exit<T, E: Into<FormattedString>>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            let formatted: FormattedString = err.into();
            eprintln!("{formatted}");
            process::exit(1);
        }
    }
}

async fn connect_or_exit(addr: &str, config: ConnectionConfig) -> Connection {
    match Connection::connect_with(addr, config).await {
        Ok(connection) => connection,
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    }
}

async fn status(addr: &str, config: ConnectionConfig) {
    let connection = connect_or_exit(addr, config).await;

    match connection.status().await {
        Ok(status) => println!("{}", FormattedString::from(status)),
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    }
}

fn describe(service: &str, schema: &Path) {
    let services = or_exit(Services::load(schema));
    let definition = or_exit(services.service(service));

    println!("{}", FormattedString::from(ServiceOverview(service, definition)));
}

async fn run_call(
    addr: &str,
    config: ConnectionConfig,
    service: &str,
    procedure: &str,
    schema: &Path,
    args: serde_json::Value,
) {
    let services = or_exit(Services::load(schema));
    let definition = or_exit(services.procedure(service, procedure));
    let (params, returns) = or_exit(services.signature(definition));
    let values = or_exit(json::to_arguments(&params, &args));

    let mut call = Call::new(service, procedure);
    for (ty, value) in params.iter().zip(&values) {
        call = or_exit(
            call.arg(ty, value)
                .map_err(|e| GenericError("Failed to encode argument", e)),
        );
    }
    if let Some(ty) = returns {
        call = call.returns(ty);
    }

    let connection = connect_or_exit(addr, config).await;

    match connection.call(&call).await {
        Ok(Some(value)) => println!("{}", FormattedString::from(json::from_value(&value))),
        Ok(None) => println!("{}", FormattedString("OK".green().to_string())),
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    }
}

/// Prints the active vessel's surface altitude every `interval`.
async fn altitude(
    connection: &Connection,
    interval: Duration,
    count: Option<u64>,
) -> anyhow::Result<()> {
    let vessel_type = TypeDescriptor::class("SpaceCenter", "Vessel");
    let flight_type = TypeDescriptor::class("SpaceCenter", "Flight");

    let status = connection.status().await.context("Failed to query server status")?;
    tracing::info!(version = %status.version, "connected to kRPC server");

    let vessel = connection
        .call(&Call::new("SpaceCenter", "get_ActiveVessel").returns(vessel_type.clone()))
        .await
        .context("Failed to get the active vessel")?
        .and_then(Value::into_object)
        .filter(|vessel| !vessel.is_null())
        .context("There is no active vessel")?;

    let flight = connection
        .call(
            &Call::new("SpaceCenter", "Vessel_Flight")
                .arg(&vessel_type, &Value::Object(vessel))?
                .returns(flight_type.clone()),
        )
        .await
        .context("Failed to get the vessel's flight telemetry")?
        .and_then(Value::into_object)
        .context("Server returned no flight object")?;

    let sample = Call::new("SpaceCenter", "Flight_get_SurfaceAltitude")
        .arg(&flight_type, &Value::Object(flight))?
        .returns(TypeDescriptor::Float64);

    let mut ticker = tokio::time::interval(interval);
    let mut taken = 0;
    while count.is_none_or(|count| taken < count) {
        ticker.tick().await;

        let altitude = connection
            .call(&sample)
            .await
            .context("Failed to read surface altitude")?
            .and_then(|value| value.as_f64())
            .context("Surface altitude is not a double")?;

        println!("{altitude:.3}");
        taken += 1;
    }

    Ok(())
}
