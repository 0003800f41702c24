//! # CLI
//!
//! This module defines the command-line interface of `jeb` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring
//! procedures are written as `Service.Procedure`).
use clap::{Parser, Subcommand};
use jeb_core::{DEFAULT_ADDRESS, DEFAULT_CLIENT_NAME};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "jeb", version, about = "kRPC client for Kerbal Space Program")]
pub struct Cli {
    /// Address of the kRPC RPC server
    #[arg(long, global = true, default_value = DEFAULT_ADDRESS)]
    pub addr: String,

    /// Name shown for this client in the server's UI
    #[arg(long, global = true, default_value = DEFAULT_CLIENT_NAME)]
    pub client_name: String,

    /// Deadline in milliseconds for connecting and for each call
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the server's status report
    Status,

    /// Call a procedure
    ///
    /// Arguments are given as a JSON array and converted using the parameter types found in
    /// the service schema.
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// jeb call SpaceCenter.Vessel_get_Name --schema KRPC.SpaceCenter.json --args '[7]'
    /// ```
    Call {
        /// Procedure (Service.Procedure)
        #[arg(value_parser = parse_procedure)]
        procedure: (String, String),

        /// Service definition file, or a directory of them
        #[arg(long)]
        schema: PathBuf,

        /// JSON array of arguments
        #[arg(long, value_parser = parse_args, default_value = "[]")]
        args: serde_json::Value,
    },

    /// Describe a service (procedures grouped by class, enumerations)
    Describe {
        /// Service name (e.g. SpaceCenter)
        service: String,

        /// Service definition file, or a directory of them
        #[arg(long)]
        schema: PathBuf,
    },

    /// Poll the active vessel's surface altitude
    Altitude {
        /// Delay between samples in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Number of samples to take (unbounded if omitted)
        #[arg(long)]
        count: Option<u64>,
    },
}

fn parse_procedure(value: &str) -> Result<(String, String), String> {
    let (service, procedure) = value.split_once('.').ok_or_else(|| {
        format!("Invalid procedure format: '{value}'. Expected 'Service.Procedure'")
    })?;

    if service.trim().is_empty() || procedure.trim().is_empty() {
        return Err("Service and Procedure names cannot be empty".to_string());
    }

    Ok((service.to_string(), procedure.to_string()))
}

fn parse_args(value: &str) -> Result<serde_json::Value, String> {
    match serde_json::from_str(value) {
        Ok(array @ serde_json::Value::Array(_)) => Ok(array),
        Ok(_) => Err("Arguments must be a JSON array".to_string()),
        Err(e) => Err(format!("Invalid JSON: {e}")),
    }
}
