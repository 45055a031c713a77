//! sqlsh CLI - run SQL through the tools service
//!
//! Usage:
//!   sqlsh query "<sql>" [--connection <profile>]
//!   sqlsh connections
//!
//! Examples:
//!   sqlsh query "select top 10 * from sales" --connection production
//!   sqlsh connections

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use sqlsh::config::Settings;
use sqlsh::service::{
    protocol::SubsetParams, ResponseEvent, ToolsServiceClient, POLL_INTERVAL,
};

#[derive(Parser)]
#[command(name = "sqlsh")]
#[command(about = "sqlsh - Interactive SQL client backed by an out-of-process tools service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a SQL query and print the rows
    Query {
        /// SQL text to execute
        sql: String,

        /// Connection profile from sqlsh.toml (defaults to the "default"
        /// profile, or the first one defined)
        #[arg(short, long)]
        connection: Option<String>,
    },

    /// List configured connection profiles
    Connections,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Query { sql, connection } => cmd_query(sql, connection).await,
        Commands::Connections => cmd_connections(),
    }
}

fn cmd_connections() -> ExitCode {
    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if settings.connections.is_empty() {
        println!("No connections configured (create sqlsh.toml)");
        return ExitCode::SUCCESS;
    }

    let mut names: Vec<_> = settings.connections.keys().collect();
    names.sort();
    for name in names {
        println!("{}", name);
    }
    ExitCode::SUCCESS
}

async fn cmd_query(sql: String, connection: Option<String>) -> ExitCode {
    match run_query(&sql, connection.as_deref()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_query(
    sql: &str,
    connection: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    let profile = match connection {
        Some(name) => settings.get_connection(name)?,
        None => {
            settings
                .default_connection()
                .ok_or("no connections configured (create sqlsh.toml)")?
                .1
        }
    };
    let options = profile.resolved_options()?;

    let client = ToolsServiceClient::spawn_with_settings(&settings).await?;
    let owner_uri = ToolsServiceClient::new_owner_uri();

    // connect
    let mut connect = client.connect_request(&owner_uri, options)?;
    connect.execute().await?;
    let (_, terminal) = connect.await_completion(POLL_INTERVAL).await?;
    match terminal {
        ResponseEvent::ConnectionComplete(event) if event.is_connected() => {
            if let Some(info) = &event.server_info {
                tracing::debug!(
                    version = info.server_version.as_deref().unwrap_or("unknown"),
                    "connected"
                );
            }
        }
        ResponseEvent::ConnectionComplete(event) => {
            client.shutdown().await;
            return Err(event
                .error_message
                .unwrap_or_else(|| "connection failed".to_string())
                .into());
        }
        ResponseEvent::Error(fault) => {
            client.shutdown().await;
            return Err(fault.message.into());
        }
        other => {
            client.shutdown().await;
            return Err(format!("unexpected connect response: {other:?}").into());
        }
    }

    // execute
    let mut query = client.execute_query_request(&owner_uri, sql)?;
    query.execute().await?;
    let (events, terminal) = query.await_completion(POLL_INTERVAL).await?;
    for event in &events {
        if let ResponseEvent::QueryMessage(msg) = event {
            eprintln!("{}", msg.message.message);
        }
    }

    let complete = match terminal {
        ResponseEvent::QueryComplete(event) => event,
        ResponseEvent::Error(fault) => {
            client.shutdown().await;
            return Err(fault.message.into());
        }
        other => {
            client.shutdown().await;
            return Err(format!("unexpected query response: {other:?}").into());
        }
    };

    // fetch one subset per declared result set
    for batch in &complete.batch_summaries {
        for result_set in &batch.result_set_summaries {
            let mut subset = client.subset_request(SubsetParams {
                owner_uri: owner_uri.clone(),
                batch_index: batch.id,
                result_set_index: result_set.id,
                rows_start_index: 0,
                rows_count: result_set.row_count,
            })?;
            subset.execute().await?;
            let (_, terminal) = subset.await_completion(POLL_INTERVAL).await?;
            match terminal {
                ResponseEvent::ResultSubset(subset) => {
                    for row in &subset.rows {
                        let line: Vec<&str> = row
                            .iter()
                            .map(|cell| {
                                if cell.is_null {
                                    "NULL"
                                } else {
                                    cell.display_value.as_deref().unwrap_or("")
                                }
                            })
                            .collect();
                        println!("{}", line.join("\t"));
                    }
                }
                ResponseEvent::Error(fault) => {
                    client.shutdown().await;
                    return Err(fault.message.into());
                }
                other => {
                    client.shutdown().await;
                    return Err(format!("unexpected subset response: {other:?}").into());
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
