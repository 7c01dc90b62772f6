use anyhow::Context;
use clap::{Parser, Subcommand};
use mcpgen::{
    db,
    models::{extract_placeholders, ParameterDefinition, SUPPORTED_DB_TYPES},
    repositories::{CapabilityRepository, NewCapability, NewConnection, SqliteCapabilityRepository},
    services::{DatabaseExecutor, ExecutionRequest, SqlExecutor},
};
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mcpgen-cli")]
#[command(about = "CLI tool for managing the MCP capability registry", long_about = None)]
struct Cli {
    /// Registry database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database connection management commands
    Connection {
        #[command(subcommand)]
        command: ConnectionCommands,
    },
    /// Capability management commands
    Capability {
        #[command(subcommand)]
        command: CapabilityCommands,
    },
}

#[derive(Subcommand)]
enum ConnectionCommands {
    /// Register a database connection
    Add {
        /// Connection name
        #[arg(short, long)]
        name: String,

        /// Database type (sqlite, postgresql, mysql, mssql)
        #[arg(short = 't', long, default_value = "sqlite")]
        db_type: String,

        /// Connection string; a file path or sqlite: URL for SQLite
        #[arg(short, long)]
        connection_string: String,
    },

    /// List all connections
    List,

    /// Connect to a registered database and report its server version
    Test {
        id: i64,

        /// Seconds to wait for the target
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

#[derive(Subcommand)]
enum CapabilityCommands {
    /// Register a capability
    Add {
        /// Tool name exposed over MCP
        #[arg(short, long)]
        name: String,

        /// Connection id the query runs against
        #[arg(short, long)]
        connection: i64,

        /// SQL template with {{param}} placeholders
        #[arg(short, long)]
        sql: String,

        /// Description shown to the assistant
        #[arg(short, long, default_value = "")]
        description: String,

        /// Parameter definitions as a JSON array
        #[arg(short, long, default_value = "[]")]
        params: String,

        /// Expose immediately
        #[arg(long)]
        live: bool,
    },

    /// List all capabilities
    List,

    /// Expose a capability as an MCP tool
    Live {
        name: String,
    },

    /// Hide a capability from MCP clients
    Unlive {
        name: String,
    },

    /// Delete a capability
    Remove {
        name: String,
    },

    /// Run a capability's query once, live or not, and print the rows
    Test {
        name: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Seconds before the query is abandoned
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

fn parse_parameters(sql: &str, raw: &str) -> Result<Vec<ParameterDefinition>, String> {
    let parameters: Vec<ParameterDefinition> =
        serde_json::from_str(raw).map_err(|e| format!("Invalid --params JSON: {}", e))?;

    for placeholder in extract_placeholders(sql) {
        if !parameters.iter().any(|p| p.name == placeholder) {
            println!(
                "⚠️  Placeholder '{{{{{}}}}}' has no definition; it will be a required string",
                placeholder
            );
        }
    }

    Ok(parameters)
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(_) => Err("--args must be a JSON object".to_string()),
        Err(e) => Err(format!("Invalid --args JSON: {}", e)),
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("❌ {}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Connect to database
    let pool = db::create_pool(&cli.database_url)
        .await
        .with_context(|| format!("Failed to open registry at {}", cli.database_url))?;

    // Run migrations
    db::run_migrations(&pool)
        .await
        .context("Failed to migrate registry")?;

    let repo = SqliteCapabilityRepository::new(pool);

    match cli.command {
        Commands::Connection { command } => match command {
            ConnectionCommands::Add {
                name,
                db_type,
                connection_string,
            } => {
                let db_type = db_type.to_lowercase();
                if !SUPPORTED_DB_TYPES.contains(&db_type.as_str()) {
                    fail(format!(
                        "Unsupported database type '{}' (expected one of: {})",
                        db_type,
                        SUPPORTED_DB_TYPES.join(", ")
                    ));
                }

                let request = NewConnection {
                    name: name.clone(),
                    db_type,
                    connection_string,
                };
                match repo.create_connection(request).await {
                    Ok(id) => {
                        println!("✅ Connection created successfully!");
                        println!("  ID: {}", id);
                        println!("  Name: {}", name);
                    }
                    Err(err) => fail(format!("Failed to create connection: {}", err)),
                }
            }

            ConnectionCommands::List => match repo.list_connections().await {
                Ok(connections) => {
                    if connections.is_empty() {
                        println!("No connections found.");
                    } else {
                        println!(
                            "{:<5} {:<20} {:<12} {:<8} {:<40}",
                            "ID", "Name", "Type", "Active", "Connection"
                        );
                        println!("{}", "-".repeat(88));
                        for connection in connections {
                            println!(
                                "{:<5} {:<20} {:<12} {:<8} {:<40}",
                                connection.id,
                                connection.name,
                                connection.db_type,
                                if connection.is_active { "Yes" } else { "No" },
                                connection.connection_string
                            );
                        }
                    }
                }
                Err(err) => fail(format!("Failed to list connections: {}", err)),
            },

            ConnectionCommands::Test { id, timeout } => {
                let connection = match repo.get_connection(id).await {
                    Ok(Some(connection)) => connection,
                    Ok(None) => fail(format!("Connection {} not found", id)),
                    Err(err) => fail(format!("Failed to load connection: {}", err)),
                };

                match DatabaseExecutor::new()
                    .server_version(&connection, Duration::from_secs(timeout))
                    .await
                {
                    Ok(version) => {
                        println!("✅ Connection '{}' is reachable", connection.name);
                        println!("  Type: {}", connection.db_type);
                        println!("  Version: {}", version);
                    }
                    Err(err) => fail(format!("Connection '{}' failed: {}", connection.name, err)),
                }
            }
        },

        Commands::Capability { command } => match command {
            CapabilityCommands::Add {
                name,
                connection,
                sql,
                description,
                params,
                live,
            } => {
                let parameters = parse_parameters(&sql, &params).unwrap_or_else(|e| fail(e));

                let request = NewCapability {
                    connection_id: connection,
                    name: name.clone(),
                    description,
                    sql_template: sql,
                    parameters,
                    is_live: live,
                };
                match repo.create_capability(request).await {
                    Ok(id) => {
                        println!("✅ Capability created successfully!");
                        println!("  ID: {}", id);
                        println!("  Name: {}", name);
                        println!("  Live: {}", if live { "Yes" } else { "No" });
                    }
                    Err(err) => fail(format!("Failed to create capability: {}", err)),
                }
            }

            CapabilityCommands::List => match repo.list_all().await {
                Ok(capabilities) => {
                    if capabilities.is_empty() {
                        println!("No capabilities found.");
                    } else {
                        println!(
                            "{:<5} {:<30} {:<6} {:<6} {:<40}",
                            "ID", "Name", "Conn", "Live", "Parameters"
                        );
                        println!("{}", "-".repeat(90));
                        for capability in capabilities {
                            let params: Vec<_> = capability
                                .parameters
                                .iter()
                                .map(|p| format!("{}:{}", p.name, p.param_type))
                                .collect();
                            println!(
                                "{:<5} {:<30} {:<6} {:<6} {:<40}",
                                capability.id,
                                capability.name,
                                capability.connection_id,
                                if capability.is_live { "Yes" } else { "No" },
                                params.join(", ")
                            );
                        }
                    }
                }
                Err(err) => fail(format!("Failed to list capabilities: {}", err)),
            },

            CapabilityCommands::Live { name } => match repo.set_live(&name, true).await {
                Ok(true) => println!("✅ Capability '{}' is now live", name),
                Ok(false) => fail(format!("Capability '{}' not found", name)),
                Err(err) => fail(format!("Failed to update capability: {}", err)),
            },

            CapabilityCommands::Unlive { name } => match repo.set_live(&name, false).await {
                Ok(true) => println!("✅ Capability '{}' is no longer live", name),
                Ok(false) => fail(format!("Capability '{}' not found", name)),
                Err(err) => fail(format!("Failed to update capability: {}", err)),
            },

            CapabilityCommands::Remove { name } => match repo.delete_capability(&name).await {
                Ok(true) => println!("✅ Capability '{}' deleted successfully!", name),
                Ok(false) => fail(format!("Capability '{}' not found", name)),
                Err(err) => fail(format!("Failed to delete capability: {}", err)),
            },

            CapabilityCommands::Test {
                name,
                args,
                timeout,
            } => {
                let arguments = parse_arguments(&args).unwrap_or_else(|e| fail(e));

                let capability = match repo.find_by_name(&name).await {
                    Ok(Some(capability)) => capability,
                    Ok(None) => fail(format!("Capability '{}' not found", name)),
                    Err(err) => fail(format!("Failed to load capability: {}", err)),
                };
                let connection = match repo.get_connection(capability.connection_id).await {
                    Ok(Some(connection)) => connection,
                    Ok(None) => fail(format!(
                        "Connection {} for '{}' not found",
                        capability.connection_id, name
                    )),
                    Err(err) => fail(format!("Failed to load connection: {}", err)),
                };

                let request = ExecutionRequest {
                    sql_template: capability.sql_template,
                    arguments,
                    parameters: capability.parameters,
                    timeout: Duration::from_secs(timeout),
                };
                match DatabaseExecutor::new().execute(connection, request).await {
                    Ok(rows) => {
                        println!("✅ Capability '{}' returned {} row(s)", name, rows.len());
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&rows).context("Failed to encode rows")?
                        );
                    }
                    Err(err) => fail(format!("Capability '{}' failed: {}", name, err)),
                }
            }
        },
    }

    Ok(())
}
