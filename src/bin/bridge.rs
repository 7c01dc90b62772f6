use clap::Parser;
use mcpgen::bridge::{self, BridgeConfig};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mcp-bridge")]
#[command(about = "Connect a stdio MCP client to a remote MCP server over SSE", long_about = None)]
struct Args {
    /// SSE endpoint of the remote server, e.g. http://127.0.0.1:8000/mcp/sse
    #[arg(env = "MCP_BRIDGE_URL")]
    url: String,

    /// Seconds a message waits for the server's endpoint event
    #[arg(long, env = "MCP_BRIDGE_CONNECT_TIMEOUT", default_value_t = 30)]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() {
    // stdout carries protocol traffic; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcpgen=info".into()),
        )
        .init();

    let args = Args::parse();

    let result = match BridgeConfig::new(&args.url, Duration::from_secs(args.connect_timeout)) {
        Ok(config) => bridge::run(config, tokio::io::stdin(), tokio::io::stdout()).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
