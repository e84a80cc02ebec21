use anyhow::Context;
use clap::Parser;
use gateway::{GatewayConfig, TaskGateway};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

/// Invoke one Amazon MWS / Product Advertising action through the
/// throttled, cached gateway.
///
/// Credentials and the shared kvstore come from the environment:
/// MWS_ACCESS_KEY, MWS_SECRET_KEY, MWS_SELLER_ID, optionally
/// MWS_AUTH_TOKEN and REDIS_URL.
#[derive(Debug, Parser)]
#[command(about)]
struct Opt {
    /// Fully qualified action, e.g. products.GetServiceStatus
    action: String,

    /// Named arguments as NAME=VALUE pairs. Values that parse as
    /// JSON are passed through typed; anything else is a string.
    #[arg(long = "arg", value_name = "NAME=VALUE")]
    args: Vec<String>,

    /// Priority (0-2) selecting the per-action quota ceiling.
    #[arg(long)]
    priority: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opt::parse();

    let mut kwargs = Map::new();
    for pair in &opts.args {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("expected NAME=VALUE, got {pair}"))?;
        let value: Value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        kwargs.insert(name.to_string(), value);
    }
    if let Some(priority) = opts.priority {
        kwargs.insert("priority".to_string(), priority.into());
    }

    let gateway = TaskGateway::new(GatewayConfig::from_env())?;
    let result = gateway.invoke(&opts.action, &[], kwargs).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
