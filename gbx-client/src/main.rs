use gbx_client::{ClientConfig, GbxClient};
use gbx_proto::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();

    info!("GBX Client v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration, then let the environment override the server
    let mut config = load_config()?;
    config.gbx.apply_env()?;

    info!("Calls go to {} as {}", config.gbx.addr(), config.gbx.user);

    let client = GbxClient::new(config.gbx.clone(), config.timeouts.into());

    println!("\nEach line is one call: <Method> [args...]");
    println!("Arguments parse as int, true/false, or string. Type quit to exit.\n");

    // Interactive command loop
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        print!("> ");
        // Manually flush stdout since print! doesn't auto-flush
        use std::io::Write;
        std::io::stdout().flush()?;

        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }

        let input = line.trim();

        if input.is_empty() {
            continue;
        }

        if input == "quit" || input == "exit" {
            info!("Exiting...");
            break;
        }

        let mut parts = input.split_whitespace();
        let method = match parts.next() {
            Some(method) => method,
            None => continue,
        };
        let args: Vec<Value> = parts.map(parse_arg).collect();

        match client.try_call(method, &args).await {
            Ok(Some(result)) => {
                println!("[OK] {}", serde_json::to_string_pretty(&result)?);
            }
            Ok(None) => {
                println!("[OK] (no value)");
            }
            Err(e) => {
                warn!("Call failed: {}", e);
                println!("[UNAVAILABLE] {}", e);
            }
        }
    }

    Ok(())
}

fn parse_arg(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => raw.parse::<i32>().map(Value::Int).unwrap_or_else(|_| Value::from(raw)),
    }
}

fn load_config() -> anyhow::Result<ClientConfig> {
    // Try configs/client.toml (development)
    if let Ok(config) = ClientConfig::from_file("configs/client.toml") {
        info!("Loaded config from configs/client.toml");
        return Ok(config);
    }

    // Try ./client.toml (current directory)
    if let Ok(config) = ClientConfig::from_file("client.toml") {
        info!("Loaded config from client.toml");
        return Ok(config);
    }

    warn!("No config file found, using defaults and XMLRPC_* environment");
    Ok(ClientConfig::default_config())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
