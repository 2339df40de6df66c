use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use orbus_zenoh_bridge::config::DEFAULT_PREFIX;
use orbus_zenoh_bridge::runtime::{self, Options};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "orbus-bridge", version, about = "Zenoh bridge to the Orbus motor board")]
struct Args {
    /// Parameter file (nested JSON)
    #[arg(long, value_name = "FILE")]
    params: Option<PathBuf>,

    /// Write parameters learned from the board back to --params on exit
    #[arg(long)]
    save: bool,

    /// Key-expression prefix of every topic and service
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Zenoh endpoints to connect to
    #[arg(long, value_delimiter = ',')]
    connect: Vec<String>,

    /// Zenoh endpoints to listen on
    #[arg(long, value_delimiter = ',')]
    listen: Vec<String>,

    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=info or debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    let options = Options {
        params: args.params,
        save: args.save,
        prefix: args.prefix,
        connect: args.connect,
        listen: args.listen,
    };
    if let Err(e) = runtime::run(options).await {
        eprintln!("Bridge error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["orbus-bridge"]).unwrap();
        assert_eq!(args.prefix, "orbus");
        assert!(!args.save);
        assert!(matches!(args.log_format, LogFormat::Text));
    }

    #[test]
    fn test_args_endpoints() {
        let args = Args::try_parse_from([
            "orbus-bridge",
            "--connect",
            "tcp/10.0.0.2:7447,tcp/10.0.0.3:7447",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.connect.len(), 2);
        assert!(matches!(args.log_format, LogFormat::Json));
    }
}
