use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use keybridge_core::{AgentService, BridgeConfig, BridgeError, CommandAuthority, CommandConfig};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct Args {
    config_path: Option<PathBuf>,
    ports: Vec<u16>,
    help: bool,
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        print_help();
        return Ok(());
    }
    if args.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.ports.is_empty() {
        print_help();
        bail!("no agent ports given");
    }

    let config = BridgeConfig::load(args.config_path);
    let argv = config.authority_command.clone().unwrap_or_default();
    let command =
        CommandConfig::from_argv(&argv).context("authority_command is not configured")?;
    if config.key_id().is_empty() {
        warn!("no ssh_key configured, authority requests will carry an empty key id");
    }
    info!(program = %command.program.display(), "using command authority");

    let service = AgentService::new(Arc::new(CommandAuthority::new(command)), &config)
        .with_reporter(Arc::new(report_error));
    let service = Arc::new(service);
    for port in args.ports {
        service.start(port);
    }

    tokio::select! {
        _ = service.wait_idle() => info!("all agent connections closed"),
        _ = tokio::signal::ctrl_c() => info!(active = ?service.active_ports(), "shutdown requested"),
    }
    Ok(())
}

fn report_error(port: u16, err: &BridgeError) {
    error!(port, %err, "agent unavailable");
    eprintln!("keybridge: agent on port {port} unavailable: {err}");
}

fn parse_args<I>(args: I) -> Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => parsed.help = true,
            "-V" | "--version" => parsed.version = true,
            "-c" | "--config" => {
                let path = iter.next().context("--config requires a path")?;
                parsed.config_path = Some(PathBuf::from(path));
            }
            other if other.starts_with('-') => bail!("unknown option: {other}"),
            other => {
                let port: u16 = other
                    .parse()
                    .with_context(|| format!("invalid port: {other}"))?;
                if port == 0 {
                    bail!("port must be non-zero");
                }
                parsed.ports.push(port);
            }
        }
    }
    Ok(parsed)
}

fn print_help() {
    println!(
        "keybridge-agent\n\n\
Serves SSH agent requests forwarded to 127.0.0.1:PORT, delegating keys to an external authority.\n\n\
Usage:\n  keybridge-agent [--config PATH] PORT [PORT ...]\n\n\
Options:\n  -c, --config PATH   config file (default: $KEYBRIDGE_CONFIG or <config dir>/keybridge/config.json)\n  -h, --help          show this help\n  -V, --version       print version\n\n\
Environment:\n  KEYBRIDGE_SSH_KEY   overrides the configured key identifier\n  RUST_LOG            log filter"
    );
}
