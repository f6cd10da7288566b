//! Foxhole client binary.
//!
//! Listens locally for SOCKS5 applications and tunnels every connection
//! to the remote server behind the camouflage handshake.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use foxhole::client::{ClientNode, ClientOptions};
use foxhole::ini::Ini;
use foxhole::pidfile::PidFile;

/// TLS-camouflaged SOCKS5 proxy, client node.
#[derive(Parser, Debug)]
#[command(name = "foxhole-client", version)]
struct Args {
    /// Configuration file (INI)
    #[arg(short = 'n', long)]
    config: Option<PathBuf>,

    /// Remote server host for the TLS tunnel
    #[arg(short = 'i', long)]
    server: Option<String>,

    /// Remote server port for the TLS tunnel
    #[arg(short = 'p', long)]
    server_port: Option<u16>,

    /// Serial string (the shared secret path)
    #[arg(short = 's', long)]
    serial: Option<String>,

    /// Listen address for the local SOCKS5 entry
    #[arg(short = 'a', long)]
    local_ip: Option<String>,

    /// Listen port for the local SOCKS5 entry
    #[arg(short = 'w', long)]
    local_port: Option<u16>,

    /// Timeout of connections, seconds
    #[arg(short = 't', long)]
    conn_timeout: Option<u64>,

    /// Timeout of the session scheduler, seconds
    #[arg(short = 'g', long)]
    sched_timeout: Option<u64>,

    /// PID file
    #[arg(short = 'm', long)]
    pidfile: Option<PathBuf>,

    /// Display timestamps in log records
    #[arg(short = 'd', long)]
    log_timestamp: bool,
}

fn init_logging(timestamps: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if timestamps {
        builder.init();
    } else {
        builder.without_time().init();
    }
}

fn ini_get<'a>(ini: Option<&'a Ini>, section: &str, key: &str) -> Option<&'a str> {
    ini.and_then(|doc| doc.get(section, key))
}

fn parse_num(value: Option<&str>, what: &str) -> anyhow::Result<Option<u64>> {
    value
        .map(|v| v.parse::<u64>().with_context(|| format!("invalid {what}: {v}")))
        .transpose()
}

fn build_options(args: &Args, ini: Option<&Ini>) -> anyhow::Result<ClientOptions> {
    let defaults = ClientOptions::default();

    let server_port = match args.server_port {
        Some(port) => port,
        None => parse_num(ini_get(ini, "tls", "port"), "server port")?
            .map(|p| p as u16)
            .unwrap_or(defaults.server_port),
    };
    let local_port = match args.local_port {
        Some(port) => port,
        None => parse_num(ini_get(ini, "local", "port"), "local port")?
            .map(|p| p as u16)
            .unwrap_or(defaults.local_port),
    };

    Ok(ClientOptions {
        server_host: args
            .server
            .clone()
            .or_else(|| ini_get(ini, "tls", "ip").map(String::from))
            .unwrap_or(defaults.server_host),
        server_port,
        local_ip: args
            .local_ip
            .clone()
            .or_else(|| ini_get(ini, "local", "ip").map(String::from))
            .unwrap_or(defaults.local_ip),
        local_port,
        serial: args
            .serial
            .clone()
            .or_else(|| ini_get(ini, "main", "serial").map(String::from))
            .unwrap_or(defaults.serial),
        conn_timeout: match args.conn_timeout {
            Some(t) => t,
            None => parse_num(ini_get(ini, "tls", "timeout"), "connection timeout")?
                .unwrap_or(defaults.conn_timeout),
        },
        sched_timeout: match args.sched_timeout {
            Some(t) => t,
            None => parse_num(ini_get(ini, "main", "timeout"), "scheduler timeout")?
                .unwrap_or(defaults.sched_timeout),
        },
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_timestamp);

    let ini = match &args.config {
        Some(path) => Some(Ini::open(path).context("cannot read configuration file")?),
        None => None,
    };

    let options = build_options(&args, ini.as_ref())?;

    let pid_path = args
        .pidfile
        .clone()
        .or_else(|| ini_get(ini.as_ref(), "main", "pidfile").map(PathBuf::from));
    let _pidfile = pid_path.map(PidFile::create).transpose()?;

    let node = ClientNode::new(options).context("cannot initialize proxy")?;
    node.run().await?;

    Ok(())
}
