//! Foxhole server binary.
//!
//! Terminates TLS, serves the decoy website to everyone, and speaks
//! SOCKS5 to whoever presents the shared secret path.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use foxhole::ini::Ini;
use foxhole::pidfile::PidFile;
use foxhole::server::{ServerNode, ServerOptions};

/// TLS-camouflaged SOCKS5 proxy, server node.
#[derive(Parser, Debug)]
#[command(name = "foxhole-server", version)]
struct Args {
    /// Configuration file (INI)
    #[arg(short = 'n', long)]
    config: Option<PathBuf>,

    /// Listen address for the TLS tunnel
    #[arg(short = 'i', long)]
    tls_ip: Option<String>,

    /// Listen port for the TLS tunnel
    #[arg(short = 'p', long)]
    tls_port: Option<u16>,

    /// PEM private key file
    #[arg(short = 'k', long)]
    key: Option<PathBuf>,

    /// PEM certificate file
    #[arg(short = 'c', long)]
    cert: Option<PathBuf>,

    /// Serial string (the shared secret path)
    #[arg(short = 's', long)]
    serial: Option<String>,

    /// Decoy website archive (CPIO)
    #[arg(short = 'e', long)]
    archive: Option<PathBuf>,

    /// Raw HTTP override pages for the archiveless responder
    #[arg(long)]
    pages: Option<PathBuf>,

    /// Credential file, one name:password per line
    #[arg(short = 'b', long)]
    credentials: Option<PathBuf>,

    /// Listen address for the plain web service
    #[arg(short = 'a', long)]
    web_ip: Option<String>,

    /// Listen port for the plain web service
    #[arg(short = 'w', long)]
    web_port: Option<u16>,

    /// Timeout of connections, seconds
    #[arg(short = 't', long)]
    conn_timeout: Option<u64>,

    /// Timeout of the session scheduler, seconds
    #[arg(short = 'g', long)]
    sched_timeout: Option<u64>,

    /// Timeout of the web service keep-alive, seconds
    #[arg(short = 'j', long)]
    web_timeout: Option<u64>,

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

fn build_options(args: &Args, ini: Option<&Ini>) -> anyhow::Result<ServerOptions> {
    let defaults = ServerOptions::default();

    let tls_port = match &args.tls_port {
        Some(port) => *port,
        None => parse_num(ini_get(ini, "tls", "port"), "tls port")?
            .map(|p| p as u16)
            .unwrap_or(defaults.tunnel_port),
    };
    let web_port = match &args.web_port {
        Some(port) => *port,
        None => parse_num(ini_get(ini, "web", "port"), "web port")?
            .map(|p| p as u16)
            .unwrap_or(defaults.web_port),
    };

    Ok(ServerOptions {
        tunnel_ip: args
            .tls_ip
            .clone()
            .or_else(|| ini_get(ini, "tls", "ip").map(String::from))
            .unwrap_or(defaults.tunnel_ip),
        tunnel_port: tls_port,
        web_ip: args
            .web_ip
            .clone()
            .or_else(|| ini_get(ini, "web", "ip").map(String::from))
            .unwrap_or(defaults.web_ip),
        web_port,
        key_file: args
            .key
            .clone()
            .or_else(|| ini_get(ini, "main", "private_key").map(PathBuf::from))
            .unwrap_or(defaults.key_file),
        cert_file: args
            .cert
            .clone()
            .or_else(|| ini_get(ini, "main", "certificate").map(PathBuf::from))
            .unwrap_or(defaults.cert_file),
        serial: args
            .serial
            .clone()
            .or_else(|| ini_get(ini, "main", "serial").map(String::from))
            .unwrap_or(defaults.serial),
        archive: args
            .archive
            .clone()
            .or_else(|| ini_get(ini, "web", "rootfs").map(PathBuf::from)),
        pages: args
            .pages
            .clone()
            .or_else(|| ini_get(ini, "web", "pages").map(PathBuf::from)),
        credentials: args
            .credentials
            .clone()
            .or_else(|| ini_get(ini, "main", "users").map(PathBuf::from)),
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
        web_timeout: match args.web_timeout {
            Some(t) => t,
            None => parse_num(ini_get(ini, "web", "timeout"), "web timeout")?
                .unwrap_or(defaults.web_timeout),
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

    let node = ServerNode::new(options).context("cannot initialize proxy")?;
    node.run().await?;

    Ok(())
}
