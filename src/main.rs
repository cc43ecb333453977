use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use opencds::config::{AppConfig, CONFIG_FILE_NAME};
use opencds::runtime::Runtime;
use opencds::{logging, ssdp, web};

#[derive(Parser, Debug)]
#[command(author, version, about = "UPnP AV MediaServer", long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(long)]
    ip: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Configuration file to use
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server home directory
    #[arg(long)]
    home: Option<PathBuf>,

    /// Run in background, detached from the terminal
    #[arg(short, long)]
    daemon: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.daemon {
        daemonize().context("failed to daemonize")?;
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    logging::init_logging(args.debug).context("failed to initialize logging")?;

    let home = args.home.unwrap_or_else(AppConfig::default_home);
    let config_path = args
        .config
        .unwrap_or_else(|| home.join(CONFIG_FILE_NAME));

    let mut config =
        AppConfig::load_or_create(&config_path, &home).context("configuration failure")?;
    if let Some(ip) = args.ip {
        config.server.ip = Some(ip);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let config = Arc::new(config);

    info!("starting {} ({})", config.server.name, config.server.udn);
    info!("home directory: {}", config.server.home.display());

    let runtime = Runtime::new(Arc::clone(&config))
        .await
        .context("server initialization failed")?;
    runtime.start().await.context("server startup failed")?;

    ssdp::run_ssdp_service(Arc::clone(&runtime)).context("failed to start SSDP service")?;

    let app = web::create_router(Arc::clone(&runtime));
    let addr = std::net::SocketAddr::new(
        args.ip
            .or(config.server.ip)
            .unwrap_or_else(|| "0.0.0.0".parse().unwrap()),
        config.server.port,
    );
    info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let shutdown_runtime = Arc::clone(&runtime);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown_runtime.shutdown().await;
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}

/// Detach from the controlling terminal: fork, start a new session,
/// fork again, silence the standard streams.
#[cfg(unix)]
fn daemonize() -> anyhow::Result<()> {
    unsafe {
        match libc::fork() {
            -1 => anyhow::bail!("first fork failed"),
            0 => {}
            _ => std::process::exit(0),
        }
        if libc::setsid() == -1 {
            anyhow::bail!("setsid failed");
        }
        match libc::fork() {
            -1 => anyhow::bail!("second fork failed"),
            0 => {}
            _ => std::process::exit(0),
        }
        let devnull = std::ffi::CString::new("/dev/null").unwrap();
        let fd = libc::open(devnull.as_ptr(), libc::O_RDWR);
        if fd >= 0 {
            libc::dup2(fd, libc::STDIN_FILENO);
            libc::dup2(fd, libc::STDOUT_FILENO);
            libc::dup2(fd, libc::STDERR_FILENO);
            if fd > libc::STDERR_FILENO {
                libc::close(fd);
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> anyhow::Result<()> {
    anyhow::bail!("daemon mode is only supported on unix platforms")
}
