use anyhow::{anyhow, Result};
use clap::Parser;
use spindle_config::{AppConfig, ConfigLoader};
use spindle_core::{Pipeline, PipelineConfig};
use spindle_shutdown::{ShutdownCoordinator, SignalHandler};
use std::path::PathBuf;
use tracing::{info, warn};

mod logging;
mod presenter;

use presenter::ConsolePresenter;

#[derive(Parser, Debug)]
#[command(author, version, about = "iSpindel telemetry ingestion server", long_about = None)]
struct Args {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides server.host / server.port (e.g. 0.0.0.0:9901)
    #[arg(short, long)]
    bind: Option<String>,

    /// Do not print device updates to the console
    #[arg(short, long)]
    quiet: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ConfigLoader::new(args.config.as_ref()).load()?;
    if let Some(bind) = &args.bind {
        apply_bind_override(&mut config, bind)?;
        config.validate()?;
    }

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    logging::init(&config.logging)?;
    info!(
        config = ?args.config,
        bind = %config.server.bind_addr(),
        "Starting spindle ingestion server"
    );

    // 根令牌由信号处理器持有；取消只停止接入，聚合器由 pipeline.shutdown 停止
    let (signal_handler, _) = SignalHandler::new();
    let root = signal_handler.token();

    let pipeline = Pipeline::start(pipeline_config(&config), &root).await?;

    let presenter = if args.quiet {
        None
    } else {
        let console = ConsolePresenter::new(std::io::stdout());
        Some(tokio::spawn(console.run(
            pipeline.subscribe(),
            pipeline.subscribe_snapshots(),
            root.clone(),
        )))
    };

    let coordinator = ShutdownCoordinator::builder()
        .with_signal_handler(signal_handler)
        .with_connection_tracker(pipeline.connection_tracker())
        .with_drain_timeout(config.shutdown.drain_timeout())
        .build();

    let report = coordinator.run().await;
    let table = pipeline.shutdown().await?;

    if let Some(presenter) = presenter {
        if let Err(e) = presenter.await {
            warn!("Console presenter task failed: {}", e);
        }
    }

    info!(
        devices = table.len(),
        signal = ?report.signal,
        phase = ?report.phase,
        "Spindle server stopped"
    );
    Ok(())
}

fn pipeline_config(config: &AppConfig) -> PipelineConfig {
    PipelineConfig {
        bind_addr: config.server.bind_addr(),
        max_line_bytes: config.server.max_line_bytes,
        event_capacity: config.aggregator.event_capacity,
        drain_timeout: config.shutdown.drain_timeout(),
    }
}

/// 把 `host:port` 写回服务器配置，IPv6 主机需要方括号
fn apply_bind_override(config: &mut AppConfig, bind: &str) -> Result<()> {
    let (host, port) = bind
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Invalid bind address '{}', expected host:port", bind))?;
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("Invalid port in bind address '{}'", bind))?;

    config.server.host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    config.server.port = port;
    Ok(())
}
