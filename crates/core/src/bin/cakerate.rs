use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;

use cakerate::config::{ConfigArgs, ShaperConfig};
use cakerate::shaper::{DryRunShaper, ShaperPort, TcShaper};
use cakerate::{ControlLoop, ShaperController};

/// Feed RTT samples read line by line from stdin until EOF.
async fn read_samples(controller: ShaperController) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Err(err) = controller.record_rtt_str(&line) {
            tracing::debug!(error = %err, line = %line, "Ignoring RTT sample");
        }
    }
    tracing::info!("RTT sample source closed");
    Ok(())
}

async fn run<P: ShaperPort + 'static>(config: ShaperConfig, port: P) -> anyhow::Result<()> {
    let (controller, control_loop) = ControlLoop::new(&config, port)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    cakerate::util::set_shutdown_on_signal(shutdown_tx)?;

    if let Some(address) = config.metrics_address {
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(err) = cakerate::server::serve(address, controller).await {
                tracing::error!(error = %err, "Status endpoint stopped");
            }
        });
    }

    let source = tokio::spawn(read_samples(controller));
    control_loop.run(shutdown_rx).await;
    source.abort();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = ConfigArgs::parse();
    cakerate::config::set_logger(args.log_level);
    tracing::info!(version = args.current_version(), "Starting cakerate");
    let config = args.build()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    let result = if config.dry_run {
        rt.block_on(run(config, DryRunShaper))
    } else {
        let port = TcShaper::new(config.tc_binary.clone(), config.apply_timeout);
        rt.block_on(run(config, port))
    };
    // A pending stdin read would otherwise keep the runtime alive.
    rt.shutdown_timeout(Duration::from_millis(500));
    result
}
