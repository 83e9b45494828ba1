pub mod time_source;

use tokio::sync::watch;

/// Flip `shutdown` to `true` on Ctrl+C / SIGTERM so the control loop stops
/// after the tick in progress.
pub fn set_shutdown_on_signal(shutdown: watch::Sender<bool>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        tracing::info!("Received termination signal, stopping control loop");
        if shutdown.send(true).is_err() {
            std::process::exit(0);
        }
    })
}
