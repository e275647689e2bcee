#[macro_use]
mod logging;

pub mod bridge;
pub mod checksums;
pub mod io;
pub mod settings;

pub use bridge::Bridge;
pub use io::IoError;
pub use logging::{init_file_logging, stop_file_logging, FileLogGuard};
pub use settings::BridgeSettings;

// ============================================================================
// Entry Point
// ============================================================================

/// Start the bridge with the given settings and block until it stops.
pub fn run(settings: BridgeSettings) -> Result<(), IoError> {
    settings.validate()?;

    // Held until return so the file sees the final session report
    let _log_file = match settings.log_dir.as_deref().map(init_file_logging) {
        Some(Ok(guard)) => Some(guard),
        Some(Err(e)) => {
            twarn!("[bridge] {}", e);
            None
        }
        None => None,
    };

    tlog!("[bridge] Ser2Tcp");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| IoError::configuration(format!("Failed to start runtime: {}", e)))?;

    runtime.block_on(Bridge::new(settings).run())
}
