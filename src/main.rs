use std::process::ExitCode;

use log::error;
use tracing_subscriber::EnvFilter;

use extract_vector::cli;

// stderr is reserved for the JSON error report unless RUST_LOG asks for more.
const DEFAULT_LOG_FILTER: &str = "off";

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // Also installs the `log` bridge, so our `log` records and ONNX Runtime's
    // `tracing` events share one stderr writer.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    match cli::run(std::env::args_os()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:?}", e);
            if let Err(io_error) = e.report(std::io::stderr()) {
                error!("Error writing error report: {:?}", io_error);
            }
            ExitCode::FAILURE
        }
    }
}
