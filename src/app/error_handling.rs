//! Error handling utilities
//!
//! Turns a fatal error into a message on stderr and a process exit code.

use tracing::error;

/// Handle fatal errors and exit with the matching status code
///
/// - For `PipelineError`: exit code comes from the error category
/// - For other errors: exit code 1
///
/// With `verbose >= 1` the whole error chain is printed.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    use crate::error::PipelineError;

    error!("Fatal error: {}", error);
    eprintln!("Error: {error}");

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    let exit_code = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map(PipelineError::exit_code)
        .unwrap_or(1);

    std::process::exit(exit_code)
}
