//! Daemon entrypoint.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use peerwired::{
    StructuredHealthReporter, SystemConfigLoader, SystemShutdownSignal, bootstrap_with,
};

fn main() -> ExitCode {
    let reporter = Arc::new(StructuredHealthReporter::new());
    let result = bootstrap_with(&SystemConfigLoader, reporter)
        .and_then(|daemon| daemon.run(&SystemShutdownSignal::default()));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            writeln!(io::stderr().lock(), "peerwired: {error}").ok();
            ExitCode::FAILURE
        }
    }
}
