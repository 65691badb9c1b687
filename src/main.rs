//! loccon - local context storage

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = loccon::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
