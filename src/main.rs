//! lifelog - a tree-structured to-do list for the terminal

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = lifelog::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
