use std::process;

/// Entry point: run the CLI, print the error chain on failure, and exit
/// with status 1 on any error.
fn main() {
    if let Err(e) = abkit::cli::run() {
        eprintln!("Error: {e:?}");
        process::exit(1);
    }
}
