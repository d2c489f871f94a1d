//! Progress reporting behind a trait, so operations can run headless.

use indicatif::{ProgressBar as Bar, ProgressStyle as Style};

/// Observer for bytes flowing through a pipeline.
pub trait Progress {
    /// Called with the current raw-input byte position.
    fn update(&self, pos: u64);

    /// Called once when the operation completes.
    fn finish(&self);
}

/// Silent implementation for headless use and stdout pipes.
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&self, _pos: u64) {}

    fn finish(&self) {}
}

const TEMPLATE: &str =
    "{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Terminal progress bar; draws to stderr and hides itself when stderr is
/// not a terminal.
pub struct TransferBar {
    bar: Bar,
}

impl TransferBar {
    pub fn new(total: u64, message: String) -> Self {
        let bar = Bar::new(total);
        if let Ok(style) = Style::with_template(TEMPLATE) {
            bar.set_style(style.progress_chars("●○ "));
        }
        bar.set_message(message);
        Self { bar }
    }
}

impl Progress for TransferBar {
    fn update(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
