//! Terminal-facing concerns: progress reporting and the interactive
//! passphrase prompt. Everything here sits behind small seams so the core
//! stays testable without a terminal.

pub mod progress;
pub mod prompt;
