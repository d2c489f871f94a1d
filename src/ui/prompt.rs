//! Interactive passphrase entry.

use std::io::{self, IsTerminal};

use inquire::{Password, PasswordDisplayMode};

use crate::errors::{Error, Result};
use crate::file::Passphrase;

/// Prompts for a passphrase with echo off.
///
/// Only used when an encrypted input turned up and no passphrase was
/// resolved from flags or a sibling file. Outside a terminal this fails
/// instead of blocking on a pipe.
pub fn read_passphrase() -> Result<Passphrase> {
    if !io::stdin().is_terminal() {
        return Err(Error::PassphraseMissing);
    }
    let entered = Password::new("Passphrase:")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Hidden)
        .prompt()
        .map_err(|e| Error::Io(io::Error::other(e.to_string())))?;
    Ok(Passphrase::from(entered.into_bytes()))
}
