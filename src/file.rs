//! File plumbing: opening inputs and outputs, default output naming, and
//! passphrase resolution.
//!
//! `-` selects standard input or output. Outputs are created exclusively;
//! an existing file is an error rather than an overwrite. Passphrases are
//! resolved in order: explicit value, explicit file, then a sibling
//! `<basename>.passphrase.txt` next to the input; file contents are used
//! verbatim, trailing newlines and all.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::rc::Rc;

use secrecy::SecretSlice;

use crate::config::PASSPHRASE_SUFFIX;
use crate::errors::{Error, Result};
use crate::pipeline::{CountingReader, FinishWrite};

/// A passphrase, kept out of debug output and wiped on drop.
pub type Passphrase = SecretSlice<u8>;

/// Raw input byte source.
#[derive(Debug)]
pub enum Source {
    File(File),
    Stdin(io::Stdin),
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => f.read(buf),
            Self::Stdin(s) => s.read(buf),
        }
    }
}

/// An opened input with the metadata the operations care about.
#[derive(Debug)]
pub struct Input {
    pub reader: BufReader<CountingReader<Source>>,
    /// Input path with a recognized extension stripped; `None` for stdin.
    pub basename: Option<String>,
    /// Total input size, when the source is a regular file.
    pub size: Option<u64>,
    /// Shared raw-byte position, for progress reporting.
    pub pos: Rc<Cell<u64>>,
}

/// Opens `path` for reading; `-` means stdin.
pub fn open_input(path: &str, extensions: &[&str]) -> Result<Input> {
    let (source, basename, size) = if path == "-" {
        (Source::Stdin(io::stdin()), None, None)
    } else {
        let file = File::open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::InputMissing(path.into())
            } else {
                Error::Io(e)
            }
        })?;
        let size = file.metadata().ok().map(|m| m.len());
        (
            Source::File(file),
            Some(strip_extension(path, extensions)),
            size,
        )
    };

    let counting = CountingReader::new(source);
    let pos = counting.position();
    Ok(Input {
        reader: BufReader::new(counting),
        basename,
        size,
        pos,
    })
}

/// Strips the first matching extension, or returns the path unchanged.
fn strip_extension(path: &str, extensions: &[&str]) -> String {
    for ext in extensions {
        if let Some(root) = path.strip_suffix(ext)
            && !root.is_empty()
        {
            return root.to_owned();
        }
    }
    path.to_owned()
}

/// Default output path: basename plus extension, or `-` when the input
/// came from stdin.
pub fn default_output(basename: Option<&str>, extension: &str) -> String {
    basename.map_or_else(|| "-".to_owned(), |base| format!("{base}{extension}"))
}

/// Raw output byte sink.
#[derive(Debug)]
pub enum OutFile {
    File(BufWriter<File>),
    Stdout(io::Stdout),
}

impl Write for OutFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => f.write(buf),
            Self::Stdout(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File(f) => f.flush(),
            Self::Stdout(s) => s.flush(),
        }
    }
}

impl FinishWrite for OutFile {
    fn finish(&mut self) -> Result<()> {
        self.flush()?;
        Ok(())
    }
}

impl OutFile {
    pub fn is_stdout(&self) -> bool {
        matches!(self, Self::Stdout(_))
    }
}

/// Creates `path` exclusively for writing; `-` means stdout.
pub fn create_output(path: &str) -> Result<OutFile> {
    if path == "-" {
        return Ok(OutFile::Stdout(io::stdout()));
    }
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                Error::OutputExists(path.into())
            } else {
                Error::Io(e)
            }
        })?;
    Ok(OutFile::File(BufWriter::new(file)))
}

/// Resolves a passphrase from an explicit value, an explicit file, or the
/// conventional sibling file next to the input.
pub fn resolve_passphrase(
    passphrase: Option<&str>,
    passfile: Option<&Path>,
    basename: Option<&str>,
) -> Result<Option<Passphrase>> {
    if let Some(value) = passphrase {
        return Ok(Some(Passphrase::from(value.as_bytes().to_vec())));
    }
    if let Some(path) = passfile {
        let data = std::fs::read(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::InputMissing(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        return Ok(Some(Passphrase::from(data)));
    }
    if let Some(base) = basename {
        let sibling = format!("{base}{PASSPHRASE_SUFFIX}");
        match std::fs::read(&sibling) {
            Ok(data) => return Ok(Some(Passphrase::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn strips_known_extensions_only() {
        assert_eq!(strip_extension("backup.ab", &[".ab", ".adb"]), "backup");
        assert_eq!(strip_extension("backup.adb", &[".ab", ".adb"]), "backup");
        assert_eq!(strip_extension("backup.tar", &[".ab", ".adb"]), "backup.tar");
        assert_eq!(strip_extension(".ab", &[".ab"]), ".ab");
    }

    #[test]
    fn default_output_naming() {
        assert_eq!(default_output(Some("backup"), ".tar"), "backup.tar");
        assert_eq!(default_output(None, ".tar"), "-");
    }

    #[test]
    fn missing_input_is_categorical() {
        let err = open_input("/no/such/file.ab", &[".ab"]).unwrap_err();
        assert!(matches!(err, Error::InputMissing(_)));
    }

    #[test]
    fn outputs_are_created_exclusively() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ab");
        let path = path.to_str().unwrap();

        let mut out = create_output(path).unwrap();
        out.write_all(b"data").unwrap();
        out.finish().unwrap();

        let err = create_output(path).unwrap_err();
        assert!(matches!(err, Error::OutputExists(_)));
    }

    #[test]
    fn passphrase_precedence_and_discovery() {
        let dir = tempdir().unwrap();
        let passfile = dir.path().join("pass.txt");
        std::fs::write(&passfile, b"from-file\n").unwrap();
        let base = dir.path().join("backup");
        let base = base.to_str().unwrap();
        std::fs::write(format!("{base}{PASSPHRASE_SUFFIX}"), b"sibling").unwrap();

        // Explicit value wins.
        let p = resolve_passphrase(Some("direct"), Some(&passfile), Some(base))
            .unwrap()
            .unwrap();
        assert_eq!(p.expose_secret(), b"direct");

        // Passphrase files are verbatim, trailing newline included.
        let p = resolve_passphrase(None, Some(&passfile), Some(base))
            .unwrap()
            .unwrap();
        assert_eq!(p.expose_secret(), b"from-file\n");

        // Sibling discovery.
        let p = resolve_passphrase(None, None, Some(base)).unwrap().unwrap();
        assert_eq!(p.expose_secret(), b"sibling");

        // Nothing found.
        let other = dir.path().join("elsewhere");
        assert!(
            resolve_passphrase(None, None, Some(other.to_str().unwrap()))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn explicit_passfile_must_exist() {
        let err =
            resolve_passphrase(None, Some(Path::new("/no/such/pass.txt")), None).unwrap_err();
        assert!(matches!(err, Error::InputMissing(_)));
    }
}
