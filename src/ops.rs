//! The six operations, each a small choreography over the header codec,
//! the filter pipeline, and the TAR reader.
//!
//! Inputs are consumed in one forward pass and outputs are written
//! through the encode-side filter stack returned by the header writer;
//! no operation seeks. Every operation that produces an Android Backup
//! file ends its TAR stream with the two-zero-block terminator before
//! finishing the sink stack.

use std::cell::Cell;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use tracing::info;

use crate::ab::{self, AbHeader, EncodeOptions, EncryptParams};
use crate::config::{
    AB_EXTENSIONS, CHUNK_SIZE, DEFAULT_ITERATIONS, DEFAULT_SALT_LEN, MAGIC, TAR_BLOCK_SIZE,
};
use crate::errors::Error;
use crate::file::{self, Passphrase};
use crate::pipeline::FinishWrite;
use crate::tar::{TarEntries, TarHeader, TarReader};
use crate::ui::progress::{NoProgress, Progress, TransferBar};
use crate::ui::prompt;

/// Input-side decryption options.
#[derive(Debug, Default)]
pub struct InputOpts {
    pub passphrase: Option<String>,
    pub passfile: Option<PathBuf>,
    pub ignore_checksum: bool,
}

/// Output-side encryption and compression options.
#[derive(Debug)]
pub struct OutputOpts {
    pub encrypt: bool,
    pub compress: bool,
    pub passphrase: Option<String>,
    pub passfile: Option<PathBuf>,
    pub salt_len: usize,
    pub iterations: u32,
}

impl Default for OutputOpts {
    fn default() -> Self {
        Self {
            encrypt: false,
            compress: false,
            passphrase: None,
            passfile: None,
            salt_len: DEFAULT_SALT_LEN,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// A decoded Android Backup input: parsed header plus the plaintext (or,
/// with `decompress` off, still-compressed) body stream.
struct AbInput {
    header: AbHeader,
    body: Box<dyn Read>,
    basename: Option<String>,
    size: Option<u64>,
    pos: std::rc::Rc<Cell<u64>>,
}

fn open_ab_input(path: &str, opts: &InputOpts, decompress: bool) -> Result<AbInput> {
    let input = file::open_input(path, AB_EXTENSIONS)?;
    let file::Input {
        mut reader,
        basename,
        size,
        pos,
    } = input;

    let header =
        ab::read_prelude(&mut reader).with_context(|| format!("while reading `{path}`"))?;

    let keys = if header.is_encrypted() {
        let passphrase = file::resolve_passphrase(
            opts.passphrase.as_deref(),
            opts.passfile.as_deref(),
            basename.as_deref(),
        )?
        .map_or_else(prompt::read_passphrase, Ok)?;
        Some(
            ab::read_master_keys(&mut reader, passphrase.expose_secret(), opts.ignore_checksum)
                .with_context(|| format!("while reading `{path}`"))?,
        )
    } else {
        None
    };

    let body = ab::body_reader(Box::new(reader), &header, keys, decompress)?;
    Ok(AbInput {
        header,
        body,
        basename,
        size,
        pos,
    })
}

fn resolve_output_passphrase(opts: &OutputOpts) -> Result<Option<Passphrase>> {
    if !opts.encrypt {
        return Ok(None);
    }
    file::resolve_passphrase(opts.passphrase.as_deref(), opts.passfile.as_deref(), None)?
        .map(Some)
        .ok_or(Error::PassphraseMissing)
        .context("`--encrypt` requires `--output-passphrase` or `--output-passfile`")
}

fn encode_options<'a>(opts: &OutputOpts, passphrase: Option<&'a Passphrase>) -> EncodeOptions<'a> {
    EncodeOptions {
        compress: opts.compress,
        encryption: passphrase.map(|p| EncryptParams {
            passphrase: p.expose_secret(),
            salt_len: opts.salt_len,
            iterations: opts.iterations,
        }),
    }
}

fn make_progress(size: Option<u64>, to_stdout: bool, label: &str) -> Box<dyn Progress> {
    match size {
        Some(total) if !to_stdout => {
            Box::new(TransferBar::new(total, format!("Writing `{label}`...")))
        }
        _ => Box::new(NoProgress),
    }
}

/// Copies a stream to a sink in chunks, reporting the raw input position.
fn copy_stream(
    input: &mut dyn Read,
    output: &mut dyn Write,
    progress: &dyn Progress,
    pos: &Cell<u64>,
) -> Result<()> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        output.write_all(&buf[..n])?;
        progress.update(pos.get());
    }
    Ok(())
}

/// Writes the TAR terminator and finishes the whole sink stack.
fn finish_tar(out: &mut dyn FinishWrite) -> Result<()> {
    out.write_all(&[0u8; 2 * TAR_BLOCK_SIZE])?;
    out.finish()?;
    Ok(())
}

fn ftype_char(ftype: u8) -> Result<char> {
    Ok(match ftype {
        0 | b'0' => '-',
        b'1' => 'h',
        b'2' => 'l',
        b'3' => 'c',
        b'4' => 'b',
        b'5' => 'd',
        b'6' => 'f',
        other => {
            return Err(Error::tar(format!(
                "unknown TAR header file type: {:?}",
                char::from(other)
            ))
            .into());
        }
    })
}

fn mode_string(mode: u32) -> String {
    const LETTERS: [char; 9] = ['r', 'w', 'x', 'r', 'w', 'x', 'r', 'w', 'x'];
    (0..9)
        .map(|i| {
            if mode >> (8 - i) & 1 == 1 {
                LETTERS[i]
            } else {
                '-'
            }
        })
        .collect()
}

fn owner_string(header: &TarHeader) -> String {
    let user = if header.uname.is_empty() {
        header.uid.to_string()
    } else {
        header.uname.clone()
    };
    let group = if header.gname.is_empty() {
        header.gid.to_string()
    } else {
        header.gname.clone()
    };
    format!("{user}/{group}")
}

fn mtime_string(mtime: i64) -> String {
    let format = time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    );
    time::OffsetDateTime::from_unix_timestamp(mtime)
        .ok()
        .and_then(|t| t.format(format).ok())
        .unwrap_or_else(|| mtime.to_string())
}

/// Lists archive contents, one line per non-PAX entry, after a banner
/// with the archive parameters.
pub fn ls(input_path: &str, opts: &InputOpts, out: &mut dyn Write) -> Result<()> {
    let input = open_ab_input(input_path, opts, true)?;
    writeln!(
        out,
        "# Android Backup, version: {}, compression: {}, encryption: {}",
        input.header.version,
        u8::from(input.header.compressed),
        input.header.encryption
    )?;

    let mut entries = TarEntries::new(input.body);
    while let Some(h) = entries
        .next_entry()
        .with_context(|| format!("while listing `{input_path}`"))?
    {
        writeln!(
            out,
            "{}{} {:<12} {:>8} {} {}",
            ftype_char(h.ftype)?,
            mode_string(h.mode),
            owner_string(&h),
            h.size,
            mtime_string(h.mtime),
            h.path
        )?;
    }
    Ok(())
}

/// Decodes an Android Backup file into the plain TAR stream inside it.
pub fn unwrap(input_path: &str, output_path: Option<&str>, opts: &InputOpts) -> Result<()> {
    let mut input = open_ab_input(input_path, opts, true)?;
    let output_path = output_path
        .map(str::to_owned)
        .unwrap_or_else(|| file::default_output(input.basename.as_deref(), ".tar"));
    let mut output = file::create_output(&output_path)?;

    let progress = make_progress(input.size, output.is_stdout(), &output_path);
    copy_stream(&mut input.body, &mut output, progress.as_ref(), &input.pos)
        .with_context(|| format!("while unwrapping `{input_path}`"))?;
    output.finish()?;
    progress.finish();
    Ok(())
}

/// Frames an existing TAR stream as an Android Backup file. The TAR bytes
/// are copied verbatim; no entries are synthesized or validated.
pub fn wrap(
    input_path: &str,
    output_path: Option<&str>,
    version: u32,
    opts: &OutputOpts,
) -> Result<()> {
    let passphrase = resolve_output_passphrase(opts)?;
    let mut input = file::open_input(input_path, &[".tar"])?;
    let output_path = output_path
        .map(str::to_owned)
        .unwrap_or_else(|| file::default_output(input.basename.as_deref(), ".ab"));
    let raw = file::create_output(&output_path)?;
    let to_stdout = raw.is_stdout();
    let mut sink = ab::write_header(
        Box::new(raw),
        version,
        &encode_options(opts, passphrase.as_ref()),
    )?;

    let progress = make_progress(input.size, to_stdout, &output_path);
    copy_stream(&mut input.reader, &mut sink, progress.as_ref(), &input.pos)
        .with_context(|| format!("while wrapping `{input_path}`"))?;
    sink.finish()?;
    progress.finish();
    Ok(())
}

/// Re-emits an Android Backup file with different encryption/compression.
///
/// With `keep_compression` the body is decrypted but never decompressed:
/// the output announces no encryption, copies the input's compression
/// flag, and forwards the compressed bytes verbatim. Otherwise the body
/// is decoded fully and re-encoded per `out_opts`.
pub fn rewrap(
    input_path: &str,
    output_path: Option<&str>,
    in_opts: &InputOpts,
    out_opts: &OutputOpts,
    keep_compression: bool,
) -> Result<()> {
    if keep_compression {
        let mut input = open_ab_input(input_path, in_opts, false)?;
        let output_path = output_path
            .map(str::to_owned)
            .unwrap_or_else(|| file::default_output(input.basename.as_deref(), ".stripped.ab"));
        let mut output = file::create_output(&output_path)?;
        output.write_all(MAGIC)?;
        write!(
            output,
            "\n{}\n{}\nnone\n",
            input.header.version,
            u8::from(input.header.compressed)
        )?;

        let progress = make_progress(input.size, output.is_stdout(), &output_path);
        copy_stream(&mut input.body, &mut output, progress.as_ref(), &input.pos)
            .with_context(|| format!("while rewrapping `{input_path}`"))?;
        output.finish()?;
        progress.finish();
        return Ok(());
    }

    let passphrase = resolve_output_passphrase(out_opts)?;
    let mut input = open_ab_input(input_path, in_opts, true)?;
    let output_path = output_path
        .map(str::to_owned)
        .unwrap_or_else(|| file::default_output(input.basename.as_deref(), ".stripped.ab"));
    let raw = file::create_output(&output_path)?;
    let to_stdout = raw.is_stdout();
    let mut sink = ab::write_header(
        Box::new(raw),
        input.header.version,
        &encode_options(out_opts, passphrase.as_ref()),
    )?;

    let progress = make_progress(input.size, to_stdout, &output_path);
    copy_stream(&mut input.body, &mut sink, progress.as_ref(), &input.pos)
        .with_context(|| format!("while rewrapping `{input_path}`"))?;
    sink.finish()?;
    progress.finish();
    Ok(())
}

/// App bucket for a TAR entry path: `apps/<app>/...` belongs to `<app>`,
/// everything else to `other`.
fn app_of(path: &str) -> &str {
    let mut parts = path.split('/');
    if parts.next() == Some("apps")
        && let Some(app) = parts.next()
        && parts.next().is_some()
        && !app.is_empty()
    {
        return app;
    }
    "other"
}

/// Splits a full-system backup into per-app Android Backup files.
///
/// A new output `<prefix>_<NNN>_<app>.ab` opens whenever the app bucket
/// changes. Each output starts with a fresh header at the input's version
/// and the most recent global PAX block, and pending per-entry PAX blocks
/// are carried across file boundaries so they still precede their entry.
pub fn split(
    input_path: &str,
    prefix: Option<&str>,
    in_opts: &InputOpts,
    out_opts: &OutputOpts,
) -> Result<()> {
    let passphrase = resolve_output_passphrase(out_opts)?;
    let input = open_ab_input(input_path, in_opts, true)?;
    let version = input.header.version;

    let prefix = prefix.map(str::to_owned).unwrap_or_else(|| {
        let base = input.basename.as_deref().unwrap_or("backup");
        match base.rfind('/') {
            Some(cut) => format!("{}abkit_split_{}", &base[..cut + 1], &base[cut + 1..]),
            None => format!("abkit_split_{base}"),
        }
    });

    println!(
        "# Android Backup, version: {}, compression: {}",
        version,
        u8::from(input.header.compressed)
    );

    let mut reader = TarReader::new(input.body);
    let mut output: Option<(Box<dyn FinishWrite>, String)> = None;
    let mut seq = 0u32;
    let mut global_pax: Option<Vec<u8>> = None;
    let mut pax: Option<Vec<u8>> = None;

    while let Some(h) = reader
        .next_header()
        .with_context(|| format!("while splitting `{input_path}`"))?
    {
        match h.ftype {
            b'g' => {
                global_pax = Some(h.raw);
                pax = None;
                continue;
            }
            b'x' => {
                pax = Some(h.raw);
                continue;
            }
            _ => {}
        }

        let app = app_of(&h.path);
        let out = match &mut output {
            Some((out, current)) if current.as_str() == app => out,
            slot => {
                if let Some((mut old, _)) = slot.take() {
                    finish_tar(&mut old)?;
                    seq += 1;
                }
                let fname = format!("{prefix}_{seq:03}_{app}.ab");
                info!("writing `{fname}`");
                let raw = file::create_output(&fname)?;
                let mut sink = ab::write_header(
                    Box::new(raw),
                    version,
                    &encode_options(out_opts, passphrase.as_ref()),
                )?;
                if let Some(g) = &global_pax {
                    sink.write_all(g)?;
                }
                &mut slot.insert((sink, app.to_owned())).0
            }
        };

        if let Some(p) = pax.take() {
            out.write_all(&p)?;
        }
        out.write_all(&h.raw)?;
        reader
            .copy_body(&h, out)
            .with_context(|| format!("while splitting `{input_path}`"))?;
    }

    if let Some((mut out, _)) = output.take() {
        finish_tar(&mut out)?;
    }
    Ok(())
}

/// Merges several Android Backup files into one, in argument order.
///
/// The output uses the first input's version; any later input with a
/// different version is rejected. All entries, PAX included, are
/// forwarded verbatim and one terminator closes the result.
pub fn merge(
    input_paths: &[String],
    output_path: &str,
    in_opts: &InputOpts,
    out_opts: &OutputOpts,
) -> Result<()> {
    let passphrase = resolve_output_passphrase(out_opts)?;
    let mut output: Option<(Box<dyn FinishWrite>, u32)> = None;

    for path in input_paths {
        let input = open_ab_input(path, in_opts, true)?;
        let (out, version) = match &mut output {
            Some((out, version)) => (out, *version),
            slot => {
                let version = input.header.version;
                let raw = file::create_output(output_path)?;
                let sink = ab::write_header(
                    Box::new(raw),
                    version,
                    &encode_options(out_opts, passphrase.as_ref()),
                )?;
                let pair = slot.insert((sink, version));
                (&mut pair.0, version)
            }
        };
        if input.header.version != version {
            return Err(Error::VersionMismatch {
                file: path.into(),
                found: input.header.version,
                expected: version,
            }
            .into());
        }

        info!("merging `{path}`");
        let mut reader = TarReader::new(input.body);
        while let Some(h) = reader
            .next_header()
            .with_context(|| format!("while merging `{path}`"))?
        {
            out.write_all(&h.raw)?;
            reader
                .copy_body(&h, out)
                .with_context(|| format!("while merging `{path}`"))?;
        }
    }

    if let Some((mut out, _)) = output.take() {
        finish_tar(&mut out)?;
    }
    Ok(())
}
