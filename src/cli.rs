//! Command-line interface: argument parsing and dispatch.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_ITERATIONS, DEFAULT_SALT_LEN};
use crate::ops::{self, InputOpts, OutputOpts};

/// Swiss-army knife for Android Backup files.
#[derive(Parser)]
#[command(name = "abkit", version)]
#[command(about = "Manipulate Android Backup files (*.ab, *.adb) produced by `adb backup` and similar tools")]
#[command(
    long_about = "Manipulate Android Backup files (*.ab, *.adb) produced by `adb backup`, \
`bmgr`, and similar tools.\n\nAn Android Backup file is a short metadata header followed by a \
PAX-formatted TAR stream, optionally compressed with zlib and optionally encrypted with \
AES-256. Input decryption options apply to every subcommand reading Android Backup files; \
output encryption options apply to every subcommand producing them."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Input decryption options.
#[derive(Args)]
struct PassArgs {
    /// Passphrase for an encrypted input file.
    #[arg(short = 'p', long)]
    passphrase: Option<String>,

    /// File whose whole contents are the passphrase, bytes used verbatim.
    /// Default: the input path with its ".ab"/".adb" extension replaced by
    /// ".passphrase.txt", if such a file exists.
    #[arg(long, conflicts_with = "passphrase")]
    passfile: Option<PathBuf>,

    /// Ignore the master-key checksum; useful for backups produced by
    /// unusual firmwares.
    #[arg(long)]
    ignore_checksum: bool,
}

impl PassArgs {
    fn into_opts(self) -> InputOpts {
        InputOpts {
            passphrase: self.passphrase,
            passfile: self.passfile,
            ignore_checksum: self.ignore_checksum,
        }
    }
}

/// Output encryption options.
#[derive(Args)]
struct EncArgs {
    /// Passphrase for an encrypted output file.
    #[arg(long)]
    output_passphrase: Option<String>,

    /// File whose whole contents are the output passphrase.
    #[arg(long, conflicts_with = "output_passphrase")]
    output_passfile: Option<PathBuf>,

    /// PBKDF2 salt length in bytes.
    #[arg(long, default_value_t = DEFAULT_SALT_LEN)]
    output_salt_bytes: usize,

    /// PBKDF2 iteration count.
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    output_iterations: u32,
}

impl EncArgs {
    fn into_opts(self, encrypt: bool, compress: bool) -> OutputOpts {
        OutputOpts {
            encrypt,
            compress,
            passphrase: self.output_passphrase,
            passfile: self.output_passfile,
            salt_len: self.output_salt_bytes,
            iterations: self.output_iterations,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List contents of an Android Backup file.
    #[command(visible_alias = "list")]
    Ls {
        #[command(flatten)]
        pass: PassArgs,

        /// Android Backup file to read, `-` for stdin.
        input: String,
    },

    /// Strip or apply encryption and/or compression.
    #[command(visible_aliases = ["strip", "ab2ab"])]
    Rewrap {
        #[command(flatten)]
        pass: PassArgs,

        #[command(flatten)]
        enc: EncArgs,

        /// Produce decompressed output; this is the default.
        #[arg(short = 'd', long, conflicts_with_all = ["keep_compression", "compress"])]
        decompress: bool,

        /// Copy the compression flag and the compressed bytes verbatim;
        /// the fastest way to strip encryption.
        #[arg(short = 'k', long, conflicts_with = "compress")]
        keep_compression: bool,

        /// (Re-)compress the output; uses a higher compression level than
        /// Android does, so this can take a while.
        #[arg(short = 'c', long)]
        compress: bool,

        /// (Re-)encrypt the output.
        #[arg(short = 'e', long)]
        encrypt: bool,

        /// Android Backup file to read, `-` for stdin.
        input: String,

        /// Output file; default: input with its extension replaced by
        /// ".stripped.ab", or `-` when the input is stdin.
        output: Option<String>,
    },

    /// Split a full-system backup into per-app Android Backup files.
    #[command(visible_alias = "ab2many")]
    Split {
        #[command(flatten)]
        pass: PassArgs,

        #[command(flatten)]
        enc: EncArgs,

        /// Compress the per-app output files.
        #[arg(short = 'c', long)]
        compress: bool,

        /// Encrypt the per-app output files; the output passphrase is
        /// reused for all of them, with unique keys per file.
        #[arg(short = 'e', long)]
        encrypt: bool,

        /// Output file name prefix; default: `abkit_split_<input basename>`.
        #[arg(long)]
        prefix: Option<String>,

        /// Android Backup file to read, `-` for stdin.
        input: String,
    },

    /// Merge several Android Backup files into one.
    #[command(visible_alias = "many2ab")]
    Merge {
        #[command(flatten)]
        pass: PassArgs,

        #[command(flatten)]
        enc: EncArgs,

        /// Compress the output file.
        #[arg(short = 'c', long)]
        compress: bool,

        /// Encrypt the output file.
        #[arg(short = 'e', long)]
        encrypt: bool,

        /// Input Android Backup files followed by the output file.
        #[arg(required = true, num_args = 2.., value_names = ["INPUT_AB_FILE", "OUTPUT_AB_FILE"])]
        files: Vec<String>,
    },

    /// Convert an Android Backup file into a TAR file.
    #[command(visible_alias = "ab2tar")]
    Unwrap {
        #[command(flatten)]
        pass: PassArgs,

        /// Android Backup file to read, `-` for stdin.
        input: String,

        /// Output file; default: input with its extension replaced by
        /// ".tar", or `-` when the input is stdin.
        output: Option<String>,
    },

    /// Convert a TAR file into an Android Backup file.
    ///
    /// The TAR stream is framed verbatim. Note that `adb restore` expects
    /// entries in a specific order with specific PAX headers, which
    /// general-purpose tar tools do not produce; feed this TAR files that
    /// came out of `unwrap` unless you know what you are doing.
    #[command(visible_alias = "tar2ab")]
    Wrap {
        #[command(flatten)]
        enc: EncArgs,

        /// Compress the output file.
        #[arg(short = 'c', long)]
        compress: bool,

        /// Encrypt the output file.
        #[arg(short = 'e', long)]
        encrypt: bool,

        /// Android Backup version to emit (required, no default).
        #[arg(long)]
        output_version: u32,

        /// TAR file to read, `-` for stdin.
        input: String,

        /// Output file; default: input with its extension replaced by
        /// ".ab", or `-` when the input is stdin.
        output: Option<String>,
    },
}

/// Parses arguments and runs the selected operation.
pub fn run() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match Cli::parse().command {
        Commands::Ls { pass, input } => {
            let mut stdout = io::stdout().lock();
            ops::ls(&input, &pass.into_opts(), &mut stdout)?;
            stdout.flush()?;
            Ok(())
        }
        Commands::Rewrap {
            pass,
            enc,
            decompress: _,
            keep_compression,
            compress,
            encrypt,
            input,
            output,
        } => ops::rewrap(
            &input,
            output.as_deref(),
            &pass.into_opts(),
            &enc.into_opts(encrypt, compress),
            keep_compression,
        ),
        Commands::Split {
            pass,
            enc,
            compress,
            encrypt,
            prefix,
            input,
        } => ops::split(
            &input,
            prefix.as_deref(),
            &pass.into_opts(),
            &enc.into_opts(encrypt, compress),
        ),
        Commands::Merge {
            pass,
            enc,
            compress,
            encrypt,
            files,
        } => {
            let Some((output, inputs)) = files.split_last() else {
                bail!("merge needs at least one input and an output");
            };
            ops::merge(
                inputs,
                output,
                &pass.into_opts(),
                &enc.into_opts(encrypt, compress),
            )
        }
        Commands::Unwrap {
            pass,
            input,
            output,
        } => ops::unwrap(&input, output.as_deref(), &pass.into_opts()),
        Commands::Wrap {
            enc,
            compress,
            encrypt,
            output_version,
            input,
            output,
        } => ops::wrap(
            &input,
            output.as_deref(),
            output_version,
            &enc.into_opts(encrypt, compress),
        ),
    }
}
