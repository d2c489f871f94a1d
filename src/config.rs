//! Format constants and application defaults.
//!
//! Single source of truth for the Android Backup wire format parameters
//! and the streaming buffer sizes used throughout the pipeline.

/// First header line of every Android Backup file.
pub const MAGIC: &[u8] = b"ANDROID BACKUP";

/// Lowest Android Backup version this tool accepts.
pub const VERSION_MIN: u32 = 1;

/// Highest Android Backup version this tool accepts.
///
/// Android has shipped versions 1 through 5 so far. If a future release
/// bumps the format, widening the accepted range is a change to this
/// constant only; the decoder reports anything outside it as
/// `UnsupportedVersion`.
pub const VERSION_MAX: u32 = 5;

/// Encryption algorithm name for encrypted archives, as written to the
/// header. Comparison is case-insensitive.
pub const ENCRYPTION_AES: &str = "AES-256";

/// Encryption algorithm name for plaintext archives.
pub const ENCRYPTION_NONE: &str = "none";

/// AES block size in bytes; also the PKCS#7 padding modulus.
pub const AES_BLOCK_SIZE: usize = 16;

/// AES-256 key length in bytes.
pub const MASTER_KEY_LEN: usize = 32;

/// Length of the master-key IV stored in the key blob.
pub const MASTER_IV_LEN: usize = 16;

/// Length of the master-key checksum stored in the key blob.
pub const CHECKSUM_LEN: usize = 32;

/// Default PBKDF2 salt length in bytes, matching `adb backup`.
pub const DEFAULT_SALT_LEN: usize = 64;

/// Default PBKDF2 iteration count, matching `adb backup`.
pub const DEFAULT_ITERATIONS: u32 = 10_000;

/// Chunk size for streaming reads and copies.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Size of a TAR header block; entry bodies are padded to this boundary.
pub const TAR_BLOCK_SIZE: usize = 512;

/// File name suffix tried when guessing a sibling passphrase file.
pub const PASSPHRASE_SUFFIX: &str = ".passphrase.txt";

/// Input extensions recognized as Android Backup files when deriving
/// default output names.
pub const AB_EXTENSIONS: &[&str] = &[".ab", ".adb"];
