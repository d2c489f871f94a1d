//! Android Backup header codec and body pipeline construction.
//!
//! The header is a short run of `\n`-terminated text lines: magic,
//! version, compression flag, encryption name, and for AES-256 five more
//! uppercase-hex fields carrying the salts, iteration count, IV, and the
//! encrypted master-key blob. The body that follows is
//! `compress-then-encrypt` on the way in, so decoding always decrypts
//! before inflating; the filter stacks built here encode that ordering by
//! construction.

use std::io::{self, BufRead, Read, Write};

use secrecy::zeroize::Zeroize;
use tracing::debug;

use crate::config::{
    AES_BLOCK_SIZE, CHECKSUM_LEN, CHUNK_SIZE, ENCRYPTION_AES, ENCRYPTION_NONE, MAGIC,
    MASTER_IV_LEN, MASTER_KEY_LEN, VERSION_MAX, VERSION_MIN,
};
use crate::crypto::{self, CbcDecrypt, CbcEncrypt, Pkcs7Pad, Pkcs7Unpad};
use crate::errors::{Error, Result};
use crate::kdf;
use crate::pipeline::{FinishWrite, StageReader, StageWriter};
use crate::zlib::{Deflate, Inflate};

/// The version/compression/encryption prelude of an Android Backup file.
#[derive(Debug, Clone)]
pub struct AbHeader {
    pub version: u32,
    pub compressed: bool,
    /// Encryption algorithm name exactly as spelled in the file.
    pub encryption: String,
}

impl AbHeader {
    pub fn is_encrypted(&self) -> bool {
        self.encryption.eq_ignore_ascii_case(ENCRYPTION_AES)
    }
}

/// Master key material recovered from the encrypted header blob.
///
/// Lives only for the duration of one pipeline; wiped on drop.
#[derive(Debug)]
pub struct MasterKeys {
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

impl Drop for MasterKeys {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

fn read_line(r: &mut impl BufRead, what: &'static str) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    r.read_until(b'\n', &mut line)?;
    if line.pop() != Some(b'\n') {
        return Err(Error::BadHeader(what));
    }
    Ok(line)
}

fn read_int<T: std::str::FromStr>(r: &mut impl BufRead, what: &'static str) -> Result<T> {
    let line = read_line(r, what)?;
    std::str::from_utf8(&line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::BadHeader(what))
}

fn read_hex(r: &mut impl BufRead, what: &'static str) -> Result<Vec<u8>> {
    let line = read_line(r, what)?;
    hex::decode(&line).map_err(|_| Error::BadHeader(what))
}

/// Reads the magic, version, compression, and encryption lines.
///
/// For an encrypted archive the caller follows up with
/// [`read_master_keys`] once a passphrase is at hand.
pub fn read_prelude<R: BufRead>(r: &mut R) -> Result<AbHeader> {
    let magic = read_line(r, "magic")?;
    if magic != MAGIC {
        return Err(Error::BadMagic);
    }

    let version: u32 = read_int(r, "version")?;
    if !(VERSION_MIN..=VERSION_MAX).contains(&version) {
        return Err(Error::UnsupportedVersion(version));
    }

    let compression: i64 = read_int(r, "compression")?;
    let compressed = match compression {
        0 => false,
        1 => true,
        other => return Err(Error::UnsupportedCompression(other)),
    };

    let encryption = String::from_utf8_lossy(&read_line(r, "encryption")?).into_owned();
    let algo = encryption.to_ascii_uppercase();
    if algo != ENCRYPTION_NONE.to_ascii_uppercase() && algo != ENCRYPTION_AES {
        return Err(Error::UnsupportedEncryption(encryption));
    }

    debug!(version, compressed, encryption = %encryption, "parsed Android Backup header");
    Ok(AbHeader {
        version,
        compressed,
        encryption,
    })
}

/// One `<length byte><bytes>` field of the decrypted key blob.
fn read_lv(data: &mut &[u8], want: usize) -> Result<Vec<u8>> {
    let (&len, rest) = data.split_first().ok_or(Error::DecryptionFailed)?;
    if usize::from(len) != want || rest.len() < want {
        return Err(Error::DecryptionFailed);
    }
    let (value, rest) = rest.split_at(want);
    *data = rest;
    Ok(value.to_vec())
}

/// Reads the five encrypted-header lines and recovers the master key.
///
/// The blob is decrypted under PBKDF2(user_salt, iterations, passphrase)
/// and parsed as master_iv/master_key/checksum. The checksum is verified
/// against PBKDF2 over the mangled master key first and the raw key
/// second, to interoperate with emitters on either side of the Java
/// quirk.
pub fn read_master_keys<R: BufRead>(
    r: &mut R,
    passphrase: &[u8],
    ignore_checksum: bool,
) -> Result<MasterKeys> {
    let user_salt = read_hex(r, "user_salt")?;
    let checksum_salt = read_hex(r, "checksum_salt")?;
    let iterations: u32 = read_int(r, "iterations")?;
    let user_iv = read_hex(r, "user_iv")?;
    let user_blob = read_hex(r, "user_blob")?;

    let mut blob_key = kdf::derive(MASTER_KEY_LEN, &user_salt, iterations, passphrase);
    let mut blob = crypto::decrypt_blob(&blob_key, &user_iv, &user_blob)?;
    blob_key.zeroize();

    let mut cursor = blob.as_slice();
    let master_iv = read_lv(&mut cursor, MASTER_IV_LEN)?;
    let master_key = read_lv(&mut cursor, MASTER_KEY_LEN)?;
    let checksum = read_lv(&mut cursor, CHECKSUM_LEN)?;
    blob.zeroize();

    let mut checksum_ok = ignore_checksum;
    if !checksum_ok {
        for key in [kdf::mangle(&master_key), master_key.clone()] {
            if kdf::derive(CHECKSUM_LEN, &checksum_salt, iterations, &key) == checksum {
                checksum_ok = true;
                break;
            }
        }
    }
    if !checksum_ok {
        return Err(Error::BadChecksum);
    }

    Ok(MasterKeys {
        key: master_key,
        iv: master_iv,
    })
}

/// Stacks the decode-side filters over a raw body reader, as declared by
/// the header: decrypt, unpad, then (unless suppressed) inflate.
pub fn body_reader(
    inner: Box<dyn Read>,
    header: &AbHeader,
    keys: Option<MasterKeys>,
    decompress: bool,
) -> Result<Box<dyn Read>> {
    let mut reader = inner;
    if let Some(keys) = keys {
        reader = Box::new(StageReader::new(
            reader,
            Box::new(CbcDecrypt::new(&keys.key, &keys.iv)?),
            CHUNK_SIZE,
        ));
        reader = Box::new(StageReader::new(
            reader,
            Box::new(Pkcs7Unpad::new()),
            CHUNK_SIZE,
        ));
    }
    if decompress && header.compressed {
        reader = Box::new(StageReader::new(reader, Box::new(Inflate::new()), CHUNK_SIZE));
    }
    Ok(reader)
}

/// Output-side encryption parameters.
pub struct EncryptParams<'a> {
    pub passphrase: &'a [u8],
    pub salt_len: usize,
    pub iterations: u32,
}

/// What the emitted archive should look like.
pub struct EncodeOptions<'a> {
    pub compress: bool,
    pub encryption: Option<EncryptParams<'a>>,
}

fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf).map_err(|e| Error::Io(io::Error::other(e.to_string())))?;
    Ok(buf)
}

/// Writes a fresh Android Backup header and returns the sink the body
/// should be written through.
///
/// For an encrypted output all salts, IVs, and the master key are drawn
/// from the system CSPRNG; the checksum is computed over the mangled
/// master key, matching what Android itself emits. Compression, when
/// requested, wraps the returned sink so the body is compressed before it
/// is padded and encrypted.
pub fn write_header(
    mut out: Box<dyn FinishWrite>,
    version: u32,
    opts: &EncodeOptions<'_>,
) -> Result<Box<dyn FinishWrite>> {
    out.write_all(MAGIC)?;
    let algorithm = if opts.encryption.is_some() {
        ENCRYPTION_AES
    } else {
        ENCRYPTION_NONE
    };
    write!(
        out,
        "\n{}\n{}\n{}\n",
        version,
        u8::from(opts.compress),
        algorithm
    )?;

    if let Some(enc) = &opts.encryption {
        let user_salt = random_bytes(enc.salt_len)?;
        let checksum_salt = random_bytes(enc.salt_len)?;
        let user_iv = random_bytes(AES_BLOCK_SIZE)?;
        let mut master_iv = random_bytes(MASTER_IV_LEN)?;
        let mut master_key = random_bytes(MASTER_KEY_LEN)?;

        let checksum = kdf::derive(
            CHECKSUM_LEN,
            &checksum_salt,
            enc.iterations,
            &kdf::mangle(&master_key),
        );

        let mut blob = Vec::with_capacity(3 + MASTER_IV_LEN + MASTER_KEY_LEN + CHECKSUM_LEN);
        blob.push(MASTER_IV_LEN as u8);
        blob.extend_from_slice(&master_iv);
        blob.push(MASTER_KEY_LEN as u8);
        blob.extend_from_slice(&master_key);
        blob.push(CHECKSUM_LEN as u8);
        blob.extend_from_slice(&checksum);

        let mut blob_key = kdf::derive(MASTER_KEY_LEN, &user_salt, enc.iterations, enc.passphrase);
        let user_blob = crypto::encrypt_blob(&blob_key, &user_iv, &blob)?;
        blob.zeroize();
        blob_key.zeroize();

        write!(
            out,
            "{}\n{}\n{}\n{}\n{}\n",
            hex::encode_upper(&user_salt),
            hex::encode_upper(&checksum_salt),
            enc.iterations,
            hex::encode_upper(&user_iv),
            hex::encode_upper(&user_blob)
        )?;

        out = Box::new(StageWriter::new(
            out,
            Box::new(CbcEncrypt::new(&master_key, &master_iv)?),
        ));
        out = Box::new(StageWriter::new(out, Box::new(Pkcs7Pad::new())));
        master_key.zeroize();
        master_iv.zeroize();
    }

    if opts.compress {
        out = Box::new(StageWriter::new(out, Box::new(Deflate::new())));
    }

    Ok(out)
}
