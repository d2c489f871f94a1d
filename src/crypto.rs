//! Streaming AES-256-CBC and PKCS#7 filter stages.
//!
//! Cipher and padding are deliberately separate stages: stripping
//! encryption while keeping compression forwards the decrypted, unpadded,
//! still-compressed byte stream, which is only possible when unpadding is
//! not fused into the decryptor. One-shot helpers cover the small
//! encrypted key blob in the archive header.
//!
//! Every decrypt-path failure is reported as the same uniform error so a
//! caller cannot tell a cipher failure from a padding failure.

use std::io;

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::config::AES_BLOCK_SIZE;
use crate::errors::{Error, Result};
use crate::pipeline::Stage;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

fn bad_key() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        "bad key or IV length",
    ))
}

/// Decrypts the key blob and strips its PKCS#7 padding in one shot.
pub fn decrypt_blob(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| Error::DecryptionFailed)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| Error::DecryptionFailed)
}

/// Pads and encrypts the key blob in one shot.
pub fn encrypt_blob(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| bad_key())?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(data))
}

/// CBC decryption as a pull stage. Partial blocks are carried between
/// updates; a trailing partial block at end of stream means the ciphertext
/// was not block-aligned and is reported as a decryption failure.
pub struct CbcDecrypt {
    cipher: Aes256CbcDec,
    carry: Vec<u8>,
}

impl CbcDecrypt {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| Error::DecryptionFailed)?;
        Ok(Self {
            cipher,
            carry: Vec::new(),
        })
    }
}

impl Stage for CbcDecrypt {
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.carry.extend_from_slice(data);
        let usable = self.carry.len() - self.carry.len() % AES_BLOCK_SIZE;
        let mut out: Vec<u8> = self.carry.drain(..usable).collect();
        for block in out.chunks_exact_mut(AES_BLOCK_SIZE) {
            self.cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(out)
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        if self.carry.is_empty() {
            Ok(Vec::new())
        } else {
            Err(Error::DecryptionFailed)
        }
    }
}

/// CBC encryption as a push stage. Fed block-aligned data by the padder
/// sitting above it.
pub struct CbcEncrypt {
    cipher: Aes256CbcEnc,
    carry: Vec<u8>,
}

impl CbcEncrypt {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| bad_key())?;
        Ok(Self {
            cipher,
            carry: Vec::new(),
        })
    }
}

impl Stage for CbcEncrypt {
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.carry.extend_from_slice(data);
        let usable = self.carry.len() - self.carry.len() % AES_BLOCK_SIZE;
        let mut out: Vec<u8> = self.carry.drain(..usable).collect();
        for block in out.chunks_exact_mut(AES_BLOCK_SIZE) {
            self.cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(out)
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        if self.carry.is_empty() {
            Ok(Vec::new())
        } else {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unpadded trailing bytes reached the CBC encryptor",
            )))
        }
    }
}

/// PKCS#7 unpadding as a pull stage.
///
/// The final cipher block is held back until end of stream, since only
/// then is it known to carry the padding.
pub struct Pkcs7Unpad {
    held: Vec<u8>,
}

impl Pkcs7Unpad {
    pub fn new() -> Self {
        Self { held: Vec::new() }
    }
}

impl Default for Pkcs7Unpad {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Pkcs7Unpad {
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.held.extend_from_slice(data);
        if self.held.len() > AES_BLOCK_SIZE {
            let emit = self.held.len() - AES_BLOCK_SIZE;
            Ok(self.held.drain(..emit).collect())
        } else {
            Ok(Vec::new())
        }
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        if self.held.len() != AES_BLOCK_SIZE {
            return Err(Error::DecryptionFailed);
        }
        let pad = usize::from(self.held[AES_BLOCK_SIZE - 1]);
        if pad == 0 || pad > AES_BLOCK_SIZE {
            return Err(Error::DecryptionFailed);
        }
        let (content, padding) = self.held.split_at(AES_BLOCK_SIZE - pad);
        if padding.iter().any(|&b| b != pad as u8) {
            return Err(Error::DecryptionFailed);
        }
        Ok(content.to_vec())
    }
}

/// PKCS#7 padding as a push stage: passes block-aligned data through and
/// emits the padded final block on finalize. A block-aligned stream still
/// gains a whole block of padding, as the scheme requires.
pub struct Pkcs7Pad {
    carry: Vec<u8>,
}

impl Pkcs7Pad {
    pub fn new() -> Self {
        Self { carry: Vec::new() }
    }
}

impl Default for Pkcs7Pad {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Pkcs7Pad {
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.carry.extend_from_slice(data);
        let usable = self.carry.len() - self.carry.len() % AES_BLOCK_SIZE;
        Ok(self.carry.drain(..usable).collect())
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        let pad = AES_BLOCK_SIZE - self.carry.len();
        let mut out = std::mem::take(&mut self.carry);
        out.extend(std::iter::repeat_n(pad as u8, pad));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;
    use crate::pipeline::testsink::SharedSink;
    use crate::pipeline::{StageReader, StageWriter};

    const KEY: [u8; 32] = [0x11; 32];
    const IV: [u8; 16] = [0x22; 16];

    fn decrypt_stream(ciphertext: &[u8], block_size: usize) -> crate::errors::Result<Vec<u8>> {
        let decrypt = StageReader::new(
            ciphertext,
            Box::new(CbcDecrypt::new(&KEY, &IV)?),
            block_size,
        );
        let mut unpad = StageReader::new(decrypt, Box::new(Pkcs7Unpad::new()), block_size);
        let mut out = Vec::new();
        unpad.read_to_end(&mut out).map_err(crate::errors::Error::Io)?;
        Ok(out)
    }

    #[test]
    fn blob_round_trip() {
        let plain = b"three length-prefixed strings live here";
        let blob = encrypt_blob(&KEY, &IV, plain).unwrap();
        assert_eq!(blob.len() % 16, 0);
        assert_eq!(decrypt_blob(&KEY, &IV, &blob).unwrap(), plain);
    }

    #[test]
    fn streaming_decrypt_matches_one_shot() {
        let plain: Vec<u8> = (0..100).collect();
        let ciphertext = encrypt_blob(&KEY, &IV, &plain).unwrap();
        for block_size in [1, 7, 16, 64] {
            assert_eq!(decrypt_stream(&ciphertext, block_size).unwrap(), plain);
        }
    }

    #[test]
    fn streaming_encrypt_matches_one_shot() {
        let plain: Vec<u8> = (0..77).rev().collect();
        let expected = encrypt_blob(&KEY, &IV, &plain).unwrap();

        let sink = SharedSink::default();
        let encrypt = StageWriter::new(sink.clone(), Box::new(CbcEncrypt::new(&KEY, &IV).unwrap()));
        let mut pad = StageWriter::new(encrypt, Box::new(Pkcs7Pad::new()));
        for chunk in plain.chunks(5) {
            pad.write_all(chunk).unwrap();
        }
        use crate::pipeline::FinishWrite;
        pad.finish().unwrap();

        assert_eq!(sink.contents(), expected);
    }

    #[test]
    fn tampered_padding_is_a_uniform_failure() {
        let plain = [0x5Au8; 48];
        let mut ciphertext = encrypt_blob(&KEY, &IV, &plain).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        let err = decrypt_stream(&ciphertext, 16).unwrap_err();
        assert!(err.to_string().contains("wrong passphrase"));
    }

    #[test]
    fn misaligned_ciphertext_fails() {
        let plain = [0u8; 32];
        let mut ciphertext = encrypt_blob(&KEY, &IV, &plain).unwrap();
        ciphertext.pop();
        let err = decrypt_stream(&ciphertext, 16).unwrap_err();
        assert!(err.to_string().contains("wrong passphrase"));
    }

    #[test]
    fn pad_unpad_stages_round_trip() {
        for len in [0usize, 1, 15, 16, 17, 31, 32, 100] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();

            let mut padder = Pkcs7Pad::new();
            let mut padded = Vec::new();
            for b in &data {
                padded.extend(padder.update(std::slice::from_ref(b)).unwrap());
            }
            padded.extend(padder.finalize().unwrap());
            assert_eq!(padded.len() % 16, 0);
            assert!(!padded.is_empty());

            let mut unpadded = Vec::new();
            let mut unpadder = Pkcs7Unpad::new();
            for chunk in padded.chunks(3) {
                unpadded.extend(unpadder.update(chunk).unwrap());
            }
            unpadded.extend(unpadder.finalize().unwrap());
            assert_eq!(unpadded, data);
        }
    }

    #[test]
    fn empty_stream_fails_unpadding() {
        let mut unpadder = Pkcs7Unpad::new();
        assert!(unpadder.finalize().is_err());
    }
}
