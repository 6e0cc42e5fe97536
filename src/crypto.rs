//! Blowfish in CBC mode, as used by NadeoPak archives.
//!
//! Two deviations from textbook CBC:
//!
//! *   After every 256 bytes processed, the chaining value is XORed with `0xCC` bytes.
//! *   The key can be replaced mid-stream ([`BlowfishCbc::rekey`]). The chaining value and the
//!     byte counter carry over to the new key.

use std::io::{self, Read};

use blowfish::Blowfish;
use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::error::{GbxError, Result};

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 8;

const IV_XOR_PERIOD: u64 = 256;
const IV_XOR: u64 = 0xCCCC_CCCC_CCCC_CCCC;

/// Rounds `len` up to a whole number of blocks.
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Blowfish-CBC state: key schedule, chaining value and processed byte count.
#[derive(Clone)]
pub struct BlowfishCbc {
    cipher: Blowfish,
    iv: u64,
    processed: u64,
}

impl BlowfishCbc {
    /// Creates a cipher from a 4 to 56 byte key and the stream IV.
    pub fn new(key: &[u8], iv: u64) -> Result<Self> {
        Ok(Self {
            cipher: schedule(key)?,
            iv,
            processed: 0,
        })
    }

    /// Replaces the key schedule, keeping the chaining state.
    pub fn rekey(&mut self, key: &[u8]) -> Result<()> {
        self.cipher = schedule(key)?;
        Ok(())
    }

    /// Bytes processed so far.
    pub fn position(&self) -> u64 {
        self.processed
    }

    fn advance(&mut self, next_iv: u64) {
        self.iv = next_iv;
        self.processed += BLOCK_SIZE as u64;
        if self.processed % IV_XOR_PERIOD == 0 {
            self.iv ^= IV_XOR;
        }
    }

    /// Decrypts whole blocks in place.
    pub fn decrypt(&mut self, data: &mut [u8]) -> Result<()> {
        check_blocks(data.len())?;
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            let ciphertext = block_u64(block);
            self.cipher
                .decrypt_block(GenericArray::from_mut_slice(block));
            let plain = block_u64(block) ^ self.iv;
            block.copy_from_slice(&plain.to_le_bytes());
            self.advance(ciphertext);
        }
        Ok(())
    }

    /// Encrypts whole blocks in place.
    pub fn encrypt(&mut self, data: &mut [u8]) -> Result<()> {
        check_blocks(data.len())?;
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            let mixed = block_u64(block) ^ self.iv;
            block.copy_from_slice(&mixed.to_le_bytes());
            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(block));
            self.advance(block_u64(block));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BlowfishCbc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlowfishCbc")
            .field("processed", &self.processed)
            .finish_non_exhaustive()
    }
}

fn schedule(key: &[u8]) -> Result<Blowfish> {
    Blowfish::new_from_slice(key)
        .map_err(|_| GbxError::Crypto(format!("invalid Blowfish key length {}", key.len())))
}

fn check_blocks(len: usize) -> Result<()> {
    if len % BLOCK_SIZE != 0 {
        return Err(GbxError::Crypto(format!(
            "{len} bytes is not a multiple of the block size"
        )));
    }
    Ok(())
}

fn block_u64(block: &[u8]) -> u64 {
    let mut bytes = [0u8; BLOCK_SIZE];
    bytes.copy_from_slice(block);
    u64::from_le_bytes(bytes)
}

/// A reader that decrypts a Blowfish-CBC stream block by block.
///
/// Blocks are decrypted when first touched, so a [`rekey`](Self::rekey) applies to every block
/// starting at or after the current position rounded up to the block size.
#[derive(Debug)]
pub struct BlowfishCbcReader<R> {
    inner: R,
    cbc: BlowfishCbc,
    block: [u8; BLOCK_SIZE],
    pos: usize,
}

impl<R: Read> BlowfishCbcReader<R> {
    /// Wraps `inner`, positioned at the first encrypted block.
    pub fn new(inner: R, key: &[u8], iv: u64) -> Result<Self> {
        Ok(Self {
            inner,
            cbc: BlowfishCbc::new(key, iv)?,
            block: [0; BLOCK_SIZE],
            pos: BLOCK_SIZE,
        })
    }

    /// Replaces the key for the blocks not read yet.
    pub fn rekey(&mut self, key: &[u8]) -> Result<()> {
        self.cbc.rekey(key)
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill(&mut self) -> io::Result<bool> {
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = self.inner.read(&mut self.block[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        match filled {
            0 => Ok(false),
            BLOCK_SIZE => {
                self.cbc
                    .decrypt(&mut self.block)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                self.pos = 0;
                Ok(true)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated Blowfish block",
            )),
        }
    }
}

impl<R: Read> Read for BlowfishCbcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.pos == BLOCK_SIZE && !self.fill()? {
                break;
            }
            let n = (BLOCK_SIZE - self.pos).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&self.block[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
        }
        Ok(written)
    }
}
