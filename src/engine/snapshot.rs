//! Versioned binary encoding of context state.
//!
//! Layout (little endian):
//! `[magic "EMBR"][version: u16][fingerprint: u64][n_ctx: u32]`
//! `[n_tokens: u32][token: u32]*[n_logits: u32][logit: f32]*`
//! `[has_cache: u8]([cache_len: u32][cache bytes])?`

use super::backend::TokenId;
use super::error::CompletionError;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"EMBR";
pub const SNAPSHOT_VERSION: u16 = 1;

/// Decoded context state.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSnapshot {
    pub fingerprint: u64,
    pub n_ctx: usize,
    pub tokens: Vec<TokenId>,
    pub logits: Vec<f32>,
    pub cache: Option<Vec<u8>>,
}

impl ContextSnapshot {
    /// Encode to the current snapshot version.
    pub fn encode(&self) -> Vec<u8> {
        let cache_len = self.cache.as_ref().map_or(0, |c| 4 + c.len());
        let mut buf = Vec::with_capacity(
            4 + 2 + 8 + 4 + 4 + self.tokens.len() * 4 + 4 + self.logits.len() * 4 + 1 + cache_len,
        );
        buf.extend_from_slice(&SNAPSHOT_MAGIC);
        buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.fingerprint.to_le_bytes());
        buf.extend_from_slice(&(self.n_ctx as u32).to_le_bytes());
        buf.extend_from_slice(&(self.tokens.len() as u32).to_le_bytes());
        for token in &self.tokens {
            buf.extend_from_slice(&token.to_le_bytes());
        }
        buf.extend_from_slice(&(self.logits.len() as u32).to_le_bytes());
        for logit in &self.logits {
            buf.extend_from_slice(&logit.to_le_bytes());
        }
        match &self.cache {
            Some(cache) => {
                buf.push(1);
                buf.extend_from_slice(&(cache.len() as u32).to_le_bytes());
                buf.extend_from_slice(cache);
            }
            None => buf.push(0),
        }
        buf
    }

    /// Decode a snapshot, rejecting unknown versions and malformed data.
    pub fn decode(bytes: &[u8]) -> Result<Self, CompletionError> {
        let mut reader = Reader { bytes, offset: 0 };
        if reader.take(4)? != SNAPSHOT_MAGIC {
            return Err(CompletionError::IncompatibleState("not a context snapshot".into()));
        }
        let version = reader.u16()?;
        if version != SNAPSHOT_VERSION {
            return Err(CompletionError::IncompatibleState(format!(
                "unsupported snapshot version {} (expected {})",
                version, SNAPSHOT_VERSION
            )));
        }
        let fingerprint = reader.u64()?;
        let n_ctx = reader.u32()? as usize;

        let n_tokens = reader.u32()? as usize;
        if n_tokens > n_ctx {
            return Err(CompletionError::IncompatibleState(format!(
                "snapshot holds {} tokens for a context of {}",
                n_tokens, n_ctx
            )));
        }
        let tokens = reader.take(n_tokens * 4)?
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let n_logits = reader.u32()? as usize;
        let logits = reader.take(n_logits.saturating_mul(4))?
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let cache = match reader.u8()? {
            0 => None,
            1 => {
                let len = reader.u32()? as usize;
                Some(reader.take(len)?.to_vec())
            }
            other => {
                return Err(CompletionError::IncompatibleState(format!(
                    "invalid cache flag {}",
                    other
                )))
            }
        };

        if reader.offset != bytes.len() {
            return Err(CompletionError::IncompatibleState(format!(
                "{} trailing bytes after snapshot",
                bytes.len() - reader.offset
            )));
        }

        Ok(Self { fingerprint, n_ctx, tokens, logits, cache })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CompletionError> {
        let end = self.offset.checked_add(len).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.offset..end];
                self.offset = end;
                Ok(slice)
            }
            None => Err(CompletionError::IncompatibleState(format!(
                "snapshot truncated at byte {}",
                self.offset
            ))),
        }
    }

    fn u8(&mut self) -> Result<u8, CompletionError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CompletionError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CompletionError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, CompletionError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }
}
