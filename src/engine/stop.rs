//! Stop-sequence matching over generated bytes.
//!
//! Text already emitted never contains the start of a stop match: any tail
//! that could still grow into a stop sequence is held back until the next
//! token disambiguates it.

use aho_corasick::{AhoCorasick, MatchKind};

use super::error::CompletionError;

/// Result of scanning the generated buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopScan {
    /// A stop sequence starts at this byte offset.
    Matched(usize),
    /// No match; this many trailing bytes may still begin a stop sequence.
    Pending(usize),
}

/// Per-request matcher state.
#[derive(Debug, Clone)]
pub struct StopState {
    matcher: Option<AhoCorasick>,
    sequences: Vec<Vec<u8>>,
}

impl StopState {
    pub fn new(stop: &[String]) -> Result<Self, CompletionError> {
        let sequences: Vec<Vec<u8>> = stop
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_bytes().to_vec())
            .collect();
        let matcher = if sequences.is_empty() {
            None
        } else {
            let ac = AhoCorasick::builder()
                .match_kind(MatchKind::LeftmostFirst)
                .build(&sequences)
                .map_err(|e| CompletionError::InvalidConfig(format!("stop sequences: {e}")))?;
            Some(ac)
        };
        Ok(Self { matcher, sequences })
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Scan `text`, where bytes before `emitted` have already been delivered.
    pub fn scan(&self, text: &[u8], emitted: usize) -> StopScan {
        let Some(matcher) = &self.matcher else {
            return StopScan::Pending(0);
        };
        let from = emitted.min(text.len());
        if let Some(m) = matcher.find(&text[from..]) {
            return StopScan::Matched(from + m.start());
        }
        StopScan::Pending(self.partial_len(&text[from..]))
    }

    /// Longest suffix of `text` that is a proper prefix of a stop sequence.
    fn partial_len(&self, text: &[u8]) -> usize {
        let mut longest = 0;
        for seq in &self.sequences {
            let max = (seq.len() - 1).min(text.len());
            for len in (longest + 1..=max).rev() {
                if text.ends_with(&seq[..len]) {
                    longest = len;
                    break;
                }
            }
        }
        longest
    }
}

/// Number of leading bytes that can be emitted as text now.
///
/// An incomplete UTF-8 sequence at the end is held for the next token;
/// invalid bytes in the middle are passed through (and rendered lossily).
pub fn utf8_emit_len(bytes: &[u8]) -> usize {
    let mut offset = 0;
    loop {
        match std::str::from_utf8(&bytes[offset..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                None => return offset + e.valid_up_to(),
                Some(bad) => offset += e.valid_up_to() + bad,
            },
        }
    }
}
