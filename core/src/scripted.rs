//! Deterministic in-process engine for tests and demos.
//!
//! The vocabulary is a fixed word list plus every single byte; tokenization
//! is greedy longest-match. The engine produces whatever logits the test
//! scripted for each absolute position, so a decode loop (and a save/load
//! round trip into the middle of one) replays bit-identically.

use std::sync::Arc;

use anyhow::{bail, Result};
use rustc_hash::FxHashMap;

use crate::engine::{Engine, Vocab};
use crate::TokenId;

pub const EOS_TOKEN: TokenId = 0;
pub const BOS_TOKEN: TokenId = 1;

/// Word pieces start here; single-byte pieces follow them.
const WORD_BASE: usize = 2;

pub struct ScriptedVocab {
    words: Vec<String>,
}

impl ScriptedVocab {
    pub fn new(words: &[&str]) -> Arc<ScriptedVocab> {
        let mut uniq: Vec<String> = Vec::new();
        for w in words {
            if !w.is_empty() && !uniq.iter().any(|u| u == w) {
                uniq.push(w.to_string());
            }
        }
        Arc::new(ScriptedVocab { words: uniq })
    }

    pub fn size(&self) -> usize {
        WORD_BASE + self.words.len() + 256
    }

    fn byte_base(&self) -> usize {
        WORD_BASE + self.words.len()
    }

    pub fn byte_token(&self, b: u8) -> TokenId {
        (self.byte_base() + b as usize) as TokenId
    }

    /// Token id of a word piece, if it is in the word list.
    pub fn word_token(&self, word: &str) -> Option<TokenId> {
        self.words
            .iter()
            .position(|w| w == word)
            .map(|i| (WORD_BASE + i) as TokenId)
    }
}

impl Vocab for ScriptedVocab {
    fn tokenize(&self, text: &str, add_start: bool) -> Vec<TokenId> {
        let mut out = Vec::new();
        if add_start {
            out.push(BOS_TOKEN);
        }
        let bytes = text.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() {
            let best = self
                .words
                .iter()
                .enumerate()
                .filter(|(_, w)| bytes[pos..].starts_with(w.as_bytes()))
                .max_by_key(|(_, w)| w.len());
            match best {
                Some((idx, w)) => {
                    out.push((WORD_BASE + idx) as TokenId);
                    pos += w.len();
                }
                None => {
                    out.push(self.byte_token(bytes[pos]));
                    pos += 1;
                }
            }
        }
        out
    }

    fn token_bytes(&self, token: TokenId) -> Vec<u8> {
        let t = token as usize;
        if t < WORD_BASE {
            return Vec::new();
        }
        if t < self.byte_base() {
            return self.words[t - WORD_BASE].as_bytes().to_vec();
        }
        if t < self.size() {
            return vec![(t - self.byte_base()) as u8];
        }
        Vec::new()
    }

    fn is_eos(&self, token: TokenId) -> bool {
        token == EOS_TOKEN
    }
}

/// Engine whose logits are a pure function of how many tokens have been
/// decoded. Positions with no script entry favor EOS.
pub struct ScriptedEngine {
    vocab: Arc<ScriptedVocab>,
    steps: FxHashMap<usize, Vec<(TokenId, f32)>>,
    decoded: Vec<TokenId>,
}

impl ScriptedEngine {
    pub fn new(vocab: Arc<ScriptedVocab>) -> Self {
        ScriptedEngine {
            vocab,
            steps: FxHashMap::default(),
            decoded: Vec::new(),
        }
    }

    /// Script the logits the engine reports once exactly `position` tokens
    /// have been decoded.
    pub fn script_step(&mut self, position: usize, favored: Vec<(TokenId, f32)>) {
        self.steps.insert(position, favored);
    }

    /// Script a run of single-token steps starting at `position`, each
    /// favoring one word piece. Panics on words missing from the vocab;
    /// scripts are test fixtures, not inputs.
    pub fn script_words(&mut self, position: usize, words: &[&str]) {
        for (i, w) in words.iter().enumerate() {
            let tok = self
                .vocab
                .word_token(w)
                .unwrap_or_else(|| panic!("word {:?} not in scripted vocab", w));
            self.script_step(position + i, vec![(tok, 10.0)]);
        }
    }

    pub fn num_decoded(&self) -> usize {
        self.decoded.len()
    }

    pub fn decoded_tokens(&self) -> &[TokenId] {
        &self.decoded
    }
}

impl Engine for ScriptedEngine {
    fn vocab(&self) -> Arc<dyn Vocab> {
        self.vocab.clone()
    }

    fn decode(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.decoded.extend_from_slice(tokens);
        Ok(())
    }

    fn logits(&self) -> Result<Vec<f32>> {
        let mut logits = vec![-100.0; self.vocab.size()];
        match self.steps.get(&self.decoded.len()) {
            Some(favored) => {
                for &(tok, logit) in favored {
                    logits[tok as usize] = logit;
                }
            }
            None => logits[EOS_TOKEN as usize] = 10.0,
        }
        Ok(logits)
    }

    fn state_size(&self) -> usize {
        8 + 4 * self.decoded.len()
    }

    fn save_state(&self, buf: &mut [u8]) -> Result<usize> {
        let need = self.state_size();
        if buf.len() < need {
            bail!("state buffer too small: {} < {}", buf.len(), need);
        }
        buf[..8].copy_from_slice(&(self.decoded.len() as u64).to_le_bytes());
        for (i, tok) in self.decoded.iter().enumerate() {
            buf[8 + 4 * i..8 + 4 * (i + 1)].copy_from_slice(&tok.to_le_bytes());
        }
        Ok(need)
    }

    fn load_state(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() < 8 {
            bail!("scripted state truncated: {} bytes", buf.len());
        }
        let n = u64::from_le_bytes(buf[..8].try_into().unwrap()) as usize;
        let need = 8 + 4 * n;
        if buf.len() < need {
            bail!("scripted state truncated: need {}, have {}", need, buf.len());
        }
        self.decoded = buf[8..need]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Ok(need)
    }
}
