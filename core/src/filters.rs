use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::candidates::Candidates;
use crate::chain::SamplerStage;
use crate::engine::Vocab;
use crate::pattern::{Pattern, PatternMatcher};
use crate::TokenId;

/// Fixed allow-set or deny-set over token ids. No per-episode state.
pub struct TokenFilter {
    set: FxHashSet<TokenId>,
    allow: bool,
}

impl TokenFilter {
    pub fn allowing(tokens: impl IntoIterator<Item = TokenId>) -> Self {
        TokenFilter {
            set: tokens.into_iter().collect(),
            allow: true,
        }
    }

    pub fn denying(tokens: impl IntoIterator<Item = TokenId>) -> Self {
        TokenFilter {
            set: tokens.into_iter().collect(),
            allow: false,
        }
    }
}

impl SamplerStage for TokenFilter {
    fn name(&self) -> &'static str {
        "token-filter"
    }

    fn apply(&mut self, cands: &mut Candidates) {
        cands.retain_stable(|td| self.set.contains(&td.id) == self.allow);
    }
}

/// Narrows candidates to tokens that continue at least one surviving option
/// string, matched token-by-token. The filter only prunes; declaring a
/// winner (the exact-length match) is the driving loop's job.
pub struct PrefixSelect {
    option_tokens: Vec<Vec<TokenId>>,
    alive: Vec<bool>,
    position: usize,
}

impl PrefixSelect {
    pub fn new(vocab: &dyn Vocab, options: &[String]) -> Self {
        Self::from_tokens(
            options
                .iter()
                .map(|opt| vocab.tokenize(opt, false))
                .collect(),
        )
    }

    pub fn from_tokens(option_tokens: Vec<Vec<TokenId>>) -> Self {
        let alive = vec![true; option_tokens.len()];
        PrefixSelect {
            option_tokens,
            alive,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn num_alive(&self) -> usize {
        self.alive.iter().filter(|a| **a).count()
    }
}

impl SamplerStage for PrefixSelect {
    fn name(&self) -> &'static str {
        "prefix-select"
    }

    fn apply(&mut self, cands: &mut Candidates) {
        let mut expected = FxHashSet::default();
        for (tokens, alive) in self.option_tokens.iter().zip(self.alive.iter()) {
            if *alive && self.position < tokens.len() {
                expected.insert(tokens[self.position]);
            }
        }
        // Every live option already ran out of tokens; defer to later stages
        // instead of emptying the set.
        if expected.is_empty() {
            log::debug!("prefix-select: all live options exhausted, not filtering");
            return;
        }
        cands.retain_stable(|td| expected.contains(&td.id));
    }

    fn accept(&mut self, token: TokenId) {
        for (tokens, alive) in self.option_tokens.iter().zip(self.alive.iter_mut()) {
            if !*alive {
                continue;
            }
            if self.position >= tokens.len() || tokens[self.position] != token {
                *alive = false;
            }
        }
        self.position += 1;
    }

    fn reset(&mut self) {
        self.alive.iter_mut().for_each(|a| *a = true);
        self.position = 0;
    }
}

/// Drops candidates whose detokenized text would break the pattern when
/// appended to the text accumulated so far. Stop tokens always pass so a
/// constrained span can still be terminated.
pub struct PatternFilter {
    vocab: Arc<dyn Vocab>,
    matcher: PatternMatcher,
    stop_tokens: FxHashSet<TokenId>,
    accumulated: Vec<u8>,
}

impl PatternFilter {
    pub fn new(vocab: Arc<dyn Vocab>, pattern: Pattern, stop_sequences: &[String]) -> Self {
        let mut stop_tokens = FxHashSet::default();
        for seq in stop_sequences {
            stop_tokens.extend(vocab.tokenize(seq, false));
        }
        PatternFilter {
            vocab,
            matcher: PatternMatcher::new(pattern),
            stop_tokens,
            accumulated: Vec::new(),
        }
    }
}

impl SamplerStage for PatternFilter {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn apply(&mut self, cands: &mut Candidates) {
        let vocab = &self.vocab;
        let matcher = &self.matcher;
        let stop_tokens = &self.stop_tokens;
        let accumulated = &mut self.accumulated;
        let base_len = accumulated.len();
        cands.retain_stable(|td| {
            if stop_tokens.contains(&td.id) {
                return true;
            }
            let piece = vocab.token_bytes(td.id);
            if piece.is_empty() {
                return false;
            }
            accumulated.extend_from_slice(&piece);
            let ok = matcher.matches(accumulated);
            accumulated.truncate(base_len);
            ok
        });
    }

    fn accept(&mut self, token: TokenId) {
        self.accumulated.extend(self.vocab.token_bytes(token));
    }

    fn reset(&mut self) {
        self.accumulated.clear();
    }
}

/// Once the output tail is a partial stop marker, only let through tokens
/// that keep typing that marker, so a token budget can never strand a
/// half-open marker like `</thi` in the permanent context.
pub struct StopGuard {
    vocab: Arc<dyn Vocab>,
    stop_sequences: Vec<String>,
    accumulated: Vec<u8>,
}

impl StopGuard {
    pub fn new(vocab: Arc<dyn Vocab>, stop_sequences: Vec<String>) -> Self {
        StopGuard {
            vocab,
            stop_sequences,
            accumulated: Vec::new(),
        }
    }

    /// The suffix still needed to finish a stop string whose prefix the
    /// accumulated text currently ends with. Stop strings are scanned in
    /// list order, partial lengths from longest down to 2.
    fn pending_suffix(&self) -> Option<&str> {
        for seq in self.stop_sequences.iter() {
            let bytes = seq.as_bytes();
            for partial_len in (2..bytes.len()).rev() {
                if !seq.is_char_boundary(partial_len) {
                    continue;
                }
                if self.accumulated.ends_with(&bytes[..partial_len]) {
                    return Some(&seq[partial_len..]);
                }
            }
        }
        None
    }
}

impl SamplerStage for StopGuard {
    fn name(&self) -> &'static str {
        "stop-guard"
    }

    fn apply(&mut self, cands: &mut Candidates) {
        let remaining = match self.pending_suffix() {
            Some(r) => r,
            None => return,
        };

        // Any token that starts some prefix of the remaining suffix keeps
        // the marker on track.
        let mut allowed = FxHashSet::default();
        for (end, _) in remaining
            .char_indices()
            .skip(1)
            .chain([(remaining.len(), '\0')])
        {
            if let Some(&tok) = self.vocab.tokenize(&remaining[..end], false).first() {
                allowed.insert(tok);
            }
        }

        // Declining beats deadlocking: if nothing in the candidate set can
        // continue the marker, leave the set alone.
        if allowed.is_empty() || !cands.iter().any(|td| allowed.contains(&td.id)) {
            log::debug!(
                "stop-guard: no candidate continues {:?}, not filtering",
                remaining
            );
            return;
        }
        cands.retain_stable(|td| allowed.contains(&td.id));
    }

    fn accept(&mut self, token: TokenId) {
        self.accumulated.extend(self.vocab.token_bytes(token));
    }

    fn reset(&mut self) {
        self.accumulated.clear();
    }
}
