use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use rustc_hash::FxHashMap;

use crate::candidates::Candidates;
use crate::chain::{SamplerChain, SamplerStage};
use crate::engine::{Engine, Vocab};
use crate::filters::{PatternFilter, PrefixSelect};
use crate::gen::{generate_once, FinishReason, GenParams, GenerateOptions};
use crate::pattern::Pattern;
use crate::saveload::ContextBlob;
use crate::TokenId;

/// A single generation session: one exclusively-owned engine plus the
/// cumulative token history, display text and extracted variables.
///
/// Sessions are not thread-safe and never share state; callers wanting
/// concurrency run fully independent sessions.
pub struct Session<E: Engine> {
    engine: E,
    vocab: Arc<dyn Vocab>,
    tokens: Vec<TokenId>,
    text: String,
    variables: FxHashMap<String, String>,
    auto_cache: bool,
    cached_prompt: Option<Vec<u8>>,
}

impl<E: Engine> Session<E> {
    pub fn new(engine: E) -> Self {
        let vocab = engine.vocab();
        Session {
            engine,
            vocab,
            tokens: Vec::new(),
            text: String::new(),
            variables: FxHashMap::default(),
            auto_cache: false,
            cached_prompt: None,
        }
    }

    /// Append literal text: tokenize and decode it into the context right
    /// away. The session's first append carries the document-start marker.
    pub fn append(&mut self, text: &str) -> Result<()> {
        self.feed(text)?;
        if self.auto_cache && self.cached_prompt.is_none() && !self.tokens.is_empty() {
            log::info!("auto-cache: snapshotting context after first append");
            self.cached_prompt = Some(self.save_context_to_memory()?);
        }
        Ok(())
    }

    fn feed(&mut self, text: &str) -> Result<()> {
        let toks = self.vocab.tokenize(text, self.tokens.is_empty());
        self.engine.decode(&toks)?;
        self.tokens.extend_from_slice(&toks);
        self.text.push_str(text);
        Ok(())
    }

    /// Generate free-form (optionally pattern-constrained) text.
    pub fn generate(&mut self, options: &GenerateOptions) -> Result<String> {
        let custom: Option<Box<dyn SamplerStage>> = if options.pattern != Pattern::None {
            Some(Box::new(PatternFilter::new(
                self.vocab.clone(),
                options.pattern.clone(),
                &options.stop_sequences,
            )))
        } else {
            None
        };

        let mut result = generate_once(
            &mut self.engine,
            GenParams {
                max_tokens: options.max_tokens,
                temperature: options.temperature,
                seed: options.seed,
                stop_sequences: options.stop_sequences.clone(),
                custom,
            },
        )?;

        // Too short and not terminated by an explicit stop: one extra
        // unconstrained call for the shortfall, stop sequences cleared.
        if result.tokens_generated < options.min_tokens && !result.stopped_by_sequence() {
            let shortfall = options.min_tokens - result.tokens_generated;
            log::debug!("min_tokens shortfall of {}, topping up", shortfall);
            let extra = generate_once(
                &mut self.engine,
                GenParams {
                    max_tokens: shortfall,
                    temperature: options.temperature,
                    seed: options.seed.wrapping_add(1),
                    stop_sequences: Vec::new(),
                    custom: None,
                },
            )?;
            result.text.push_str(&extra.text);
            result.tokens.extend_from_slice(&extra.tokens);
            result.tokens_generated += extra.tokens_generated;
            result.finish_reason = extra.finish_reason;
        }

        self.tokens.extend_from_slice(&result.tokens);
        self.text.push_str(&result.text);

        match result.finish_reason {
            // The matched stop sequence is excluded from the returned text
            // but committed to the permanent context, exactly once.
            FinishReason::StopSequence => {
                let seq = result
                    .stop_sequence
                    .clone()
                    .unwrap_or_default();
                self.feed(&seq)?;
            }
            // Budget ran out: if the tail is a half-typed stop marker,
            // force-complete it so the context never keeps a broken marker.
            FinishReason::MaxTokensReached if !options.stop_sequences.is_empty() => {
                self.complete_partial_stop(&result.text, &options.stop_sequences)?;
            }
            _ => {}
        }

        if let Some(var) = &options.var_name {
            self.variables.insert(var.clone(), result.text.clone());
        }

        Ok(result.text)
    }

    /// If `generated` ends with a proper prefix of a stop sequence, decode
    /// the missing suffix straight into the context (deterministic, never
    /// sampled). Longest prefix wins; stop sequences are tried in order.
    fn complete_partial_stop(&mut self, generated: &str, stop_sequences: &[String]) -> Result<()> {
        for seq in stop_sequences {
            for len in (1..seq.len()).rev() {
                if !seq.is_char_boundary(len) {
                    continue;
                }
                if generated.ends_with(&seq[..len]) {
                    let remainder = &seq[len..];
                    log::info!(
                        "completing partial stop marker {:?} with {:?}",
                        &seq[..len],
                        remainder
                    );
                    self.feed(remainder)?;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Constrained choice: emit exactly one of `options` and return it.
    /// The first option whose full token sequence has been emitted wins, so
    /// "cat" beats "catalog" at length 1.
    pub fn select(&mut self, options: &[String], var_name: Option<&str>) -> Result<String> {
        let option_tokens: Vec<Vec<TokenId>> = options
            .iter()
            .map(|opt| self.vocab.tokenize(opt, false))
            .collect();
        let max_len = option_tokens.iter().map(|t| t.len()).max().unwrap_or(0);

        let mut chain = SamplerChain::new(0.0, 0);
        chain.push(Box::new(PrefixSelect::from_tokens(option_tokens.clone())));

        let mut generated: Vec<TokenId> = Vec::new();
        let mut selected: Option<usize> = None;

        for _ in 0..max_len {
            let cands = Candidates::from_logits(&self.engine.logits()?);
            let token = chain.sample(cands)?;

            if self.vocab.is_eos(token) {
                break;
            }
            generated.push(token);

            if let Some(idx) = option_tokens.iter().position(|t| *t == generated) {
                selected = Some(idx);
                break;
            }

            self.engine.decode(&[token])?;
        }

        self.tokens.extend_from_slice(&generated);
        let selected = selected.map(|i| options[i].clone()).unwrap_or_default();
        self.text.push_str(&selected);
        if let Some(var) = var_name {
            self.variables.insert(var.to_string(), selected.clone());
        }
        Ok(selected)
    }

    /// The full accumulated display text, stop markers included.
    pub fn output(&self) -> &str {
        &self.text
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(|s| s.as_str())
    }

    pub fn variables(&self) -> &FxHashMap<String, String> {
        &self.variables
    }

    /// Drop the accumulated text, token history and variables. Never called
    /// implicitly.
    pub fn clear(&mut self) {
        self.text.clear();
        self.tokens.clear();
        self.variables.clear();
    }

    pub fn context_tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn save_context_to_memory(&self) -> Result<Vec<u8>> {
        let mut state = vec![0u8; self.engine.state_size()];
        let written = self.engine.save_state(&mut state)?;
        state.truncate(written);
        Ok(ContextBlob {
            tokens: self.tokens.clone(),
            text: self.text.clone(),
            state,
        }
        .encode())
    }

    /// Restore a context saved with [`Session::save_context_to_memory`].
    /// A malformed buffer fails without touching the current session state.
    pub fn load_context_from_memory(&mut self, data: &[u8]) -> Result<()> {
        let blob = ContextBlob::decode(data)?;
        self.engine.load_state(&blob.state)?;
        self.tokens = blob.tokens;
        self.text = blob.text;
        Ok(())
    }

    pub fn save_context(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.save_context_to_memory()?)?;
        Ok(())
    }

    pub fn load_context(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let data = std::fs::read(path)?;
        self.load_context_from_memory(&data)
    }

    /// When enabled, the first append after enabling snapshots the context
    /// blob for reuse as a shared prompt prefix by other sessions.
    pub fn enable_auto_cache(&mut self, enable: bool) {
        self.auto_cache = enable;
    }

    pub fn cached_prompt(&self) -> Option<&[u8]> {
        self.cached_prompt.as_deref()
    }

    pub fn has_cached_prompt(&self) -> bool {
        self.cached_prompt.is_some()
    }
}
