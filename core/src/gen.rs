use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::candidates::Candidates;
use crate::chain::{SamplerChain, SamplerStage};
use crate::engine::Engine;
use crate::filters::StopGuard;
use crate::pattern::Pattern;
use crate::TokenId;

/// Options for a single [`crate::Session::generate`] call.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GenerateOptions {
    /// Shortfall below this is topped up with one unconstrained call.
    pub min_tokens: usize,
    pub max_tokens: usize,
    /// Greedy at or below zero.
    pub temperature: f32,
    /// Seed for the stochastic pick; fixed default keeps runs reproducible.
    pub seed: u64,
    pub stop_sequences: Vec<String>,
    /// Constrain output to this pattern (see [`Pattern`]).
    pub pattern: Pattern,
    /// Record the produced text under this variable name.
    pub var_name: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions {
            min_tokens: 0,
            max_tokens: 50,
            temperature: 0.7,
            seed: 0,
            stop_sequences: Vec::new(),
            pattern: Pattern::None,
            var_name: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum FinishReason {
    /// EOS token was sampled.
    FoundEos,
    /// A registered stop sequence appeared in the output.
    StopSequence,
    /// The max_tokens budget ran out.
    MaxTokensReached,
}

impl FinishReason {
    pub fn short_name(&self) -> &'static str {
        match self {
            FinishReason::FoundEos => "eos",
            FinishReason::StopSequence => "stop",
            FinishReason::MaxTokensReached => "length",
        }
    }
}

/// What one decode loop produced. Owned by the caller.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GenResult {
    /// Produced text, already truncated before any matched stop sequence.
    pub text: String,
    /// Every token that was emitted, including tokens whose text the stop
    /// truncation removed.
    pub tokens: Vec<TokenId>,
    pub finish_reason: FinishReason,
    /// Which stop sequence fired, when `finish_reason` is `StopSequence`.
    pub stop_sequence: Option<String>,
    pub tokens_generated: usize,
}

impl GenResult {
    pub fn stopped_by_sequence(&self) -> bool {
        self.finish_reason == FinishReason::StopSequence
    }
}

/// Parameters for one raw decode loop. The session layer owns everything
/// above this (stop-sequence commit, auto-completion, min-tokens top-up).
pub struct GenParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub seed: u64,
    pub stop_sequences: Vec<String>,
    /// Optional constraint stage, ordered before the stop guard.
    pub custom: Option<Box<dyn SamplerStage>>,
}

/// Run one constrained decode loop against the engine.
///
/// Chain order: custom stage, stop guard, temperature/greedy pick. The loop
/// halts on EOS (without advancing the engine), on a completed stop sequence
/// (truncating the result text at the match start, final token not decoded),
/// or when the token budget is spent.
pub fn generate_once(engine: &mut dyn Engine, params: GenParams) -> Result<GenResult> {
    let vocab = engine.vocab();

    let mut chain = SamplerChain::new(params.temperature, params.seed);
    if let Some(stage) = params.custom {
        chain.push(stage);
    }
    if !params.stop_sequences.is_empty() {
        chain.push(Box::new(StopGuard::new(
            vocab.clone(),
            params.stop_sequences.clone(),
        )));
    }

    let mut raw: Vec<u8> = Vec::new();
    let mut tokens: Vec<TokenId> = Vec::new();
    let mut finish_reason = FinishReason::MaxTokensReached;
    let mut stop_sequence = None;

    for _ in 0..params.max_tokens {
        let cands = Candidates::from_logits(&engine.logits()?);
        let token = chain.sample(cands)?;

        if vocab.is_eos(token) {
            finish_reason = FinishReason::FoundEos;
            break;
        }

        raw.extend_from_slice(&vocab.token_bytes(token));
        tokens.push(token);

        if let Some((seq, pos)) = find_stop(&raw, &params.stop_sequences) {
            log::debug!("stop sequence {:?} found at byte {}", seq, pos);
            raw.truncate(pos);
            stop_sequence = Some(seq);
            finish_reason = FinishReason::StopSequence;
            break;
        }

        engine.decode(&[token])?;
    }

    Ok(GenResult {
        text: String::from_utf8_lossy(&raw).into_owned(),
        tokens_generated: tokens.len(),
        tokens,
        finish_reason,
        stop_sequence,
    })
}

/// First stop sequence (in list order) present in `raw`, with the byte
/// offset of its first occurrence.
fn find_stop(raw: &[u8], stop_sequences: &[String]) -> Option<(String, usize)> {
    for seq in stop_sequences {
        if let Some(pos) = find_subslice(raw, seq.as_bytes()) {
            return Some((seq.clone(), pos));
        }
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
