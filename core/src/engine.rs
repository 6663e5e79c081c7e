use std::sync::Arc;

use anyhow::Result;

use crate::TokenId;

/// Read-only view of the engine's vocabulary. Shared (via `Arc`) between the
/// session and the filter stages, which need to tokenize and detokenize
/// while the engine itself is mutably borrowed by the decode loop.
pub trait Vocab {
    /// Convert text to tokens. `add_start` marks the text as the beginning
    /// of a document; the session sets it only for its first append.
    fn tokenize(&self, text: &str, add_start: bool) -> Vec<TokenId>;

    /// The byte fragment a single token detokenizes to. May be an incomplete
    /// UTF-8 sequence on sub-word vocabularies.
    fn token_bytes(&self, token: TokenId) -> Vec<u8>;

    fn is_eos(&self, token: TokenId) -> bool;
}

/// The black-box inference engine behind a session. The core never looks
/// inside the attention cache; it only moves it around as sized byte blobs.
pub trait Engine {
    fn vocab(&self) -> Arc<dyn Vocab>;

    /// Advance the running attention state by `tokens`. A failure here is
    /// fatal for the current generation loop; tokens already decoded stay
    /// decoded.
    fn decode(&mut self, tokens: &[TokenId]) -> Result<()>;

    /// Scores for the next position, one entry per vocabulary slot.
    fn logits(&self) -> Result<Vec<f32>>;

    /// Current size in bytes of the opaque engine state.
    fn state_size(&self) -> usize;

    /// Export the opaque state into `buf`; returns bytes written.
    fn save_state(&self, buf: &mut [u8]) -> Result<usize>;

    /// Import a previously exported state; returns bytes consumed.
    fn load_state(&mut self, buf: &[u8]) -> Result<usize>;
}
