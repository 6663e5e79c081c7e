//! Constrained text generation on top of a black-box decode engine.
//!
//! The crate is organized around two layers:
//!
//! * a composable sampler chain ([`SamplerChain`] and the stages in
//!   [`filters`]) that narrows the candidate token set inside the decode
//!   loop, and
//! * a [`Session`] that owns an [`Engine`], drives generation and choice
//!   operations through the chain, accumulates the output text and token
//!   history, and can persist the whole context as one opaque blob.
//!
//! The engine itself (model loading, the transformer forward pass, KV cache
//! internals) lives behind the [`Engine`] and [`Vocab`] traits; the
//! [`scripted`] module provides a deterministic implementation for tests
//! and demos.

pub mod candidates;
pub mod chain;
pub mod engine;
pub mod filters;
pub mod gen;
pub mod logging;
pub mod pattern;
pub mod saveload;
pub mod scripted;
pub mod session;

pub type TokenId = u32;

pub use candidates::{Candidates, TokenData};
pub use chain::{SamplerChain, SamplerStage};
pub use engine::{Engine, Vocab};
pub use filters::{PatternFilter, PrefixSelect, StopGuard, TokenFilter};
pub use gen::{generate_once, FinishReason, GenParams, GenResult, GenerateOptions};
pub use logging::{init_log, setup_log, LogMode};
pub use pattern::{Pattern, PatternMatcher};
pub use saveload::ContextBlob;
pub use session::Session;
