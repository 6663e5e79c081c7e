use regex_automata::meta::Regex;
use serde::{Deserialize, Serialize};

/// Character-class or regex constraint on generated text. The predicate is
/// always evaluated on the *whole* accumulated string, never on a token in
/// isolation: a valid prefix says nothing about its extensions.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    #[default]
    None,
    Numeric,
    Alpha,
    Alphanumeric,
    Uppercase,
    Lowercase,
    Capitalized,
    Regex(String),
}

/// Compiled form of a [`Pattern`]. A regex that fails to compile is kept as
/// "never matches" rather than surfaced as an error, so a bad pattern
/// degrades generation instead of crashing it.
pub struct PatternMatcher {
    pattern: Pattern,
    rx: Option<Regex>,
}

impl PatternMatcher {
    pub fn new(pattern: Pattern) -> Self {
        let rx = match &pattern {
            Pattern::Regex(src) if !src.is_empty() => {
                // Full-string semantics: anchor both ends.
                match Regex::new(&format!("^(?:{})$", src)) {
                    Ok(rx) => Some(rx),
                    Err(err) => {
                        log::warn!("pattern regex {:?} failed to compile: {}", src, err);
                        None
                    }
                }
            }
            _ => None,
        };
        PatternMatcher { pattern, rx }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Would `text` (the full accumulation so far) still be a valid match?
    /// Bytes that do not form valid UTF-8 match nothing but `None`, the same
    /// way a half-typed codepoint is not a digit or a letter.
    pub fn matches(&self, text: &[u8]) -> bool {
        if self.pattern == Pattern::None {
            return true;
        }
        let text = match std::str::from_utf8(text) {
            Ok(t) => t,
            Err(_) => return false,
        };
        if text.is_empty() {
            return false;
        }
        match &self.pattern {
            Pattern::None => true,
            Pattern::Numeric => text.chars().all(|c| c.is_numeric()),
            Pattern::Alpha => text.chars().all(|c| c.is_alphabetic()),
            Pattern::Alphanumeric => text.chars().all(|c| c.is_alphanumeric()),
            Pattern::Uppercase => text.chars().all(|c| c.is_alphabetic() && c.is_uppercase()),
            Pattern::Lowercase => text.chars().all(|c| c.is_alphabetic() && c.is_lowercase()),
            Pattern::Capitalized => {
                let mut chars = text.chars();
                match chars.next() {
                    Some(first) => {
                        first.is_alphabetic()
                            && first.is_uppercase()
                            && chars.all(|c| c.is_alphabetic())
                    }
                    None => false,
                }
            }
            Pattern::Regex(src) => match &self.rx {
                Some(rx) => rx.is_match(text),
                // Empty pattern is a no-op; a broken one never matches.
                None => src.is_empty(),
            },
        }
    }
}
