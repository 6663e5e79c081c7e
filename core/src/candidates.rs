use crate::TokenId;

/// One entry of the next-token distribution: a token id and its raw score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TokenData {
    pub id: TokenId,
    pub logit: f32,
}

/// The engine's candidate list for the current decoding step.
///
/// Filters narrow it with [`Candidates::retain_stable`], which keeps the
/// relative order of surviving entries and clears the `sorted` flag, so
/// downstream stages know the scores are no longer rank-ordered.
#[derive(Clone, Debug, Default)]
pub struct Candidates {
    data: Vec<TokenData>,
    sorted: bool,
}

impl Candidates {
    pub fn from_logits(logits: &[f32]) -> Self {
        Candidates {
            data: logits
                .iter()
                .enumerate()
                .map(|(id, &logit)| TokenData {
                    id: id as TokenId,
                    logit,
                })
                .collect(),
            sorted: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[TokenData] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenData> {
        self.data.iter()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn set_sorted(&mut self, sorted: bool) {
        self.sorted = sorted;
    }

    /// Stable partition: keep entries for which `keep` returns true, in their
    /// original order, and invalidate the sort flag.
    pub fn retain_stable(&mut self, mut keep: impl FnMut(&TokenData) -> bool) {
        self.data.retain(|td| keep(td));
        self.sorted = false;
    }

    pub fn argmax(&self) -> Option<TokenData> {
        self.data
            .iter()
            .copied()
            .reduce(|a, b| if b.logit > a.logit { b } else { a })
    }
}
