use anyhow::{bail, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::candidates::Candidates;
use crate::TokenId;

/// One stage of the sampler chain. Stages narrow the candidate set in
/// `apply`, observe the token the chain eventually picked in `accept`, and
/// return to their initial state on `reset`.
///
/// A stage that has nothing useful to say for the current step (e.g. all of
/// its options are exhausted) should leave the candidates alone rather than
/// empty them; only the final pick treats an empty set as fatal.
pub trait SamplerStage {
    fn name(&self) -> &'static str;
    fn apply(&mut self, cands: &mut Candidates);
    fn accept(&mut self, _token: TokenId) {}
    fn reset(&mut self) {}
}

/// An ordered chain of filter stages followed by the final selection:
/// greedy at temperature <= 0, softmax sampling otherwise.
pub struct SamplerChain {
    stages: Vec<Box<dyn SamplerStage>>,
    temperature: f32,
    rng: StdRng,
}

impl SamplerChain {
    pub fn new(temperature: f32, seed: u64) -> Self {
        SamplerChain {
            stages: Vec::new(),
            temperature,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn push(&mut self, stage: Box<dyn SamplerStage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }

    /// Run every stage over `cands`, pick a token from what survives, and
    /// let each stage observe the pick.
    pub fn sample(&mut self, mut cands: Candidates) -> Result<TokenId> {
        for stage in self.stages.iter_mut() {
            stage.apply(&mut cands);
            log::trace!("{}: {} candidates survive", stage.name(), cands.len());
        }
        let token = self.pick(&cands)?;
        for stage in self.stages.iter_mut() {
            stage.accept(token);
        }
        Ok(token)
    }

    fn pick(&mut self, cands: &Candidates) -> Result<TokenId> {
        if cands.is_empty() {
            bail!("no valid continuation: every candidate token was filtered out");
        }
        if self.temperature <= 0.0 {
            // unwrap is fine, the set is non-empty
            return Ok(cands.argmax().unwrap().id);
        }
        let max = cands
            .iter()
            .map(|td| td.logit)
            .fold(f32::NEG_INFINITY, f32::max);
        let weights: Vec<f32> = cands
            .iter()
            .map(|td| ((td.logit - max) / self.temperature).exp())
            .collect();
        let dist = WeightedIndex::new(&weights)?;
        Ok(cands.as_slice()[dist.sample(&mut self.rng)].id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DropEven;
    impl SamplerStage for DropEven {
        fn name(&self) -> &'static str {
            "drop-even"
        }
        fn apply(&mut self, cands: &mut Candidates) {
            cands.retain_stable(|td| td.id % 2 == 1);
        }
    }

    struct Recorder {
        accepted: std::rc::Rc<std::cell::RefCell<Vec<TokenId>>>,
    }
    impl SamplerStage for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn apply(&mut self, _cands: &mut Candidates) {}
        fn accept(&mut self, token: TokenId) {
            self.accepted.borrow_mut().push(token);
        }
    }

    #[test]
    fn greedy_picks_argmax_of_survivors() {
        let mut chain = SamplerChain::new(0.0, 0);
        chain.push(Box::new(DropEven));
        // token 2 has the best logit but is filtered out
        let cands = Candidates::from_logits(&[0.1, 0.5, 0.9, 0.2]);
        assert_eq!(chain.sample(cands).unwrap(), 1);
    }

    #[test]
    fn empty_candidates_is_fatal() {
        let mut chain = SamplerChain::new(0.0, 0);
        chain.push(Box::new(DropEven));
        let cands = Candidates::from_logits(&[0.1]); // only token 0, which is dropped
        assert!(chain.sample(cands).is_err());
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let pick = |seed| {
            let mut chain = SamplerChain::new(0.8, seed);
            chain
                .sample(Candidates::from_logits(&[1.0, 1.1, 0.9, 1.05]))
                .unwrap()
        };
        assert_eq!(pick(7), pick(7));
    }

    #[test]
    fn all_stages_observe_the_pick() {
        let accepted = std::rc::Rc::new(std::cell::RefCell::new(vec![]));
        let mut chain = SamplerChain::new(0.0, 0);
        chain.push(Box::new(Recorder {
            accepted: accepted.clone(),
        }));
        chain.push(Box::new(DropEven));
        let t = chain
            .sample(Candidates::from_logits(&[0.1, 0.5, 0.9]))
            .unwrap();
        assert_eq!(t, 1);
        assert_eq!(*accepted.borrow(), vec![1]);
    }
}
