use std::cell::Cell;
use std::sync::Arc;

use anyhow::Result;
use guiderail::scripted::{ScriptedEngine, ScriptedVocab, EOS_TOKEN};
use guiderail::{Engine, GenerateOptions, Pattern, Session, TokenId, Vocab};

fn opts() -> GenerateOptions {
    GenerateOptions {
        temperature: 0.0,
        ..Default::default()
    }
}

#[test]
fn select_exact_match_beats_longer_option() {
    let vocab = ScriptedVocab::new(&["cat", "alog", "dog"]);
    let mut engine = ScriptedEngine::new(vocab.clone());
    // the script would happily continue "cat" into "catalog"
    engine.script_words(0, &["cat", "alog"]);

    let mut session = Session::new(engine);
    let picked = session
        .select(
            &["cat".to_string(), "catalog".to_string(), "dog".to_string()],
            Some("choice"),
        )
        .unwrap();

    assert_eq!(picked, "cat");
    assert_eq!(session.output(), "cat");
    assert_eq!(session.variable("choice"), Some("cat"));
    // the winning token was never decoded; the engine is still at step 0
    assert_eq!(session.engine().num_decoded(), 0);
}

#[test]
fn select_follows_engine_preference() {
    let vocab = ScriptedVocab::new(&["cat", "alog", "dog"]);
    let dog = vocab.word_token("dog").unwrap();
    let mut engine = ScriptedEngine::new(vocab);
    engine.script_step(7, vec![(dog, 5.0)]);

    let mut session = Session::new(engine);
    session.append("Pick: ").unwrap(); // BOS + 6 bytes -> position 7
    let picked = session
        .select(&["cat".to_string(), "dog".to_string()], None)
        .unwrap();

    assert_eq!(picked, "dog");
    assert_eq!(session.output(), "Pick: dog");
}

#[test]
fn generate_excludes_stop_from_result_but_commits_it_once() {
    let vocab = ScriptedVocab::new(&["Hello", "</think>"]);
    let stop = vocab.word_token("</think>").unwrap();
    let mut engine = ScriptedEngine::new(vocab);
    engine.script_words(3, &["Hello"]); // after BOS + "go"
    engine.script_step(4, vec![(stop, 10.0)]);

    let mut session = Session::new(engine);
    session.append("go").unwrap();
    let text = session
        .generate(&GenerateOptions {
            max_tokens: 10,
            stop_sequences: vec!["</think>".to_string()],
            ..opts()
        })
        .unwrap();

    assert_eq!(text, "Hello");
    assert_eq!(session.output(), "goHello</think>");
    assert_eq!(session.output().matches("</think>").count(), 1);
}

#[test]
fn generate_stops_on_eos() {
    let vocab = ScriptedVocab::new(&["Hello"]);
    let mut engine = ScriptedEngine::new(vocab);
    engine.script_words(0, &["Hello"]);
    // position 1 is unscripted, so EOS dominates

    let mut session = Session::new(engine);
    let text = session
        .generate(&GenerateOptions {
            max_tokens: 10,
            ..opts()
        })
        .unwrap();

    assert_eq!(text, "Hello");
    assert_eq!(session.output(), "Hello");
}

#[test]
fn budget_exhaustion_completes_partial_stop_marker() {
    let vocab = ScriptedVocab::new(&["Hi", "</thi", "nk>", "</think>"]);
    let thi = vocab.word_token("</thi").unwrap();
    let mut engine = ScriptedEngine::new(vocab);
    engine.script_words(2, &["Hi"]); // after BOS + "x"
    engine.script_step(3, vec![(thi, 10.0)]);

    let mut session = Session::new(engine);
    session.append("x").unwrap();
    let text = session
        .generate(&GenerateOptions {
            max_tokens: 2,
            stop_sequences: vec!["</think>".to_string()],
            ..opts()
        })
        .unwrap();

    // the budget cut the marker in half; the session typed the rest itself
    assert_eq!(text, "Hi</thi");
    assert_eq!(session.output(), "xHi</think>");
    assert_eq!(session.output().matches("</think>").count(), 1);
}

#[test]
fn pattern_constrains_generation_until_stop() {
    let vocab = ScriptedVocab::new(&["John", "5", "</think>"]);
    let john = vocab.word_token("John").unwrap();
    let five = vocab.word_token("5").unwrap();
    let stop = vocab.word_token("</think>").unwrap();
    let mut engine = ScriptedEngine::new(vocab);
    // "5" carries the best logit both times; the pattern must veto it
    engine.script_step(7, vec![(five, 10.0), (john, 5.0)]);
    engine.script_step(8, vec![(five, 10.0), (stop, 5.0)]);

    let mut session = Session::new(engine);
    session.append("Name: ").unwrap();
    let text = session
        .generate(&GenerateOptions {
            max_tokens: 5,
            stop_sequences: vec!["</think>".to_string()],
            pattern: Pattern::Capitalized,
            var_name: Some("name".to_string()),
            ..opts()
        })
        .unwrap();

    assert_eq!(text, "John");
    assert_eq!(session.variable("name"), Some("John"));
    assert_eq!(session.output(), "Name: John</think>");
}

#[test]
fn clear_drops_text_tokens_and_variables() {
    let vocab = ScriptedVocab::new(&["dog"]);
    let mut session = Session::new(ScriptedEngine::new(vocab));
    session.append("hello").unwrap();
    session
        .select(&["dog".to_string()], Some("animal"))
        .unwrap();
    assert!(!session.output().is_empty());

    session.clear();
    assert_eq!(session.output(), "");
    assert!(session.context_tokens().is_empty());
    assert!(session.variables().is_empty());
}

/// Reports EOS on its first logits call only; afterwards it favors "a".
/// Lets the min-tokens top-up produce something observable.
struct FlakyEosEngine {
    vocab: Arc<ScriptedVocab>,
    calls: Cell<usize>,
    decoded: Vec<TokenId>,
}

impl Engine for FlakyEosEngine {
    fn vocab(&self) -> Arc<dyn Vocab> {
        self.vocab.clone()
    }

    fn decode(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.decoded.extend_from_slice(tokens);
        Ok(())
    }

    fn logits(&self) -> Result<Vec<f32>> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        let mut logits = vec![-100.0; self.vocab.size()];
        if call == 0 {
            logits[EOS_TOKEN as usize] = 10.0;
        } else {
            logits[self.vocab.word_token("a").unwrap() as usize] = 10.0;
        }
        Ok(logits)
    }

    fn state_size(&self) -> usize {
        0
    }

    fn save_state(&self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn load_state(&mut self, _buf: &[u8]) -> Result<usize> {
        Ok(0)
    }
}

#[test]
fn min_tokens_top_up_runs_without_stop_sequences() {
    let vocab = ScriptedVocab::new(&["a", "</think>", "b"]);
    let stop = vocab.word_token("</think>").unwrap();
    let b = vocab.word_token("b").unwrap();
    let mut engine = ScriptedEngine::new(vocab);
    engine.script_words(0, &["a"]);
    engine.script_step(1, vec![(stop, 10.0)]);
    engine.script_step(2, vec![(b, 10.0)]);

    let mut session = Session::new(engine);
    let text = session
        .generate(&GenerateOptions {
            min_tokens: 3,
            max_tokens: 1,
            stop_sequences: vec!["</think>".to_string()],
            ..opts()
        })
        .unwrap();

    // the top-up drops the stop list: the marker comes out as plain text
    // and generation keeps going past it
    assert_eq!(text, "a</think>b");
    assert_eq!(session.output(), "a</think>b");
}

#[test]
fn min_tokens_tops_up_after_early_eos() {
    let vocab = ScriptedVocab::new(&["a"]);
    let engine = FlakyEosEngine {
        vocab,
        calls: Cell::new(0),
        decoded: Vec::new(),
    };

    let mut session = Session::new(engine);
    let text = session
        .generate(&GenerateOptions {
            min_tokens: 3,
            max_tokens: 5,
            ..opts()
        })
        .unwrap();

    assert_eq!(text, "aaa");
    assert_eq!(session.output(), "aaa");
}
