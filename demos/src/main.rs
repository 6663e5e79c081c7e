//! Small end-to-end walkthroughs of the session API, driven by the scripted
//! engine so they run anywhere without model weights.

use anyhow::Result;
use clap::{Parser, Subcommand};
use guiderail::scripted::{ScriptedEngine, ScriptedVocab};
use guiderail::{setup_log, GenerateOptions, Pattern, Session};

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    demo: Demo,
}

#[derive(Subcommand)]
enum Demo {
    /// Constrained choice between fixed options
    Select,
    /// Pattern-constrained generation with a stop marker
    Pattern,
    /// Stop-marker handling: truncation, commit, auto-completion
    Thinking,
    /// Save a context mid-generation and replay it in a fresh session
    SaveLoad,
    /// Snapshot a shared prompt prefix for reuse across sessions
    AutoCache,
}

fn main() -> Result<()> {
    setup_log();
    match Cli::parse().demo {
        Demo::Select => demo_select(),
        Demo::Pattern => demo_pattern(),
        Demo::Thinking => demo_thinking(),
        Demo::SaveLoad => demo_save_load(),
        Demo::AutoCache => demo_auto_cache(),
    }
}

fn demo_select() -> Result<()> {
    let vocab = ScriptedVocab::new(&["red", "green", "blue"]);
    let green = vocab.word_token("green").unwrap();
    let mut engine = ScriptedEngine::new(vocab);
    engine.script_step(8, vec![(green, 5.0)]); // BOS + "Color: " = position 8

    let mut session = Session::new(engine);
    session.append("Color: ")?;
    let picked = session.select(
        &["red".to_string(), "green".to_string(), "blue".to_string()],
        Some("color"),
    )?;
    println!("picked: {}", picked);
    println!("output: {}", session.output());
    println!("$color = {:?}", session.variable("color"));
    Ok(())
}

fn demo_pattern() -> Result<()> {
    let vocab = ScriptedVocab::new(&["Alice", "42", "</ans>"]);
    let alice = vocab.word_token("Alice").unwrap();
    let num = vocab.word_token("42").unwrap();
    let stop = vocab.word_token("</ans>").unwrap();
    let mut engine = ScriptedEngine::new(vocab);
    // the raw logits prefer "42" but the pattern only admits letters
    engine.script_step(7, vec![(num, 10.0), (alice, 5.0)]);
    engine.script_step(8, vec![(num, 10.0), (stop, 5.0)]);

    let mut session = Session::new(engine);
    session.append("Name: ")?;
    let name = session.generate(&GenerateOptions {
        max_tokens: 5,
        temperature: 0.0,
        stop_sequences: vec!["</ans>".to_string()],
        pattern: Pattern::Capitalized,
        var_name: Some("name".to_string()),
        ..Default::default()
    })?;
    println!("generated: {}", name);
    println!("output: {}", session.output());
    Ok(())
}

fn demo_thinking() -> Result<()> {
    let vocab = ScriptedVocab::new(&["Let me think.", "</thi", "nk>", "</think>"]);
    let thought = vocab.word_token("Let me think.").unwrap();
    let partial = vocab.word_token("</thi").unwrap();
    let mut engine = ScriptedEngine::new(vocab);
    engine.script_step(2, vec![(thought, 10.0)]);
    engine.script_step(3, vec![(partial, 10.0)]);

    let mut session = Session::new(engine);
    session.append("Q")?;
    // a 2-token budget cuts the closing marker in half; the session
    // completes it so the context never holds a broken marker
    let text = session.generate(&GenerateOptions {
        max_tokens: 2,
        temperature: 0.0,
        stop_sequences: vec!["</think>".to_string()],
        ..Default::default()
    })?;
    println!("generated: {:?}", text);
    println!("output:    {:?}", session.output());
    Ok(())
}

fn demo_save_load() -> Result<()> {
    let make_engine = || {
        let vocab = ScriptedVocab::new(&["once", " upon", " a", " time"]);
        let mut engine = ScriptedEngine::new(vocab);
        engine.script_words(3, &["once", " upon", " a", " time"]); // BOS + "> "
        engine
    };
    let step = GenerateOptions {
        max_tokens: 1,
        temperature: 0.0,
        ..Default::default()
    };

    let mut session = Session::new(make_engine());
    session.append("> ")?;
    session.generate(&step)?;
    session.generate(&step)?;
    let blob = session.save_context_to_memory()?;
    println!("saved {} bytes after: {:?}", blob.len(), session.output());

    session.generate(&step)?;
    session.generate(&step)?;
    println!("original finished:    {:?}", session.output());

    let mut restored = Session::new(make_engine());
    restored.load_context_from_memory(&blob)?;
    restored.generate(&step)?;
    restored.generate(&step)?;
    println!("restored finished:    {:?}", restored.output());
    Ok(())
}

fn demo_auto_cache() -> Result<()> {
    let make_engine = || ScriptedEngine::new(ScriptedVocab::new(&["yes", "no"]));

    let mut first = Session::new(make_engine());
    first.enable_auto_cache(true);
    first.append("You are a helpful assistant.\n")?;
    let cached = first
        .cached_prompt()
        .expect("auto-cache snapshots the first append")
        .to_vec();
    println!("cached prompt blob: {} bytes", cached.len());

    let mut second = Session::new(make_engine());
    second.load_context_from_memory(&cached)?;
    println!("warm session starts from: {:?}", second.output());
    second.append("User: continue?\n")?;
    println!("warm session now at:      {:?}", second.output());
    Ok(())
}
