//! Simulated choice-reaction session
//!
//! Runs four trials of fixation, cue and a J/K response window against a
//! scripted participant, then prints every log record and a per-trial summary.
//!
//! Usage:
//!   cargo run --example simulated_session

use trialstate::{
    Builder, Clock, InputEvent, KeyPress, LogValues, ManualClock, MemorySink, ScriptedHost,
    Stimulus, Value,
};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let clock = ManualClock::new();
    let mut builder = Builder::new();
    let cues = vec![Value::from("K"), Value::from("J"), Value::from("K"), Value::from("J")];

    builder.loop_over(cues, |b, trials| {
        b.stimulus(Stimulus::new("Label").param("text", "+").duration(0.5).named("fixation"))?;
        b.until_done(
            |b| {
                b.stimulus(Stimulus::new("Label").param("text", trials.attr("current")).named("cue"))?;
                Ok(())
            },
            |b| {
                b.key_press(
                    KeyPress::new()
                        .keys(vec!["J", "K"])
                        .correct(trials.attr("current"))
                        .duration(1.5)
                        .named("response"),
                )?;
                Ok(())
            },
        )?;
        let response = b.lookup("response").ok_or_else(|| {
            trialstate::EngineError::UnknownState("response".to_string())
        })?;
        b.log(
            LogValues::new()
                .value("trial", trials.attr("i"))
                .value("cue", trials.attr("current"))
                .value("pressed", response.attr("pressed"))
                .value("rt", response.attr("rt"))
                .value("correct", response.attr("correct")),
        )?;
        b.wait(0.25)?;
        Ok(())
    })?;

    let sink = MemorySink::new();
    let mut experiment = builder.build(Clock::manual(&clock))?.with_sink(sink.clone());

    // The second answer is wrong and the third trial gets none
    let mut host = ScriptedHost::new(clock.clone(), 60.0).with_events(vec![
        InputEvent::key_down("k", 0.93),
        InputEvent::key_down("K", 3.12),
        InputEvent::key_down("j", 6.52),
    ]);
    let summary = experiment.run(&mut host)?;

    println!("=== LOG RECORDS ===");
    for record in sink.records() {
        println!("[{:>9.4}s] {:<12} #{} {:?}", record.time, record.state, record.activation, record.values);
    }

    println!("\n=== TRIALS ===");
    for record in sink.records().iter().filter(|r| r.kind == "Log") {
        let field = |name: &str| record.get(name).cloned().unwrap_or_default();
        println!(
            "trial {} cue {} pressed {} rt {} correct {}",
            field("trial"),
            field("cue"),
            field("pressed"),
            field("rt"),
            field("correct")
        );
    }

    println!(
        "\nFinished after {} ticks, {:.3}s of experiment time",
        summary.ticks,
        summary.duration().unwrap_or_default()
    );
    Ok(())
}
