//! Turning `[[tree]]` nodes into states

use anyhow::{bail, Context, Result};
use trialstate::{
    Builder, EngineError, KeyPress, LogValues, PointerPress, Record, Ref, StateId, Stimulus,
    Value,
};

use crate::callbacks::{builtin, BUILTIN_NAMES};
use crate::config::{NodeSpec, SessionConfig, Timing};

/// Author the whole session tree
pub fn build_session(config: &SessionConfig) -> Result<Builder> {
    validate(&config.tree)?;

    let mut builder = Builder::new();
    for (name, value) in &config.variables {
        builder.var(name.clone(), value.clone());
    }
    build_nodes(&mut builder, &config.tree).context("Failed to build state tree")?;

    log::debug!("Session tree has {} states", builder.tree().len());
    Ok(builder)
}

/// Checks that need no builder: known functions and unambiguous loops
fn validate(nodes: &[NodeSpec]) -> Result<()> {
    for node in nodes {
        match node {
            NodeSpec::Func { function, .. } if builtin(function).is_none() => {
                bail!(
                    "Unknown function `{}` (available: {})",
                    function,
                    BUILTIN_NAMES.join(", ")
                );
            }
            NodeSpec::Subroutine { timing, .. } if timing.name.is_none() => {
                bail!("A subroutine needs a name");
            }
            NodeSpec::Loop { times, condition, over, children, .. } => {
                let modes = [times.is_some(), condition.is_some(), over.is_some()];
                if modes.iter().filter(|set| **set).count() > 1 {
                    bail!("A loop takes at most one of `times`, `while` and `over`");
                }
                validate(children)?;
            }
            NodeSpec::Serial { children, .. }
            | NodeSpec::Subroutine { children, .. }
            | NodeSpec::Parallel { children, .. } => validate(children)?,
            NodeSpec::Meanwhile { primary, background, .. } => {
                validate(primary)?;
                validate(background)?;
            }
            NodeSpec::UntilDone { background, distinguished, .. } => {
                validate(background)?;
                validate(distinguished)?;
            }
            NodeSpec::If { children, elif, otherwise, .. } => {
                validate(children)?;
                for branch in elif {
                    validate(&branch.children)?;
                }
                if let Some(otherwise) = otherwise {
                    validate(otherwise)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// A literal, or an expression when the string starts with `=`
fn param(b: &Builder, value: &Value) -> trialstate::Result<Ref> {
    match value {
        Value::Str(s) => match s.strip_prefix('=') {
            Some(source) => b.parse(source),
            None => Ok(Ref::from(value.clone())),
        },
        other => Ok(Ref::from(other.clone())),
    }
}

fn build_nodes(b: &mut Builder, nodes: &[NodeSpec]) -> trialstate::Result<()> {
    for node in nodes {
        build_node(b, node)?;
    }
    Ok(())
}

fn build_node(b: &mut Builder, node: &NodeSpec) -> trialstate::Result<StateId> {
    let id = match node {
        NodeSpec::Wait { .. } => b.wait_until(Value::Null)?,
        NodeSpec::KeyPress { keys, correct, base_time, .. } => {
            let mut press = KeyPress::new();
            if let Some(keys) = keys {
                press = press.keys(param(b, keys)?);
            }
            if let Some(correct) = correct {
                press = press.correct(param(b, correct)?);
            }
            if let Some(base_time) = base_time {
                press = press.base_time(param(b, base_time)?);
            }
            b.key_press(press)?
        }
        NodeSpec::PointerPress { buttons, correct, base_time, .. } => {
            let mut press = PointerPress::new();
            if let Some(buttons) = buttons {
                press = press.buttons(param(b, buttons)?);
            }
            if let Some(correct) = correct {
                press = press.correct(param(b, correct)?);
            }
            if let Some(base_time) = base_time {
                press = press.base_time(param(b, base_time)?);
            }
            b.pointer_press(press)?
        }
        NodeSpec::KeyRecord { .. } => b.key_record()?,
        NodeSpec::Record { track, .. } => {
            let mut record = Record::new();
            for (name, value) in track {
                record = record.track(name.clone(), param(b, value)?);
            }
            b.record(record)?
        }
        NodeSpec::Stimulus { stimulus, params, .. } => {
            let mut request = Stimulus::new(stimulus.clone());
            for (name, value) in params {
                request = request.param(name.clone(), param(b, value)?);
            }
            b.stimulus(request)?
        }
        NodeSpec::Func { function, args, timing } => {
            let callable = builtin(function).ok_or_else(|| EngineError::FunctionFailed {
                state: timing.name.clone().unwrap_or_default(),
                message: format!("unknown function `{}`", function),
            })?;
            let args = args
                .iter()
                .map(|arg| param(b, arg))
                .collect::<trialstate::Result<Vec<_>>>()?;
            b.func(callable, args)?
        }
        NodeSpec::Set { var, value, .. } => {
            let value = param(b, value)?;
            b.set(var.clone(), value)?
        }
        NodeSpec::Log { values, .. } => {
            let mut entry = LogValues::new();
            for (name, value) in values {
                entry = entry.value(name.clone(), param(b, value)?);
            }
            b.log(entry)?
        }
        NodeSpec::Done { target, .. } => {
            let target = b
                .lookup(target)
                .ok_or_else(|| EngineError::UnknownState(target.clone()))?;
            b.done(target)?
        }
        NodeSpec::ResetClock { new_time, .. } => match new_time {
            Some(new_time) => {
                let new_time = param(b, new_time)?;
                b.reset_clock_to(new_time)?
            }
            None => b.reset_clock()?,
        },
        NodeSpec::Serial { children, .. } => b.serial(|b| build_nodes(b, children))?,
        NodeSpec::Subroutine { children, timing } => {
            let name = timing.name.clone().unwrap_or_else(|| "Subroutine".to_string());
            b.subroutine(name, |b| build_nodes(b, children))?
        }
        NodeSpec::Parallel { children, .. } => b.parallel(|b| build_nodes(b, children))?,
        NodeSpec::Meanwhile { primary, background, .. } => {
            b.meanwhile(|b| build_nodes(b, primary), |b| build_nodes(b, background))?
        }
        NodeSpec::UntilDone { background, distinguished, .. } => {
            b.until_done(|b| build_nodes(b, background), |b| build_nodes(b, distinguished))?
        }
        NodeSpec::Loop { times, condition, over, children, timing } => {
            // Name the loop first so its body can refer to it
            let body = |b: &mut Builder, id: StateId| {
                if let Some(name) = &timing.name {
                    b.named(id, name)?;
                }
                build_nodes(b, children)
            };
            match (times, condition, over) {
                (Some(times), _, _) => b.loop_times(*times, body)?,
                (_, Some(condition), _) => b.loop_while(|b, _| b.parse(condition), body)?,
                (_, _, Some(items)) => b.loop_over(items.clone(), body)?,
                _ => b.loop_forever(body)?,
            }
        }
        NodeSpec::If { condition, children, elif, otherwise, .. } => {
            let guard = b.parse(condition)?;
            let id = b.if_(guard, |b| build_nodes(b, children))?;
            for branch in elif {
                let guard = b.parse(&branch.condition)?;
                b.elif(guard, |b| build_nodes(b, &branch.children))?;
            }
            if let Some(otherwise) = otherwise {
                b.else_(|b| build_nodes(b, otherwise))?;
            }
            id
        }
    };
    apply_timing(b, id, node.timing())?;
    Ok(id)
}

fn apply_timing(b: &mut Builder, id: StateId, timing: &Timing) -> trialstate::Result<()> {
    if let Some(name) = &timing.name {
        b.named(id, name)?;
    }
    if let Some(duration) = &timing.duration {
        let duration = param(b, duration)?;
        b.with_duration(id, duration)?;
    }
    if let Some(until) = &timing.until {
        let until = param(b, until)?;
        b.with_until(id, until)?;
    }
    if let Some(save) = timing.save_log {
        b.set_save_log(id, save)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use trialstate::{Clock, ManualClock, MemorySink, ScriptedHost};

    fn run(toml_content: &str) -> (trialstate::Experiment, MemorySink) {
        let config = parse_config(toml_content).unwrap();
        let clock = ManualClock::new();
        let sink = MemorySink::new();
        let mut experiment = build_session(&config)
            .unwrap()
            .build(Clock::manual(&clock))
            .unwrap()
            .with_config(config.engine.clone())
            .with_sink(sink.clone());
        let events = crate::events::timeline(&config.events).unwrap();
        let mut host = ScriptedHost::new(clock, config.session.frame_rate).with_events(events);
        experiment.run(&mut host).unwrap();
        (experiment, sink)
    }

    #[test]
    fn test_key_press_session() {
        let (experiment, _) = run(r#"
            [[tree]]
            type = "wait"
            duration = 1.0

            [[tree]]
            type = "key_press"
            name = "response"
            keys = ["J", "K"]
            correct = "K"
            duration = 2.0

            [[events]]
            kind = "KEY_DOWN"
            key = "K"
            time = 1.5
        "#);

        let response = experiment.lookup("response").unwrap();
        assert_eq!(experiment.attribute(response, "pressed").unwrap(), Value::from("K"));
        assert_eq!(experiment.attribute(response, "correct").unwrap(), Value::Bool(true));
        let rt = experiment.attribute(response, "rt").unwrap().as_f64().unwrap();
        assert!((rt - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_loop_with_expressions_and_functions() {
        let (experiment, sink) = run(r#"
            [variables]
            total = 0

            [[tree]]
            type = "loop"
            name = "trials"
            times = 3

            [[tree.children]]
            type = "func"
            name = "add"
            function = "sum"
            args = ["=$total", "=@trials.i"]

            [[tree.children]]
            type = "set"
            var = "total"
            value = "=@add.result"

            [[tree]]
            type = "log"
            name = "final"
            values = { total = "=$total", label = "plain" }
        "#);

        assert_eq!(experiment.variable("total"), Some(&Value::Int(3)));
        let logged = sink.for_state("final");
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].get("total"), Some(&Value::Int(3)));
        assert_eq!(logged[0].get("label"), Some(&Value::from("plain")));
    }

    #[test]
    fn test_if_elif_else() {
        let (_, sink) = run(r#"
            [variables]
            mode = "b"

            [[tree]]
            type = "if"
            condition = "$mode == 'a'"
            children = [{ type = "log", name = "took_a", values = { x = 1 } }]

            [[tree.elif]]
            condition = "$mode == 'b'"
            children = [{ type = "log", name = "took_b", values = { x = 2 } }]

            [[tree.else]]
            type = "log"
            name = "took_else"
            values = { x = 3 }
        "#);

        assert!(sink.for_state("took_a").is_empty());
        assert_eq!(sink.for_state("took_b").len(), 1);
        assert!(sink.for_state("took_else").is_empty());
    }

    #[test]
    fn test_done_breaks_named_loop() {
        let (experiment, _) = run(r#"
            [[tree]]
            type = "loop"
            name = "forever"

            [[tree.children]]
            type = "wait"
            duration = 0.1

            [[tree.children]]
            type = "done"
            target = "forever"
        "#);

        assert!(experiment.lookup("forever").is_some());
        assert!(experiment.is_finished());
        assert!(experiment.ticks() < 60);
    }

    #[test]
    fn test_jitter_and_reset_clock() {
        let session = r#"
            [engine]
            seed = 3

            [[tree]]
            type = "wait"
            name = "iti"
            duration = "=jitter(0.2, 0.1)"

            [[tree]]
            type = "reset_clock"
            name = "rebase"

            [[tree]]
            type = "log"
            name = "order"
            values = { keys = "=shuffle(['F', 'J'])" }
        "#;
        let (experiment, sink) = run(session);

        let iti = experiment.lookup("iti").unwrap();
        let elapsed = experiment.attribute(iti, "elapsed").unwrap().as_f64().unwrap();
        assert!((0.2..0.3 + 1e-9).contains(&elapsed));

        // Rebased to the frame that noticed the wait was over
        let rebase = experiment.lookup("rebase").unwrap();
        let rebased_at = experiment.attribute(rebase, "end_time").unwrap().as_f64().unwrap();
        let iti_end = experiment.attribute(iti, "end_time").unwrap().as_f64().unwrap();
        assert!(rebased_at >= iti_end);

        let order = sink.for_state("order");
        let Some(Value::List(keys)) = order[0].get("keys") else {
            panic!("expected a shuffled list");
        };
        assert_eq!(keys.len(), 2);

        // Same seed, same draws
        let (again, _) = run(session);
        let again_iti = again.lookup("iti").unwrap();
        assert_eq!(again.attribute(again_iti, "elapsed").unwrap(), Value::Float(elapsed));
    }

    #[test]
    fn test_sample_session() {
        let (experiment, sink) = run(include_str!("../sessions/choice_reaction.toml"));

        assert_eq!(experiment.variable("hits"), Some(&Value::Int(2)));
        let trials = sink.for_state("trial");
        assert_eq!(trials.len(), 4);
        assert_eq!(trials[1].get("correct"), Some(&Value::Bool(false)));
        assert_eq!(trials[2].get("pressed"), Some(&Value::from("")));
        assert_eq!(trials[2].get("rt"), Some(&Value::Null));
        assert_eq!(trials[3].get("cue"), Some(&Value::from("J")));
    }

    #[test]
    fn test_validation_errors() {
        let unknown = parse_config(r#"
            [[tree]]
            type = "func"
            function = "launch_rockets"
        "#)
        .unwrap();
        assert!(build_session(&unknown).is_err());

        let ambiguous = parse_config(r#"
            [[tree]]
            type = "loop"
            times = 2
            over = [1, 2]
        "#)
        .unwrap();
        assert!(build_session(&ambiguous).is_err());

        let dangling = parse_config(r#"
            [[tree]]
            type = "log"
            values = { rt = "=@nowhere.rt" }
        "#)
        .unwrap();
        assert!(build_session(&dangling).is_err());
    }
}
