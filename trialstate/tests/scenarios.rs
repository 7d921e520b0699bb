// End-to-end timing scenarios driven by a manual clock
use std::cell::RefCell;
use std::rc::Rc;
use trialstate::{
    Builder, Clock, EngineConfig, EngineError, EventKind, Experiment, InputEvent, KeyPress,
    LogValues, ManualClock, MemorySink, Phase, PointerPress, Presenter, Record, Ref,
    ScriptedHost, StateId, Stimulus, StimulusRequest, TickStatus, Value,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-9
}

fn start(experiment: &Experiment, id: StateId) -> f64 {
    experiment.tree().start_time(id).unwrap()
}

fn end(experiment: &Experiment, id: StateId) -> f64 {
    experiment.tree().end_time(id).unwrap()
}

/// Build with a manual clock and a memory sink
fn build(builder: Builder) -> (Experiment, ManualClock, MemorySink) {
    init_logging();
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let experiment = builder
        .build(Clock::manual(&clock))
        .unwrap()
        .with_sink(sink.clone());
    (experiment, clock, sink)
}

/// Tick at each of `times`, returning the last status
fn tick_at(experiment: &mut Experiment, clock: &ManualClock, times: &[f64]) -> TickStatus {
    let mut status = TickStatus::Running;
    for &time in times {
        clock.set(time);
        status = experiment.tick().unwrap();
    }
    status
}

#[test]
fn capture_times_out_with_no_response_defaults() {
    let mut builder = Builder::new();
    let resp = builder
        .key_press(KeyPress::new().keys(vec!["J", "K"]).duration(2.0).named("resp"))
        .unwrap();
    let (mut experiment, clock, sink) = build(builder);

    assert_eq!(tick_at(&mut experiment, &clock, &[0.0, 1.0]), TickStatus::Running);
    assert_eq!(experiment.subscriber_count(EventKind::KeyDown), 1);
    assert_eq!(tick_at(&mut experiment, &clock, &[2.05]), TickStatus::Finished);

    assert_eq!(experiment.attribute(resp, "pressed").unwrap(), Value::from(""));
    assert_eq!(experiment.attribute(resp, "rt").unwrap(), Value::Null);
    assert_eq!(experiment.attribute(resp, "press_time").unwrap(), Value::Null);
    assert_eq!(experiment.attribute(resp, "correct").unwrap(), Value::Bool(false));
    assert!(approx(end(&experiment, resp) - start(&experiment, resp), 2.0));
    assert_eq!(experiment.subscriber_count(EventKind::KeyDown), 0);

    let records = sink.for_state("resp");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, "KeyPress");
    assert_eq!(records[0].get("end_time"), Some(&Value::Float(2.0)));
}

#[test]
fn serial_children_run_in_order_without_drift() {
    let mut builder = Builder::new();
    let ids: Vec<StateId> = ["a", "b", "c"]
        .iter()
        .map(|name| {
            let id = builder.wait(0.5).unwrap();
            builder.named(id, name).unwrap();
            id
        })
        .collect();
    let (mut experiment, clock, sink) = build(builder);

    // Ticks at an awkward rate; boundaries still land on exact multiples
    let mut now = 0.0;
    let mut status = TickStatus::Running;
    while status == TickStatus::Running {
        clock.set(now);
        status = experiment.tick().unwrap();
        now += 0.07;
    }

    assert_eq!(start(&experiment, ids[0]), 0.0);
    for pair in ids.windows(2) {
        assert_eq!(end(&experiment, pair[0]), start(&experiment, pair[1]));
    }
    assert_eq!(end(&experiment, ids[2]), 1.5);
    assert_eq!(end(&experiment, experiment.root()), 1.5);

    let order: Vec<String> = sink.records().into_iter().map(|r| r.state).collect();
    assert_eq!(order, vec!["a", "b", "c", "root"]);
}

#[test]
fn parallel_finishes_at_latest_child() {
    let mut builder = Builder::new();
    let mut children = Vec::new();
    let parallel = builder
        .parallel(|b| {
            children.push(b.wait(0.3)?);
            children.push(b.wait(0.7)?);
            Ok(())
        })
        .unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    assert_eq!(tick_at(&mut experiment, &clock, &[0.0, 0.5]), TickStatus::Running);
    assert_eq!(experiment.phase(children[0]), Phase::Finished);
    assert_eq!(experiment.phase(children[1]), Phase::Active);

    assert_eq!(tick_at(&mut experiment, &clock, &[1.0]), TickStatus::Finished);
    assert_eq!(end(&experiment, parallel), 0.7);
}

#[test]
fn until_done_forces_background_out_at_distinguished_end() {
    let mut builder = Builder::new();
    let mut bg = None;
    let mut fg = None;
    let until = builder
        .until_done(
            |b| {
                bg = Some(b.wait(5.0)?);
                Ok(())
            },
            |b| {
                fg = Some(b.wait(0.4)?);
                Ok(())
            },
        )
        .unwrap();
    let (bg, fg) = (bg.unwrap(), fg.unwrap());
    let (mut experiment, clock, _sink) = build(builder);

    assert_eq!(tick_at(&mut experiment, &clock, &[0.0, 0.5]), TickStatus::Finished);
    assert_eq!(end(&experiment, fg), 0.4);
    assert_eq!(end(&experiment, until), 0.4);
    assert_eq!(experiment.phase(bg), Phase::Finished);
    assert_eq!(end(&experiment, bg), 0.4);
}

#[test]
fn meanwhile_background_stops_with_primary() {
    let mut builder = Builder::new();
    let mut recorder = None;
    builder
        .meanwhile(
            |b| b.wait(1.0).map(|_| ()),
            |b| {
                recorder = Some(b.key_record()?);
                Ok(())
            },
        )
        .unwrap();
    let recorder = recorder.unwrap();
    builder.named(recorder, "keys").unwrap();
    let (mut experiment, clock, sink) = build(builder);

    tick_at(&mut experiment, &clock, &[0.0, 0.1]);
    assert_eq!(experiment.subscriber_count(EventKind::KeyDown), 1);
    assert_eq!(experiment.subscriber_count(EventKind::KeyUp), 1);
    experiment.dispatch(&InputEvent::key_down("a", 0.2)).unwrap();
    experiment.dispatch(&InputEvent::key_up("a", 0.3)).unwrap();

    assert_eq!(tick_at(&mut experiment, &clock, &[1.1]), TickStatus::Finished);
    assert_eq!(end(&experiment, recorder), 1.0);
    assert!(!experiment.is_subscribed(recorder));

    let events: Vec<_> = sink
        .for_state("keys")
        .into_iter()
        .filter(|record| record.get("key").is_some())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].get("key"), Some(&Value::from("A")));
    assert_eq!(events[1].get("event"), Some(&Value::from("KEY_UP")));
    assert_eq!(experiment.attribute(recorder, "count").unwrap(), Value::Int(2));
}

#[test]
fn loop_runs_body_three_times_with_fresh_activations() {
    let mut builder = Builder::new();
    let mut body_wait = None;
    let lp = builder
        .loop_times(3, |b, _| {
            let id = b.wait(0.1)?;
            b.named(id, "w")?;
            body_wait = Some(id);
            Ok(())
        })
        .unwrap();
    let (mut experiment, clock, sink) = build(builder);

    // One late tick catches up on every iteration
    assert_eq!(tick_at(&mut experiment, &clock, &[0.0, 1.0]), TickStatus::Finished);

    let records = sink.for_state("w");
    assert_eq!(records.len(), 3);
    let activations: Vec<u32> = records.iter().map(|r| r.activation).collect();
    assert_eq!(activations, vec![1, 2, 3]);
    for (i, record) in records.iter().enumerate() {
        let start = record.get("start_time").and_then(Value::as_f64).unwrap();
        assert!(approx(start, 0.1 * i as f64));
    }
    assert_eq!(experiment.attribute(lp, "i").unwrap(), Value::Int(3));
    assert!(approx(end(&experiment, lp), 0.3));
    assert_eq!(experiment.tree().activation(body_wait.unwrap()), 3);
}

#[test]
fn loop_while_checks_condition_before_each_iteration() {
    let mut builder = Builder::new();
    builder.var("remaining", 2);
    let lp = builder
        .loop_while(
            |_, _| Ok(Ref::var("remaining").gt(0)),
            |b, _| {
                b.set("remaining", Ref::var("remaining") - 1)?;
                b.wait(0.25)?;
                Ok(())
            },
        )
        .unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    assert_eq!(tick_at(&mut experiment, &clock, &[0.0, 0.3, 0.6]), TickStatus::Finished);
    assert_eq!(experiment.attribute(lp, "i").unwrap(), Value::Int(2));
    assert_eq!(experiment.variable("remaining"), Some(&Value::Int(0)));
    assert_eq!(end(&experiment, lp), 0.5);
}

#[test]
fn loop_over_exposes_current_item() {
    let mut builder = Builder::new();
    builder
        .loop_over(vec![Value::from("red"), Value::from("green")], |b, lp| {
            let log = b.log(LogValues::new().value("color", lp.attr("current")))?;
            b.named(log, "trial_log")?;
            Ok(())
        })
        .unwrap();
    let (mut experiment, clock, sink) = build(builder);

    assert_eq!(tick_at(&mut experiment, &clock, &[0.0]), TickStatus::Finished);
    let colors: Vec<Value> = sink
        .for_state("trial_log")
        .iter()
        .filter_map(|r| r.get("color").cloned())
        .collect();
    assert_eq!(colors, vec![Value::from("red"), Value::from("green")]);
}

#[test]
fn done_breaks_loop_between_iterations() {
    let mut builder = Builder::new();
    builder.var("n", 0);
    let lp = builder
        .loop_forever(|b, lp| {
            b.set("n", Ref::var("n") + 1)?;
            b.if_(Ref::var("n").ge(3), |b| b.done(lp).map(|_| ()))?;
            b.wait(0.1)?;
            Ok(())
        })
        .unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    assert_eq!(tick_at(&mut experiment, &clock, &[0.0, 1.0]), TickStatus::Finished);
    assert_eq!(experiment.variable("n"), Some(&Value::Int(3)));
    // The breaking iteration still runs to its end
    assert_eq!(experiment.attribute(lp, "i").unwrap(), Value::Int(3));
    assert!(approx(end(&experiment, lp), 0.3));
}

#[test]
fn zero_duration_loop_yields_after_iteration_cap() {
    let mut builder = Builder::new();
    builder.var("n", 0);
    builder
        .loop_forever(|b, _| b.set("n", Ref::var("n") + 1).map(|_| ()))
        .unwrap();
    let (experiment, clock, _sink) = build(builder);
    let mut experiment =
        experiment.with_config(EngineConfig::default().with_max_iterations_per_tick(10));

    assert_eq!(tick_at(&mut experiment, &clock, &[0.0]), TickStatus::Running);
    assert_eq!(experiment.variable("n"), Some(&Value::Int(10)));
    tick_at(&mut experiment, &clock, &[0.016]);
    assert_eq!(experiment.variable("n"), Some(&Value::Int(20)));
}

#[test]
fn conditional_takes_first_true_branch() {
    let mut builder = Builder::new();
    builder.var("level", 2);
    let cond = builder
        .if_(Ref::var("level").equals(1), |b| b.set("picked", "one").map(|_| ()))
        .unwrap();
    builder
        .elif(Ref::var("level").equals(2), |b| b.set("picked", "two").map(|_| ()))
        .unwrap();
    builder.else_(|b| b.set("picked", "other").map(|_| ())).unwrap();
    let empty = builder.if_(false, |b| b.wait(10.0).map(|_| ())).unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    assert_eq!(tick_at(&mut experiment, &clock, &[0.0]), TickStatus::Finished);
    assert_eq!(experiment.variable("picked"), Some(&Value::from("two")));
    assert_eq!(experiment.attribute(cond, "branch").unwrap(), Value::Int(1));
    assert_eq!(experiment.attribute(empty, "branch").unwrap(), Value::Null);
    assert_eq!(end(&experiment, empty), 0.0);
}

#[test]
fn key_press_scenario_accepts_listed_key_only() {
    let mut builder = Builder::new();
    builder.wait(1.0).unwrap();
    let resp = builder
        .key_press(
            KeyPress::new()
                .keys(vec!["J", "K"])
                .correct("K")
                .duration(2.0)
                .named("resp"),
        )
        .unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    tick_at(&mut experiment, &clock, &[0.0, 1.1]);
    assert_eq!(experiment.phase(resp), Phase::Active);
    assert_eq!(start(&experiment, resp), 1.0);

    assert_eq!(experiment.dispatch(&InputEvent::key_down("Q", 1.2)).unwrap(), 1);
    assert_eq!(experiment.phase(resp), Phase::Active);

    assert_eq!(experiment.dispatch(&InputEvent::key_down("K", 1.42)).unwrap(), 1);
    assert_eq!(experiment.phase(resp), Phase::Finished);
    assert_eq!(experiment.attribute(resp, "pressed").unwrap(), Value::from("K"));
    assert_eq!(experiment.attribute(resp, "correct").unwrap(), Value::Bool(true));
    let rt = experiment.attribute(resp, "rt").unwrap().as_f64().unwrap();
    assert!(approx(rt, 0.42));
    assert_eq!(end(&experiment, resp), 1.42);

    // Unsubscribed on exit; later events reach nobody
    assert_eq!(experiment.dispatch(&InputEvent::key_down("J", 1.5)).unwrap(), 0);
    assert_eq!(tick_at(&mut experiment, &clock, &[1.5]), TickStatus::Finished);
}

#[test]
fn response_after_until_done_ended_is_not_captured() {
    let mut builder = Builder::new();
    let mut resp = None;
    let until_done = builder
        .until_done(
            |b| {
                resp = Some(b.key_press(KeyPress::new().keys(vec!["J", "K"]))?);
                Ok(())
            },
            |b| b.wait(1.0).map(|_| ()),
        )
        .unwrap();
    let resp = resp.unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    tick_at(&mut experiment, &clock, &[0.0, 0.99]);
    assert_eq!(experiment.phase(resp), Phase::Active);

    // Stamped after the distinguished wait ended but before the next tick
    assert_eq!(experiment.dispatch(&InputEvent::key_down("K", 1.01)).unwrap(), 0);
    assert_eq!(tick_at(&mut experiment, &clock, &[1.016]), TickStatus::Finished);

    assert_eq!(end(&experiment, until_done), 1.0);
    assert_eq!(end(&experiment, resp), 1.0);
    assert_eq!(experiment.attribute(resp, "pressed").unwrap(), Value::from(""));
    assert_eq!(experiment.attribute(resp, "rt").unwrap(), Value::Null);
}

#[test]
fn serial_with_duration_never_outlives_its_deadline() {
    let mut builder = Builder::new();
    let mut resp = None;
    let serial = builder
        .serial(|b| {
            resp = Some(b.key_press(KeyPress::new().keys(vec!["J", "K"]))?);
            Ok(())
        })
        .unwrap();
    builder.with_duration(serial, 1.0).unwrap();
    let resp = resp.unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    tick_at(&mut experiment, &clock, &[0.0, 0.99]);
    assert_eq!(experiment.dispatch(&InputEvent::key_down("K", 1.01)).unwrap(), 0);
    assert_eq!(tick_at(&mut experiment, &clock, &[1.016]), TickStatus::Finished);

    assert_eq!(end(&experiment, serial), 1.0);
    assert_eq!(end(&experiment, resp), 1.0);
    assert_eq!(experiment.attribute(resp, "pressed").unwrap(), Value::from(""));
    assert_eq!(end(&experiment, experiment.root()), 1.0);
}

#[test]
fn response_inside_enclosing_window_is_still_captured() {
    let mut builder = Builder::new();
    let mut resp = None;
    let serial = builder
        .serial(|b| {
            resp = Some(b.key_press(KeyPress::new().keys(vec!["J", "K"]))?);
            Ok(())
        })
        .unwrap();
    builder.with_duration(serial, 1.0).unwrap();
    let resp = resp.unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    tick_at(&mut experiment, &clock, &[0.0, 0.5]);
    assert_eq!(experiment.dispatch(&InputEvent::key_down("J", 0.98)).unwrap(), 1);
    assert_eq!(end(&experiment, resp), 0.98);
    assert_eq!(experiment.attribute(resp, "pressed").unwrap(), Value::from("J"));
    assert_eq!(tick_at(&mut experiment, &clock, &[1.016]), TickStatus::Finished);
    assert_eq!(end(&experiment, serial), 0.98);
}

#[test]
fn reset_clock_schedules_from_the_late_tick() {
    let mut builder = Builder::new();
    let first = builder.wait(0.5).unwrap();
    let reset = builder.reset_clock().unwrap();
    let after = builder.wait(0.5).unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    // The frame after 0.5 arrives late
    tick_at(&mut experiment, &clock, &[0.0, 0.8]);
    assert_eq!(end(&experiment, first), 0.5);
    assert_eq!(start(&experiment, reset), 0.5);
    assert_eq!(end(&experiment, reset), 0.8);
    assert_eq!(start(&experiment, after), 0.8);

    assert_eq!(tick_at(&mut experiment, &clock, &[1.0]), TickStatus::Running);
    assert_eq!(tick_at(&mut experiment, &clock, &[1.35]), TickStatus::Finished);
    assert!(approx(end(&experiment, after), 1.3));
}

#[test]
fn reset_clock_to_a_later_time_waits_for_it() {
    let mut builder = Builder::new();
    let reset = builder.reset_clock_to(Ref::var("onset")).unwrap();
    let after = builder.wait(0.1).unwrap();
    let (mut experiment, clock, _sink) = build(builder);
    experiment.set_variable("onset", 0.4);

    tick_at(&mut experiment, &clock, &[0.0]);
    assert_eq!(experiment.phase(reset), Phase::Active);
    tick_at(&mut experiment, &clock, &[0.45]);
    assert_eq!(end(&experiment, reset), 0.4);
    assert_eq!(start(&experiment, after), 0.4);
    assert_eq!(tick_at(&mut experiment, &clock, &[0.55]), TickStatus::Finished);
    assert!(approx(end(&experiment, experiment.root()), 0.5));
}

#[test]
fn seeded_jitter_repeats_across_runs() {
    let durations = || {
        let mut builder = Builder::new();
        let waits: Vec<StateId> = (0..3)
            .map(|_| builder.wait(Ref::jitter(0.2, 0.3)).unwrap())
            .collect();
        let (experiment, clock, _sink) = build(builder);
        let mut experiment = experiment.with_config(EngineConfig::new().with_seed(11));
        let mut now = 0.0;
        while tick_at(&mut experiment, &clock, &[now]) == TickStatus::Running {
            now += 0.01;
        }
        waits
            .iter()
            .map(|id| end(&experiment, *id) - start(&experiment, *id))
            .collect::<Vec<f64>>()
    };

    let first = durations();
    assert!(first.iter().all(|d| (0.2..0.5).contains(d)));
    assert_eq!(first, durations());
}

#[test]
fn reference_sum_reads_finished_state() {
    let mut builder = Builder::new();
    let resp = builder.key_press(KeyPress::new().duration(2.0)).unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    tick_at(&mut experiment, &clock, &[0.0]);
    experiment.dispatch(&InputEvent::key_down("SPACE", 0.25)).unwrap();
    tick_at(&mut experiment, &clock, &[0.3]);

    let total = resp.attr("rt") + 1.0;
    assert_eq!(experiment.eval(&total).unwrap(), Value::Float(1.25));
    assert_eq!(experiment.eval(&total).unwrap(), Value::Float(1.25));
}

#[test]
fn capture_window_is_measured_from_base_time() {
    let mut builder = Builder::new();
    let cue = builder.wait(1.0).unwrap();
    let resp = builder
        .key_press(KeyPress::new().base_time(cue.attr("start_time")).duration(2.0))
        .unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    tick_at(&mut experiment, &clock, &[0.0, 1.2]);
    assert_eq!(experiment.attribute(resp, "base_time").unwrap(), Value::Float(0.0));
    experiment.dispatch(&InputEvent::key_down("F", 1.5)).unwrap();
    let rt = experiment.attribute(resp, "rt").unwrap().as_f64().unwrap();
    assert!(approx(rt, 1.5));

    let mut builder = Builder::new();
    let cue = builder.wait(1.0).unwrap();
    let resp = builder
        .key_press(KeyPress::new().base_time(cue.attr("start_time")).duration(2.0))
        .unwrap();
    let (mut experiment, clock, _sink) = build(builder);
    assert_eq!(tick_at(&mut experiment, &clock, &[0.0, 1.2, 2.5]), TickStatus::Finished);
    assert_eq!(end(&experiment, resp), 2.0);
}

#[test]
fn simultaneous_captures_both_see_the_event() {
    let mut builder = Builder::new();
    let mut captures = Vec::new();
    builder
        .parallel(|b| {
            captures.push(b.key_press(KeyPress::new().keys("J"))?);
            captures.push(b.key_press(KeyPress::new().keys(vec!["J", "L"]))?);
            Ok(())
        })
        .unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    tick_at(&mut experiment, &clock, &[0.0]);
    assert_eq!(experiment.subscriber_count(EventKind::KeyDown), 2);
    // Each delivery unsubscribes its own state while the dispatch is running
    assert_eq!(experiment.dispatch(&InputEvent::key_down("j", 0.1)).unwrap(), 2);
    assert_eq!(experiment.subscriber_count(EventKind::KeyDown), 0);
    for id in captures {
        assert_eq!(experiment.attribute(id, "pressed").unwrap(), Value::from("J"));
    }
    assert_eq!(tick_at(&mut experiment, &clock, &[0.2]), TickStatus::Finished);
}

#[test]
fn function_failure_is_reported_once_and_stops_the_run() {
    let mut builder = Builder::new();
    builder
        .parallel(|b| {
            b.key_press(KeyPress::new())?;
            let func = b.func(|_| anyhow::bail!("device offline"), vec![])?;
            b.named(func, "connect")?;
            Ok(())
        })
        .unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    clock.set(0.0);
    let err = experiment.tick().unwrap_err();
    let EngineError::Faulted(report) = err else {
        panic!("expected a fault report, got {:?}", err);
    };
    assert_eq!(report.faults.len(), 1);
    assert_eq!(report.faults[0].state_name, "connect");
    assert!(report.faults[0].error.to_string().contains("device offline"));

    // Torn down: nothing subscribed, nothing more to report
    assert_eq!(experiment.subscriber_count(EventKind::KeyDown), 0);
    assert!(experiment.is_finished());
    assert!(matches!(experiment.tick(), Err(EngineError::RunFinished)));
}

#[test]
fn evaluation_errors_fault_the_offending_state() {
    let mut builder = Builder::new();
    let wait = builder.wait(Ref::var("missing")).unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    clock.set(0.0);
    match experiment.tick() {
        Err(EngineError::Faulted(report)) => {
            assert_eq!(report.faults[0].state, wait);
            assert!(matches!(*report.faults[0].error, EngineError::UnknownVariable(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn clock_regression_is_fatal() {
    let mut builder = Builder::new();
    builder.wait(5.0).unwrap();
    let (mut experiment, clock, _sink) = build(builder);

    tick_at(&mut experiment, &clock, &[0.0, 1.0]);
    clock.set(0.5);
    assert!(matches!(
        experiment.tick(),
        Err(EngineError::ClockRegression { reference, now, .. }) if reference == 1.0 && now == 0.5
    ));
    assert!(experiment.is_finished());
}

#[test]
fn branch_without_if_is_rejected_before_running() {
    let mut builder = Builder::new();
    builder.wait(1.0).unwrap();
    assert!(matches!(
        builder.elif(true, |_| Ok(())),
        Err(EngineError::BranchWithoutIf { .. })
    ));
}

struct RecordingPresenter {
    calls: Rc<RefCell<Vec<String>>>,
}

impl Presenter for RecordingPresenter {
    fn show(&mut self, request: &StimulusRequest) -> Option<f64> {
        let text = request.params.get("text").and_then(Value::as_str).unwrap_or_default();
        self.calls.borrow_mut().push(format!("show {} {}", request.stimulus, text));
        // Pretend the next screen refresh happened 10 ms later
        Some(request.requested_at + 0.01)
    }

    fn hide(&mut self, _state: StateId, _requested_at: f64) -> Option<f64> {
        self.calls.borrow_mut().push("hide".to_string());
        None
    }
}

#[test]
fn stimulus_reports_onset_and_offset() {
    let mut builder = Builder::new();
    let stim = builder
        .stimulus(Stimulus::new("Label").param("text", "+").duration(0.5))
        .unwrap();
    let (experiment, clock, _sink) = build(builder);
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut experiment = experiment.with_presenter(RecordingPresenter { calls: calls.clone() });

    assert_eq!(tick_at(&mut experiment, &clock, &[0.0, 0.6]), TickStatus::Finished);
    assert_eq!(*calls.borrow(), vec!["show Label +".to_string(), "hide".to_string()]);
    assert_eq!(experiment.attribute(stim, "appear_time").unwrap(), Value::Float(0.01));
    assert_eq!(experiment.attribute(stim, "disappear_time").unwrap(), Value::Float(0.5));
    assert_eq!(experiment.attribute(stim, "text").unwrap(), Value::from("+"));
}

#[test]
fn record_logs_only_changes() {
    let mut builder = Builder::new();
    builder.var("x", 1);
    builder
        .meanwhile(
            |b| {
                b.wait(0.1)?;
                b.set("x", 2)?;
                b.wait(0.1)?;
                Ok(())
            },
            |b| {
                b.record(Record::new().track("x", Ref::var("x")).named("rec"))?;
                Ok(())
            },
        )
        .unwrap();
    let (mut experiment, clock, sink) = build(builder);

    assert_eq!(
        tick_at(&mut experiment, &clock, &[0.0, 0.05, 0.15, 0.18, 0.3]),
        TickStatus::Finished
    );
    let samples: Vec<Value> = sink
        .for_state("rec")
        .iter()
        .filter(|r| r.get("timestamp").is_some())
        .filter_map(|r| r.get("x").cloned())
        .collect();
    assert_eq!(samples, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn run_replays_scripted_input() {
    let mut builder = Builder::new();
    builder.wait(0.5).unwrap();
    let click = builder
        .pointer_press(PointerPress::new().buttons("left").correct("left").duration(1.0))
        .unwrap();
    let (mut experiment, clock, _sink) = build(builder);
    let mut host = ScriptedHost::new(clock.clone(), 100.0)
        .with_events(vec![InputEvent::pointer_down("left", 10.0, 20.0, 0.8)]);

    let summary = experiment.run(&mut host).unwrap();
    assert!(summary.session_started.is_some());
    assert!(approx(summary.duration().unwrap(), 0.8));
    assert_eq!(experiment.attribute(click, "correct").unwrap(), Value::Bool(true));
    assert_eq!(
        experiment.attribute(click, "position").unwrap(),
        Value::List(vec![Value::Float(10.0), Value::Float(20.0)])
    );
}

#[test]
fn run_stops_at_tick_limit() {
    let mut builder = Builder::new();
    builder.key_press(KeyPress::new()).unwrap();
    let (experiment, clock, _sink) = build(builder);
    let mut experiment = experiment.with_config(EngineConfig::default().with_max_ticks(5));
    let mut host = ScriptedHost::new(clock, 60.0);

    assert!(matches!(experiment.run(&mut host), Err(EngineError::TickLimit(5))));
    assert_eq!(experiment.ticks(), 5);
    assert_eq!(experiment.subscriber_count(EventKind::KeyDown), 0);
}
