//! End-to-end gate scenarios over sequences of utterances.

use std::sync::Arc;
use vcbridge_gate::{
    Gate, GateAction, GatePolicy, GateState, MatchMode, PhraseSet, Transition,
};
use vcbridge_types::ToneKind;

fn policy(start: &[&str], stop: &[&str]) -> GatePolicy {
    GatePolicy {
        gating: true,
        filter_filler: true,
        match_mode: MatchMode::WordBoundary,
        start: PhraseSet::new(start.iter().copied()),
        stop: PhraseSet::new(stop.iter().copied()),
    }
}

#[test]
fn dictation_round_trip() {
    let mut gate = Gate::new(Arc::new(policy(&["start message"], &["stop message"])));

    let opened = gate.on_utterance("start message hello world");
    assert_eq!(opened.transition, Transition::Opened);
    assert_eq!(opened.actions, vec![GateAction::PlayTone(ToneKind::Open)]);
    assert_eq!(gate.buffered(), "hello world");

    let buffered = gate.on_utterance("this is a test");
    assert_eq!(buffered.transition, Transition::Buffered);
    assert!(buffered.actions.is_empty());
    assert_eq!(gate.buffered(), "hello world this is a test");

    let closed = gate.on_utterance("ok stop message");
    assert_eq!(closed.transition, Transition::Closed);
    assert_eq!(
        closed.actions,
        vec![
            GateAction::PlayTone(ToneKind::Close),
            GateAction::Emit("hello world this is a test ok".to_string()),
        ]
    );
    assert_eq!(gate.state(), GateState::Closed);
    assert!(gate.buffer_is_empty());
}

#[test]
fn filler_is_dropped_while_open() {
    let mut gate = Gate::new(Arc::new(policy(&["start message"], &["stop message"])));
    gate.on_utterance("start message keep this");

    let outcome = gate.on_utterance("uh um ahh");
    assert_eq!(outcome.transition, Transition::Dropped);
    assert!(outcome.actions.is_empty());
    assert_eq!(gate.buffered(), "keep this");
    assert!(gate.is_open());
}

#[test]
fn exact_mode_only_matches_whole_utterance() {
    let mut p = policy(&["begin"], &["end"]);
    p.match_mode = MatchMode::Exact;
    let mut gate = Gate::new(Arc::new(p));

    assert_eq!(gate.on_utterance("let us begin").transition, Transition::Missed);
    assert_eq!(gate.on_utterance("Begin.").transition, Transition::Opened);

    let ordinary = gate.on_utterance("the end");
    assert_eq!(ordinary.transition, Transition::Buffered);
    assert_eq!(gate.buffered(), "the end");

    let stop = gate.on_utterance("end");
    assert_eq!(stop.transition, Transition::Closed);
    assert_eq!(
        stop.actions,
        vec![
            GateAction::PlayTone(ToneKind::Close),
            GateAction::Emit("the end".to_string()),
        ]
    );
}

#[test]
fn buffer_is_empty_whenever_closed() {
    let mut gate = Gate::new(Arc::new(GatePolicy::default()));
    let script = [
        "hello",
        "start message one",
        "two",
        "mm",
        "start message again",
        "three",
        "end message",
        "four",
        "stop message",
        "start message",
        "five stop message six",
        "start message seven",
    ];

    for utterance in script {
        gate.on_utterance(utterance);
        if gate.state() == GateState::Closed {
            assert!(
                gate.buffer_is_empty(),
                "buffer not empty after {utterance:?}: {:?}",
                gate.buffered()
            );
        }
    }
    assert!(gate.is_open());
    assert_eq!(gate.buffered(), "seven");
}

#[test]
fn each_close_emits_exactly_what_was_buffered() {
    let mut gate = Gate::new(Arc::new(GatePolicy::default()));
    let mut emitted = Vec::new();
    let script = [
        "start message alpha",
        "beta",
        "end message",
        "gamma",
        "start message",
        "delta stop message",
    ];
    for utterance in script {
        for action in gate.on_utterance(utterance).actions {
            if let GateAction::Emit(text) = action {
                emitted.push(text);
            }
        }
    }
    assert_eq!(emitted, vec!["alpha beta".to_string(), "delta".to_string()]);
}
