//! The start/stop gate.
//!
//! One [`Gate`] exists per call session. It is fed every finished,
//! non-empty utterance and answers with the actions the caller must carry
//! out. Invariant: the message buffer is empty whenever the gate is closed.

use crate::filler::is_filler;
use crate::phrase::{find_phrase, MatchMode, PhraseMatch, PhraseSet};
use std::sync::Arc;
use tracing::debug;
use vcbridge_types::ToneKind;

/// Gate configuration, shared by every session of a deployment.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    /// When false every non-filler utterance is emitted on its own.
    pub gating: bool,
    pub filter_filler: bool,
    pub match_mode: MatchMode,
    pub start: PhraseSet,
    pub stop: PhraseSet,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            gating: true,
            filter_filler: true,
            match_mode: MatchMode::WordBoundary,
            start: PhraseSet::new(["start message"]),
            stop: PhraseSet::new(["stop message", "end message"]),
        }
    }
}

impl GatePolicy {
    fn find_start(&self, text: &str) -> Option<PhraseMatch> {
        find_phrase(text, &self.start, self.match_mode)
    }

    fn find_stop(&self, text: &str) -> Option<PhraseMatch> {
        find_phrase(text, &self.stop, self.match_mode)
    }

    /// Whether a fragment captured around a trigger phrase is worth buffering.
    fn keeps(&self, fragment: &str) -> bool {
        !fragment.is_empty() && !(self.filter_filler && is_filler(fragment))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Closed,
    Open,
}

/// Side effects requested by the gate, in the order they must happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    PlayTone(ToneKind),
    /// Send one outbound text message.
    Emit(String),
}

/// What the gate did with an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Gating disabled; the utterance was emitted as is.
    Passed,
    Opened,
    /// Start phrase while already open; buffer restarted.
    Restarted,
    Closed,
    Buffered,
    /// Gate closed and no start phrase.
    Missed,
    /// Filler or blank.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub transition: Transition,
    pub actions: Vec<GateAction>,
}

impl GateOutcome {
    fn quiet(transition: Transition) -> Self {
        Self {
            transition,
            actions: Vec::new(),
        }
    }
}

/// Ordered text fragments joined by single spaces.
#[derive(Debug, Clone, Default)]
struct MessageBuffer {
    fragments: Vec<String>,
}

impl MessageBuffer {
    fn push(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if !fragment.is_empty() {
            self.fragments.push(fragment.to_string());
        }
    }

    fn text(&self) -> String {
        self.fragments.join(" ")
    }

    fn take(&mut self) -> String {
        let text = self.text();
        self.fragments.clear();
        text
    }

    fn clear(&mut self) {
        self.fragments.clear();
    }

    fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Gate {
    policy: Arc<GatePolicy>,
    state: GateState,
    buffer: MessageBuffer,
}

impl Gate {
    pub fn new(policy: Arc<GatePolicy>) -> Self {
        Self {
            policy,
            state: GateState::Closed,
            buffer: MessageBuffer::default(),
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == GateState::Open
    }

    /// Current buffered message text.
    pub fn buffered(&self) -> String {
        self.buffer.text()
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Back to closed with an empty buffer.
    pub fn reset(&mut self) {
        self.state = GateState::Closed;
        self.buffer.clear();
    }

    /// Feeds one finished utterance through the gate.
    pub fn on_utterance(&mut self, text: &str) -> GateOutcome {
        let spoken = text.trim();
        if spoken.is_empty() {
            return GateOutcome::quiet(Transition::Dropped);
        }

        let policy = Arc::clone(&self.policy);

        if !policy.gating {
            if policy.filter_filler && is_filler(spoken) {
                return GateOutcome::quiet(Transition::Dropped);
            }
            return GateOutcome {
                transition: Transition::Passed,
                actions: vec![GateAction::Emit(spoken.to_string())],
            };
        }

        // Start/stop detection sees the whole utterance, filler or not.
        match self.state {
            GateState::Closed => match policy.find_start(spoken) {
                Some(start) => {
                    debug!(phrase = %start.phrase, "gate open");
                    self.state = GateState::Open;
                    self.seed(&policy, &start);
                    GateOutcome {
                        transition: Transition::Opened,
                        actions: vec![GateAction::PlayTone(ToneKind::Open)],
                    }
                }
                None => {
                    debug!(transcript = spoken, "start-match miss");
                    GateOutcome::quiet(Transition::Missed)
                }
            },
            GateState::Open => {
                if let Some(stop) = policy.find_stop(spoken) {
                    if policy.keeps(&stop.before) {
                        self.buffer.push(&stop.before);
                    }
                    self.state = GateState::Closed;
                    let payload = self.buffer.take();
                    debug!(phrase = %stop.phrase, chars = payload.len(), "gate closed");

                    let mut actions = vec![GateAction::PlayTone(ToneKind::Close)];
                    if !payload.is_empty() {
                        actions.push(GateAction::Emit(payload));
                    }
                    return GateOutcome {
                        transition: Transition::Closed,
                        actions,
                    };
                }

                if let Some(start) = policy.find_start(spoken) {
                    debug!(phrase = %start.phrase, "gate restart");
                    self.seed(&policy, &start);
                    return GateOutcome {
                        transition: Transition::Restarted,
                        actions: vec![GateAction::PlayTone(ToneKind::Open)],
                    };
                }

                if policy.filter_filler && is_filler(spoken) {
                    return GateOutcome::quiet(Transition::Dropped);
                }

                self.buffer.push(spoken);
                GateOutcome::quiet(Transition::Buffered)
            }
        }
    }

    /// Clears the buffer and seeds it with the text after a start phrase.
    fn seed(&mut self, policy: &GatePolicy, start: &PhraseMatch) {
        self.buffer.clear();
        if policy.keeps(&start.after) {
            self.buffer.push(&start.after);
        }
    }

    pub fn buffer_is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
