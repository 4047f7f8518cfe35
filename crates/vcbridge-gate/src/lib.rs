//! Spoken start/stop gating for transcribed speech.
//!
//! Transcripts are matched against configured trigger phrases on their
//! normalized form (`phrase`), vocalized pauses are recognized and dropped
//! (`filler`), and the `gate` state machine decides per utterance whether
//! to open, accumulate, close and emit, or discard.
//!
//! Everything here is synchronous and free of I/O. The caller applies the
//! returned [`GateAction`]s (tone playback, outbound message).

pub mod filler;
pub mod gate;
pub mod phrase;

pub use filler::is_filler;
pub use gate::{Gate, GateAction, GateOutcome, GatePolicy, GateState, Transition};
pub use phrase::{find_phrase, normalize, MatchMode, PhraseMatch, PhraseSet};
