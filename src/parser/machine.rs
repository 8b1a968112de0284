//! Two-section chunking state machine, independent of any HTML representation.
//!
//! The caller lowers the page into a stream of [`Block`]s and folds them through
//! [`transition`]. Prepared remarks flush on every speaker change; Q&A accumulates a whole
//! exchange and flushes only on operator or investor-relations lines.

use crate::model::{Section, Speaker};

/// One structural element of the transcript body.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Section heading text.
    Heading(String),
    /// A bolded, already classified speaker paragraph.
    Speaker(Speaker),
    /// Plain paragraph text.
    Text(String),
}

/// Speakers and text accumulated since the last flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Turn {
    speakers: Vec<Speaker>,
    text: String,
}

impl Turn {
    fn starting_with(speaker: Speaker) -> Self {
        Self {
            speakers: vec![speaker],
            text: String::new(),
        }
    }

    fn append(&mut self, text: &str) {
        if self.speakers.is_empty() {
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(text);
    }

    fn join(&mut self, speaker: Speaker) {
        if !self.speakers.iter().any(|s| s.name == speaker.name) {
            self.speakers.push(speaker);
        }
    }

    fn flush(self, section: Section) -> Option<ChunkDraft> {
        if self.speakers.is_empty() || self.text.trim().is_empty() {
            return None;
        }
        Some(ChunkDraft {
            section,
            participants: self.speakers,
            text: self.text,
        })
    }
}

/// A chunk awaiting ids, timestamps and token spans.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    /// Section the chunk belongs to.
    pub section: Section,
    /// Speakers in order of first appearance.
    pub participants: Vec<Speaker>,
    /// Space-joined paragraph text.
    pub text: String,
}

/// Parser position. Sections are entered once, in order; `Done` is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    /// Scripted remarks, one chunk per speaker turn.
    PreparedRemarks(Turn),
    /// Q&A, one chunk per operator-delimited exchange.
    Qa(Turn),
    /// The call-participants roster was reached.
    Done,
}

impl CallState {
    /// Initial state at the "Prepared Remarks" heading.
    pub fn start() -> Self {
        Self::PreparedRemarks(Turn::default())
    }

    /// `true` once no further block can change the output.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Heading that ends the transcript body.
pub fn is_participants_heading(text: &str) -> bool {
    text.to_lowercase().contains("call participants")
}

/// Advances the machine by one block, returning the next state and any flushed chunk.
pub fn transition(state: CallState, block: Block) -> (CallState, Option<ChunkDraft>) {
    match state {
        CallState::PreparedRemarks(mut turn) => match block {
            Block::Heading(text) if is_participants_heading(&text) => {
                (CallState::Done, turn.flush(Section::PreparedRemarks))
            }
            Block::Heading(_) => (
                CallState::Qa(Turn::default()),
                turn.flush(Section::PreparedRemarks),
            ),
            Block::Speaker(speaker) => {
                let emitted = turn.flush(Section::PreparedRemarks);
                let next = if speaker.kind.is_moderator() {
                    Turn::default()
                } else {
                    Turn::starting_with(speaker)
                };
                (CallState::PreparedRemarks(next), emitted)
            }
            Block::Text(text) => {
                turn.append(&text);
                (CallState::PreparedRemarks(turn), None)
            }
        },
        CallState::Qa(mut turn) => match block {
            Block::Heading(text) if is_participants_heading(&text) => {
                (CallState::Done, turn.flush(Section::Qa))
            }
            Block::Heading(_) => (CallState::Qa(turn), None),
            Block::Speaker(speaker) if speaker.name.contains("Duration:") => {
                (CallState::Qa(turn), None)
            }
            Block::Speaker(speaker) if speaker.kind.is_moderator() => {
                (CallState::Qa(Turn::default()), turn.flush(Section::Qa))
            }
            Block::Speaker(speaker) => {
                turn.join(speaker);
                (CallState::Qa(turn), None)
            }
            Block::Text(text) => {
                turn.append(&text);
                (CallState::Qa(turn), None)
            }
        },
        CallState::Done => (CallState::Done, None),
    }
}

/// Flushes whatever is pending when the block stream ends without a roster heading.
pub fn finish(state: CallState) -> Option<ChunkDraft> {
    match state {
        CallState::PreparedRemarks(turn) => turn.flush(Section::PreparedRemarks),
        CallState::Qa(turn) => turn.flush(Section::Qa),
        CallState::Done => None,
    }
}

/// Folds a whole block stream into drafts.
pub fn run<I>(blocks: I) -> Vec<ChunkDraft>
where
    I: IntoIterator<Item = Block>,
{
    let mut drafts = Vec::new();
    let mut state = CallState::start();
    for block in blocks {
        let (next, emitted) = transition(state, block);
        drafts.extend(emitted);
        state = next;
        if state.is_done() {
            break;
        }
    }
    drafts.extend(finish(state));
    drafts
}
