//! Earnings-call transcript parser: one HTML page in, an ordered chunk sequence out.
//!
//! The page is lowered to [`machine::Block`]s (headings, classified speaker lines, text
//! paragraphs) following the "Prepared Remarks:" heading, folded through the section state
//! machine, then stamped with chunk ids, snippets and contiguous token spans.

pub mod machine;
pub mod speaker;
pub mod timestamp;

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::anomaly::AnomalyLog;
use crate::key::TranscriptKey;
use crate::model::{Speaker, SpeakerType, TranscriptChunk};
use crate::text::{generate_snippet, DEFAULT_SNIPPET_CHARS};
use crate::tokenizer::TokenCounter;
use machine::{Block, CallState, ChunkDraft};
use speaker::{classify, SpeakerLine};

const PREPARED_REMARKS_HEADING: &str = "Prepared Remarks:";
const QA_HEADINGS: &[&str] = &["Questions & Answers:", "Questions and Answers:"];
const PARTICIPANTS_HEADING: &str = "Call participants:";

/// Whole-document parse failures; no partial chunk list is ever returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The page does not follow the supported transcript template.
    #[error("page format not implemented for {slug}: {reason}")]
    Format {
        /// Transcript slug.
        slug: String,
        /// Missing structural marker.
        reason: String,
    },
    /// Required front matter (article body, call timestamp) is missing or malformed.
    #[error("failed to initialize parser for {slug}: {reason}")]
    Initialization {
        /// Transcript slug.
        slug: String,
        /// What was missing.
        reason: String,
    },
}

impl ParseError {
    fn format(key: &TranscriptKey, reason: impl Into<String>) -> Self {
        Self::Format {
            slug: key.slug(),
            reason: reason.into(),
        }
    }

    fn init(key: &TranscriptKey, reason: impl Into<String>) -> Self {
        Self::Initialization {
            slug: key.slug(),
            reason: reason.into(),
        }
    }
}

/// Stateless transcript parser; safe to share across worker threads.
pub struct TranscriptParser<'a> {
    tokenizer: &'a dyn TokenCounter,
    anomalies: &'a AnomalyLog,
    selectors: Selectors,
    snippet_chars: usize,
}

impl<'a> TranscriptParser<'a> {
    /// Builds a parser that counts tokens with `tokenizer` and reports unknown officer
    /// titles to `anomalies`.
    pub fn new(tokenizer: &'a dyn TokenCounter, anomalies: &'a AnomalyLog) -> Self {
        Self {
            tokenizer,
            anomalies,
            selectors: Selectors::new(),
            snippet_chars: DEFAULT_SNIPPET_CHARS,
        }
    }

    /// Overrides the snippet length ceiling.
    pub fn with_snippet_chars(mut self, snippet_chars: usize) -> Self {
        self.snippet_chars = snippet_chars;
        self
    }

    /// Parses one transcript page.
    pub fn parse(
        &self,
        html: &str,
        key: &TranscriptKey,
        url: &str,
    ) -> Result<Vec<TranscriptChunk>, ParseError> {
        let document = Html::parse_document(html);
        let article = document
            .select(&self.selectors.article_body)
            .next()
            .ok_or_else(|| ParseError::init(key, "missing expected article body block"))?;
        let call_ts = self.call_timestamp(&document, key)?;

        if !article
            .select(&self.selectors.h2)
            .any(|h2| QA_HEADINGS.contains(&element_text(&h2).as_str()))
        {
            return Err(ParseError::format(key, "no questions and answers heading"));
        }
        let prepared = article
            .select(&self.selectors.h2)
            .find(|h2| element_text(h2) == PREPARED_REMARKS_HEADING)
            .ok_or_else(|| ParseError::format(key, "no prepared remarks heading"))?;

        let roster = self.roster(&article);
        let blocks = prepared
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .filter_map(|element| self.lower(element, &roster));

        let mut drafts = Vec::new();
        let mut state = CallState::start();
        for block in blocks {
            if let (CallState::Qa(_), Block::Heading(text)) = (&state, &block) {
                if !machine::is_participants_heading(text) {
                    tracing::warn!(slug = %key, heading = %text, "unexpected heading in Q&A");
                }
            }
            let (next, emitted) = machine::transition(state, block);
            drafts.extend(emitted);
            state = next;
            if state.is_done() {
                break;
            }
        }
        drafts.extend(machine::finish(state));

        let chunks = self.assemble(drafts, key, url, &call_ts)?;
        tracing::debug!(slug = %key, chunks = chunks.len(), "parsed transcript");
        Ok(chunks)
    }

    fn call_timestamp(&self, document: &Html, key: &TranscriptKey) -> Result<String, ParseError> {
        let date = document
            .select(&self.selectors.date)
            .next()
            .map(|el| element_text(&el))
            .ok_or_else(|| ParseError::init(key, "missing call date"))?;
        let time = document
            .select(&self.selectors.time)
            .next()
            .map(|el| element_text(&el))
            .ok_or_else(|| ParseError::init(key, "missing call time"))?;
        timestamp::parse_call_timestamp(&date, &time).map_err(|reason| ParseError::init(key, reason))
    }

    /// Speakers listed under the "Call participants:" heading, keyed by name.
    fn roster(&self, article: &ElementRef<'_>) -> HashMap<String, Speaker> {
        let Some(heading) = article
            .select(&self.selectors.h2)
            .find(|h2| element_text(h2) == PARTICIPANTS_HEADING)
        else {
            return HashMap::new();
        };
        heading
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "p")
            .filter_map(|p| self.speaker_line(&p))
            .map(|line| {
                let speaker = self.classify(&line);
                (speaker.name.clone(), speaker)
            })
            .collect()
    }

    fn lower(&self, element: ElementRef<'_>, roster: &HashMap<String, Speaker>) -> Option<Block> {
        match element.value().name() {
            "h2" => Some(Block::Heading(element_text(&element))),
            "p" => match self.speaker_line(&element) {
                Some(line) => {
                    let mut speaker = self.classify(&line);
                    if speaker.kind == SpeakerType::Other {
                        if let Some(listed) = roster.get(&speaker.name) {
                            speaker = listed.clone();
                        }
                    }
                    Some(Block::Speaker(speaker))
                }
                None => Some(Block::Text(element_text(&element))),
            },
            _ => None,
        }
    }

    fn speaker_line(&self, paragraph: &ElementRef<'_>) -> Option<SpeakerLine> {
        let strong = paragraph.select(&self.selectors.strong).next()?;
        let title = paragraph
            .select(&self.selectors.em)
            .next()
            .map(|em| element_text(&em));
        Some(SpeakerLine {
            name: element_text(&strong),
            line: element_text(paragraph),
            title,
        })
    }

    fn classify(&self, line: &SpeakerLine) -> Speaker {
        let classified = classify(line);
        if let Some(title) = &classified.unrecognized_title {
            self.anomalies.record(title);
        }
        classified.speaker
    }

    fn assemble(
        &self,
        drafts: Vec<ChunkDraft>,
        key: &TranscriptKey,
        url: &str,
        call_ts: &str,
    ) -> Result<Vec<TranscriptChunk>, ParseError> {
        let mut tokens_so_far = 0usize;
        drafts
            .into_iter()
            .enumerate()
            .map(|(n, draft)| {
                let start_token = tokens_so_far;
                let tokens = self
                    .tokenizer
                    .count(&draft.text)
                    .map_err(|err| ParseError::init(key, format!("token count failed: {err:#}")))?;
                tokens_so_far += tokens;
                let snippet = generate_snippet(&draft.text, self.snippet_chars);
                Ok(TranscriptChunk {
                    chunk_id: format!(
                        "{}-{}-{}-{}-{}",
                        key.company(),
                        key.quarter(),
                        key.year(),
                        draft.section,
                        n
                    ),
                    url: url.to_string(),
                    section: draft.section,
                    company: key.company().to_string(),
                    quarter: key.quarter().to_string(),
                    year: key.year(),
                    call_ts: call_ts.to_string(),
                    snippet: (!snippet.is_empty()).then_some(snippet),
                    primary_speakers: primary_speakers(&draft.participants),
                    participants: draft.participants,
                    text: draft.text,
                    start_token,
                    end_token: tokens_so_far,
                })
            })
            .collect()
    }
}

/// One participant is primary whatever their type; otherwise only executives are.
pub fn primary_speakers(participants: &[Speaker]) -> Vec<Speaker> {
    if participants.len() == 1 {
        return participants.to_vec();
    }
    participants
        .iter()
        .filter(|s| s.kind == SpeakerType::Executive)
        .cloned()
        .collect()
}

struct Selectors {
    article_body: Selector,
    h2: Selector,
    strong: Selector,
    em: Selector,
    date: Selector,
    time: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            article_body: Selector::parse("div.article-body").expect("article body selector"),
            h2: Selector::parse("h2").expect("h2 selector"),
            strong: Selector::parse("strong").expect("strong selector"),
            em: Selector::parse("em").expect("em selector"),
            date: Selector::parse("span#date").expect("date selector"),
            time: Selector::parse("em#time").expect("time selector"),
        }
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    let mut raw = String::new();
    for piece in element.text() {
        raw.push_str(piece);
    }
    collapse_whitespace(&raw)
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}
