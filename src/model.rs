//! Chunk and speaker records shared by the parser, processor and index clients.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::TranscriptKey;

/// Coarse speaker classification used to bias retrieval toward company representatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerType {
    /// Company executive (CEO, CFO, VP, ...).
    Executive,
    /// Sell-side or buy-side analyst.
    Analyst,
    /// Call operator.
    Operator,
    /// Investor relations host.
    InvestorRelations,
    /// Anyone the title table could not place.
    Other,
}

impl SpeakerType {
    /// Wire name used in chunk metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Executive => "executive",
            Self::Analyst => "analyst",
            Self::Operator => "operator",
            Self::InvestorRelations => "investor_relations",
            Self::Other => "other",
        }
    }

    /// Operator and investor-relations lines delimit content instead of carrying it.
    pub fn is_moderator(self) -> bool {
        matches!(self, Self::Operator | Self::InvestorRelations)
    }
}

impl fmt::Display for SpeakerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named call participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    /// Display name as printed in the transcript.
    pub name: String,
    /// Classified type.
    #[serde(rename = "type")]
    pub kind: SpeakerType,
    /// Short role label (`CEO`, `Analyst`, raw title for unrecognized officers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Speaker {
    /// Builds a speaker record.
    pub fn new(name: impl Into<String>, kind: SpeakerType, role: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            role,
        }
    }
}

/// Transcript section a chunk was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Scripted opening remarks.
    PreparedRemarks,
    /// Question-and-answer session.
    Qa,
}

impl Section {
    /// Wire name used in chunk ids and metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreparedRemarks => "prepared_remarks",
            Self::Qa => "qa",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker-attributed span of transcript text; the unit of embedding and indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    /// `{company}-{quarter}-{year}-{section}-{n}`.
    pub chunk_id: String,
    /// Source page URL.
    pub url: String,
    /// Section of the call.
    pub section: Section,
    /// Lowercase company ticker.
    pub company: String,
    /// Lowercase quarter label.
    pub quarter: String,
    /// Fiscal year.
    pub year: u16,
    /// Call start time, RFC 3339 with offset.
    pub call_ts: String,
    /// Chunk body.
    pub text: String,
    /// Sentence-bounded preview of `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Participants that should weigh retrieval, always a subset of `participants`.
    pub primary_speakers: Vec<Speaker>,
    /// Everyone who spoke in this chunk, in order of first appearance.
    pub participants: Vec<Speaker>,
    /// Inclusive token offset within the transcript.
    pub start_token: usize,
    /// Exclusive token offset within the transcript.
    pub end_token: usize,
}

impl TranscriptChunk {
    /// Manifest slug of the transcript this chunk came from.
    pub fn transcript_slug(&self) -> String {
        self.key().slug()
    }

    /// Identity of the owning transcript.
    pub fn key(&self) -> TranscriptKey {
        TranscriptKey::new(&self.company, &self.quarter, self.year)
    }

    /// Number of tokens covered by this chunk.
    pub fn token_len(&self) -> usize {
        self.end_token.saturating_sub(self.start_token)
    }

    /// Flattened metadata stored alongside the vector.
    pub fn metadata(&self) -> ChunkMetadata {
        let primary = FlatSpeakers::from_speakers(&self.primary_speakers);
        let participants = FlatSpeakers::from_speakers(&self.participants);
        ChunkMetadata {
            url: self.url.clone(),
            section: self.section,
            company: self.company.clone(),
            quarter: self.quarter.clone(),
            year: self.year.to_string(),
            snippet: self.snippet.clone(),
            call_ts: self.call_ts.clone(),
            primary_names: primary.names,
            primary_types: primary.types,
            primary_roles: primary.roles,
            participant_names: participants.names,
            participant_types: participants.types,
            participant_roles: participants.roles,
            start_token: self.start_token,
            end_token: self.end_token,
        }
    }
}

/// Index-side metadata, flattened because vector stores only accept scalar and
/// string-list values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source page URL.
    pub url: String,
    /// Section of the call.
    pub section: Section,
    /// Lowercase company ticker.
    pub company: String,
    /// Lowercase quarter label.
    pub quarter: String,
    /// Fiscal year as a string, matching existing index contents.
    pub year: String,
    /// Optional preview text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Call start time.
    pub call_ts: String,
    /// Names of primary speakers.
    pub primary_names: Vec<String>,
    /// Types of primary speakers.
    pub primary_types: Vec<String>,
    /// Roles of primary speakers that have one.
    pub primary_roles: Vec<String>,
    /// Names of all participants.
    pub participant_names: Vec<String>,
    /// Types of all participants.
    pub participant_types: Vec<String>,
    /// Roles of all participants that have one.
    pub participant_roles: Vec<String>,
    /// Inclusive token offset.
    pub start_token: usize,
    /// Exclusive token offset.
    pub end_token: usize,
}

struct FlatSpeakers {
    names: Vec<String>,
    types: Vec<String>,
    roles: Vec<String>,
}

impl FlatSpeakers {
    fn from_speakers(speakers: &[Speaker]) -> Self {
        Self {
            names: speakers.iter().map(|s| s.name.clone()).collect(),
            types: speakers.iter().map(|s| s.kind.as_str().to_string()).collect(),
            roles: speakers.iter().filter_map(|s| s.role.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_chunk() -> TranscriptChunk {
        let ceo = Speaker::new("Tim Cook", SpeakerType::Executive, Some("CEO".into()));
        let analyst = Speaker::new("Jane Doe", SpeakerType::Analyst, Some("Analyst".into()));
        TranscriptChunk {
            chunk_id: "aapl-q1-2024-qa-3".into(),
            url: "https://example.com/aapl-q1-2024-call".into(),
            section: Section::Qa,
            company: "aapl".into(),
            quarter: "q1".into(),
            year: 2024,
            call_ts: "2024-02-01T17:00:00-05:00".into(),
            text: "Question and answer.".into(),
            snippet: None,
            primary_speakers: vec![ceo.clone()],
            participants: vec![analyst, ceo],
            start_token: 40,
            end_token: 52,
        }
    }

    #[test]
    fn metadata_flattens_speakers() {
        let meta = sample_chunk().metadata();
        assert_eq!(meta.year, "2024");
        assert_eq!(meta.primary_names, vec!["Tim Cook"]);
        assert_eq!(meta.participant_types, vec!["analyst", "executive"]);
        assert_eq!(meta.participant_roles, vec!["Analyst", "CEO"]);
    }

    #[test]
    fn metadata_omits_missing_snippet() {
        let value = serde_json::to_value(sample_chunk().metadata()).unwrap();
        assert!(value.get("snippet").is_none());
        assert_eq!(value["section"], "qa");
    }

    #[test]
    fn chunk_reports_owner_slug_and_length() {
        let chunk = sample_chunk();
        assert_eq!(chunk.transcript_slug(), "aapl-q1-2024");
        assert_eq!(chunk.token_len(), 12);
    }
}
