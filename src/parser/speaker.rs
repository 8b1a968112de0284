//! Speaker-line classification driven by an ordered title table.

use crate::model::{Speaker, SpeakerType};

struct TitleRule {
    needle: &'static str,
    role: &'static str,
    kind: SpeakerType,
}

/// Evaluated top to bottom; the first needle found in the lowercased speaker line wins,
/// so longer titles must precede the shorter titles they contain.
const TITLE_RULES: &[TitleRule] = &[
    TitleRule {
        needle: "president and chief executive officer",
        role: "President",
        kind: SpeakerType::Executive,
    },
    TitleRule {
        needle: "chief executive officer",
        role: "CEO",
        kind: SpeakerType::Executive,
    },
    TitleRule {
        needle: "chief technology officer",
        role: "CTO",
        kind: SpeakerType::Executive,
    },
    TitleRule {
        needle: "chief financial officer",
        role: "CFO",
        kind: SpeakerType::Executive,
    },
    TitleRule {
        needle: "chief operating officer",
        role: "COO",
        kind: SpeakerType::Executive,
    },
    TitleRule {
        needle: "senior vice president",
        role: "SVP",
        kind: SpeakerType::Executive,
    },
    TitleRule {
        needle: "vice president",
        role: "VP",
        kind: SpeakerType::Executive,
    },
    TitleRule {
        needle: "analyst",
        role: "Analyst",
        kind: SpeakerType::Analyst,
    },
    TitleRule {
        needle: "operator",
        role: "Operator",
        kind: SpeakerType::Operator,
    },
    TitleRule {
        needle: "investor relations",
        role: "Investor Relations",
        kind: SpeakerType::InvestorRelations,
    },
];

/// A bolded speaker paragraph as it appears in the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerLine {
    /// Contents of the `<strong>` element.
    pub name: String,
    /// Whole paragraph text, name and title included.
    pub line: String,
    /// Contents of the `<em>` title element, when present.
    pub title: Option<String>,
}

/// Result of classifying a speaker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// The classified speaker.
    pub speaker: Speaker,
    /// Set when an officer title was accepted without a table match; the lowercased line
    /// that should be recorded in the anomaly log.
    pub unrecognized_title: Option<String>,
}

/// Classifies a speaker line using [`TITLE_RULES`] with the `chief ... officer` fallback.
pub fn classify(line: &SpeakerLine) -> Classified {
    let lowered = line.line.to_lowercase();
    if let Some(rule) = TITLE_RULES
        .iter()
        .find(|rule| lowered.contains(rule.needle))
    {
        return Classified {
            speaker: Speaker::new(&line.name, rule.kind, Some(rule.role.to_string())),
            unrecognized_title: None,
        };
    }

    if lowered.contains("chief") && lowered.contains("officer") {
        let role = line
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| strip_name(&line.line, &line.name));
        return Classified {
            speaker: Speaker::new(&line.name, SpeakerType::Executive, Some(role)),
            unrecognized_title: Some(lowered.trim().to_string()),
        };
    }

    Classified {
        speaker: Speaker::new(&line.name, SpeakerType::Other, None),
        unrecognized_title: None,
    }
}

fn strip_name(line: &str, name: &str) -> String {
    line.strip_prefix(name)
        .unwrap_or(line)
        .trim_start_matches(|c: char| c == '-' || c == '\u{2014}' || c.is_whitespace())
        .trim()
        .to_string()
}
