use earnscrawl::tokenizer::WordTokenizer;
use earnscrawl::{AnomalyLog, Section, SpeakerType, TranscriptKey, TranscriptParser};
use pretty_assertions::assert_eq;

const FIXTURE: &str = include_str!("fixtures/aapl-q1-2024.html");
const URL: &str =
    "https://www.fool.com/earnings/call-transcripts/2024/02/01/apple-aapl-q1-2024-earnings-call-transcript/";

fn parse() -> (Vec<earnscrawl::TranscriptChunk>, Vec<String>) {
    let tokenizer = WordTokenizer;
    let anomalies = AnomalyLog::in_memory();
    let parser = TranscriptParser::new(&tokenizer, &anomalies);
    let key = TranscriptKey::from_url(URL).unwrap();
    let chunks = parser.parse(FIXTURE, &key, URL).unwrap();
    (chunks, anomalies.recorded())
}

fn names(speakers: &[earnscrawl::Speaker]) -> Vec<&str> {
    speakers.iter().map(|s| s.name.as_str()).collect()
}

#[test]
fn emits_speaker_attributed_chunks_in_order() {
    let (chunks, _) = parse();
    let ids: Vec<_> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "aapl-q1-2024-prepared_remarks-0",
            "aapl-q1-2024-prepared_remarks-1",
            "aapl-q1-2024-qa-2",
            "aapl-q1-2024-qa-3",
        ]
    );
    assert_eq!(chunks[0].section, Section::PreparedRemarks);
    assert_eq!(chunks[2].section, Section::Qa);
    assert_eq!(
        chunks[0].text,
        "Thank you, Suhasini. Good afternoon, everyone. Today Apple is reporting revenue of \
         $119.6 billion for the December quarter. We set an all-time revenue record in services."
    );
    assert!(chunks.iter().all(|c| c.call_ts == "2024-02-01T17:00:00-05:00"));
    assert!(chunks.iter().all(|c| c.url == URL));
}

#[test]
fn moderators_never_own_text() {
    let (chunks, _) = parse();
    for chunk in &chunks {
        assert!(chunk.participants.iter().all(|s| !s.kind.is_moderator()));
        assert!(!chunk.text.contains("welcome to the Apple"));
        assert!(!chunk.text.contains("Our next question"));
        assert!(!chunk.text.contains("Duration"));
    }
}

#[test]
fn qa_exchange_groups_speakers_between_operator_lines() {
    let (chunks, _) = parse();
    let exchange = &chunks[2];
    assert_eq!(
        names(&exchange.participants),
        vec!["Erik Woodring", "Tim Cook", "Amit Daryanani"]
    );
    assert_eq!(names(&exchange.primary_speakers), vec!["Tim Cook"]);
    assert_eq!(
        exchange.text,
        "Thanks for taking my question. How should we think about iPhone demand in Greater China? \
         We remain very confident in the long-term opportunity there. \
         A quick follow-up on the installed base, if I may."
    );
}

#[test]
fn roster_fills_in_untitled_speakers() {
    let (chunks, _) = parse();
    let amit = chunks[2]
        .participants
        .iter()
        .find(|s| s.name == "Amit Daryanani")
        .unwrap();
    assert_eq!(amit.kind, SpeakerType::Analyst);
    assert_eq!(amit.role.as_deref(), Some("Analyst"));
}

#[test]
fn unrecognized_officer_titles_are_logged_once() {
    let (chunks, recorded) = parse();
    let kevan = chunks[3]
        .participants
        .iter()
        .find(|s| s.name == "Kevan Parekh")
        .unwrap();
    assert_eq!(kevan.kind, SpeakerType::Executive);
    assert_eq!(kevan.role.as_deref(), Some("Chief Accounting Officer"));
    assert_eq!(names(&chunks[3].primary_speakers), vec!["Luca Maestri", "Kevan Parekh"]);
    assert_eq!(recorded, vec!["kevan parekh -- chief accounting officer".to_string()]);
}

#[test]
fn token_spans_are_contiguous_and_primaries_are_participants() {
    let (chunks, _) = parse();
    assert_eq!(chunks[0].start_token, 0);
    for pair in chunks.windows(2) {
        assert_eq!(pair[0].end_token, pair[1].start_token);
    }
    for chunk in &chunks {
        assert!(chunk.end_token > chunk.start_token);
        for primary in &chunk.primary_speakers {
            assert!(chunk.participants.contains(primary));
        }
        let snippet = chunk.snippet.as_deref().unwrap();
        assert!(chunk.text.starts_with(snippet));
    }
}

#[test]
fn metadata_flattens_speakers() {
    let (chunks, _) = parse();
    let metadata = chunks[2].metadata();
    assert_eq!(metadata.year, "2024");
    assert_eq!(metadata.primary_names, vec!["Tim Cook"]);
    assert_eq!(metadata.participant_types, vec!["analyst", "executive", "analyst"]);
    assert_eq!(metadata.participant_roles, vec!["Analyst", "CEO", "Analyst"]);
}
