use crate::domain::{Message, TranscriptFile};
use thiserror::Error;

pub const TRANSCRIPT_EXTENSION: &str = "jsonl";
pub const AGENT_FILE_PREFIX: &str = "agent-";
pub const PARSE_ERROR_TYPE: &str = "parse_error";

#[derive(Debug, Error, Eq, PartialEq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier contains a path separator or traversal sequence: {0}")]
    Traversal(String),
}

/// Decodes every non-blank line of a transcript as an independent JSON record.
///
/// Never fails: a line that does not decode becomes a `parse_error` record
/// carrying the raw text, so the output length always equals the number of
/// non-blank lines.
pub fn parse_transcript_lines(text: &str) -> Vec<Message> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .map(parse_transcript_line)
        .collect()
}

fn parse_transcript_line(line: &str) -> Message {
    match serde_json::from_str::<Message>(line) {
        Ok(value) => value,
        Err(error) => parse_error_record(line, &error),
    }
}

fn parse_error_record(line: &str, error: &serde_json::Error) -> Message {
    serde_json::json!({
        "type": PARSE_ERROR_TYPE,
        "raw": line,
        "error": error.to_string(),
    })
}

pub fn is_parse_error_record(message: &Message) -> bool {
    message.get("type").and_then(Message::as_str) == Some(PARSE_ERROR_TYPE)
}

/// Classifies a directory entry name. Returns `None` for anything that is not
/// a transcript.
pub fn classify_transcript_file_name(file_name: &str) -> Option<TranscriptFile> {
    let stem = file_name
        .strip_suffix(TRANSCRIPT_EXTENSION)?
        .strip_suffix('.')?;
    if stem.is_empty() {
        return None;
    }

    if let Some(agent_id) = stem.strip_prefix(AGENT_FILE_PREFIX) {
        if agent_id.is_empty() {
            return None;
        }
        return Some(TranscriptFile::Agent {
            id: agent_id.to_string(),
        });
    }

    Some(TranscriptFile::Session {
        id: stem.to_string(),
    })
}

pub fn session_file_name(session_id: &str) -> String {
    format!("{session_id}.{TRANSCRIPT_EXTENSION}")
}

/// Accepts a caller-supplied project name or session id only if it names a
/// single path component.
pub fn validate_identifier(value: &str) -> Result<&str, IdentifierError> {
    if value.is_empty() {
        return Err(IdentifierError::Empty);
    }
    let rejected = value == "."
        || value.contains("..")
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0');
    if rejected {
        return Err(IdentifierError::Traversal(value.to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_record_per_non_blank_line() {
        let text = "{\"type\":\"user\"}\n\n   \n{\"type\":\"assistant\"}\r\n\n";
        let messages = parse_transcript_lines(text);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["type"], "user");
        assert_eq!(messages[1]["type"], "assistant");
    }

    #[test]
    fn malformed_line_becomes_parse_error_record() {
        let text = "{\"type\":\"user\"}\nnot json at all\n{\"type\":\"assistant\"";
        let messages = parse_transcript_lines(text);
        assert_eq!(messages.len(), 3);

        assert!(!is_parse_error_record(&messages[0]));
        assert!(is_parse_error_record(&messages[1]));
        assert_eq!(messages[1]["raw"], "not json at all");
        assert!(messages[1]["error"].as_str().is_some_and(|e| !e.is_empty()));

        // A torn trailing write is kept as a sentinel too.
        assert!(is_parse_error_record(&messages[2]));
        assert_eq!(messages[2]["raw"], "{\"type\":\"assistant\"");
    }

    #[test]
    fn reparsing_is_deterministic() {
        let text = "{\"a\":1}\n{oops\n[1,2,3]\n\"bare string\"\n";
        assert_eq!(parse_transcript_lines(text), parse_transcript_lines(text));
        assert_eq!(parse_transcript_lines(text).len(), 4);
    }

    #[test]
    fn empty_input_yields_no_records() {
        assert!(parse_transcript_lines("").is_empty());
        assert!(parse_transcript_lines("\n\n \t\n").is_empty());
    }

    #[test]
    fn lossy_decoded_garbage_is_still_total() {
        let bytes = [0xff, 0xfe, b'\n', b'{', b'}', b'\n', 0x00, 0x01];
        let text = String::from_utf8_lossy(&bytes);
        let messages = parse_transcript_lines(&text);
        assert_eq!(messages.len(), 3);
        assert!(is_parse_error_record(&messages[0]));
        assert_eq!(messages[1], serde_json::json!({}));
        assert!(is_parse_error_record(&messages[2]));
    }

    #[test]
    fn classifies_session_and_agent_files() {
        assert_eq!(
            classify_transcript_file_name("0b7c2a8e-1f.jsonl"),
            Some(TranscriptFile::Session {
                id: "0b7c2a8e-1f".to_string()
            })
        );
        assert_eq!(
            classify_transcript_file_name("agent-x1.jsonl"),
            Some(TranscriptFile::Agent {
                id: "x1".to_string()
            })
        );
        assert_eq!(classify_transcript_file_name("agent-.jsonl"), None);
        assert_eq!(classify_transcript_file_name(".jsonl"), None);
        assert_eq!(classify_transcript_file_name("notes.json"), None);
        assert_eq!(classify_transcript_file_name("sjsonl"), None);
        assert_eq!(classify_transcript_file_name("sessions-index.json"), None);
    }

    #[test]
    fn rejects_traversal_identifiers() {
        assert_eq!(validate_identifier("demo"), Ok("demo"));
        assert_eq!(
            validate_identifier("-Users-me-src-project"),
            Ok("-Users-me-src-project")
        );
        assert_eq!(validate_identifier(""), Err(IdentifierError::Empty));
        for bad in [".", "..", "../etc", "a/b", "a\\b", "x..y", "nul\0"] {
            assert!(validate_identifier(bad).is_err(), "accepted {bad:?}");
        }
    }
}
