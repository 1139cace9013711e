//! Repairs vendor schemas that mark CHOICE alternatives OPTIONAL.
//!
//! ASN.1 forbids OPTIONAL on CHOICE alternatives, but several vendor CDR
//! modules carry it anyway. Removing the keyword inside CHOICE blocks makes
//! the module compile without changing what it describes.

use std::fmt;
use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

static CHOICE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)CHOICE\s*\{.*?\}").unwrap());
static OPTIONAL_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+OPTIONAL").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizeMode {
    /// A CHOICE block ends at the first `}` after its opening brace, even
    /// when that brace closes a nested SEQUENCE. Reproduces reports made
    /// with the earlier tooling byte for byte.
    #[default]
    Legacy,
    /// Braces are matched, so only alternatives of the innermost CHOICE
    /// lose their OPTIONAL.
    Nested,
}

/// Schema text that has been through [`sanitize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedSchema(String);

impl SanitizedSchema {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SanitizedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn sanitize(source: &str) -> SanitizedSchema {
    sanitize_with(source, SanitizeMode::default())
}

pub fn sanitize_with(source: &str, mode: SanitizeMode) -> SanitizedSchema {
    let (text, removed) = match mode {
        SanitizeMode::Legacy => legacy(source),
        SanitizeMode::Nested => nested(source),
    };
    debug!("removed {removed} OPTIONAL markers from CHOICE blocks ({mode:?} mode)");
    SanitizedSchema(text)
}

fn legacy(source: &str) -> (String, usize) {
    let mut removed = 0;
    let text = CHOICE_SPAN.replace_all(source, |span: &regex::Captures| {
        let span = &span[0];
        removed += OPTIONAL_MARKER.find_iter(span).count();
        OPTIONAL_MARKER.replace_all(span, "").into_owned()
    });
    (text.into_owned(), removed)
}

fn is_word_byte(bytes: &[u8], i: usize) -> bool {
    match bytes.get(i) {
        Some(b) if b.is_ascii_alphanumeric() || *b == b'_' => true,
        // a hyphen joins two word characters, "--" starts a comment
        Some(b'-') => bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphanumeric()),
        _ => false,
    }
}

// index just past the comment starting at `start`
fn comment_end(bytes: &[u8], start: usize) -> usize {
    if bytes[start + 1] == b'-' {
        // "--" runs to the end of the line or to the next "--"
        let mut i = start + 2;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' => return i + 1,
                b'-' if bytes.get(i + 1) == Some(&b'-') => return i + 2,
                _ => i += 1,
            }
        }
        return bytes.len();
    }
    // block comments nest
    let mut depth = 0;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn string_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if bytes.get(i + 1) == Some(&b'"') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn nested(source: &str) -> (String, usize) {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    // one entry per open brace: does it open a CHOICE?
    let mut blocks: Vec<bool> = Vec::new();
    let mut after_choice = false;
    // removals never reach back past this point
    let mut floor = 0;
    let mut copied = 0;
    let mut removed = 0;

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        if (b == b'-' && next == Some(b'-')) || (b == b'/' && next == Some(b'*')) {
            i = comment_end(bytes, i);
            floor = i;
            continue;
        }
        if b == b'"' {
            i = string_end(bytes, i);
            floor = i;
            after_choice = false;
            continue;
        }
        if is_word_byte(bytes, i) {
            let start = i;
            while is_word_byte(bytes, i) {
                i += 1;
            }
            match &source[start..i] {
                "CHOICE" => after_choice = true,
                "OPTIONAL" if blocks.last() == Some(&true) => {
                    let mut cut = start;
                    while cut > floor.max(copied) && bytes[cut - 1].is_ascii_whitespace() {
                        cut -= 1;
                    }
                    out.push_str(&source[copied..cut]);
                    copied = i;
                    removed += 1;
                }
                _ => after_choice = false,
            }
            continue;
        }
        match b {
            b'{' => {
                blocks.push(after_choice);
                after_choice = false;
            }
            b'}' => {
                blocks.pop();
                after_choice = false;
            }
            b if b.is_ascii_whitespace() => {}
            _ => after_choice = false,
        }
        i += 1;
    }
    out.push_str(&source[copied..]);
    (out, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NESTED: &str = "Record ::= CHOICE {
    a SEQUENCE { x INTEGER OPTIONAL },
    b BOOLEAN OPTIONAL
}";

    #[test]
    fn test_choice_alternatives_lose_optional() {
        for mode in [SanitizeMode::Legacy, SanitizeMode::Nested] {
            assert_eq!(
                sanitize_with("CHOICE { a INTEGER OPTIONAL, b BOOLEAN }", mode).as_str(),
                "CHOICE { a INTEGER, b BOOLEAN }"
            );
        }
    }

    #[test]
    fn test_text_outside_choice_is_untouched() {
        let schema = "A ::= SEQUENCE {\n\tx  INTEGER   OPTIONAL,\n\ty [1] C OPTIONAL }\n\
                      C ::= CHOICE {\n\tp [0] NULL\n\t\tOPTIONAL,\n\tq [1] NULL }\n   -- trailing  \n";
        let expected = "A ::= SEQUENCE {\n\tx  INTEGER   OPTIONAL,\n\ty [1] C OPTIONAL }\n\
                        C ::= CHOICE {\n\tp [0] NULL,\n\tq [1] NULL }\n   -- trailing  \n";
        for mode in [SanitizeMode::Legacy, SanitizeMode::Nested] {
            assert_eq!(sanitize_with(schema, mode).as_str(), expected);
        }
    }

    #[test]
    fn test_nested_mode_matches_braces() {
        assert_eq!(
            sanitize_with(NESTED, SanitizeMode::Nested).as_str(),
            "Record ::= CHOICE {
    a SEQUENCE { x INTEGER OPTIONAL },
    b BOOLEAN
}"
        );
    }

    #[test]
    fn test_legacy_mode_stops_at_first_brace() {
        // the span ends inside the SEQUENCE, so the wrong OPTIONAL goes
        let expected = "Record ::= CHOICE {
    a SEQUENCE { x INTEGER },
    b BOOLEAN OPTIONAL
}";
        assert_eq!(sanitize_with(NESTED, SanitizeMode::Legacy).as_str(), expected);
        assert_eq!(sanitize(NESTED).as_str(), expected);
    }

    #[test]
    fn test_nested_mode_skips_comments_and_partial_words() {
        let schema = "C ::= CHOICE { -- a } OPTIONAL here\n\
                      a INTEGER OPTIONALLY, /* { OPTIONAL } */ b NOCHOICE OPTIONAL,\n\
                      c NULL\n    OPTIONAL }\n\
                      D ::= MYCHOICE { e NULL OPTIONAL }";
        let expected = "C ::= CHOICE { -- a } OPTIONAL here\n\
                        a INTEGER OPTIONALLY, /* { OPTIONAL } */ b NOCHOICE,\n\
                        c NULL }\n\
                        D ::= MYCHOICE { e NULL OPTIONAL }";
        assert_eq!(sanitize_with(schema, SanitizeMode::Nested).as_str(), expected);
    }

    #[test]
    fn test_whitespace_before_comment_is_kept() {
        assert_eq!(
            sanitize_with("CHOICE { a NULL -- note\n OPTIONAL }", SanitizeMode::Nested).as_str(),
            "CHOICE { a NULL -- note\n }"
        );
    }

    #[test]
    fn test_sanitized_schema_compiles() {
        let schema = "M DEFINITIONS IMPLICIT TAGS ::= BEGIN
            C ::= CHOICE { a [0] INTEGER OPTIONAL, b [1] BOOLEAN OPTIONAL }
            END";
        assert!(ber_schema::Schema::compile(schema).is_err());
        assert!(ber_schema::Schema::compile(sanitize(schema).as_str()).is_ok());
    }

    fn schema_text() -> impl Strategy<Value = String> {
        let token = prop::sample::select(vec![
            "CHOICE", "SEQUENCE", "OPTIONAL", "INTEGER", "a", "{", "}", ",", " ", "\n", "\t",
            "-- c\n", "/* } */", "::=",
        ]);
        proptest::collection::vec(token, 0..64).prop_map(|tokens| tokens.concat())
    }

    proptest! {
        #[test]
        fn prop_sanitize_is_idempotent(schema in schema_text()) {
            for mode in [SanitizeMode::Legacy, SanitizeMode::Nested] {
                let once = sanitize_with(&schema, mode);
                let twice = sanitize_with(once.as_str(), mode);
                prop_assert_eq!(once, twice);
            }
        }

        #[test]
        fn prop_schemas_without_choice_are_unchanged(schema in schema_text()) {
            prop_assume!(!schema.contains("CHOICE"));
            for mode in [SanitizeMode::Legacy, SanitizeMode::Nested] {
                let sanitized = sanitize_with(&schema, mode);
                prop_assert_eq!(sanitized.as_str(), schema.as_str());
            }
        }
    }
}
