//! Deterministic classification of assistant output.
//!
//! The assistant is opaque: the only contract is the text it prints and its
//! exit code. Classification walks an ordered rule list top to bottom and the
//! first match wins. Matching is case-insensitive.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::core::types::Outcome;

/// Marker the task prompt prints once all work is committed.
pub const COMPLETION_PHRASE: &str = "<promise>COMPLETE</promise>";
/// Markers the task prompt prints when it stops for human input.
pub const HOLD_MARKERS: &[&str] = &["<promise>ON_HOLD</promise>", "<promise>BLOCKED</promise>"];

/// One classification rule: any needle (substring) or an HTTP status code.
///
/// Status codes match as whole numbers anywhere in the text, except as the
/// value of a JSON numeric field (see [`numeric_fields_removed`]).
struct Rule {
    outcome: Outcome,
    needles: &'static [&'static str],
    status_codes: &'static [&'static str],
}

/// Priority-ordered rules. Order is the contract.
const RULES: &[Rule] = &[
    Rule {
        outcome: Outcome::Completed,
        needles: &[COMPLETION_PHRASE],
        status_codes: &[],
    },
    Rule {
        outcome: Outcome::ContextOverflow,
        needles: &[
            "prompt is too long",
            "context_length_exceeded",
            "context window",
            "maximum context length",
            "exceed context limit",
        ],
        status_codes: &[],
    },
    Rule {
        outcome: Outcome::AuthExpired,
        needles: &[
            "unauthorized",
            "authentication_error",
            "oauth token has expired",
            "invalid api key",
        ],
        status_codes: &["401"],
    },
    Rule {
        outcome: Outcome::RateLimit,
        needles: &[
            "rate_limit_error",
            "rate limit",
            "too many requests",
            "usage limit reached",
        ],
        status_codes: &["429"],
    },
    Rule {
        outcome: Outcome::Overloaded,
        needles: &["overloaded"],
        status_codes: &["529"],
    },
    Rule {
        outcome: Outcome::ApiTimeout,
        needles: &[
            "request timed out",
            "api_timeout",
            "econnreset",
            "etimedout",
            "socket hang up",
            "connection error",
        ],
        status_codes: &[],
    },
    Rule {
        outcome: Outcome::Forbidden,
        needles: &["permission_error", "forbidden"],
        status_codes: &["403"],
    },
    Rule {
        outcome: Outcome::OnHold,
        needles: HOLD_MARKERS,
        status_codes: &[],
    },
];

struct CompiledRule {
    outcome: Outcome,
    needles: Vec<String>,
    status_code: Option<Regex>,
}

impl CompiledRule {
    fn matches(&self, lower: &str, codes_text: &str) -> bool {
        self.needles.iter().any(|needle| lower.contains(needle.as_str()))
            || self
                .status_code
                .as_ref()
                .is_some_and(|re| re.is_match(codes_text))
    }
}

static COMPILED: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|rule| CompiledRule {
            outcome: rule.outcome,
            needles: rule.needles.iter().map(|n| n.to_lowercase()).collect(),
            status_code: (!rule.status_codes.is_empty()).then(|| {
                let codes = rule.status_codes.join("|");
                Regex::new(&format!(r"\b(?:{codes})\b")).expect("status code pattern is valid")
            }),
        })
        .collect()
});

static JSON_NUMBER_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([a-z0-9_]+)"\s*:\s*-?\d+(?:\.\d+)?"#).expect("json field pattern is valid")
});

/// Blank out `"key": <number>` pairs unless the key names a status code.
///
/// The event stream is full of counters (`"input_tokens":429`,
/// `"duration_ms":403`) that would otherwise read as HTTP statuses.
fn numeric_fields_removed(lower: &str) -> Cow<'_, str> {
    JSON_NUMBER_FIELD.replace_all(lower, |caps: &Captures<'_>| {
        let key = &caps[1];
        if key.contains("status") || key.ends_with("code") {
            caps[0].to_string()
        } else {
            String::new()
        }
    })
}

/// Classify one attempt from its captured output.
///
/// The exit code never overrides a marker: a completion phrase wins even on a
/// non-zero exit, and `Unknown` is returned when nothing matched. Callers use
/// the exit code to decide what `Unknown` means.
pub fn classify_output(output: &str, _exit_code: Option<i32>) -> Outcome {
    let lower = output.to_lowercase();
    let codes_text = numeric_fields_removed(&lower);
    COMPILED
        .iter()
        .find(|rule| rule.matches(&lower, &codes_text))
        .map(|rule| rule.outcome)
        .unwrap_or(Outcome::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_phrase_wins_over_everything() {
        let output = format!("HTTP 403 forbidden\n429 rate limit\n{COMPLETION_PHRASE}\n");
        assert_eq!(classify_output(&output, Some(1)), Outcome::Completed);
    }

    #[test]
    fn completion_is_case_insensitive() {
        assert_eq!(
            classify_output("done <PROMISE>complete</PROMISE>", Some(0)),
            Outcome::Completed
        );
    }

    #[test]
    fn context_overflow_beats_api_errors() {
        let output = r#"{"type":"result","is_error":true,"result":"Prompt is too long"} 429"#;
        assert_eq!(classify_output(output, Some(1)), Outcome::ContextOverflow);
    }

    #[test]
    fn classifies_each_transient_error() {
        let cases = [
            ("API Error: 401 {\"type\":\"error\"}", Outcome::AuthExpired),
            ("OAuth token has expired", Outcome::AuthExpired),
            ("API Error: 429 rate_limit_error", Outcome::RateLimit),
            ("Claude usage limit reached", Outcome::RateLimit),
            ("API Error: 529 overloaded_error", Outcome::Overloaded),
            ("API Error: Request timed out.", Outcome::ApiTimeout),
            ("read ECONNRESET", Outcome::ApiTimeout),
        ];
        for (output, expected) in cases {
            assert_eq!(classify_output(output, Some(1)), expected, "{output}");
        }
    }

    #[test]
    fn auth_outranks_rate_limit_and_overload() {
        assert_eq!(
            classify_output("429 then 401 unauthorized", Some(1)),
            Outcome::AuthExpired
        );
        assert_eq!(
            classify_output("overloaded, rate limit", Some(1)),
            Outcome::RateLimit
        );
    }

    #[test]
    fn forbidden_is_detected_after_transient_errors() {
        assert_eq!(
            classify_output("API Error: 403 permission_error", Some(1)),
            Outcome::Forbidden
        );
        assert_eq!(
            classify_output("status 403, then API Error: 529", Some(1)),
            Outcome::Overloaded
        );
    }

    #[test]
    fn bare_status_codes_are_markers() {
        assert_eq!(classify_output("429", Some(0)), Outcome::RateLimit);
        assert_eq!(classify_output("403", Some(0)), Outcome::Forbidden);
        assert_eq!(classify_output("HTTP 403", Some(1)), Outcome::Forbidden);
        assert_eq!(
            classify_output("got 429 Too Many Requests", Some(1)),
            Outcome::RateLimit
        );
        assert_eq!(
            classify_output("Too many requests, slow down", Some(1)),
            Outcome::RateLimit
        );
    }

    #[test]
    fn status_codes_need_word_boundaries() {
        assert_eq!(classify_output("API Error: 14290", Some(1)), Outcome::Unknown);
        assert_eq!(classify_output("error id=4011", Some(1)), Outcome::Unknown);
        assert_eq!(classify_output("took 5290ms", Some(0)), Outcome::Unknown);
    }

    #[test]
    fn json_counters_are_not_status_codes() {
        assert_eq!(
            classify_output(r#"{"usage":{"input_tokens":429,"output_tokens":403}}"#, Some(0)),
            Outcome::Unknown
        );
        assert_eq!(
            classify_output(r#"{"duration_ms": 529, "num_turns": 401}"#, Some(0)),
            Outcome::Unknown
        );
        assert_eq!(
            classify_output(r#"{"error":{"status":429}}"#, Some(1)),
            Outcome::RateLimit
        );
        assert_eq!(
            classify_output(r#"{"status_code":403}"#, Some(1)),
            Outcome::Forbidden
        );
    }

    #[test]
    fn hold_marker_is_on_hold() {
        assert_eq!(
            classify_output("waiting on design <promise>ON_HOLD</promise>", Some(0)),
            Outcome::OnHold
        );
        assert_eq!(
            classify_output("<promise>BLOCKED</promise>", Some(0)),
            Outcome::OnHold
        );
    }

    #[test]
    fn no_marker_is_unknown_regardless_of_exit_code() {
        assert_eq!(classify_output("all good", Some(0)), Outcome::Unknown);
        assert_eq!(classify_output("", Some(2)), Outcome::Unknown);
        assert_eq!(classify_output("", None), Outcome::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        let output = "noise\nAPI Error: 529\nmore noise";
        let first = classify_output(output, Some(1));
        let second = classify_output(output, Some(1));
        assert_eq!(first, second);
    }
}
