//! Parsing of the assistant's `stream-json` event lines.
//!
//! Only a handful of facts are needed from the stream: the session id (the
//! resume token), displayable progress, and usage totals. Lines that are not
//! JSON objects are ignored.

use serde_json::Value;

/// Displayable summary of one stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Init {
        session_id: String,
        model: String,
    },
    Text(String),
    Tool {
        name: String,
        detail: String,
    },
    Result {
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        error: Option<String>,
    },
}

/// Running totals over every `result` event of an attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub tool_calls: u64,
}

impl StreamStats {
    pub fn is_empty(&self) -> bool {
        self.tool_calls == 0 && self.input_tokens == 0 && self.output_tokens == 0
    }

    pub fn record(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Tool { .. } => self.tool_calls += 1,
            StreamEvent::Result {
                input_tokens,
                output_tokens,
                cost_usd,
                ..
            } => {
                self.input_tokens += input_tokens;
                self.output_tokens += output_tokens;
                self.cost_usd += cost_usd;
            }
            StreamEvent::Init { .. } | StreamEvent::Text(_) => {}
        }
    }
}

/// Parse one line into zero or more displayable events.
pub fn parse_line(line: &str) -> Vec<StreamEvent> {
    let Ok(data) = serde_json::from_str::<Value>(line.trim()) else {
        return Vec::new();
    };
    match data.get("type").and_then(Value::as_str) {
        Some("system") if data.get("subtype").and_then(Value::as_str) == Some("init") => {
            vec![StreamEvent::Init {
                session_id: str_field(&data, "session_id").to_string(),
                model: str_field(&data, "model").to_string(),
            }]
        }
        Some("result") => vec![parse_result(&data)],
        Some("assistant") => parse_assistant(&data),
        _ => Vec::new(),
    }
}

/// Last `session_id` exposed anywhere in the captured stream.
pub fn find_session_id(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .filter_map(|data| {
            data.get("session_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
        .last()
}

fn parse_result(data: &Value) -> StreamEvent {
    let usage = data.get("usage");
    let count = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    let error = data
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        .then(|| {
            let mut details = Vec::new();
            if let Some(code) = data.get("error_code").filter(|c| !c.is_null()) {
                details.push(format!("code={}", code.as_str().map_or(code.to_string(), str::to_string)));
            }
            let subtype = str_field(data, "subtype");
            if !subtype.is_empty() {
                details.push(format!("type={subtype}"));
            }
            let message = str_field(data, "result");
            if !message.is_empty() {
                details.push(truncate(message, 200));
            }
            details.join(" | ")
        });
    StreamEvent::Result {
        input_tokens: count("input_tokens") + count("cache_read_input_tokens"),
        output_tokens: count("output_tokens"),
        cost_usd: data
            .get("total_cost_usd")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        error,
    }
}

fn parse_assistant(data: &Value) -> Vec<StreamEvent> {
    let Some(content) = data
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    content
        .iter()
        .filter_map(|item| match item.get("type").and_then(Value::as_str) {
            Some("text") => {
                let text = str_field(item, "text").trim();
                (!text.is_empty()).then(|| StreamEvent::Text(text.to_string()))
            }
            Some("tool_use") => {
                let name = str_field(item, "name").to_string();
                let detail = item
                    .get("input")
                    .map(|input| tool_detail(&name, input))
                    .unwrap_or_default();
                Some(StreamEvent::Tool { name, detail })
            }
            _ => None,
        })
        .collect()
}

fn tool_detail(name: &str, input: &Value) -> String {
    let field = |key: &str| str_field(input, key).to_string();
    match name {
        "Read" | "Write" | "Edit" => field("file_path"),
        "Bash" => {
            let description = field("description");
            if description.is_empty() {
                truncate(str_field(input, "command"), 120)
            } else {
                description
            }
        }
        "Grep" => format!("{} in {}", field("pattern"), {
            let path = field("path");
            if path.is_empty() { ".".to_string() } else { path }
        }),
        "Glob" => field("pattern"),
        "Task" => field("description"),
        "WebFetch" => field("url"),
        "WebSearch" => field("query"),
        "Skill" => format!("/{}", field("skill")),
        _ => String::new(),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    const INIT: &str =
        r#"{"type":"system","subtype":"init","session_id":"abc-123","model":"claude-opus"}"#;
    const RESULT: &str = r#"{"type":"result","subtype":"success","is_error":false,"session_id":"abc-456","total_cost_usd":0.25,"usage":{"input_tokens":100,"cache_read_input_tokens":50,"output_tokens":20}}"#;

    #[test]
    fn parses_init_event() {
        assert_eq!(
            parse_line(INIT),
            vec![StreamEvent::Init {
                session_id: "abc-123".to_string(),
                model: "claude-opus".to_string(),
            }]
        );
    }

    #[test]
    fn parses_assistant_text_and_tools() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":" hello "},{"type":"tool_use","name":"Bash","input":{"command":"cargo test","description":"Run tests"}}]}}"#;
        assert_eq!(
            parse_line(line),
            vec![
                StreamEvent::Text("hello".to_string()),
                StreamEvent::Tool {
                    name: "Bash".to_string(),
                    detail: "Run tests".to_string(),
                },
            ]
        );
    }

    #[test]
    fn result_counts_cache_reads_as_input() {
        let events = parse_line(RESULT);
        let mut stats = StreamStats::default();
        stats.record(&events[0]);
        assert_eq!(stats.input_tokens, 150);
        assert_eq!(stats.output_tokens, 20);
        assert!((stats.cost_usd - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn error_result_carries_details() {
        let line = r#"{"type":"result","subtype":"error_during_execution","is_error":true,"result":"API Error: 529"}"#;
        match &parse_line(line)[0] {
            StreamEvent::Result { error, .. } => {
                let error = error.as_deref().expect("error details");
                assert!(error.contains("type=error_during_execution"));
                assert!(error.contains("API Error: 529"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn ignores_non_json_lines() {
        assert!(parse_line("plain text").is_empty());
        assert!(parse_line("").is_empty());
    }

    #[test]
    fn last_session_id_wins() {
        let output = format!("noise\n{INIT}\n{RESULT}\n");
        assert_eq!(find_session_id(&output), Some("abc-456".to_string()));
        assert_eq!(find_session_id("no json here"), None);
    }
}
