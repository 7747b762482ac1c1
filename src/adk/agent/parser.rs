// SPDX-License-Identifier: MIT

//! Incremental line parser
//!
//! Classifies streamed model output against a grammar of prefixed fields
//! while it arrives. Input is buffered until a newline; each complete line
//! either opens a new field (it starts with a known prefix) or continues
//! the open one. A new parser is created for every model round.

use crate::adk::error::ParseError;
use serde_json::{Map, Value};

/// How a field's accumulated text becomes its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub prefix: String,
    /// Fields allowed to follow this one. A field without successors keeps
    /// every later line, prefixed or not.
    pub next: Vec<String>,
    /// May open the output
    pub is_start: bool,
    /// Output may end while this field is open
    pub is_end: bool,
    /// Consumed but never reported (closing delimiters)
    pub is_dummy: bool,
    /// Seeing this prefix ends parsing; the field itself is not recorded
    pub halts: bool,
    pub kind: ValueKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            next: Vec::new(),
            is_start: false,
            is_end: false,
            is_dummy: false,
            halts: false,
            kind: ValueKind::Text,
        }
    }

    pub fn next<I, T>(mut self, next: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.next = next.into_iter().map(Into::into).collect();
        self
    }

    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    pub fn end(mut self) -> Self {
        self.is_end = true;
        self
    }

    pub fn dummy(mut self) -> Self {
        self.is_dummy = true;
        self
    }

    pub fn halts(mut self) -> Self {
        self.halts = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.kind = ValueKind::Json;
        self
    }
}

/// Ordered set of fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grammar {
    fields: Vec<FieldSpec>,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Field whose prefix starts `line`; the longest prefix wins
    fn detect<'a>(&self, line: &'a str) -> Option<(&FieldSpec, &'a str)> {
        let trimmed = line.trim_start();
        self.fields
            .iter()
            .filter(|f| trimmed.starts_with(f.prefix.as_str()))
            .max_by_key(|f| f.prefix.len())
            .map(|f| (f, &trimmed[f.prefix.len()..]))
    }

    /// Thought / Function Name / Function Input / Function Output / Final Answer
    pub fn react() -> Self {
        Self::new()
            .field(
                FieldSpec::new("thought", "Thought:")
                    .start()
                    .next(["tool_name", "final_answer"]),
            )
            .field(FieldSpec::new("tool_name", "Function Name:").next(["tool_input"]))
            .field(
                FieldSpec::new("tool_input", "Function Input:")
                    .json()
                    .end()
                    .next(["tool_output"]),
            )
            .field(
                FieldSpec::new("tool_output", "Function Output:")
                    .end()
                    .halts()
                    .next(["final_answer"]),
            )
            .field(FieldSpec::new("final_answer", "Final Answer:").start().end())
    }

    /// [`Grammar::react`] preceded by an optional `<think>` ... `</think>` block
    pub fn react_thinking() -> Self {
        Self::new()
            .field(FieldSpec::new("think", "<think>").start().next(["think_end"]))
            .field(
                FieldSpec::new("think_end", "</think>")
                    .dummy()
                    .next(["thought", "tool_name", "final_answer"]),
            )
            .extend(Self::react())
    }

    fn extend(mut self, other: Grammar) -> Self {
        self.fields.extend(other.fields);
        self
    }
}

/// Progress reported while parsing
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    /// A line was appended to the open field
    PartialUpdate {
        field: String,
        delta: String,
        value: String,
    },
    /// A field closed with its final value
    Update { field: String, value: Value },
}

#[derive(Debug)]
struct OpenField {
    spec: FieldSpec,
    value: String,
}

#[derive(Debug)]
pub struct LineParser {
    grammar: Grammar,
    buffer: String,
    current: Option<OpenField>,
    last: Option<FieldSpec>,
    fields: Map<String, Value>,
    seen: Vec<String>,
    halted: bool,
}

impl LineParser {
    pub fn new(grammar: Grammar) -> Self {
        Self {
            grammar,
            buffer: String::new(),
            current: None,
            last: None,
            fields: Map::new(),
            seen: Vec::new(),
            halted: false,
        }
    }

    /// Feed a chunk of output. Complete lines are parsed immediately.
    pub fn add(&mut self, chunk: &str) -> Result<Vec<ParserEvent>, ParseError> {
        let mut events = Vec::new();
        if self.halted {
            return Ok(events);
        }
        self.buffer.push_str(chunk);
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.process_line(line.trim_end_matches(['\n', '\r']), &mut events)?;
            if self.halted {
                self.buffer.clear();
                break;
            }
        }
        Ok(events)
    }

    /// Flush the last line and check the output ended in a valid state
    pub fn end(&mut self) -> Result<Vec<ParserEvent>, ParseError> {
        let mut events = Vec::new();
        if !self.halted && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(line.trim_end_matches('\r'), &mut events)?;
        }
        self.close_current(&mut events)?;

        match &self.last {
            Some(spec) if spec.is_end || self.halted => Ok(events),
            last => Err(ParseError::UnexpectedEnd {
                field: last.as_ref().map(|s| s.name.clone()),
            }),
        }
    }

    /// True once a halting field was reached
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Name of the field currently accumulating lines
    pub fn current_field(&self) -> Option<&str> {
        self.current.as_ref().map(|f| f.spec.name.as_str())
    }

    /// Finalized field values
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<ParserEvent>) -> Result<(), ParseError> {
        let swallowing = self
            .current
            .as_ref()
            .is_some_and(|open| open.spec.next.is_empty());

        let detected = if swallowing {
            None
        } else {
            self.grammar.detect(line).map(|(spec, rest)| (spec.clone(), rest.trim().to_string()))
        };

        match detected {
            Some((spec, rest)) => self.open_field(spec, rest, events),
            None => match self.current.as_mut() {
                Some(open) => {
                    let delta = if open.value.is_empty() {
                        line.to_string()
                    } else {
                        format!("\n{}", line)
                    };
                    open.value.push_str(&delta);
                    if !open.spec.is_dummy {
                        events.push(ParserEvent::PartialUpdate {
                            field: open.spec.name.clone(),
                            delta,
                            value: open.value.clone(),
                        });
                    }
                    Ok(())
                }
                None if line.trim().is_empty() => Ok(()),
                None => Err(ParseError::MissingPrefix {
                    line: line.to_string(),
                }),
            },
        }
    }

    fn open_field(&mut self, spec: FieldSpec, rest: String, events: &mut Vec<ParserEvent>) -> Result<(), ParseError> {
        match self.current.as_ref().map(|open| &open.spec).or(self.last.as_ref()) {
            Some(from) if !from.next.contains(&spec.name) => {
                return Err(ParseError::InvalidTransition {
                    from: from.name.clone(),
                    to: spec.name.clone(),
                });
            }
            None if !spec.is_start => {
                return Err(ParseError::NotAStartField { field: spec.name });
            }
            _ => {}
        }
        if self.seen.contains(&spec.name) {
            return Err(ParseError::DuplicateField { field: spec.name });
        }

        self.close_current(events)?;
        self.seen.push(spec.name.clone());

        if spec.halts {
            self.halted = true;
            self.last = Some(spec);
            return Ok(());
        }

        if !spec.is_dummy && !rest.is_empty() {
            events.push(ParserEvent::PartialUpdate {
                field: spec.name.clone(),
                delta: rest.clone(),
                value: rest.clone(),
            });
        }
        self.current = Some(OpenField { spec, value: rest });
        Ok(())
    }

    fn close_current(&mut self, events: &mut Vec<ParserEvent>) -> Result<(), ParseError> {
        let Some(open) = self.current.take() else {
            return Ok(());
        };
        let text = open.value.trim();

        if !open.spec.is_dummy {
            let value = match open.spec.kind {
                ValueKind::Text => Value::String(text.to_string()),
                ValueKind::Json => serde_json::from_str(strip_code_fence(text)).map_err(|e| {
                    ParseError::InvalidValue {
                        field: open.spec.name.clone(),
                        reason: e.to_string(),
                    }
                })?,
            };
            self.fields.insert(open.spec.name.clone(), value.clone());
            events.push(ParserEvent::Update {
                field: open.spec.name.clone(),
                value,
            });
        }
        self.last = Some(open.spec);
        Ok(())
    }
}

/// Models like to wrap JSON in markdown fences
fn strip_code_fence(text: &str) -> &str {
    text.strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|inner| inner.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_all(grammar: Grammar, text: &str) -> Result<(Vec<ParserEvent>, Map<String, Value>), ParseError> {
        let mut parser = LineParser::new(grammar);
        let mut events = parser.add(text)?;
        events.extend(parser.end()?);
        Ok((events, parser.into_fields()))
    }

    #[test]
    fn test_tool_call_output() {
        let text = "Thought: I need to add\nFunction Name: add\nFunction Input: {\"a\": 1, \"b\": 2}\n";
        let (_, fields) = parse_all(Grammar::react(), text).unwrap();

        assert_eq!(fields["thought"], json!("I need to add"));
        assert_eq!(fields["tool_name"], json!("add"));
        assert_eq!(fields["tool_input"], json!({"a": 1, "b": 2}));
        assert!(fields.get("final_answer").is_none());
    }

    #[test]
    fn test_partial_updates_precede_update() {
        let mut parser = LineParser::new(Grammar::react());
        let mut events = Vec::new();
        for chunk in ["Thought: first", " line\nsecond line\n", "third line\n", "Final Answer: done"] {
            events.extend(parser.add(chunk).unwrap());
        }
        events.extend(parser.end().unwrap());

        let thought: Vec<&ParserEvent> = events
            .iter()
            .filter(|e| match e {
                ParserEvent::PartialUpdate { field, .. } | ParserEvent::Update { field, .. } => field == "thought",
            })
            .collect();

        assert_eq!(thought.len(), 4);
        assert!(thought[..3].iter().all(|e| matches!(e, ParserEvent::PartialUpdate { .. })));
        assert_eq!(
            *thought[3],
            ParserEvent::Update {
                field: "thought".to_string(),
                value: json!("first line\nsecond line\nthird line"),
            }
        );
        assert_eq!(parser.fields()["final_answer"], json!("done"));
    }

    #[test]
    fn test_blank_line_inside_field_is_reported() {
        let (events, fields) = parse_all(Grammar::react(), "Thought: a\n\nb\nFinal Answer: x\n").unwrap();

        let partials: Vec<(&str, &str)> = events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::PartialUpdate { field, delta, value } if field == "thought" => {
                    Some((delta.as_str(), value.as_str()))
                }
                _ => None,
            })
            .collect();

        assert_eq!(partials, vec![("a", "a"), ("\n", "a\n"), ("\nb", "a\n\nb")]);
        assert_eq!(fields["thought"], json!("a\n\nb"));
    }

    #[test]
    fn test_invalid_transition_keeps_finalized_fields() {
        let mut parser = LineParser::new(Grammar::react());
        parser.add("Thought: hmm\n").unwrap();
        parser.add("Function Name: calc\n").unwrap();

        let err = parser.add("Final Answer: 3\n").unwrap_err();
        assert_eq!(err.field(), Some("final_answer"));
        assert!(matches!(err, ParseError::InvalidTransition { ref from, .. } if from == "tool_name"));
        assert_eq!(parser.fields()["thought"], json!("hmm"));
        assert!(parser.fields().get("tool_name").is_none());
    }

    #[test]
    fn test_must_start_with_start_field() {
        let err = LineParser::new(Grammar::react())
            .add("Function Name: calc\n")
            .unwrap_err();
        assert_eq!(err, ParseError::NotAStartField { field: "tool_name".to_string() });

        let err = LineParser::new(Grammar::react()).add("hello there\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingPrefix { .. }));
    }

    #[test]
    fn test_invalid_json_input() {
        let err = parse_all(
            Grammar::react(),
            "Thought: x\nFunction Name: calc\nFunction Input: {not json}\n",
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("tool_input"));
    }

    #[test]
    fn test_multiline_json_input_in_fence() {
        let text = "Thought: x\nFunction Name: calc\nFunction Input:\n```json\n{\"a\": 1}\n```\n";
        let (_, fields) = parse_all(Grammar::react(), text).unwrap();
        assert_eq!(fields["tool_input"], json!({"a": 1}));
    }

    #[test]
    fn test_unexpected_end() {
        let err = parse_all(Grammar::react(), "Thought: still thinking").unwrap_err();
        assert_eq!(err, ParseError::UnexpectedEnd { field: Some("thought".to_string()) });

        let err = parse_all(Grammar::react(), "").unwrap_err();
        assert_eq!(err, ParseError::UnexpectedEnd { field: None });
    }

    #[test]
    fn test_halts_on_hallucinated_tool_output() {
        let text = "Thought: x\nFunction Name: calc\nFunction Input: {}\nFunction Output: 42\nFinal Answer: 42\n";
        let mut parser = LineParser::new(Grammar::react());
        parser.add(text).unwrap();
        assert!(parser.is_halted());
        parser.end().unwrap();

        let fields = parser.into_fields();
        assert!(fields.get("tool_output").is_none());
        assert!(fields.get("final_answer").is_none());
    }

    #[test]
    fn test_final_answer_keeps_prefixed_lines() {
        let text = "Final Answer: Use this format:\nThought: ...\n";
        let (_, fields) = parse_all(Grammar::react(), text).unwrap();
        assert_eq!(fields["final_answer"], json!("Use this format:\nThought: ..."));
    }

    #[test]
    fn test_thinking_block_is_not_reported() {
        let text = "<think>\nweigh options\n</think>\nThought: go\nFinal Answer: ok\n";
        let (events, fields) = parse_all(Grammar::react_thinking(), text).unwrap();

        assert_eq!(fields["think"], json!("weigh options"));
        assert!(fields.get("think_end").is_none());
        assert!(!events.iter().any(|e| matches!(e,
            ParserEvent::PartialUpdate { field, .. } | ParserEvent::Update { field, .. } if field == "think_end")));
        assert_eq!(fields["final_answer"], json!("ok"));
    }

    #[test]
    fn test_duplicate_field() {
        let grammar = Grammar::new()
            .field(FieldSpec::new("a", "A:").start().next(["b"]))
            .field(FieldSpec::new("b", "B:").end().next(["a"]));
        let err = parse_all(grammar, "A: 1\nB: 2\nA: 3\n").unwrap_err();
        assert_eq!(err, ParseError::DuplicateField { field: "a".to_string() });
    }
}
