/// Placeholder text — parsing and substitution of `{{name}}` templates used
/// by variable blocks.
use std::collections::BTreeMap;

use crate::schema::response::ResponseMap;

/// A segment of parsed placeholder text.
#[derive(Debug, Clone, PartialEq)]
pub enum TextSegment {
    /// Literal text, emitted as-is.
    Literal(String),
    /// `{{name}}` placeholder.
    Placeholder(String),
}

/// Parsed placeholder text — a sequence of segments.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderText {
    pub segments: Vec<TextSegment>,
}

impl PlaceholderText {
    /// Parse text into literal and placeholder segments.
    ///
    /// Syntax:
    /// - `{{name}}` → `Placeholder` (surrounding whitespace in the name is trimmed)
    /// - unclosed or empty braces → kept as `Literal`
    ///
    /// Parsing never fails: authored text with stray braces still renders.
    pub fn parse(input: &str) -> PlaceholderText {
        let mut segments = Vec::new();
        let mut literal_buf = String::new();
        let mut rest = input;

        while let Some(open) = rest.find("{{") {
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                break;
            };
            let name = after_open[..close].trim();

            literal_buf.push_str(&rest[..open]);
            if name.is_empty() || name.contains('{') || name.contains('}') {
                literal_buf.push_str(&rest[open..open + 2 + close + 2]);
            } else {
                if !literal_buf.is_empty() {
                    segments.push(TextSegment::Literal(std::mem::take(&mut literal_buf)));
                }
                segments.push(TextSegment::Placeholder(name.to_string()));
            }
            rest = &after_open[close + 2..];
        }

        literal_buf.push_str(rest);
        if !literal_buf.is_empty() {
            segments.push(TextSegment::Literal(literal_buf));
        }

        PlaceholderText { segments }
    }

    /// Names of every placeholder, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                TextSegment::Placeholder(name) => Some(name.as_str()),
                TextSegment::Literal(_) => None,
            })
            .collect()
    }

    /// Fill placeholders from responses.
    ///
    /// Bound and answered placeholders take the answer's text; bound but
    /// unanswered (or blank) ones become `[name]`. Names with no binding are
    /// left exactly as authored.
    pub fn render(&self, variables: &BTreeMap<String, String>, responses: &ResponseMap) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                TextSegment::Literal(text) => out.push_str(text),
                TextSegment::Placeholder(name) => match variables.get(name) {
                    Some(prompt_id) => {
                        let answer = responses
                            .get(prompt_id)
                            .map(|v| v.to_string())
                            .filter(|s| !s.trim().is_empty());
                        match answer {
                            Some(text) => out.push_str(&text),
                            None => {
                                out.push('[');
                                out.push_str(name);
                                out.push(']');
                            }
                        }
                    }
                    None => {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                },
            }
        }
        out
    }
}

/// Substitute `{{name}}` placeholders in `template`.
pub fn substitute(
    template: &str,
    variables: &BTreeMap<String, String>,
    responses: &ResponseMap,
) -> String {
    PlaceholderText::parse(template).render(variables, responses)
}
