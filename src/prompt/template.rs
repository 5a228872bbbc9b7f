//! Prompt templates with named placeholders.
//!
//! Placeholders are written `{{name}}`. The Go-template form `{{.name}}` is
//! accepted as well, and whitespace inside the braces is ignored. Substituted
//! values are inserted literally and never scanned for further placeholders.

use std::collections::HashMap;

use thiserror::Error;

use crate::prompt::message::{Message, Role};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Missing value for template variable '{name}'")]
    MissingVariable { name: String },

    #[error("Malformed template at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: String },
}

/// A parsed piece of a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

fn parse(template: &str) -> Result<Vec<Segment>, FormatError> {
    let mut segments = Vec::new();
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }

        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or_else(|| FormatError::Malformed {
            offset: offset + start,
            reason: "unterminated placeholder".to_string(),
        })?;

        let raw = after_open[..end].trim();
        let name = raw.strip_prefix('.').unwrap_or(raw);
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(FormatError::Malformed {
                offset: offset + start,
                reason: format!("invalid variable name '{raw}'"),
            });
        }
        segments.push(Segment::Variable(name.to_string()));

        let consumed = start + 2 + end + 2;
        rest = &rest[consumed..];
        offset += consumed;
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }

    Ok(segments)
}

/// Template for one message of a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    role: Role,
    segments: Vec<Segment>,
}

impl MessageTemplate {
    pub fn new(role: Role, template: &str) -> Result<Self, FormatError> {
        Ok(Self {
            role,
            segments: parse(template)?,
        })
    }

    pub fn system(template: &str) -> Result<Self, FormatError> {
        Self::new(Role::System, template)
    }

    pub fn human(template: &str) -> Result<Self, FormatError> {
        Self::new(Role::Human, template)
    }

    /// Names of the placeholders this template references, in order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn render(&self, values: &HashMap<String, String>) -> Result<Message, FormatError> {
        let mut content = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => content.push_str(text),
                Segment::Variable(name) => {
                    let value = values.get(name).ok_or_else(|| FormatError::MissingVariable {
                        name: name.clone(),
                    })?;
                    content.push_str(value);
                }
            }
        }
        Ok(Message::new(self.role, content))
    }
}

/// An ordered sequence of message templates.
///
/// Rendering is pure: the same template and values always produce the same
/// messages. Keys in the value map that no placeholder references are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    messages: Vec<MessageTemplate>,
}

impl PromptTemplate {
    pub fn new(messages: Vec<MessageTemplate>) -> Self {
        Self { messages }
    }

    /// A fixed system instruction followed by a parameterized human message.
    pub fn chat(system: &str, human: &str) -> Result<Self, FormatError> {
        Ok(Self::new(vec![
            MessageTemplate::system(system)?,
            MessageTemplate::human(human)?,
        ]))
    }

    /// Every placeholder referenced by any message, deduplicated, in order of
    /// first appearance.
    pub fn input_variables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.messages.iter().flat_map(|m| m.variables()) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn format(&self, values: &HashMap<String, String>) -> Result<Vec<Message>, FormatError> {
        self.messages.iter().map(|m| m.render(values)).collect()
    }
}
