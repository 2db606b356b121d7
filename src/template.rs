//! Minimal `{{.Field}}` template rendering.
//!
//! Container name templates and host-script sources use the
//! `{{.FieldName}}` action syntax (the default name template is
//! `{{.ProjectName}}-{{.ServiceName}}-{{.InstanceID}}`). Only field
//! references over a closed, caller-supplied field set are supported;
//! anything else is a parse error.

use thiserror::Error;

/// Template parse/render failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed action at offset {0}")]
    Unclosed(usize),

    #[error("malformed action {0:?}: expected a field reference like {{{{.Name}}}}")]
    BadAction(String),

    #[error("unknown field {0:?}")]
    UnknownField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Field(String),
}

/// A parsed template, ready to render against a field set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    /// Parse a template source.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let close = after_open
                .find("}}")
                .ok_or(TemplateError::Unclosed(offset + open))?;

            let action = after_open[..close].trim();
            let field = action
                .strip_prefix('.')
                .filter(|f| !f.is_empty() && f.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
                .ok_or_else(|| TemplateError::BadAction(action.to_string()))?;
            parts.push(Part::Field(field.to_string()));

            let consumed = open + 2 + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self { parts })
    }

    /// Render against a field set. Referencing a field not in the set is
    /// an error, matching strict struct-field semantics.
    pub fn render(&self, fields: &[(&str, &str)]) -> Result<String, TemplateError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Field(name) => {
                    let value = fields
                        .iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| TemplateError::UnknownField(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}
