//! Reference resolution for `{{ path }}` tokens.
//!
//! Grammar:
//!
//! ```text
//! token     := "{{" ws* reference ws* "}}"
//! reference := segment ("." segment)*
//! segment   := [A-Za-z0-9_-]+
//! ```
//!
//! The first segment is the root: `request_data`, `request_headers`, `item`
//! (only inside array predicates) or a block id. Remaining segments walk
//! object keys and array indices.
//!
//! A string that is exactly one token resolves to the referenced value with
//! its type intact. Tokens embedded in longer strings are replaced by their
//! text form. Anything between `{{` and `}}` that is not a valid reference is
//! left as literal text. Resolution never fails: references that cannot be
//! resolved are reported next to the value so each handler decides whether
//! the field was required.

use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

use super::context::ExecutionContext;
use super::path::get_segments;
use crate::error::BlockError;

/// Root bound to the current element in array predicates.
pub const ITEM_ROOT: &str = "item";

/// A parsed `a.b.c` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    segments: Vec<String>,
}

impl Reference {
    /// Parse the inside of a token. Surrounding whitespace is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let mut segments = Vec::new();
        for segment in text.split('.') {
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return None;
            }
            segments.push(segment.to_string());
        }
        Some(Self { segments })
    }

    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Segments after the root.
    pub fn rest(&self) -> &[String] {
        &self.segments[1..]
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// A piece of a template string.
#[derive(Debug, Clone, PartialEq)]
pub enum Piece<'a> {
    Text(&'a str),
    Token(Reference),
}

/// Split a template into literal text and reference tokens.
pub fn tokenize(template: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;

    while let Some(offset) = template[pos..].find("{{") {
        let open = pos + offset;
        let Some(close_offset) = template[open + 2..].find("}}") else {
            break;
        };
        let close = open + 2 + close_offset;

        match Reference::parse(&template[open + 2..close]) {
            Some(reference) => {
                if text_start < open {
                    pieces.push(Piece::Text(&template[text_start..open]));
                }
                pieces.push(Piece::Token(reference));
                pos = close + 2;
                text_start = pos;
            }
            // not a reference: stays literal, keep scanning after the braces
            None => pos = open + 2,
        }
    }

    if text_start < template.len() {
        pieces.push(Piece::Text(&template[text_start..]));
    }
    pieces
}

/// The reference, if `template` is exactly one token (surrounding
/// whitespace allowed).
pub fn whole_token(template: &str) -> Option<Reference> {
    let mut pieces = tokenize(template.trim());
    match (pieces.pop(), pieces.is_empty()) {
        (Some(Piece::Token(reference)), true) => Some(reference),
        _ => None,
    }
}

/// Text form used when a value is spliced into a string.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A reference that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    /// JSON pointer of the config location holding the token
    pub pointer: String,
    pub reference: String,
    /// The token was the whole string (value became null rather than "")
    pub whole: bool,
}

impl Unresolved {
    pub fn root(&self) -> &str {
        self.reference.split('.').next().unwrap_or_default()
    }
}

/// A resolved config value and the references that did not resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Value,
    pub unresolved: Vec<Unresolved>,
}

impl Resolved {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn references(&self) -> Vec<String> {
        self.unresolved.iter().map(|u| u.reference.clone()).collect()
    }

    /// The value of a required field. Any unresolved reference fails with
    /// `UnresolvedReference`.
    pub fn require(self, field: &str) -> Result<Value, BlockError> {
        if self.unresolved.is_empty() {
            Ok(self.value)
        } else {
            Err(BlockError::unresolved(field, &self.references()))
        }
    }

    /// Like [`require`](Self::require), coercing the value to text.
    pub fn require_text(self, field: &str) -> Result<String, BlockError> {
        self.require(field).map(|v| value_to_text(&v))
    }

    /// The value of an optional field. An unresolved whole-token value is
    /// absent; object entries holding unresolved whole tokens are dropped.
    pub fn optional(self) -> Option<Value> {
        let mut value = self.value;
        for unresolved in self.unresolved.iter().filter(|u| u.whole) {
            if unresolved.pointer.is_empty() {
                return None;
            }
            if let Some((parent, key)) = unresolved.pointer.rsplit_once('/') {
                if let Some(Value::Object(map)) = value.pointer_mut(parent) {
                    map.remove(&unescape_pointer(key));
                }
            }
        }
        Some(value)
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape_pointer(key: &str) -> String {
    key.replace("~1", "/").replace("~0", "~")
}

/// Resolves references against an execution context.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    ctx: &'a ExecutionContext,
    item: Option<&'a Value>,
}

impl<'a> Resolver<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self { ctx, item: None }
    }

    /// A resolver with `item` bound to `item`.
    pub fn with_item<'b>(&self, item: &'b Value) -> Resolver<'b>
    where
        'a: 'b,
    {
        Resolver {
            ctx: self.ctx,
            item: Some(item),
        }
    }

    pub fn context(&self) -> &'a ExecutionContext {
        self.ctx
    }

    /// Look up a reference. `None` when the root or any segment is missing.
    pub fn lookup(&self, reference: &Reference) -> Option<&'a Value> {
        let root = if reference.root() == ITEM_ROOT {
            self.item?
        } else {
            self.ctx.root(reference.root())?
        };
        get_segments(root, reference.rest())
    }

    /// Resolve every string in `value`, recursively.
    pub fn resolve(&self, value: &Value) -> Resolved {
        let mut unresolved = Vec::new();
        let value = self.resolve_at(value, "", &mut unresolved);
        if !unresolved.is_empty() {
            debug!(references = ?unresolved, "Unresolved references in block config");
        }
        Resolved { value, unresolved }
    }

    /// Resolve a single template string.
    pub fn resolve_str(&self, template: &str) -> Resolved {
        let mut unresolved = Vec::new();
        let value = self.resolve_string(template, "", &mut unresolved);
        Resolved { value, unresolved }
    }

    /// Render a template string as text, whole tokens included.
    pub fn render_text(&self, template: &str) -> Resolved {
        let mut unresolved = Vec::new();
        let text = self.render_into(template, "", &mut unresolved);
        Resolved {
            value: Value::String(text),
            unresolved,
        }
    }

    fn resolve_at(&self, value: &Value, pointer: &str, out: &mut Vec<Unresolved>) -> Value {
        match value {
            Value::String(s) => self.resolve_string(s, pointer, out),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.resolve_at(v, &format!("{}/{}", pointer, i), out))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut resolved = Map::new();
                for (key, v) in map {
                    let child = format!("{}/{}", pointer, escape_pointer(key));
                    resolved.insert(key.clone(), self.resolve_at(v, &child, out));
                }
                Value::Object(resolved)
            }
            other => other.clone(),
        }
    }

    fn resolve_string(&self, template: &str, pointer: &str, out: &mut Vec<Unresolved>) -> Value {
        if !template.contains("{{") {
            return Value::String(template.to_string());
        }
        if let Some(reference) = whole_token(template) {
            return match self.lookup(&reference) {
                Some(v) => v.clone(),
                None => {
                    out.push(Unresolved {
                        pointer: pointer.to_string(),
                        reference: reference.to_string(),
                        whole: true,
                    });
                    Value::Null
                }
            };
        }
        Value::String(self.render_into(template, pointer, out))
    }

    fn render_into(&self, template: &str, pointer: &str, out: &mut Vec<Unresolved>) -> String {
        let mut text = String::with_capacity(template.len());
        for piece in tokenize(template) {
            match piece {
                Piece::Text(t) => text.push_str(t),
                Piece::Token(reference) => match self.lookup(&reference) {
                    Some(v) => text.push_str(&value_to_text(v)),
                    None => out.push(Unresolved {
                        pointer: pointer.to_string(),
                        reference: reference.to_string(),
                        whole: false,
                    }),
                },
            }
        }
        text
    }
}

/// Resolve `value` against `ctx`.
pub fn resolve(value: &Value, ctx: &ExecutionContext) -> Resolved {
    Resolver::new(ctx).resolve(value)
}
