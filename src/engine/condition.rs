//! Condition expressions for conditional blocks and array predicates.
//!
//! A condition is `<left> <op> <right>` with op one of `== != >= <= > <`, or a
//! bare `true` / `false`. Operands are references, quoted literals (`'…'` or
//! `"…"`) or bare literals. Operators are only recognised outside `{{ }}`
//! tokens and quotes, so resolved values cannot change the structure of the
//! expression.
//!
//! Both operands are compared as numbers when both parse as numbers,
//! otherwise as text.

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use super::resolver::{value_to_text, Resolved, Resolver};
use crate::error::BlockError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand<'a> {
    /// Quoted literal, quotes stripped. May still contain tokens.
    Quoted(&'a str),
    /// Reference token or bare literal.
    Bare(&'a str),
}

/// A parsed condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition<'a> {
    Literal(bool),
    Compare {
        left: Operand<'a>,
        op: CompareOp,
        right: Operand<'a>,
    },
}

impl<'a> Condition<'a> {
    /// Parse without resolving anything. Malformed input fails with
    /// `EvaluationError`.
    pub fn parse(source: &'a str) -> Result<Self, BlockError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(BlockError::evaluation("condition is empty"));
        }

        let operators = find_operators(trimmed)?;
        match operators.as_slice() {
            [] => {
                if trimmed.eq_ignore_ascii_case("true") {
                    Ok(Condition::Literal(true))
                } else if trimmed.eq_ignore_ascii_case("false") {
                    Ok(Condition::Literal(false))
                } else {
                    Err(BlockError::evaluation(format!(
                        "condition '{}' has no comparison operator",
                        trimmed
                    )))
                }
            }
            [(pos, op)] => {
                let left = trimmed[..*pos].trim();
                let right = trimmed[*pos + op.symbol().len()..].trim();
                if left.is_empty() || right.is_empty() {
                    return Err(BlockError::evaluation(format!(
                        "condition '{}' is missing an operand",
                        trimmed
                    )));
                }
                Ok(Condition::Compare {
                    left: parse_operand(left)?,
                    op: *op,
                    right: parse_operand(right)?,
                })
            }
            _ => Err(BlockError::evaluation(format!(
                "condition '{}' has more than one comparison operator",
                trimmed
            ))),
        }
    }

    /// Resolve both operands. Literal conditions resolve to booleans.
    pub fn operands(&self, resolver: &Resolver<'_>) -> (Resolved, Resolved) {
        match self {
            Condition::Literal(b) => {
                let v = Resolved {
                    value: Value::Bool(*b),
                    unresolved: Vec::new(),
                };
                (v.clone(), v)
            }
            Condition::Compare { left, right, .. } => {
                (resolve_operand(left, resolver), resolve_operand(right, resolver))
            }
        }
    }

    /// Evaluate against resolved operand values.
    pub fn holds(&self, left: &Value, right: &Value) -> bool {
        match self {
            Condition::Literal(b) => *b,
            Condition::Compare { op, .. } => op.holds(compare_values(left, right)),
        }
    }

    /// Resolve and evaluate. Unresolved references fail with
    /// `UnresolvedReference`.
    pub fn evaluate(&self, resolver: &Resolver<'_>) -> Result<bool, BlockError> {
        let (left, right) = self.operands(resolver);
        let left = left.require("condition")?;
        let right = right.require("condition")?;
        Ok(self.holds(&left, &right))
    }
}

/// Parse and evaluate a condition string.
pub fn evaluate_condition(source: &str, resolver: &Resolver<'_>) -> Result<bool, BlockError> {
    Condition::parse(source)?.evaluate(resolver)
}

/// Positions of comparison operators outside tokens and quotes.
fn find_operators(s: &str) -> Result<Vec<(usize, CompareOp)>, BlockError> {
    let bytes = s.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' if s[i..].starts_with("{{") => match s[i + 2..].find("}}") {
                Some(end) => i += 2 + end + 2,
                None => i += 2,
            },
            quote @ (b'\'' | b'"') => match s[i + 1..].find(quote as char) {
                Some(end) => i += 1 + end + 1,
                None => {
                    return Err(BlockError::evaluation(format!(
                        "unterminated quoted literal in condition '{}'",
                        s
                    )))
                }
            },
            b'=' | b'!' | b'>' | b'<' => {
                let two = s.get(i..i + 2).unwrap_or_default();
                let op = match two {
                    "==" => Some((CompareOp::Eq, 2)),
                    "!=" => Some((CompareOp::Ne, 2)),
                    ">=" => Some((CompareOp::Ge, 2)),
                    "<=" => Some((CompareOp::Le, 2)),
                    _ => match bytes[i] {
                        b'>' => Some((CompareOp::Gt, 1)),
                        b'<' => Some((CompareOp::Lt, 1)),
                        _ => None,
                    },
                };
                match op {
                    Some((op, len)) => {
                        found.push((i, op));
                        i += len;
                    }
                    None => {
                        return Err(BlockError::evaluation(format!(
                            "unsupported operator '{}' in condition '{}'",
                            bytes[i] as char, s
                        )))
                    }
                }
            }
            _ => i += 1,
        }
    }

    Ok(found)
}

fn parse_operand(text: &str) -> Result<Operand<'_>, BlockError> {
    let bytes = text.as_bytes();
    let first = bytes[0];
    if first == b'\'' || first == b'"' {
        if text.len() >= 2 && bytes[text.len() - 1] == first {
            return Ok(Operand::Quoted(&text[1..text.len() - 1]));
        }
        return Err(BlockError::evaluation(format!(
            "operand {} is not a single quoted literal",
            text
        )));
    }
    Ok(Operand::Bare(text))
}

fn resolve_operand(operand: &Operand<'_>, resolver: &Resolver<'_>) -> Resolved {
    match operand {
        Operand::Quoted(text) => resolver.render_text(text),
        Operand::Bare(text) => resolver.resolve_str(text),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Numeric when both sides are numeric, text otherwise.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return l.partial_cmp(&r).unwrap_or(Ordering::Equal);
    }
    value_to_text(left).cmp(&value_to_text(right))
}
