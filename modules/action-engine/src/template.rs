//! A restricted expression grammar for extendable-action templates (§4.5, C6).
//!
//! The grammar admits exactly: a dotted identifier path, a string literal
//! with `${...}` interpolation spans, and one whitelisted call form
//! (`generate_resource_model_from_resource_structure_by_resource_type(<path>)`).
//! There is no production for assignment, deletion, object/error
//! construction, or any access to process or global state, so the denylist
//! from the source this replaces becomes structural rather than textual:
//! a forbidden construct simply has no parse.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::EngineError;

const WHITELISTED_FUNCTION: &str = "generate_resource_model_from_resource_structure_by_resource_type";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    Interpolation(String),
}

/// Split a template string into literal-text and `${...}` interpolation
/// tokens. Unterminated `${` is a parse failure — the grammar is total over
/// well-formed input, not over arbitrary text.
fn tokenize(template: &str) -> Result<Vec<Token>, EngineError> {
    let mut tokens = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(EngineError::Generic(anyhow::anyhow!(
                "template contains an unterminated interpolation span"
            )));
        };
        tokens.push(Token::Interpolation(after[..end].trim().to_string()));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

/// An identifier path expression: `a`, `a.b.c`, or the one whitelisted call
/// form `f(path)`. This is the full expression grammar — there is no
/// production for anything else, so forbidden constructs are rejected by
/// construction rather than by pattern-matching against a denylist.
enum Expr {
    Path(Vec<String>),
    Call { function: String, argument: Vec<String> },
}

fn parse_expr(source: &str) -> Result<Expr, EngineError> {
    let source = source.trim();
    if let Some(stripped) = source.strip_suffix(')') {
        if let Some(open) = stripped.find('(') {
            let function = stripped[..open].trim().to_string();
            let argument = stripped[open + 1..].trim();
            if function != WHITELISTED_FUNCTION {
                return Err(EngineError::Generic(anyhow::anyhow!(
                    "template contains forbidden token: {function}"
                )));
            }
            return Ok(Expr::Call {
                function,
                argument: parse_path(argument)?,
            });
        }
    }
    Ok(Expr::Path(parse_path(source)?))
}

fn parse_path(source: &str) -> Result<Vec<String>, EngineError> {
    let source = source.trim();
    if source.is_empty() {
        return Err(EngineError::Generic(anyhow::anyhow!(
            "template contains an empty identifier path"
        )));
    }
    let segments: Vec<String> = source.split('.').map(|s| s.trim().to_string()).collect();
    for segment in &segments {
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(EngineError::Generic(anyhow::anyhow!(
                "template contains forbidden token: {segment:?}"
            )));
        }
    }
    Ok(segments)
}

fn lookup_path<'a>(context: &'a HashMap<String, Value>, path: &[String]) -> Option<&'a Value> {
    let mut current = context.get(path.first()?)?;
    for segment in &path[1..] {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Evaluation context for template expressions: the handler module's
/// exported values overlaid by the action's effective message, plus an
/// optional resource-structure table backing the whitelisted call form.
pub struct TemplateContext<'a> {
    pub values: &'a HashMap<String, Value>,
    pub resource_structure_by_resource_type: Option<&'a HashMap<String, Value>>,
}

/// Evaluate `template` against `context`, producing the interpolated value.
/// A template with no interpolation spans evaluates to its literal text.
pub fn evaluate(template: &str, context: &TemplateContext) -> Result<Value, EngineError> {
    let tokens = tokenize(template)?;
    if tokens.len() == 1 {
        if let Token::Interpolation(expr) = &tokens[0] {
            return evaluate_expr(expr, context);
        }
    }
    let mut rendered = String::new();
    for token in tokens {
        match token {
            Token::Text(text) => rendered.push_str(&text),
            Token::Interpolation(expr) => {
                let value = evaluate_expr(&expr, context)?;
                rendered.push_str(&value_to_string(&value));
            }
        }
    }
    Ok(Value::String(rendered))
}

fn evaluate_expr(source: &str, context: &TemplateContext) -> Result<Value, EngineError> {
    match parse_expr(source)? {
        Expr::Path(path) => lookup_path(context.values, &path).cloned().ok_or_else(|| {
            EngineError::UndefinedValue(format!("template identifier {:?} not in context", path.join(".")))
        }),
        Expr::Call { argument, .. } => {
            let Some(table) = context.resource_structure_by_resource_type else {
                return Err(EngineError::UndefinedContext {
                    candidates: vec![argument.clone()],
                    available_keys: context.values.keys().cloned().collect(),
                });
            };
            let key = argument.join(".");
            table
                .get(&key)
                .cloned()
                .ok_or_else(|| EngineError::UndefinedValue(format!("no resource structure for {key:?}")))
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(values: &HashMap<String, Value>) -> TemplateContext {
        TemplateContext {
            values,
            resource_structure_by_resource_type: None,
        }
    }

    #[test]
    fn plain_literal_roundtrips() {
        let values = HashMap::new();
        let out = evaluate("Execute", &ctx(&values)).unwrap();
        assert_eq!(out, Value::String("Execute".to_string()));
    }

    #[test]
    fn interpolates_single_identifier() {
        let mut values = HashMap::new();
        values.insert("AID1".to_string(), Value::String("widget".to_string()));
        let out = evaluate("${AID1}", &ctx(&values)).unwrap();
        assert_eq!(out, Value::String("widget".to_string()));
    }

    #[test]
    fn interpolates_dotted_path() {
        let mut values = HashMap::new();
        values.insert("resource".to_string(), serde_json::json!({"type": "Widget"}));
        let out = evaluate("${resource.type}", &ctx(&values)).unwrap();
        assert_eq!(out, Value::String("Widget".to_string()));
    }

    #[test]
    fn mixed_text_and_interpolation_renders_as_string() {
        let mut values = HashMap::new();
        values.insert("AID1".to_string(), Value::String("widget".to_string()));
        let out = evaluate("Execute${AID1}Action", &ctx(&values)).unwrap();
        assert_eq!(out, Value::String("ExecutewidgetAction".to_string()));
    }

    #[test]
    fn rejects_forbidden_token() {
        let values = HashMap::new();
        let err = evaluate("${delete foo}", &ctx(&values)).unwrap_err();
        assert!(matches!(err, EngineError::Generic(_)));
    }

    #[test]
    fn whitelisted_call_without_datastore_is_undefined_context() {
        let values = HashMap::new();
        let err = evaluate(
            "${generate_resource_model_from_resource_structure_by_resource_type(Widget)}",
            &ctx(&values),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UndefinedContext { .. }));
    }

    #[test]
    fn unknown_identifier_is_undefined_value() {
        let values = HashMap::new();
        let err = evaluate("${missing}", &ctx(&values)).unwrap_err();
        assert!(matches!(err, EngineError::UndefinedValue(_)));
    }
}
