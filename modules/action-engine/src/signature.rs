use std::collections::HashMap;

use serde_json::Value;

use crate::error::EngineError;
use crate::types::{ArgumentConfigurationByArgumentName, ArgumentType};

pub const OPTIONS_SENTINEL: &str = "options";
pub const ORIGIN_USER_ID_SENTINEL: &str = "origin_user_id";

/// Given candidate signatures and an effective message, pick the first
/// fully-covered one and type-check its arguments (§4.4, C5).
///
/// A candidate is satisfied if every argument name in it is either the
/// `options` sentinel (passes the whole message), `origin_user_id` (pulled
/// from Action meta, assumed always present), or a key present in `message`.
pub fn resolve_signature<'a>(
    candidates: &'a [Vec<String>],
    message: &HashMap<String, Value>,
    schema: &ArgumentConfigurationByArgumentName,
) -> Result<&'a [String], EngineError> {
    for candidate in candidates {
        let satisfied = candidate.iter().all(|arg| {
            arg == OPTIONS_SENTINEL || arg == ORIGIN_USER_ID_SENTINEL || message.contains_key(arg)
        });
        if satisfied {
            type_check(candidate, message, schema)?;
            return Ok(candidate);
        }
    }
    Err(EngineError::UndefinedContext {
        candidates: candidates.to_vec(),
        available_keys: message.keys().cloned().collect(),
    })
}

fn type_check(
    signature: &[String],
    message: &HashMap<String, Value>,
    schema: &ArgumentConfigurationByArgumentName,
) -> Result<(), EngineError> {
    for arg in signature {
        if arg == OPTIONS_SENTINEL || arg == ORIGIN_USER_ID_SENTINEL {
            continue;
        }
        let Some(descriptor) = schema.get(arg) else {
            continue;
        };
        let ty = ArgumentType::parse(descriptor);
        match message.get(arg) {
            Some(value) => {
                if !ty.matches(value) {
                    return Err(EngineError::UnexpectedValueType {
                        expected: ty.primitive,
                        found: value_kind(value),
                    });
                }
            }
            None => {
                if !ty.optional {
                    return Err(EngineError::UnexpectedValueType {
                        expected: ty.primitive,
                        found: "missing".to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn value_kind(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

/// Pull the positional argument values for `signature` from the effective
/// message, resolving the `options` and `origin_user_id` sentinels (§4.6).
pub fn resolve_arguments(
    signature: &[String],
    message: &HashMap<String, Value>,
    origin_user_id: &str,
) -> Vec<Value> {
    signature
        .iter()
        .map(|arg| {
            if arg == OPTIONS_SENTINEL {
                Value::Object(message.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            } else if arg == ORIGIN_USER_ID_SENTINEL {
                Value::String(origin_user_id.to_string())
            } else {
                message.get(arg).cloned().unwrap_or(Value::Null)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn empty_message_against_options_only_succeeds() {
        let candidates = vec![vec![OPTIONS_SENTINEL.to_string()]];
        let schema = HashMap::new();
        let selected = resolve_signature(&candidates, &msg(&[]), &schema).unwrap();
        assert_eq!(selected, &[OPTIONS_SENTINEL.to_string()]);
    }

    #[test]
    fn missing_required_argument_fails_undefined_context() {
        let candidates = vec![vec!["AID1".to_string()]];
        let schema = HashMap::new();
        let err = resolve_signature(&candidates, &msg(&[]), &schema).unwrap_err();
        assert!(matches!(err, EngineError::UndefinedContext { .. }));
    }

    #[test]
    fn type_mismatch_fails_unexpected_value_type() {
        let candidates = vec![vec!["AID1".to_string()]];
        let mut schema = HashMap::new();
        schema.insert("AID1".to_string(), "string".to_string());
        let message = msg(&[("AID1", Value::Bool(true))]);
        let err = resolve_signature(&candidates, &message, &schema).unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedValueType { .. }));
    }

    #[test]
    fn alternative_signature_is_selected_when_primary_unsatisfied() {
        let candidates = vec![
            vec!["AID1".to_string(), "AID2".to_string()],
            vec!["AID1".to_string(), "AID3".to_string()],
        ];
        let message = msg(&[("AID1", Value::String("a".into())), ("AID3", Value::Array(vec![Value::Bool(true)]))]);
        let schema = HashMap::new();
        let selected = resolve_signature(&candidates, &message, &schema).unwrap();
        assert_eq!(selected, &["AID1".to_string(), "AID3".to_string()]);
    }

    #[test]
    fn resolve_arguments_handles_sentinels() {
        let signature = vec![OPTIONS_SENTINEL.to_string(), ORIGIN_USER_ID_SENTINEL.to_string()];
        let message = msg(&[("a", Value::String("x".into()))]);
        let args = resolve_arguments(&signature, &message, "u1");
        assert_eq!(args[1], Value::String("u1".to_string()));
        assert!(args[0].is_object());
    }
}
