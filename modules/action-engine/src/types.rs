use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single argument's type descriptor: a lowercased primitive name or
/// `array`/`object`, optionally suffixed `?` for optional, and optionally
/// compound (`a.<B>`, which reduces to `a`) (§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentType {
    pub primitive: String,
    pub optional: bool,
}

impl ArgumentType {
    pub fn parse(descriptor: &str) -> Self {
        let (body, optional) = match descriptor.strip_suffix('?') {
            Some(stripped) => (stripped, true),
            None => (descriptor, false),
        };
        let primitive = body.split('.').next().unwrap_or(body).to_lowercase();
        Self { primitive, optional }
    }

    /// Does `value` satisfy this descriptor.
    pub fn matches(&self, value: &Value) -> bool {
        match self.primitive.as_str() {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            "any" => true,
            _ => true,
        }
    }
}

/// Argument name → type descriptor string, as stored verbatim (§3).
pub type ArgumentConfigurationByArgumentName = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfiguration {
    pub action_name: String,
    pub action_signature: Vec<String>,
    pub action_alternative_signature: Option<Vec<String>>,
    pub argument_configuration_by_argument_name: ArgumentConfigurationByArgumentName,
    pub context_name: String,
    pub file_path: Option<String>,
    pub method_name: Option<String>,
    pub event_name: Option<String>,
    pub action_name_to_extend: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendableActionConfiguration {
    #[serde(flatten)]
    pub base: ActionConfiguration,
    pub extendable_action_name: String,
    pub extendable_action_argument_default: HashMap<String, String>,
    pub extendable_alternative_action_signature: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStructure {
    pub resource_type: String,
    pub properties_by_argument_name: HashMap<String, String>,
    pub context_name: String,
    pub file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_descriptor() {
        let t = ArgumentType::parse("String");
        assert_eq!(t.primitive, "string");
        assert!(!t.optional);
    }

    #[test]
    fn parses_optional_suffix() {
        let t = ArgumentType::parse("array?");
        assert_eq!(t.primitive, "array");
        assert!(t.optional);
    }

    #[test]
    fn reduces_compound_descriptor() {
        let t = ArgumentType::parse("a.<B>");
        assert_eq!(t.primitive, "a");
    }

    #[test]
    fn reduces_compound_optional_descriptor() {
        let t = ArgumentType::parse("a.<B>?");
        assert_eq!(t.primitive, "a");
        assert!(t.optional);
    }

    #[test]
    fn matches_primitives() {
        assert!(ArgumentType::parse("string").matches(&Value::String("x".into())));
        assert!(!ArgumentType::parse("string").matches(&Value::Bool(true)));
        assert!(ArgumentType::parse("array").matches(&Value::Array(vec![])));
        assert!(ArgumentType::parse("object").matches(&serde_json::json!({})));
    }
}
