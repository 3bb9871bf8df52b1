//! Named structural rule sets for artifact payloads, referenced by version
//! strings such as `"feature_spec/v1"`.

use std::collections::HashMap;

use serde_json::Value;

/// Expected JSON shape of a required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Array,
    /// Array with at least one element.
    NonEmptyArray,
    Object,
    Any,
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::NonEmptyArray => value.as_array().is_some_and(|a| !a.is_empty()),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => !value.is_null(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldKind::String => "a string",
            FieldKind::Number => "a number",
            FieldKind::Bool => "a boolean",
            FieldKind::Array => "an array",
            FieldKind::NonEmptyArray => "a non-empty array",
            FieldKind::Object => "an object",
            FieldKind::Any => "present",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRule {
    required: Vec<(String, FieldKind)>,
}

impl SchemaRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, kind: FieldKind) -> Self {
        self.required.push((name.to_string(), kind));
        self
    }

    /// All violations, in declaration order. Empty means valid.
    pub fn check(&self, payload: &Value) -> Vec<String> {
        let Some(object) = payload.as_object() else {
            return vec!["payload must be a JSON object".to_string()];
        };
        self.required
            .iter()
            .filter_map(|(name, kind)| match object.get(name) {
                None => Some(format!("missing field `{}`", name)),
                Some(value) if !kind.accepts(value) => {
                    Some(format!("`{}` must be {}", name, kind.describe()))
                }
                Some(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    rules: HashMap<String, SchemaRule>,
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rules for every artifact the built-in phase handlers produce.
    pub fn builtin() -> Self {
        use FieldKind::*;

        let mut registry = Self::empty();
        registry.register(
            "feature_list/v1",
            SchemaRule::new().field("features", NonEmptyArray).field("source", String),
        );
        registry.register(
            "feasibility_report/v1",
            SchemaRule::new()
                .field("feasible", Bool)
                .field("assessments", Array),
        );
        registry.register(
            "feature_spec/v1",
            SchemaRule::new()
                .field("features", NonEmptyArray)
                .field("architecture", Object),
        );
        registry.register(
            "code_gen_spec/v1",
            SchemaRule::new()
                .field("files", Array)
                .field("written_files", Array)
                .field("blocked_files", Array),
        );
        registry.register(
            "qa_report/v1",
            SchemaRule::new()
                .field("passed", Bool)
                .field("total", Number)
                .field("checks", Array),
        );
        registry.register(
            "release_candidate/v1",
            SchemaRule::new().field("version", String).field("qa_report", Object),
        );
        registry.register(
            "deployment_report/v1",
            SchemaRule::new()
                .field("environment", String)
                .field("deployed", Bool),
        );
        registry.register(
            "production_status/v1",
            SchemaRule::new().field("healthy", Bool).field("checks", Array),
        );
        registry.register(
            "maintenance_report/v1",
            SchemaRule::new().field("cycle", Number).field("actions", Array),
        );
        registry
    }

    pub fn register(&mut self, version: &str, rule: SchemaRule) {
        self.rules.insert(version.to_string(), rule);
    }

    pub fn contains(&self, version: &str) -> bool {
        self.rules.contains_key(version)
    }

    /// `None` when the version is unknown.
    pub fn check(&self, version: &str, payload: &Value) -> Option<Vec<String>> {
        self.rules.get(version).map(|rule| rule.check(payload))
    }
}
