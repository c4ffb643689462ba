//! Named validators and their evaluation after a document write.

use crate::access::AccessContext;
use crate::error::SchemaError;
use crate::schema::hooks::HookCtx;
use crate::schema::kind::PropertyKind;
use crate::schema::node::{DocCursor, Node, NodeId};
use crate::schema::tree::SchemaTree;
use crate::value::{is_custom_name, is_present};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// What a rule gets to look at.
pub struct RuleInput<'a> {
    pub node: &'a Node,
    /// The stored value, if any. Rules other than `required` only run on
    /// present values.
    pub value: Option<&'a Value>,
    /// The document holding the value.
    pub doc: &'a Map<String, Value>,
    pub is_new: bool,
}

pub trait RuleRegistry: Send + Sync {
    /// Runs the named rule. `None` when this registry has no such rule.
    fn check(&self, name: &str, definition: &Value, input: &RuleInput<'_>) -> Option<Result<(), String>>;
}

/// The rules every engine understands.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRules;

fn bound(definition: &Value, key: &str) -> Option<f64> {
    definition.get(key).and_then(Value::as_f64)
}

fn check_string(definition: &Value, value: &Value) -> Result<(), String> {
    let Some(s) = value.as_str() else {
        return Err("must be a string".into());
    };
    let len = s.chars().count() as f64;
    let allow_empty = definition
        .get("allowEmpty")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if !allow_empty && s.is_empty() {
        return Err("must not be empty".into());
    }
    if let Some(min) = bound(definition, "min") {
        if len < min {
            return Err(format!("must be at least {min} characters"));
        }
    }
    if let Some(max) = bound(definition, "max") {
        if len > max {
            return Err(format!("must be at most {max} characters"));
        }
    }
    Ok(())
}

fn check_number(definition: &Value, value: &Value) -> Result<(), String> {
    let Some(n) = value.as_f64() else {
        return Err("must be a number".into());
    };
    let allow_decimal = definition
        .get("allowDecimal")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if !allow_decimal && n.fract() != 0.0 {
        return Err("must be an integer".into());
    }
    if let Some(min) = bound(definition, "min") {
        if n < min {
            return Err(format!("must be at least {min}"));
        }
    }
    if let Some(max) = bound(definition, "max") {
        if n > max {
            return Err(format!("must be at most {max}"));
        }
    }
    Ok(())
}

impl RuleRegistry for BuiltinRules {
    fn check(&self, name: &str, definition: &Value, input: &RuleInput<'_>) -> Option<Result<(), String>> {
        let value = input.value;
        let result = match name {
            "required" => match value {
                Some(v) if is_present(v) => Ok(()),
                _ => Err("a value is required".into()),
            },
            "string" => value.map_or(Ok(()), |v| check_string(definition, v)),
            "number" => value.map_or(Ok(()), |v| check_number(definition, v)),
            "stringEnum" => {
                let allowed: Vec<&str> = definition
                    .get("values")
                    .and_then(Value::as_array)
                    .map(|vs| vs.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                match value.and_then(Value::as_str) {
                    Some(s) if allowed.contains(&s) => Ok(()),
                    Some(s) => Err(format!("'{s}' is not one of {}", allowed.join(", "))),
                    None if value.is_none() => Ok(()),
                    None => Err("must be a string".into()),
                }
            }
            "customName" => match value.and_then(Value::as_str) {
                Some(s) if is_custom_name(s) => Ok(()),
                Some(s) => Err(format!("'{s}' is not a custom name")),
                None if value.is_none() => Ok(()),
                None => Err("must be a string".into()),
            },
            "uniqueInArray" => match value.and_then(Value::as_array) {
                Some(items) => {
                    let mut seen = Vec::with_capacity(items.len());
                    for item in items {
                        if seen.contains(&item) {
                            return Some(Err(format!("duplicate value {item}")));
                        }
                        seen.push(item);
                    }
                    Ok(())
                }
                None => Ok(()),
            },
            "minItems" => match (value.and_then(Value::as_array), bound(definition, "min")) {
                (Some(items), Some(min)) if (items.len() as f64) < min => {
                    Err(format!("requires at least {min} items"))
                }
                _ => Ok(()),
            },
            "maxItems" => match (value.and_then(Value::as_array), bound(definition, "max")) {
                (Some(items), Some(max)) if (items.len() as f64) > max => {
                    Err(format!("allows at most {max} items"))
                }
                _ => Ok(()),
            },
            _ => return None,
        };
        Some(result)
    }
}

/// Rules that judge a whole array rather than its elements.
fn is_array_rule(name: &str) -> bool {
    matches!(name, "required" | "uniqueInArray" | "minItems" | "maxItems")
}

fn failed(path: &str, rule: &str, message: String) -> SchemaError {
    SchemaError::Validation {
        path: path.to_string(),
        rule: rule.to_string(),
        message,
    }
}

/// Validates the given nodes of one document: array bounds, declared
/// rules, ad-hoc hook validators and set shape limits.
pub fn validate_nodes(
    tree: &SchemaTree,
    ac: &AccessContext,
    nodes: &[NodeId],
    doc: &Map<String, Value>,
    cursor: &DocCursor,
) -> Result<(), SchemaError> {
    for &id in nodes {
        let node = tree.node(id);
        if node.is_virtual {
            continue;
        }
        let path = cursor.child_path(&node.name);
        let value = doc.get(&node.name).filter(|v| !v.is_null());

        if node.array {
            let len = value.and_then(Value::as_array).map_or(0, Vec::len) as i64;
            if len < node.min_items && (value.is_some() || cursor.is_new) {
                return Err(failed(
                    &path,
                    "minItems",
                    format!("requires at least {} items", node.min_items),
                ));
            }
            if node.max_items >= 0 && len > node.max_items && !node.max_shift {
                return Err(failed(
                    &path,
                    "maxItems",
                    format!("allows at most {} items", node.max_items),
                ));
            }
        }

        let input = RuleInput {
            node,
            value,
            doc,
            is_new: cursor.is_new,
        };
        for validator in &node.validators {
            if value.is_none() && validator.name != "required" {
                continue;
            }
            let per_element = node.array && !node.is_document() && !is_array_rule(&validator.name);
            let targets: Vec<Option<&Value>> = match (per_element, value) {
                (true, Some(Value::Array(items))) => items.iter().map(Some).collect(),
                _ => vec![value],
            };
            for target in targets {
                let input = RuleInput { value: target, ..input };
                match ac.rules.check(&validator.name, &validator.definition, &input) {
                    Some(Ok(())) => {}
                    Some(Err(message)) => return Err(failed(&path, &validator.name, message)),
                    None => {
                        return Err(failed(
                            &path,
                            &validator.name,
                            format!("unknown validator '{}'", validator.name),
                        ));
                    }
                }
            }
        }

        if !node.hooks.validators.is_empty() {
            let ctx = HookCtx { tree, node, cursor };
            for (name, check) in &node.hooks.validators {
                if let Err(message) = check(&ctx, ac, doc, value) {
                    return Err(failed(&path, name, message));
                }
            }
        }

        if let PropertyKind::Set(spec) = &node.kind {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for element in value.and_then(Value::as_array).into_iter().flatten() {
                if let Some(shape) = element.get(&spec.discriminator_key).and_then(Value::as_str) {
                    *counts.entry(shape).or_default() += 1;
                }
            }
            for (shape, (min_required, max_allowed)) in &spec.limits {
                let count = counts.get(shape.as_str()).copied().unwrap_or(0);
                if min_required.is_some_and(|min| count < min) {
                    return Err(failed(
                        &path,
                        "minRequired",
                        format!("requires at least {} '{shape}' entries", min_required.unwrap_or(0)),
                    ));
                }
                if max_allowed.is_some_and(|max| count > max) {
                    return Err(failed(
                        &path,
                        "maxAllowed",
                        format!("allows at most {} '{shape}' entries", max_allowed.unwrap_or(0)),
                    ));
                }
            }
        }
    }
    Ok(())
}
