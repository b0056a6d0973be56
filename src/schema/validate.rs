//! Document validation against a [`Schema`] (spec §4.1 `validate`).

use bson::{Bson, Document};
use regex::Regex;

use super::types::{Constraints, FieldSchema, LiteralValue, Schema};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

pub fn validate(doc: &Document, schema: &Schema) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    for (name, field_schema) in schema.fields() {
        let value = doc.get(name);
        validate_field(name, value, field_schema, &mut issues);
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn validate_field(path: &str, value: Option<&Bson>, schema: &FieldSchema, issues: &mut Vec<ValidationIssue>) {
    match schema {
        FieldSchema::Optional(inner) => {
            if let Some(v) = value {
                if !matches!(v, Bson::Null) {
                    validate_field(path, Some(v), inner, issues);
                }
            }
        }
        FieldSchema::Nullable(inner) => match value {
            None => issues.push(ValidationIssue { path: path.to_string(), message: "missing required field".into() }),
            Some(Bson::Null) => {}
            Some(v) => validate_field(path, Some(v), inner, issues),
        },
        _ => {
            let Some(v) = value else {
                issues.push(ValidationIssue { path: path.to_string(), message: "missing required field".into() });
                return;
            };
            validate_present(path, v, schema, issues);
        }
    }
}

fn validate_present(path: &str, value: &Bson, schema: &FieldSchema, issues: &mut Vec<ValidationIssue>) {
    match schema {
        FieldSchema::String(c) => match value {
            Bson::String(s) => validate_string_constraints(path, s, c, issues),
            _ => issues.push(wrong_type(path, "string")),
        },
        FieldSchema::Number(c) => {
            let Some(n) = bson_as_f64(value) else {
                issues.push(wrong_type(path, "number"));
                return;
            };
            if let Some(min) = c.min_value {
                if n < min {
                    issues.push(ValidationIssue { path: path.to_string(), message: format!("{n} is below minimum {min}") });
                }
            }
            if let Some(max) = c.max_value {
                if n > max {
                    issues.push(ValidationIssue { path: path.to_string(), message: format!("{n} exceeds maximum {max}") });
                }
            }
        }
        FieldSchema::Boolean => {
            if !matches!(value, Bson::Boolean(_)) {
                issues.push(wrong_type(path, "boolean"));
            }
        }
        FieldSchema::Date => {
            if !matches!(value, Bson::DateTime(_)) {
                issues.push(wrong_type(path, "date"));
            }
        }
        FieldSchema::Null => {
            if !matches!(value, Bson::Null) {
                issues.push(wrong_type(path, "null"));
            }
        }
        FieldSchema::Literal(lit) => {
            if !literal_matches(lit, value) {
                issues.push(ValidationIssue { path: path.to_string(), message: "does not match literal value".into() });
            }
        }
        FieldSchema::Enum(variants) => match value {
            Bson::String(s) if variants.iter().any(|v| v == s) => {}
            _ => issues.push(ValidationIssue { path: path.to_string(), message: format!("not one of {variants:?}") }),
        },
        FieldSchema::Object(inner) => match value.as_document() {
            Some(d) => {
                if let Err(mut sub) = validate(d, inner) {
                    for issue in sub.drain(..) {
                        issues.push(ValidationIssue { path: format!("{path}.{}", issue.path), message: issue.message });
                    }
                }
            }
            None => issues.push(wrong_type(path, "object")),
        },
        FieldSchema::Array(item) => match value.as_array() {
            Some(arr) => {
                for (i, v) in arr.iter().enumerate() {
                    validate_present(&format!("{path}[{i}]"), v, item, issues);
                }
            }
            None => issues.push(wrong_type(path, "array")),
        },
        FieldSchema::Record { key_pattern, value: value_schema } => match value.as_document() {
            Some(d) => {
                let re = Regex::new(key_pattern).ok();
                for (k, v) in d.iter() {
                    if let Some(re) = &re {
                        if !re.is_match(k) {
                            issues.push(ValidationIssue { path: format!("{path}.{k}"), message: format!("key does not match pattern {key_pattern}") });
                            continue;
                        }
                    }
                    validate_present(&format!("{path}.{k}"), v, value_schema, issues);
                }
            }
            None => issues.push(wrong_type(path, "object")),
        },
        FieldSchema::Optional(inner) | FieldSchema::Nullable(inner) => validate_present(path, value, inner, issues),
        FieldSchema::Union(variants) => {
            let matches = variants.iter().any(|v| {
                let mut probe = Vec::new();
                validate_present(path, value, v, &mut probe);
                probe.is_empty()
            });
            if !matches {
                issues.push(ValidationIssue { path: path.to_string(), message: "matches no union variant".into() });
            }
        }
    }
}

fn validate_string_constraints(path: &str, s: &str, c: &Constraints, issues: &mut Vec<ValidationIssue>) {
    if c.non_empty && s.is_empty() {
        issues.push(ValidationIssue { path: path.to_string(), message: "must not be empty".into() });
    }
    if let Some(min) = c.min_length {
        if s.len() < min {
            issues.push(ValidationIssue { path: path.to_string(), message: format!("length below minimum {min}") });
        }
    }
    if let Some(max) = c.max_length {
        if s.len() > max {
            issues.push(ValidationIssue { path: path.to_string(), message: format!("length exceeds maximum {max}") });
        }
    }
    if let Some(pattern) = &c.pattern {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(s) => {
                issues.push(ValidationIssue { path: path.to_string(), message: format!("does not match pattern {pattern}") })
            }
            _ => {}
        }
    }
}

fn wrong_type(path: &str, expected: &str) -> ValidationIssue {
    ValidationIssue { path: path.to_string(), message: format!("expected {expected}") }
}

fn literal_matches(lit: &LiteralValue, value: &Bson) -> bool {
    match (lit, value) {
        (LiteralValue::Str(s), Bson::String(v)) => s == v,
        (LiteralValue::Num(n), v) => bson_as_f64(v).map(|x| x == *n).unwrap_or(false),
        (LiteralValue::Bool(b), Bson::Boolean(v)) => b == v,
        _ => false,
    }
}

fn bson_as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(d) => Some(*d),
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn missing_required_field_is_reported() {
        let schema = Schema::new().with_field("name", FieldSchema::String(Constraints::default()));
        let doc = doc! {};
        let issues = validate(&doc, &schema).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "name");
    }

    #[test]
    fn string_length_constraint_enforced() {
        let schema = Schema::new().with_field(
            "name",
            FieldSchema::String(Constraints { min_length: Some(3), ..Default::default() }),
        );
        let doc = doc! { "name": "ab" };
        assert!(validate(&doc, &schema).is_err());
    }

    #[test]
    fn optional_field_may_be_absent() {
        let schema = Schema::new()
            .with_field("name", FieldSchema::String(Constraints::default()))
            .with_field("nickname", FieldSchema::Optional(Box::new(FieldSchema::String(Constraints::default()))));
        let doc = doc! { "name": "Alice" };
        assert!(validate(&doc, &schema).is_ok());
    }

    #[test]
    fn nested_object_validated_recursively() {
        let inner = Schema::new().with_field("street", FieldSchema::String(Constraints::default()));
        let schema = Schema::new().with_field("address", FieldSchema::Object(inner));
        let doc = doc! { "address": { "street": 5 } };
        let issues = validate(&doc, &schema).unwrap_err();
        assert_eq!(issues[0].path, "address.street");
    }
}
