//! Synthesizes a MongoDB-flavored JSON-Schema validator document from a
//! [`Schema`] (spec §4.1 `toNativeValidator`, §6 native validator format).

use bson::{doc, Bson, Document};

use super::types::{FieldSchema, LiteralValue, Schema};

pub fn to_native_validator(schema: &Schema) -> Document {
    let mut properties = Document::new();
    let mut required = Vec::new();
    for (name, field) in schema.fields() {
        let (is_required, spec) = field_spec(field);
        if is_required {
            required.push(Bson::String(name.clone()));
        }
        properties.insert(name.clone(), spec);
    }
    doc! {
        "bsonType": "object",
        "required": required,
        "properties": properties,
        "additionalProperties": true,
    }
}

/// Returns `(is_required, schema_document)`.
fn field_spec(field: &FieldSchema) -> (bool, Document) {
    match field {
        FieldSchema::Optional(inner) => {
            let (_, spec) = field_spec(inner);
            (false, spec)
        }
        FieldSchema::Nullable(inner) => {
            let (_, mut spec) = field_spec(inner);
            let base_type = spec.remove("bsonType");
            if let Some(t) = base_type {
                spec.insert("bsonType", vec![t, Bson::String("null".to_string())]);
            }
            (true, spec)
        }
        other => (true, leaf_spec(other)),
    }
}

fn leaf_spec(field: &FieldSchema) -> Document {
    match field {
        FieldSchema::String(c) => {
            let mut d = doc! { "bsonType": "string" };
            if let Some(min) = c.min_length {
                d.insert("minLength", min as i64);
            }
            if let Some(max) = c.max_length {
                d.insert("maxLength", max as i64);
            }
            if c.non_empty {
                d.insert("minLength", d.get_i64("minLength").ok().unwrap_or(0).max(1));
            }
            if let Some(pattern) = &c.pattern {
                d.insert("pattern", pattern.clone());
            }
            d
        }
        FieldSchema::Number(c) => {
            let mut d = doc! { "bsonType": "double" };
            if let Some(min) = c.min_value {
                d.insert("minimum", min);
            }
            if let Some(max) = c.max_value {
                d.insert("maximum", max);
            }
            d
        }
        FieldSchema::Boolean => doc! { "bsonType": "bool" },
        FieldSchema::Date => doc! { "bsonType": "date" },
        FieldSchema::Null => doc! { "bsonType": "null" },
        FieldSchema::Literal(lit) => match lit {
            LiteralValue::Str(s) => doc! { "enum": [s.clone()] },
            LiteralValue::Num(n) => doc! { "enum": [*n] },
            LiteralValue::Bool(b) => doc! { "enum": [*b] },
        },
        FieldSchema::Enum(variants) => doc! {
            "bsonType": "string",
            "enum": variants.clone(),
        },
        FieldSchema::Object(inner) => to_native_validator(inner),
        FieldSchema::Array(item) => {
            let (_, item_spec) = field_spec(item);
            doc! { "bsonType": "array", "items": item_spec }
        }
        FieldSchema::Record { key_pattern, value } => {
            let (_, value_spec) = field_spec(value);
            doc! {
                "bsonType": "object",
                "patternProperties": { key_pattern.clone(): value_spec },
                "additionalProperties": false,
            }
        }
        FieldSchema::Union(variants) => {
            let any_of: Vec<Bson> = variants.iter().map(|v| Bson::Document(leaf_spec(v))).collect();
            doc! { "anyOf": any_of }
        }
        FieldSchema::Optional(inner) | FieldSchema::Nullable(inner) => leaf_spec(inner),
    }
}
