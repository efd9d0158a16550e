//! Schema field tree parsed from BigQuery-style schema JSON.

use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One field of a registered schema.
///
/// RECORD fields own an ordered list of children, mirroring the nested
/// `fields` array of the schema JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: String,
    pub mode: String,
    pub description: Option<String>,
    pub policy_tags: Option<Vec<String>>,
    pub fields: Option<Vec<SchemaField>>,
}

impl SchemaField {
    pub fn is_record(&self) -> bool {
        self.field_type.eq_ignore_ascii_case("RECORD")
    }

    pub fn is_repeated(&self) -> bool {
        self.mode.eq_ignore_ascii_case("REPEATED")
    }

    pub fn is_required(&self) -> bool {
        self.mode.eq_ignore_ascii_case("REQUIRED")
    }
}

/// Flat projection of one field for registry storage, produced by
/// pre-order traversal so parents precede their children.
#[derive(Debug, Clone)]
pub struct FieldRow {
    pub field_path: String,
    pub name: String,
    pub field_type: String,
    pub mode: String,
    pub description: Option<String>,
    pub policy_tags: Option<Vec<String>>,
    pub parent_path: Option<String>,
}

/// Parse a BigQuery-style schema JSON document (a non-empty array of
/// field definitions) into the owned field tree.
pub fn parse_fields(schema_json: &Value) -> Result<Vec<SchemaField>> {
    let Some(array) = schema_json.as_array() else {
        return Err(ServiceError::InvalidInput(
            "Schema JSON must be a non-empty array of field definitions".to_string(),
        ));
    };
    if array.is_empty() {
        return Err(ServiceError::InvalidInput(
            "Schema JSON must be a non-empty array of field definitions".to_string(),
        ));
    }
    array.iter().map(parse_field).collect()
}

fn parse_field(def: &Value) -> Result<SchemaField> {
    let Some(obj) = def.as_object() else {
        return Err(ServiceError::InvalidInput(
            "Schema field definition must be an object".to_string(),
        ));
    };

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            ServiceError::InvalidInput("Schema field is missing a name".to_string())
        })?
        .to_string();
    let field_type = obj
        .get("type")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ServiceError::InvalidInput(format!("Schema field '{name}' is missing a type"))
        })?
        .to_string();
    let mode = obj
        .get("mode")
        .and_then(Value::as_str)
        .unwrap_or("NULLABLE")
        .to_string();
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    let policy_tags = obj
        .get("policyTags")
        .and_then(|tags| tags.get("names"))
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        });

    let fields = match obj.get("fields") {
        Some(nested) if field_type.eq_ignore_ascii_case("RECORD") => {
            Some(parse_fields(nested)?)
        }
        _ => None,
    };

    Ok(SchemaField {
        name,
        field_type,
        mode,
        description,
        policy_tags,
        fields,
    })
}

/// Flatten a field tree into storage rows, pre-order, with dot-joined
/// paths and parent links.
pub fn flatten_fields(fields: &[SchemaField]) -> Vec<FieldRow> {
    let mut rows = Vec::new();
    push_rows(fields, None, &mut rows);
    rows
}

fn push_rows(fields: &[SchemaField], parent_path: Option<&str>, rows: &mut Vec<FieldRow>) {
    for field in fields {
        let field_path = match parent_path {
            Some(parent) => format!("{parent}.{}", field.name),
            None => field.name.clone(),
        };
        rows.push(FieldRow {
            field_path: field_path.clone(),
            name: field.name.clone(),
            field_type: field.field_type.clone(),
            mode: field.mode.clone(),
            description: field.description.clone(),
            policy_tags: field.policy_tags.clone(),
            parent_path: parent_path.map(str::to_string),
        });
        if let Some(children) = &field.fields {
            push_rows(children, Some(&field_path), rows);
        }
    }
}

/// Leaf of a nested RECORD: the top-level column it lives in, the JSON
/// path under that column, and the full dot-joined path.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLeaf {
    pub column: String,
    pub json_path: String,
    pub full_path: String,
}

/// Collect every leaf under the RECORD-typed top-level fields, in
/// declaration order. Empty when the schema has no nested fields.
pub fn record_leaves(fields: &[SchemaField]) -> Vec<RecordLeaf> {
    let mut leaves = Vec::new();
    for field in fields {
        if let Some(children) = field.fields.as_deref()
            && field.is_record()
        {
            walk_leaves(&field.name, children, "", &mut leaves);
        }
    }
    leaves
}

fn walk_leaves(column: &str, fields: &[SchemaField], prefix: &str, leaves: &mut Vec<RecordLeaf>) {
    for field in fields {
        let json_path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{prefix}.{}", field.name)
        };
        match field.fields.as_deref() {
            Some(children) if field.is_record() => {
                walk_leaves(column, children, &json_path, leaves);
            }
            _ => leaves.push(RecordLeaf {
                column: column.to_string(),
                json_path: json_path.clone(),
                full_path: format!("{column}.{json_path}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested_schema() -> Value {
        json!([
            {"name": "user_id", "type": "STRING", "mode": "REQUIRED"},
            {"name": "tags", "type": "STRING", "mode": "REPEATED"},
            {
                "name": "metadata",
                "type": "RECORD",
                "mode": "NULLABLE",
                "fields": [
                    {"name": "browser", "type": "STRING", "mode": "NULLABLE"},
                    {
                        "name": "geo",
                        "type": "RECORD",
                        "mode": "NULLABLE",
                        "fields": [
                            {"name": "country", "type": "STRING", "mode": "NULLABLE"}
                        ]
                    }
                ]
            }
        ])
    }

    #[test]
    fn parses_nested_records() {
        let fields = parse_fields(&nested_schema()).unwrap();
        assert_eq!(fields.len(), 3);
        assert!(fields[0].is_required());
        assert!(fields[1].is_repeated());

        let metadata = &fields[2];
        assert!(metadata.is_record());
        let children = metadata.fields.as_ref().unwrap();
        assert_eq!(children.len(), 2);
        assert!(children[1].is_record());
    }

    #[test]
    fn mode_defaults_to_nullable() {
        let fields = parse_fields(&json!([{"name": "x", "type": "STRING"}])).unwrap();
        assert_eq!(fields[0].mode, "NULLABLE");
    }

    #[test]
    fn policy_tags_are_extracted() {
        let fields = parse_fields(&json!([
            {"name": "ssn", "type": "STRING", "policyTags": {"names": ["pii", "restricted"]}}
        ]))
        .unwrap();
        assert_eq!(
            fields[0].policy_tags,
            Some(vec!["pii".to_string(), "restricted".to_string()])
        );
    }

    #[test]
    fn rejects_malformed_schema_json() {
        assert!(parse_fields(&json!([])).is_err());
        assert!(parse_fields(&json!({"name": "x"})).is_err());
        assert!(parse_fields(&json!([{"type": "STRING"}])).is_err());
        assert!(parse_fields(&json!([{"name": "x"}])).is_err());
    }

    #[test]
    fn flatten_is_preorder_with_parent_links() {
        let fields = parse_fields(&nested_schema()).unwrap();
        let rows = flatten_fields(&fields);
        let paths: Vec<&str> = rows.iter().map(|r| r.field_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "user_id",
                "tags",
                "metadata",
                "metadata.browser",
                "metadata.geo",
                "metadata.geo.country",
            ]
        );
        assert_eq!(rows[3].parent_path.as_deref(), Some("metadata"));
        assert_eq!(rows[5].parent_path.as_deref(), Some("metadata.geo"));
    }

    #[test]
    fn record_leaves_skip_flat_schemas() {
        let flat = parse_fields(&json!([{"name": "a", "type": "STRING"}])).unwrap();
        assert!(record_leaves(&flat).is_empty());

        let fields = parse_fields(&nested_schema()).unwrap();
        let leaves = record_leaves(&fields);
        let full: Vec<&str> = leaves.iter().map(|l| l.full_path.as_str()).collect();
        assert_eq!(full, vec!["metadata.browser", "metadata.geo.country"]);
        assert_eq!(leaves[1].column, "metadata");
        assert_eq!(leaves[1].json_path, "geo.country");
    }
}
