//! Which fields a tree view has to request.

use crate::schema::SchemaService;

/// Field names referenced by a display template.
///
/// Tokens are written `{{ field }}`; the inner text is trimmed, empty tokens
/// and an unterminated `{{` are ignored. A template without any token
/// delimiters names a single field directly.
pub fn template_fields(template: &str) -> Vec<String> {
    let template = template.trim();
    if template.is_empty() {
        return Vec::new();
    }
    if !template.contains("{{") {
        return vec![template.to_string()];
    }

    let mut fields: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let token = after[..end].trim();
        if !token.is_empty() && !fields.iter().any(|f| f == token) {
            fields.push(token.to_string());
        }
        rest = &after[end + 2..];
    }
    fields
}

/// Maps display-only field references to fields the executor can query.
pub trait FieldAdjuster: Send + Sync {
    fn adjust(&self, collection: &str, fields: &[String]) -> Vec<String>;
}

/// Adjusts against the collection schema: dotted relational paths resolve to
/// their first-level field, unknown fields, `$` virtual fields and alias
/// fields without a relation are dropped.
pub struct SchemaAdjuster<'a> {
    schema: &'a dyn SchemaService,
}

impl<'a> SchemaAdjuster<'a> {
    pub fn new(schema: &'a dyn SchemaService) -> Self {
        Self { schema }
    }
}

impl FieldAdjuster for SchemaAdjuster<'_> {
    fn adjust(&self, collection: &str, fields: &[String]) -> Vec<String> {
        let known = self.schema.fields(collection);
        let mut adjusted: Vec<String> = Vec::new();

        for field in fields {
            let root = field.split('.').next().unwrap_or(field);
            if root.starts_with('$') {
                continue;
            }
            let Some(info) = known.iter().find(|f| f.field == root) else {
                continue;
            };
            if info.is_alias() && info.relation.is_none() {
                continue;
            }
            if !adjusted.iter().any(|f| f == root) {
                adjusted.push(root.to_string());
            }
        }

        adjusted
    }
}

/// Inputs of the field projection. All names are optional except the
/// collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldProjection {
    pub collection: String,
    pub primary_key: Option<String>,
    pub display_fields: Vec<String>,
    pub parent_field: Option<String>,
    pub children_field: Option<String>,
    pub sort_field: Option<String>,
    /// Plain display option fields (type, slug, host, visibility).
    pub option_fields: Vec<String>,
    /// Display templates (title, additional).
    pub templates: Vec<String>,
}

impl FieldProjection {
    /// Deduplicated, ordered list of fields to request. The primary key, when
    /// known, is always first.
    pub fn resolve(&self, adjuster: &dyn FieldAdjuster) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();

        if let Some(pk) = &self.primary_key {
            push(&mut fields, pk);
        }
        for field in &self.display_fields {
            push(&mut fields, field);
        }
        for field in [&self.parent_field, &self.children_field, &self.sort_field]
            .into_iter()
            .flatten()
        {
            push(&mut fields, field);
        }

        let mut display_only: Vec<String> = self.option_fields.clone();
        for template in &self.templates {
            display_only.extend(template_fields(template));
        }
        for field in adjuster.adjust(&self.collection, &display_only) {
            push(&mut fields, &field);
        }

        fields
    }
}

fn push(fields: &mut Vec<String>, name: &str) {
    if !name.is_empty() && !fields.iter().any(|f| f == name) {
        fields.push(name.to_string());
    }
}
