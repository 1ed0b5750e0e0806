//! Read-only collection metadata and permission lookups.
//!
//! Both are queried synchronously from state the host has already cached.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Field type as far as the tree view cares: stored columns versus
/// presentation-only aliases (o2m, m2m, groups, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Stored,
    Alias,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub field: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub hidden: bool,
    /// Target collection when the field is relational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl FieldInfo {
    pub fn stored(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: FieldKind::Stored,
            hidden: false,
            relation: None,
        }
    }

    pub fn alias(field: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::Alias,
            ..Self::stored(field)
        }
    }

    pub fn hidden(self) -> Self {
        Self {
            hidden: true,
            ..self
        }
    }

    pub fn related_to(self, collection: impl Into<String>) -> Self {
        Self {
            relation: Some(collection.into()),
            ..self
        }
    }

    pub fn is_alias(&self) -> bool {
        self.kind == FieldKind::Alias
    }
}

/// Collection metadata provider.
pub trait SchemaService: Send + Sync {
    fn primary_key(&self, collection: &str) -> Option<FieldInfo>;

    fn fields(&self, collection: &str) -> Vec<FieldInfo>;

    /// Field holding the manual sort value, if the collection has one.
    fn sort_field(&self, collection: &str) -> Option<String>;

    fn field(&self, collection: &str, field: &str) -> Option<FieldInfo> {
        self.fields(collection).into_iter().find(|f| f.field == field)
    }

    fn has_field(&self, collection: &str, field: &str) -> bool {
        self.field(collection, field).is_some()
    }
}

/// First `count` visible, stored fields, sorted by name.
pub fn default_display_fields(fields: &[FieldInfo], count: usize) -> Vec<String> {
    let mut picked: Vec<String> = fields
        .iter()
        .filter(|f| !f.hidden && !f.is_alias())
        .take(count)
        .map(|f| f.field.clone())
        .collect();
    picked.sort();
    picked
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub primary_key: String,
    pub fields: Vec<FieldInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
}

/// Schema held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    collections: HashMap<String, CollectionInfo>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, name: impl Into<String>, info: CollectionInfo) -> Self {
        self.collections.insert(name.into(), info);
        self
    }
}

impl SchemaService for StaticSchema {
    fn primary_key(&self, collection: &str) -> Option<FieldInfo> {
        let info = self.collections.get(collection)?;
        info.fields
            .iter()
            .find(|f| f.field == info.primary_key)
            .cloned()
            .or_else(|| Some(FieldInfo::stored(info.primary_key.clone())))
    }

    fn fields(&self, collection: &str) -> Vec<FieldInfo> {
        self.collections
            .get(collection)
            .map(|info| info.fields.clone())
            .unwrap_or_default()
    }

    fn sort_field(&self, collection: &str) -> Option<String> {
        self.collections.get(collection)?.sort_field.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Update,
    Delete,
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Read => write!(f, "read"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

pub trait Permissions: Send + Sync {
    fn has_permission(&self, collection: &str, action: Action) -> bool;
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Permissions for AllowAll {
    fn has_permission(&self, _collection: &str, _action: Action) -> bool {
        true
    }
}

/// Explicit grant list.
#[derive(Debug, Clone, Default)]
pub struct GrantList {
    grants: HashSet<(String, Action)>,
}

impl GrantList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, collection: impl Into<String>, action: Action) -> Self {
        self.grants.insert((collection.into(), action));
        self
    }
}

impl Permissions for GrantList {
    fn has_permission(&self, collection: &str, action: Action) -> bool {
        self.grants.contains(&(collection.to_string(), action))
    }
}
