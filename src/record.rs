use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Primary key of a record.
///
/// Integer keys order before string keys, which matches the order in which
/// the remote enumerates object keys in an edit payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int(i64),
    Str(String),
}

impl PrimaryKey {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(PrimaryKey::Int),
            Value::String(s) => Some(PrimaryKey::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PrimaryKey::Int(i) => Value::from(*i),
            PrimaryKey::Str(s) => Value::from(s.clone()),
        }
    }
}

impl Ord for PrimaryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PrimaryKey::Int(a), PrimaryKey::Int(b)) => a.cmp(b),
            (PrimaryKey::Str(a), PrimaryKey::Str(b)) => a.cmp(b),
            (PrimaryKey::Int(_), PrimaryKey::Str(_)) => Ordering::Less,
            (PrimaryKey::Str(_), PrimaryKey::Int(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for PrimaryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Int(i) => write!(f, "{}", i),
            PrimaryKey::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        PrimaryKey::Int(value)
    }
}

impl From<i32> for PrimaryKey {
    fn from(value: i32) -> Self {
        PrimaryKey::Int(value as i64)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        PrimaryKey::Str(value.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        PrimaryKey::Str(value)
    }
}

/// One item of a collection: field name to JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn primary_key(&self, field: &str) -> Option<PrimaryKey> {
        self.get(field).and_then(PrimaryKey::from_value)
    }

    /// Shallow merge: every field of `patch` overwrites the same field here.
    pub fn merge(&mut self, patch: &Record) {
        for (k, v) in patch.0.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

/// Whether an item set came from one bounded page or from the whole collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    #[default]
    Paged,
    Full,
}

/// The ordered records currently held in memory, tagged with the mode that
/// produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemSet {
    pub mode: FetchMode,
    pub items: Vec<Record>,
}

impl ItemSet {
    pub fn new(mode: FetchMode, items: Vec<Record>) -> Self {
        Self { mode, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self, primary_key: &str) -> Vec<PrimaryKey> {
        self.items
            .iter()
            .filter_map(|r| r.primary_key(primary_key))
            .collect()
    }
}

/// Pending per-record changes, keyed by primary key. Iterates in key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditBatch(BTreeMap<PrimaryKey, Record>);

impl EditBatch {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, id: impl Into<PrimaryKey>, changes: Record) -> Self {
        self.0.insert(id.into(), changes);
        self
    }

    pub fn insert(&mut self, id: impl Into<PrimaryKey>, changes: Record) {
        self.0.insert(id.into(), changes);
    }

    pub fn get(&self, id: &PrimaryKey) -> Option<&Record> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PrimaryKey, &Record)> {
        self.0.iter()
    }
}

impl FromIterator<(PrimaryKey, Record)> for EditBatch {
    fn from_iter<I: IntoIterator<Item = (PrimaryKey, Record)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
