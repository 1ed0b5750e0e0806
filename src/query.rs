use std::cmp::Ordering;
use std::fmt::{self, Display};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::record::Record;

/// A predicate on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    Neq(Value),
    /// `true` matches null or absent values, `false` matches present ones.
    Null(bool),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Contains(String),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
}

impl FilterOp {
    fn operator(&self) -> &'static str {
        match self {
            FilterOp::Eq(_) => "_eq",
            FilterOp::Neq(_) => "_neq",
            FilterOp::Null(true) => "_null",
            FilterOp::Null(false) => "_nnull",
            FilterOp::In(_) => "_in",
            FilterOp::Nin(_) => "_nin",
            FilterOp::Contains(_) => "_contains",
            FilterOp::Gt(_) => "_gt",
            FilterOp::Gte(_) => "_gte",
            FilterOp::Lt(_) => "_lt",
            FilterOp::Lte(_) => "_lte",
        }
    }

    fn operand(&self) -> Value {
        match self {
            FilterOp::Eq(v)
            | FilterOp::Neq(v)
            | FilterOp::Gt(v)
            | FilterOp::Gte(v)
            | FilterOp::Lt(v)
            | FilterOp::Lte(v) => v.clone(),
            FilterOp::Null(_) => Value::Bool(true),
            FilterOp::In(vs) | FilterOp::Nin(vs) => Value::Array(vs.clone()),
            FilterOp::Contains(s) => Value::String(s.clone()),
        }
    }

    fn parse(operator: &str, operand: &Value) -> Option<Self> {
        let list = || operand.as_array().cloned();
        let op = match operator {
            "_eq" => FilterOp::Eq(operand.clone()),
            "_neq" => FilterOp::Neq(operand.clone()),
            "_null" => FilterOp::Null(operand.as_bool().unwrap_or(true)),
            "_nnull" => FilterOp::Null(!operand.as_bool().unwrap_or(true)),
            "_in" => FilterOp::In(list()?),
            "_nin" => FilterOp::Nin(list()?),
            "_contains" => FilterOp::Contains(operand.as_str()?.to_string()),
            "_gt" => FilterOp::Gt(operand.clone()),
            "_gte" => FilterOp::Gte(operand.clone()),
            "_lt" => FilterOp::Lt(operand.clone()),
            "_lte" => FilterOp::Lte(operand.clone()),
            _ => return None,
        };
        Some(op)
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FilterOp::Eq(v) => loose_eq(value, v),
            FilterOp::Neq(v) => !loose_eq(value, v),
            FilterOp::Null(expect_null) => value.is_null() == *expect_null,
            FilterOp::In(vs) => vs.iter().any(|v| loose_eq(value, v)),
            FilterOp::Nin(vs) => !vs.iter().any(|v| loose_eq(value, v)),
            FilterOp::Contains(needle) => value
                .as_str()
                .map(|s| s.contains(needle.as_str()))
                .unwrap_or(false),
            FilterOp::Gt(v) => compare_loose(value, v) == Some(Ordering::Greater),
            FilterOp::Gte(v) => matches!(
                compare_loose(value, v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt(v) => compare_loose(value, v) == Some(Ordering::Less),
            FilterOp::Lte(v) => matches!(
                compare_loose(value, v),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// Boolean expression tree over field predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every record. Serializes as `{}`.
    All,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Field { field: String, op: FilterOp },
}

impl Filter {
    pub fn field(field: impl Into<String>, op: FilterOp) -> Self {
        Filter::Field {
            field: field.into(),
            op,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, FilterOp::Eq(value.into()))
    }

    pub fn neq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, FilterOp::Neq(value.into()))
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::field(field, FilterOp::Null(true))
    }

    pub fn not_null(field: impl Into<String>) -> Self {
        Self::field(field, FilterOp::Null(false))
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::field(field, FilterOp::In(values))
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::field(field, FilterOp::Contains(needle.into()))
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Evaluate against an in-memory record. Absent fields read as null.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::And(children) => children.iter().all(|f| f.matches(record)),
            Filter::Or(children) => children.iter().any(|f| f.matches(record)),
            Filter::Field { field, op } => {
                op.matches(record.get(field).unwrap_or(&Value::Null))
            }
        }
    }

    /// Wire representation: `{"_and": [...]}`, `{"field": {"_eq": v}}`, `{}`.
    pub fn to_json(&self) -> Value {
        match self {
            Filter::All => json!({}),
            Filter::And(children) => {
                json!({ "_and": children.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Or(children) => {
                json!({ "_or": children.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Field { field, op } => {
                let mut inner = Map::new();
                inner.insert(op.operator().to_string(), op.operand());
                let mut outer = Map::new();
                outer.insert(field.clone(), Value::Object(inner));
                Value::Object(outer)
            }
        }
    }

    /// Parse the wire representation. Unknown operators yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.is_empty() {
            return Some(Filter::All);
        }

        let mut parts = Vec::with_capacity(map.len());
        for (key, inner) in map {
            match key.as_str() {
                "_and" => parts.push(Filter::And(Self::parse_list(inner)?)),
                "_or" => parts.push(Filter::Or(Self::parse_list(inner)?)),
                field => {
                    for (operator, operand) in inner.as_object()? {
                        parts.push(Filter::field(field, FilterOp::parse(operator, operand)?));
                    }
                }
            }
        }

        if parts.len() == 1 {
            parts.pop()
        } else {
            Some(Filter::And(parts))
        }
    }

    fn parse_list(value: &Value) -> Option<Vec<Filter>> {
        value.as_array()?.iter().map(Filter::from_json).collect()
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Filter::from_json(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported filter: {}", value)))
    }
}

/// One sort key. Serializes as `"field"` or `"-field"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(raw),
        }
    }
}

impl Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.field)
        } else {
            write!(f, "{}", self.field)
        }
    }
}

impl Serialize for SortField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SortField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SortField::parse(&raw))
    }
}

/// Page size of a request. `Unbounded` is `-1` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bounded(u32),
    Unbounded,
}

impl Limit {
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            Limit::Unbounded
        } else {
            Limit::Bounded(raw.min(u32::MAX as i64) as u32)
        }
    }

    pub fn as_raw(&self) -> i64 {
        match self {
            Limit::Bounded(n) => *n as i64,
            Limit::Unbounded => -1,
        }
    }

    pub fn bounded(&self) -> Option<u32> {
        match self {
            Limit::Bounded(n) => Some(*n),
            Limit::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Limit::Unbounded)
    }
}

impl Default for Limit {
    fn default() -> Self {
        Limit::Bounded(25)
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_raw())
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Limit::from_raw(i64::deserialize(deserializer)?))
    }
}

/// -----------------------------
/// Query parameters sent to the executor
/// -----------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub sort: Vec<SortField>,
    pub limit: Limit,
    pub page: u32,
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_system: Option<Filter>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            sort: Vec::new(),
            limit: Limit::default(),
            page: 1,
            fields: Vec::new(),
            filter: None,
            search: None,
            filter_system: None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_asc(self, field: impl Into<String>) -> Self {
        let mut consumed_self = self;
        consumed_self.sort.push(SortField::asc(field));
        consumed_self
    }

    pub fn sort_desc(self, field: impl Into<String>) -> Self {
        let mut consumed_self = self;
        consumed_self.sort.push(SortField::desc(field));
        consumed_self
    }

    pub fn with_sort(self, sort: Vec<SortField>) -> Self {
        let mut consumed_self = self;
        consumed_self.sort = sort;
        consumed_self
    }

    pub fn with_limit(self, limit: Limit) -> Self {
        let mut consumed_self = self;
        consumed_self.limit = limit;
        consumed_self
    }

    pub fn with_page(self, page: u32) -> Self {
        let mut consumed_self = self;
        consumed_self.page = page.max(1);
        consumed_self
    }

    pub fn with_fields(self, fields: Vec<String>) -> Self {
        let mut consumed_self = self;
        consumed_self.fields = fields;
        consumed_self
    }

    /// Replace the filter.
    pub fn with_filter(self, filter: Option<Filter>) -> Self {
        let mut consumed_self = self;
        consumed_self.filter = filter;
        consumed_self
    }

    /// AND `filter` onto whatever filter is already set.
    pub fn where_filter(self, filter: Filter) -> Self {
        let mut consumed_self = self;
        consumed_self.filter = Some(match consumed_self.filter.take() {
            None => filter,
            Some(Filter::And(mut children)) => {
                children.push(filter);
                Filter::And(children)
            }
            Some(existing) => Filter::And(vec![existing, filter]),
        });
        consumed_self
    }

    pub fn with_search(self, search: Option<String>) -> Self {
        let mut consumed_self = self;
        consumed_self.search = search.filter(|s| !s.is_empty());
        consumed_self
    }

    pub fn with_system_filter(self, filter: Option<Filter>) -> Self {
        let mut consumed_self = self;
        consumed_self.filter_system = filter;
        consumed_self
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y)
        }
        (Value::Number(_), Value::Number(_)) => as_number(a) == as_number(b),
        _ => false,
    }
}

fn compare_loose(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}

/// Total order used for sorting records: nulls last, then numbers, strings
/// and booleans in their natural order.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    compare_loose(a, b).unwrap_or_else(|| a.to_string().cmp(&b.to_string()))
}
