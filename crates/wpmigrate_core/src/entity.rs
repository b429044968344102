use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Category,
    Tag,
    User,
    Media,
    Post,
}

impl EntityKind {
    /// Import order. Every kind depends only on kinds listed before it.
    pub const ALL: [EntityKind; 5] = [
        Self::Category,
        Self::Tag,
        Self::User,
        Self::Media,
        Self::Post,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Tag => "tag",
            Self::User => "user",
            Self::Media => "media",
            Self::Post => "post",
        }
    }

    /// Collection path segment under `/wp-json/wp/v2/`.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Category => "categories",
            Self::Tag => "tags",
            Self::User => "users",
            Self::Media => "media",
            Self::Post => "posts",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        for kind in Self::ALL {
            if normalized == kind.as_str() || normalized == kind.endpoint() {
                return Ok(kind);
            }
        }
        bail!("unsupported entity type: {value} (expected category|tag|user|media|post)")
    }

    pub fn is_taxonomy(self) -> bool {
        matches!(self, Self::Category | Self::Tag)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A REST record kept as the raw JSON object so nothing the API returned is
/// lost between export and import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => bail!("expected a JSON object record, got {}", json_type_name(&other)),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn id(&self) -> Option<i64> {
        self.0.get("id").and_then(value_as_id)
    }

    pub fn slug(&self) -> Option<&str> {
        self.str_field("slug").filter(|slug| !slug.trim().is_empty())
    }

    pub fn count(&self) -> i64 {
        self.0.get("count").and_then(value_as_id).unwrap_or(0)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Read a WordPress `{ "rendered": ... }` wrapper, accepting a bare string
    /// as well since some write responses flatten it.
    pub fn rendered(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            Value::String(value) => Some(value.as_str()),
            Value::Object(inner) => inner.get("rendered").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn set_rendered(&mut self, key: &str, value: &str) {
        match self.0.get_mut(key) {
            Some(Value::Object(inner)) => {
                inner.insert("rendered".to_string(), Value::String(value.to_string()));
            }
            _ => {
                let mut inner = Map::new();
                inner.insert("rendered".to_string(), Value::String(value.to_string()));
                self.0.insert(key.to_string(), Value::Object(inner));
            }
        }
    }

    pub fn id_field(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(value_as_id)
    }

    /// Ids stored as a JSON array (`categories`, `tags`). Entries that are not
    /// numeric are dropped.
    pub fn id_list(&self, key: &str) -> Vec<i64> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(value_as_id).collect(),
            Some(value) => value_as_id(value).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn label(&self) -> String {
        match (self.slug(), self.id()) {
            (Some(slug), _) => slug.to_string(),
            (None, Some(id)) => format!("#{id}"),
            (None, None) => "<unidentified>".to_string(),
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
