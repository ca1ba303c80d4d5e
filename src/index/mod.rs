//! Index Module
//!
//! Index rules name which values of a data object are worth indexing;
//! applying a rule to an object writes one index object per pair:
//!
//! ```text
//! <pool>/index/<rule-id>/<segment-id>.idx   sorted framed (value, count) rows
//! ```

mod builder;

use serde::{Deserialize, Serialize};

use crate::record::{KeyPath, Record, Value};
use crate::storage::Uri;
use crate::uid::Uid;

pub use builder::{build_index, IndexObject};

/// What an index rule extracts from each record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    /// The value at a field path
    Field(KeyPath),
    /// Every value of the named type, anywhere in the record
    Type(String),
}

/// A named index rule kept in the root's rule table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRule {
    pub id: Uid,
    pub name: String,
    pub kind: RuleKind,
}

impl IndexRule {
    pub fn field(name: impl Into<String>, path: &str) -> Self {
        Self {
            id: Uid::new(),
            name: name.into(),
            kind: RuleKind::Field(KeyPath::new(path)),
        }
    }

    pub fn of_type(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: Uid::new(),
            name: name.into(),
            kind: RuleKind::Type(type_name.into()),
        }
    }

    /// Key of this rule in the rule table
    pub fn key(&self) -> String {
        format!("{}/{}", self.name, self.id)
    }

    /// Values of `rec` this rule indexes
    pub fn values(&self, rec: &Record) -> Vec<Value> {
        match &self.kind {
            RuleKind::Field(path) => rec
                .get(path)
                .filter(|v| !v.is_null())
                .cloned()
                .into_iter()
                .collect(),
            RuleKind::Type(type_name) => {
                let mut out = Vec::new();
                rec.walk(&mut |v: &Value| {
                    if v.type_name() == type_name.as_str() {
                        out.push(v.clone());
                    }
                });
                out
            }
        }
    }
}

/// An index object attached to a data object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRef {
    pub rule_id: Uid,
    pub segment_id: Uid,
    /// Distinct values in the index
    pub count: u64,
}

/// Uri of the index object for `(rule, segment)` under `<pool>/index`
pub fn index_uri(index: &Uri, rule_id: Uid, segment_id: Uid) -> Uri {
    index
        .join(rule_id.to_string())
        .join(format!("{}.idx", segment_id))
}
