//! Query and patch vocabulary shared by every control-plane client

use crate::resource::{ContainerId, ResourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Where a query looks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Only resources inside one container
    Container(ContainerId),
    /// Every container the session can see
    Subscription,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Container(container) => write!(f, "container {}", container),
            Scope::Subscription => write!(f, "subscription"),
        }
    }
}

/// Which resources of a type a query returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFilter {
    /// Every resource of the type
    All,
    /// Resources whose properties mention the target id verbatim
    References(ResourceId),
    /// Direct or nested children of the given resource
    ChildOf(ResourceId),
}

/// A single property edit applied by `update_resource`.
///
/// Paths are dot-separated and rooted at the resource document, e.g.
/// `properties.networkSecurityGroup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Patch {
    Remove { path: String },
    Set { path: String, value: Value },
    Append { path: String, value: Value },
}

impl Patch {
    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Self::Set {
            path: path.into(),
            value,
        }
    }

    pub fn append(path: impl Into<String>, value: Value) -> Self {
        Self::Append {
            path: path.into(),
            value,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Patch::Remove { path } | Patch::Set { path, .. } | Patch::Append { path, .. } => path,
        }
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::Remove { path } => write!(f, "remove {}", path),
            Patch::Set { path, value } => write!(f, "set {}={}", path, value),
            Patch::Append { path, value } => write!(f, "append {} {}", path, value),
        }
    }
}

/// Whether any string inside `doc` equals `target` (case-insensitive)
pub fn mentions(doc: &Value, target: &ResourceId) -> bool {
    match doc {
        Value::String(s) => s.eq_ignore_ascii_case(target.as_str()),
        Value::Array(items) => items.iter().any(|v| mentions(v, target)),
        Value::Object(map) => map.values().any(|v| mentions(v, target)),
        _ => false,
    }
}
