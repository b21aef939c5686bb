// Schema validation
// A JSON-Schema subset compiled to an arena and interpreted with coercion

mod tree;
mod validate;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use tree::{JsonType, SchemaTree};

/// A schema document that cannot be compiled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("schema at {0} must be an object")]
    NotAnObject(String),

    #[error("unknown type '{name}' at {path}")]
    UnknownType { path: String, name: String },

    #[error("invalid '{keyword}' at {path}: {reason}")]
    InvalidKeyword {
        path: String,
        keyword: String,
        reason: String,
    },
}

/// One failed constraint, addressed by a `$.a.b[0]` style path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
