// src/groupkey.rs

//! Namespaced group identifiers.
//!
//! Group keys use the format `namespace/name`, e.g. `group/owner`. The two
//! components survive serialization round-trips through the canonical
//! string form.
//!
//! # Key Components
//!
//! - **Namespace**: the identifier family (`group` for every key the
//!   document defines today)
//! - **Name**: the identifier within the namespace

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A namespaced identifier with canonical form `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    /// Identifier family, e.g. `group`
    pub namespace: String,
    /// Identifier within the namespace, e.g. `owner`
    pub name: String,
}

impl GroupKey {
    /// Create a new key from components
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The mandatory `group/owner` key
    pub fn owner() -> Self {
        Self::new("group", "owner")
    }

    /// The mandatory `group/bot` key
    pub fn bot() -> Self {
        Self::new("group", "bot")
    }

    /// Parse a key from the canonical `namespace/name` form
    pub fn parse(s: &str) -> Result<Self, GroupKeyParseError> {
        let slash = s
            .find('/')
            .ok_or_else(|| GroupKeyParseError::MissingSlash(s.to_string()))?;

        let namespace = &s[..slash];
        let name = &s[slash + 1..];

        if namespace.is_empty() {
            return Err(GroupKeyParseError::EmptyNamespace(s.to_string()));
        }
        if name.is_empty() {
            return Err(GroupKeyParseError::EmptyName(s.to_string()));
        }

        let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';

        if !namespace.chars().all(valid_chars) {
            return Err(GroupKeyParseError::InvalidNamespace(namespace.to_string()));
        }
        if !name.chars().all(valid_chars) || name.contains('/') {
            return Err(GroupKeyParseError::InvalidName(name.to_string()));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for GroupKey {
    type Err = GroupKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GroupKey::parse(s)
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GroupKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = GroupKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a namespaced key of the form \"namespace/name\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<GroupKey, E> {
                GroupKey::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(KeyVisitor)
    }
}

/// Errors that can occur when parsing a group key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKeyParseError {
    /// Missing `/` separator
    MissingSlash(String),
    /// Empty namespace component
    EmptyNamespace(String),
    /// Empty name component
    EmptyName(String),
    /// Invalid characters in namespace
    InvalidNamespace(String),
    /// Invalid characters in name
    InvalidName(String),
}

impl fmt::Display for GroupKeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKeyParseError::MissingSlash(s) => write!(f, "missing '/' in key: {}", s),
            GroupKeyParseError::EmptyNamespace(s) => write!(f, "empty namespace in key: {}", s),
            GroupKeyParseError::EmptyName(s) => write!(f, "empty name in key: {}", s),
            GroupKeyParseError::InvalidNamespace(s) => write!(f, "invalid namespace: {}", s),
            GroupKeyParseError::InvalidName(s) => write!(f, "invalid key name: {}", s),
        }
    }
}

impl std::error::Error for GroupKeyParseError {}
