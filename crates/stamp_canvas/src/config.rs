//! Configuration tree consumed by the image builders.
//!
//! A [`ConfigTable`] is an ordered map of keys to [`ConfigValue`]s. Accessors are
//! typed and report the offending key when a value has the wrong shape, so
//! validation fails close to the input.
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single configuration value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ConfigValue>),
    Table(ConfigTable),
}

impl ConfigValue {
    fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Int(_) => "int",
            ConfigValue::Float(_) => "float",
            ConfigValue::Str(_) => "string",
            ConfigValue::List(_) => "list",
            ConfigValue::Table(_) => "table",
        }
    }

    /// Numeric view of the value; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Int(v) => Some(*v as f64),
            ConfigValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Int(value as i64)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_owned())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

impl From<ConfigTable> for ConfigValue {
    fn from(value: ConfigTable) -> Self {
        ConfigValue::Table(value)
    }
}

impl<T: Into<ConfigValue>> From<Vec<T>> for ConfigValue {
    fn from(value: Vec<T>) -> Self {
        ConfigValue::List(value.into_iter().map(Into::into).collect())
    }
}

/// Ordered key/value table.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct ConfigTable {
    entries: BTreeMap<String, ConfigValue>,
}

impl ConfigTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(wrong_type(key, "int", other)),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| wrong_type(key, "float", value)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Bool(v)) => Ok(Some(*v)),
            Some(other) => Err(wrong_type(key, "bool", other)),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Str(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(wrong_type(key, "string", other)),
        }
    }

    /// Reads a string, accepting integers by their decimal form.
    pub fn get_string_lossy(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Str(v)) => Ok(Some(v.clone())),
            Some(ConfigValue::Int(v)) => Ok(Some(v.to_string())),
            Some(other) => Err(wrong_type(key, "string", other)),
        }
    }

    pub fn get_list(&self, key: &str) -> Result<Option<&[ConfigValue]>> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::List(v)) => Ok(Some(v.as_slice())),
            Some(other) => Err(wrong_type(key, "list", other)),
        }
    }

    pub fn get_table(&self, key: &str) -> Result<Option<&ConfigTable>> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Table(v)) => Ok(Some(v)),
            Some(other) => Err(wrong_type(key, "table", other)),
        }
    }

    pub fn get_table_mut(&mut self, key: &str) -> Result<Option<&mut ConfigTable>> {
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(ConfigValue::Table(v)) => Ok(Some(v)),
            Some(other) => Err(wrong_type(key, "table", other)),
        }
    }

    /// Reads a non-negative integer that fits in `i32` (sizes, borders, counts).
    pub fn get_i32(&self, key: &str) -> Result<Option<i32>> {
        self.get_int(key)?
            .map(|v| {
                i32::try_from(v).map_err(|_| Error::config(key, format!("{v} is out of range")))
            })
            .transpose()
    }

    /// Reads a strictly positive count.
    pub fn get_positive(&self, key: &str) -> Result<Option<usize>> {
        match self.get_int(key)? {
            None => Ok(None),
            Some(v) if v > 0 => Ok(Some(v as usize)),
            Some(v) => Err(Error::config(key, format!("must be > 0 (got {v})"))),
        }
    }
}

fn wrong_type(key: &str, expected: &str, found: &ConfigValue) -> Error {
    Error::config(key, format!("expected {expected}, found {}", found.kind()))
}
