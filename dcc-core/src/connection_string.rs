//! Connection string parsing
//!
//! A connection string is a list of `key=value` pairs separated by `;`:
//! ```text
//! port=/dev/ttyACM0;baud=115200;debug=true
//! ```

use crate::error::{DccError, DccResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Parsed connection string
///
/// Keys are case-sensitive. Later duplicates override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionConfig {
    values: HashMap<String, String>,
}

impl ConnectionConfig {
    /// Parse a connection string
    ///
    /// Empty segments (for example a trailing `;`) are ignored.
    ///
    /// # Errors
    /// Returns `DccError::Config` if a segment has no `=` or an empty key.
    pub fn parse(s: &str) -> DccResult<Self> {
        let mut values = HashMap::new();
        for segment in s.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                DccError::Config(format!(
                    "Invalid connection string entry '{}', expected key=value",
                    segment
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(DccError::Config(format!(
                    "Invalid connection string entry '{}', empty key",
                    segment
                )));
            }
            values.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { values })
    }

    /// Get a raw value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Get a required value
    ///
    /// # Errors
    /// Fails with `"<key>" not specified in connection string`.
    pub fn require(&self, key: &str) -> DccResult<&str> {
        self.get(key).ok_or_else(|| {
            DccError::Config(format!("\"{}\" not specified in connection string", key))
        })
    }

    /// The serial port path (`port` key)
    pub fn port(&self) -> DccResult<&str> {
        self.require("port")
    }

    /// Parse a numeric value, falling back to `default` when the key is absent
    pub fn get_u32(&self, key: &str, default: u32) -> DccResult<u32> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse::<u32>().map_err(|_| {
                DccError::Config(format!("Invalid value for \"{}\": {}", key, v))
            }),
        }
    }

    /// Boolean flag; `true`, `1`, `yes` and `on` count as set
    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(str::to_ascii_lowercase).as_deref(),
            Some("true" | "1" | "yes" | "on")
        )
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the string contained no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{}={}", key, self.values[*key])?;
        }
        Ok(())
    }
}
