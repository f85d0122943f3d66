//! CIM instance names
//!
//! An [`InstanceName`] is a class name plus its key properties. It renders
//! to the object-path text form `Class.Key1="v",Key2=3` and parses back
//! without loss.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Value of a key property
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    UInt(u64),
    String(String),
}

impl KeyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValue::String(s) => Some(s),
            KeyValue::UInt(_) => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            KeyValue::UInt(v) => Some(*v),
            KeyValue::String(_) => None,
        }
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::String(s.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(s: String) -> Self {
        KeyValue::String(s)
    }
}

impl From<u64> for KeyValue {
    fn from(v: u64) -> Self {
        KeyValue::UInt(v)
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValue::UInt(v) => write!(f, "{}", v),
            KeyValue::String(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}

/// External identifier of a CIM instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceName {
    pub class_name: String,
    pub keys: BTreeMap<String, KeyValue>,
}

impl InstanceName {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            keys: BTreeMap::new(),
        }
    }

    /// Add a key property
    pub fn with_key(mut self, key: impl Into<String>, value: impl Into<KeyValue>) -> Self {
        self.keys.insert(key.into(), value.into());
        self
    }

    /// Name with a single `InstanceID` key
    pub fn with_instance_id(class_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self::new(class_name).with_key("InstanceID", instance_id.into())
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Check the class name, ignoring case as CIM does
    pub fn is_class(&self, class_name: &str) -> bool {
        self.class_name.eq_ignore_ascii_case(class_name)
    }

    /// Same instance; class names, including `*CreationClassName` keys, ignore case
    pub fn same_instance(&self, other: &InstanceName) -> bool {
        self.is_class(&other.class_name)
            && self.keys.len() == other.keys.len()
            && self.keys.iter().zip(&other.keys).all(|((key, a), (other_key, b))| {
                key == other_key
                    && match (a.as_str(), b.as_str()) {
                        (Some(a), Some(b)) if key.ends_with("CreationClassName") => a.eq_ignore_ascii_case(b),
                        _ => a == b,
                    }
            })
    }

    pub fn key(&self, key: &str) -> Option<&KeyValue> {
        self.keys.get(key)
    }

    pub fn key_str(&self, key: &str) -> Option<&str> {
        self.keys.get(key).and_then(KeyValue::as_str)
    }

    pub fn key_uint(&self, key: &str) -> Option<u64> {
        self.keys.get(key).and_then(KeyValue::as_uint)
    }

    /// `InstanceID` key, if present
    pub fn instance_id(&self) -> Option<&str> {
        self.key_str("InstanceID")
    }
}

impl std::fmt::Display for InstanceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.class_name)?;
        for (i, (key, value)) in self.keys.iter().enumerate() {
            let sep = if i == 0 { '.' } else { ',' };
            write!(f, "{}{}={}", sep, key, value)?;
        }
        Ok(())
    }
}

impl FromStr for InstanceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = |reason: &str| Error::InvalidObjectPath(format!("{}: {}", s, reason));

        let (class_name, rest) = match s.find('.') {
            Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
            None => (s, None),
        };
        if class_name.is_empty() || !class_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(bad("invalid class name"));
        }

        let mut name = InstanceName::new(class_name);
        let rest = match rest {
            Some(rest) => rest,
            None => return Ok(name),
        };

        let mut chars = rest.chars().peekable();
        loop {
            let mut key = String::new();
            loop {
                match chars.next() {
                    Some('=') => break,
                    Some(c) if c.is_ascii_alphanumeric() || c == '_' => key.push(c),
                    Some(_) => return Err(bad("invalid key name")),
                    None => return Err(bad("missing '='")),
                }
            }
            if key.is_empty() {
                return Err(bad("empty key name"));
            }

            let value = if chars.peek() == Some(&'"') {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(c) => value.push(c),
                            None => return Err(bad("dangling escape")),
                        },
                        Some('"') => break,
                        Some(c) => value.push(c),
                        None => return Err(bad("unterminated string")),
                    }
                }
                KeyValue::String(value)
            } else {
                let mut digits = String::new();
                while let Some(c) = chars.peek() {
                    if *c == ',' {
                        break;
                    }
                    digits.push(*c);
                    chars.next();
                }
                let number = digits
                    .parse::<u64>()
                    .map_err(|_| bad("unquoted value is not an integer"))?;
                KeyValue::UInt(number)
            };

            if name.keys.insert(key, value).is_some() {
                return Err(bad("duplicate key"));
            }

            match chars.next() {
                Some(',') => continue,
                None => break,
                Some(_) => return Err(bad("expected ','")),
            }
        }

        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn extent_name() -> InstanceName {
        InstanceName::new("LMI_StorageExtent")
            .with_key("CreationClassName", "LMI_StorageExtent")
            .with_key("DeviceID", "/dev/sda")
            .with_key("SystemCreationClassName", "Linux_ComputerSystem")
            .with_key("SystemName", "host.example.com")
    }

    #[test]
    fn test_display() {
        let name = InstanceName::with_instance_id("LMI_VGStoragePool", "LMI:VG:vg0");
        assert_eq!(name.to_string(), "LMI_VGStoragePool.InstanceID=\"LMI:VG:vg0\"");

        let name = InstanceName::new("LMI_Numbered").with_key("Index", 42u64);
        assert_eq!(name.to_string(), "LMI_Numbered.Index=42");
    }

    #[test]
    fn test_parse_round_trip() {
        let name = extent_name();
        let parsed: InstanceName = name.to_string().parse().unwrap();
        assert_eq!(parsed, name);

        let tricky = InstanceName::new("LMI_Odd")
            .with_key("Label", "say \"hi\", \\ bye")
            .with_key("Count", 7u64);
        let parsed: InstanceName = tricky.to_string().parse().unwrap();
        assert_eq!(parsed, tricky);
    }

    #[test]
    fn test_parse_keyless() {
        let parsed: InstanceName = "Linux_ComputerSystem".parse().unwrap();
        assert!(parsed.keys.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert_matches!("".parse::<InstanceName>(), Err(Error::InvalidObjectPath(_)));
        assert_matches!(
            "LMI_X.Key=\"open".parse::<InstanceName>(),
            Err(Error::InvalidObjectPath(_))
        );
        assert_matches!("LMI_X.Key=abc".parse::<InstanceName>(), Err(Error::InvalidObjectPath(_)));
        assert_matches!(
            "LMI_X.A=1,A=2".parse::<InstanceName>(),
            Err(Error::InvalidObjectPath(_))
        );
    }

    #[test]
    fn test_same_instance_ignores_class_case() {
        let name = extent_name();
        let lower: InstanceName = name.to_string().to_lowercase().parse().unwrap();
        assert!(!name.same_instance(&lower));

        let mut relabelled = name.clone();
        relabelled.class_name = "lmi_storageextent".into();
        relabelled
            .keys
            .insert("CreationClassName".into(), "lmi_StorageExtent".into());
        assert!(name.same_instance(&relabelled));
        assert_ne!(name, relabelled);

        let other = name.clone().with_key("DeviceID", "/dev/sdb");
        assert!(!name.same_instance(&other));
    }

    #[test]
    fn test_accessors() {
        let name = extent_name();
        assert!(name.is_class("lmi_storageextent"));
        assert_eq!(name.key_str("DeviceID"), Some("/dev/sda"));
        assert_eq!(name.key_uint("DeviceID"), None);
        assert_eq!(name.instance_id(), None);
    }
}
