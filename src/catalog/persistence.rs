//! INI setting store
//!
//! One file per setting class, named after the class, one section per
//! setting keyed by its InstanceID. Absent values are written as empty
//! strings and read back as absent.
//!
//! The INI reader trims values and cuts them at comment symbols, so values
//! are escaped on write: backslash, `#`, `;`, line breaks and whitespace at
//! either end become `\\`, `\n`, `\r` or `\u{hex}`.

use super::setting::{Setting, SettingType};
use crate::error::{Error, Result};
use configparser::ini::Ini;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reserved key carrying the setting's ElementName
pub const ELEMENT_NAME_KEY: &str = "ElementName";

/// Escape a value so the INI reader hands it back unchanged
pub fn escape_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '#' | ';' => escaped.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c if c.is_whitespace() && (i == 0 || i == last) => {
                escaped.push_str(&format!("\\u{{{:x}}}", c as u32))
            }
            c => escaped.push(c),
        }
    }
    escaped
}

/// Reverse [`escape_value`]; unknown escapes are kept as written
pub fn unescape_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(idx) = rest.find('\\') {
        unescaped.push_str(&rest[..idx]);
        let tail = &rest[idx + 1..];
        let (decoded, consumed) = match tail.chars().next() {
            Some('\\') => (Some('\\'), 1),
            Some('n') => (Some('\n'), 1),
            Some('r') => (Some('\r'), 1),
            Some('u') => match tail.strip_prefix("u{").and_then(|t| t.find('}').map(|end| (t, end))) {
                Some((hex, end)) => match u32::from_str_radix(&hex[..end], 16).ok().and_then(char::from_u32) {
                    Some(c) => (Some(c), end + 3),
                    None => (None, 0),
                },
                None => (None, 0),
            },
            _ => (None, 0),
        };
        match decoded {
            Some(c) => {
                unescaped.push(c);
                rest = &tail[consumed..];
            }
            None => {
                unescaped.push('\\');
                rest = tail;
            }
        }
    }
    unescaped.push_str(rest);
    unescaped
}

/// Directory of per-class INI files
#[derive(Debug, Clone)]
pub struct SettingStore {
    dir: PathBuf,
}

impl SettingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the settings of a class
    pub fn class_file(&self, class_name: &str) -> PathBuf {
        self.dir.join(format!("{}.ini", class_name))
    }

    /// Read every setting of a class; a missing file holds no settings
    pub fn load_class(&self, class_name: &str, setting_type: SettingType) -> Result<Vec<Setting>> {
        let path = self.class_file(class_name);
        if !path.exists() {
            debug!("No setting file {:?}", path);
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut conf = Ini::new_cs();
        let sections = conf.read(content).map_err(|reason| Error::SettingStore {
            path: path.display().to_string(),
            reason,
        })?;

        let mut settings: Vec<Setting> = sections
            .into_iter()
            .map(|(instance_id, values)| {
                let mut setting = Setting::new(class_name, instance_id, setting_type);
                for (key, value) in values {
                    let value = value.filter(|v| !v.is_empty()).map(|v| unescape_value(&v));
                    if key == ELEMENT_NAME_KEY {
                        setting.element_name = value;
                    } else {
                        setting.properties.insert(key, value);
                    }
                }
                setting
            })
            .collect();
        settings.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

        info!("Loaded {} {} settings from {:?}", settings.len(), class_name, path);
        Ok(settings)
    }

    /// Rewrite the whole class file with the given settings
    pub fn save_class<'a>(
        &self,
        class_name: &str,
        settings: impl IntoIterator<Item = &'a Setting>,
    ) -> Result<()> {
        let path = self.class_file(class_name);
        let mut conf = Ini::new_cs();
        let mut count = 0usize;

        for setting in settings {
            if setting.properties.contains_key(ELEMENT_NAME_KEY) {
                return Err(Error::SettingStore {
                    path: path.display().to_string(),
                    reason: format!("{} has a property named {}", setting.instance_id, ELEMENT_NAME_KEY),
                });
            }
            let escaped = |value: &Option<String>| Some(value.as_deref().map(escape_value).unwrap_or_default());
            conf.set(&setting.instance_id, ELEMENT_NAME_KEY, escaped(&setting.element_name));
            for (key, value) in &setting.properties {
                conf.set(&setting.instance_id, key, escaped(value));
            }
            count += 1;
        }

        std::fs::create_dir_all(&self.dir)?;

        // Write next to the target and rename so readers never see half a file
        let tmp = path.with_extension("ini.tmp");
        std::fs::write(&tmp, conf.writes()).map_err(|e| Error::SettingStore {
            path: tmp.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::rename(&tmp, &path)?;

        debug!("Wrote {} {} settings to {:?}", count, class_name, path);
        Ok(())
    }

    /// Raw section map of a class file, for inspection
    pub fn read_raw(&self, class_name: &str) -> Result<BTreeMap<String, BTreeMap<String, Option<String>>>> {
        let path = self.class_file(class_name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let mut conf = Ini::new_cs();
        let sections = conf.read(content).map_err(|reason| {
            warn!("Unparseable setting file {:?}: {}", path, reason);
            Error::SettingStore {
                path: path.display().to_string(),
                reason,
            }
        })?;
        Ok(sections
            .into_iter()
            .map(|(section, values)| (section, values.into_iter().collect()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    const CLASS: &str = "LMI_VGStorageSetting";

    #[test]
    fn test_round_trip_with_absent_value() {
        let dir = TempDir::new().unwrap();
        let store = SettingStore::new(dir.path());

        let setting = Setting::new(CLASS, "LMI:LMI_VGStorageSetting:1", SettingType::Persistent)
            .with_element_name("fast pool")
            .with_property("first", Some("1".into()))
            .with_property("second", None);
        store.save_class(CLASS, [&setting]).unwrap();

        let loaded = store.load_class(CLASS, SettingType::Persistent).unwrap();
        assert_eq!(loaded, vec![setting]);
        assert_eq!(loaded[0].properties.get("second"), Some(&None));
    }

    #[test]
    fn test_setting_without_properties_survives() {
        let dir = TempDir::new().unwrap();
        let store = SettingStore::new(dir.path());

        let setting = Setting::new(CLASS, "LMI:LMI_VGStorageSetting:3", SettingType::Persistent);
        store.save_class(CLASS, [&setting]).unwrap();

        let loaded = store.load_class(CLASS, SettingType::Persistent).unwrap();
        assert_eq!(loaded, vec![setting]);
    }

    #[test]
    fn test_comment_symbols_and_edge_whitespace_survive() {
        let dir = TempDir::new().unwrap();
        let store = SettingStore::new(dir.path());

        let setting = Setting::new(CLASS, "LMI:LMI_VGStorageSetting:4", SettingType::Persistent)
            .with_element_name("  el ")
            .with_property("Note", Some("a#b;c".into()))
            .with_property("Pad", Some("  x  ".into()))
            .with_property("Path", Some("C:\\dir\\n".into()))
            .with_property("Lines", Some("one\ntwo\r".into()));
        store.save_class(CLASS, [&setting]).unwrap();

        let loaded = store.load_class(CLASS, SettingType::Persistent).unwrap();
        assert_eq!(loaded, vec![setting]);
    }

    #[test]
    fn test_hand_written_backslashes_are_kept() {
        assert_eq!(unescape_value("a\\q\\u{zz}\\"), "a\\q\\u{zz}\\");
        assert_eq!(unescape_value("\\u{20}x\\u{3b}"), " x;");
        assert_eq!(escape_value("plain value"), "plain value");
    }

    #[test]
    fn test_property_named_element_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = SettingStore::new(dir.path());
        let setting = Setting::new(CLASS, "LMI:LMI_VGStorageSetting:5", SettingType::Persistent)
            .with_element_name("pool")
            .with_property(ELEMENT_NAME_KEY, Some("other".into()));

        assert_matches!(store.save_class(CLASS, [&setting]), Err(Error::SettingStore { .. }));
        assert!(!store.class_file(CLASS).exists());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SettingStore::new(dir.path().join("nope"));
        assert!(store.load_class(CLASS, SettingType::Preconfigured).unwrap().is_empty());
        assert!(store.read_raw(CLASS).unwrap().is_empty());
    }

    #[test]
    fn test_empty_value_written_as_empty_string() {
        let dir = TempDir::new().unwrap();
        let store = SettingStore::new(dir.path());
        let setting = Setting::new(CLASS, "LMI:LMI_VGStorageSetting:2", SettingType::Persistent)
            .with_property("ExtentSize", None);
        store.save_class(CLASS, [&setting]).unwrap();

        let content = std::fs::read_to_string(store.class_file(CLASS)).unwrap();
        assert!(content.contains("[LMI:LMI_VGStorageSetting:2]"));
        assert!(content.contains("ExtentSize="));
    }
}
