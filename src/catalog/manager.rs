//! Setting Manager
//!
//! Owns every stored setting (TRANSIENT, PERSISTENT, PRECONFIGURED), hands
//! out InstanceIDs and keeps the persistent directory in sync. CONFIGURATION
//! settings are never stored here; they are synthesized from live devices.

use super::persistence::SettingStore;
use super::setting::{instance_counter, split_instance_id, Setting, SettingType};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Settings of one class plus its ID counter
#[derive(Debug, Default, Clone)]
struct ClassSettings {
    settings: BTreeMap<String, Setting>,
    /// Last counter handed out or seen on disk
    last_id: u64,
}

/// Requested change of a stored setting
#[derive(Debug, Default, Clone)]
pub struct SettingChange {
    /// New persistence tier, if it changes
    pub setting_type: Option<SettingType>,
    /// New ElementName, if it changes
    pub element_name: Option<Option<String>>,
    /// Properties to overwrite; `None` values clear a property
    pub properties: BTreeMap<String, Option<String>>,
}

/// Catalog of stored settings, keyed by class
pub struct SettingManager {
    prefix: String,
    preconfigured: SettingStore,
    persistent: SettingStore,
    classes: DashMap<String, ClassSettings>,
}

impl std::fmt::Debug for SettingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingManager")
            .field("prefix", &self.prefix)
            .field("preconfigured", &self.preconfigured.dir())
            .field("persistent", &self.persistent.dir())
            .field("classes", &self.classes.len())
            .finish()
    }
}

impl SettingManager {
    pub fn new(
        prefix: impl Into<String>,
        preconfigured_dir: impl Into<PathBuf>,
        persistent_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            preconfigured: SettingStore::new(preconfigured_dir),
            persistent: SettingStore::new(persistent_dir),
            classes: DashMap::new(),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.instance_id_prefix.clone(),
            config.preconfigured_dir.clone(),
            config.persistent_dir.clone(),
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Load both directories for the given classes, replacing what is in memory
    pub fn load<'a>(&self, class_names: impl IntoIterator<Item = &'a str>) -> Result<usize> {
        let mut total = 0;
        for class_name in class_names {
            let mut class = ClassSettings::default();

            for setting in self.preconfigured.load_class(class_name, SettingType::Preconfigured)? {
                class.insert_loaded(&self.prefix, setting);
            }
            for setting in self.persistent.load_class(class_name, SettingType::Persistent)? {
                if class.settings.contains_key(&setting.instance_id) {
                    warn!(
                        "Persistent setting {} shadows a preconfigured one, ignoring it",
                        setting.instance_id
                    );
                    continue;
                }
                class.insert_loaded(&self.prefix, setting);
            }

            // Counters only move forward, even across reloads
            if let Some(existing) = self.classes.get(class_name) {
                class.last_id = class.last_id.max(existing.last_id);
            }

            debug!(
                "Class {}: {} settings, last id {}",
                class_name,
                class.settings.len(),
                class.last_id
            );
            total += class.settings.len();
            self.classes.insert(class_name.to_string(), class);
        }
        info!("Loaded {} stored settings", total);
        Ok(total)
    }

    /// Hand out the next unused InstanceID of a class
    pub fn allocate_id(&self, class_name: &str) -> String {
        let mut class = self.classes.entry(class_name.to_string()).or_default();
        class.last_id += 1;
        format!("{}:{}:{}", self.prefix, class_name, class.last_id)
    }

    /// Store a new TRANSIENT or PERSISTENT setting under a fresh ID
    pub fn create_setting(
        &self,
        class_name: &str,
        setting_type: SettingType,
        element_name: Option<String>,
        properties: BTreeMap<String, Option<String>>,
    ) -> Result<Setting> {
        if !setting_type.is_mutable() {
            return Err(Error::NotSupported(format!(
                "cannot create {} settings",
                setting_type
            )));
        }

        let mut class = self.classes.entry(class_name.to_string()).or_default();
        class.last_id += 1;
        let instance_id = format!("{}:{}:{}", self.prefix, class_name, class.last_id);

        let setting = Setting {
            class_name: class_name.to_string(),
            instance_id: instance_id.clone(),
            setting_type,
            element_name,
            properties,
        };

        let mut updated = class.settings.clone();
        updated.insert(instance_id.clone(), setting.clone());
        if setting_type == SettingType::Persistent {
            self.save(class_name, &updated)?;
        }
        class.settings = updated;

        info!("Created {} setting {}", setting_type, instance_id);
        Ok(setting)
    }

    /// Stored setting by class and ID
    pub fn get_setting(&self, class_name: &str, instance_id: &str) -> Result<Setting> {
        self.classes
            .get(class_name)
            .and_then(|class| class.settings.get(instance_id).cloned())
            .ok_or_else(|| Error::SettingNotFound {
                class_name: class_name.to_string(),
                instance_id: instance_id.to_string(),
            })
    }

    /// Stored setting by ID alone; the class is read from the ID
    pub fn find(&self, instance_id: &str) -> Option<Setting> {
        if let Some((class_name, _)) = split_instance_id(&self.prefix, instance_id) {
            if let Some(setting) = self
                .classes
                .get(class_name)
                .and_then(|class| class.settings.get(instance_id).cloned())
            {
                return Some(setting);
            }
        }
        // Preconfigured IDs are chosen by the administrator and may not follow the scheme
        self.classes
            .iter()
            .find_map(|class| class.settings.get(instance_id).cloned())
    }

    /// All stored settings of a class, ordered by ID
    pub fn enumerate_settings(&self, class_name: &str) -> Vec<Setting> {
        self.classes
            .get(class_name)
            .map(|class| class.settings.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply a change to a TRANSIENT or PERSISTENT setting
    pub fn modify_setting(&self, class_name: &str, instance_id: &str, change: SettingChange) -> Result<Setting> {
        let mut class = self.classes.get_mut(class_name).ok_or_else(|| Error::SettingNotFound {
            class_name: class_name.to_string(),
            instance_id: instance_id.to_string(),
        })?;
        let current = class
            .settings
            .get(instance_id)
            .ok_or_else(|| Error::SettingNotFound {
                class_name: class_name.to_string(),
                instance_id: instance_id.to_string(),
            })?;

        if !current.setting_type.is_mutable() {
            return Err(Error::ReadOnlySetting {
                instance_id: instance_id.to_string(),
                setting_type: current.setting_type.to_string(),
            });
        }

        let mut setting = current.clone();
        let old_type = setting.setting_type;
        if let Some(target) = change.setting_type {
            if !old_type.can_become(target) {
                return Err(Error::NotSupported(format!(
                    "{} setting cannot become {}",
                    old_type, target
                )));
            }
            setting.setting_type = target;
        }
        if let Some(element_name) = change.element_name {
            setting.element_name = element_name;
        }
        setting.properties.extend(change.properties);

        let mut updated = class.settings.clone();
        updated.insert(instance_id.to_string(), setting.clone());
        if old_type == SettingType::Persistent || setting.setting_type == SettingType::Persistent {
            self.save(class_name, &updated)?;
        }
        class.settings = updated;

        info!("Modified {} setting {}", setting.setting_type, instance_id);
        Ok(setting)
    }

    /// Remove a TRANSIENT or PERSISTENT setting
    pub fn delete_setting(&self, class_name: &str, instance_id: &str) -> Result<()> {
        let mut class = self.classes.get_mut(class_name).ok_or_else(|| Error::SettingNotFound {
            class_name: class_name.to_string(),
            instance_id: instance_id.to_string(),
        })?;
        let setting_type = class
            .settings
            .get(instance_id)
            .map(|s| s.setting_type)
            .ok_or_else(|| Error::SettingNotFound {
                class_name: class_name.to_string(),
                instance_id: instance_id.to_string(),
            })?;

        if !setting_type.is_mutable() {
            return Err(Error::ReadOnlySetting {
                instance_id: instance_id.to_string(),
                setting_type: setting_type.to_string(),
            });
        }

        let mut updated = class.settings.clone();
        updated.remove(instance_id);
        if setting_type == SettingType::Persistent {
            self.save(class_name, &updated)?;
        }
        class.settings = updated;

        info!("Deleted {} setting {}", setting_type, instance_id);
        Ok(())
    }

    /// Classes with at least one stored setting or allocated ID
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    fn save(&self, class_name: &str, settings: &BTreeMap<String, Setting>) -> Result<()> {
        self.persistent.save_class(
            class_name,
            settings
                .values()
                .filter(|s| s.setting_type == SettingType::Persistent),
        )
    }
}

impl ClassSettings {
    fn insert_loaded(&mut self, prefix: &str, setting: Setting) {
        if let Some(counter) = instance_counter(prefix, &setting.class_name, &setting.instance_id) {
            self.last_id = self.last_id.max(counter);
        }
        self.settings.insert(setting.instance_id.clone(), setting);
    }
}
