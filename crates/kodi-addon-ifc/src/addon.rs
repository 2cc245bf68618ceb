//! Add-on metadata and the runtime add-on object.

use crate::error::{InterfaceError, Result};
use crate::protocol::{InstanceKind, ADDON_SETTINGS_ID};
use crate::settings::{settings_file, AddonSettings, SettingDefinition};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// How an add-on type deals with multiple instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceUse {
    /// Exactly one implicit instance.
    None,
    SupportedOptional,
    /// Instances are configured through instance settings files.
    SupportedBySettings,
    SupportedMandatory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddonType {
    Unknown,
    AudioDecoder,
    AudioEncoder,
    GameClient,
    GameController,
    ImageDecoder,
    Inputstream,
    Peripheral,
    PvrClient,
    Screensaver,
    Visualization,
    Vfs,
    VideoCodec,
    Web,
    Executable,
    Service,
}

impl AddonType {
    pub fn instance_use(self) -> InstanceUse {
        match self {
            AddonType::Screensaver
            | AddonType::Visualization
            | AddonType::GameClient
            | AddonType::GameController => InstanceUse::SupportedOptional,
            AddonType::PvrClient => InstanceUse::SupportedBySettings,
            AddonType::Peripheral
            | AddonType::AudioEncoder
            | AddonType::AudioDecoder
            | AddonType::Inputstream
            | AddonType::Vfs
            | AddonType::ImageDecoder => InstanceUse::SupportedMandatory,
            _ => InstanceUse::None,
        }
    }

    pub fn extension_point(self) -> &'static str {
        match self {
            AddonType::Unknown => "",
            AddonType::AudioDecoder => "kodi.audiodecoder",
            AddonType::AudioEncoder => "kodi.audioencoder",
            AddonType::GameClient => "kodi.gameclient",
            AddonType::GameController => "kodi.game.controller",
            AddonType::ImageDecoder => "kodi.imagedecoder",
            AddonType::Inputstream => "kodi.inputstream",
            AddonType::Peripheral => "kodi.peripheral",
            AddonType::PvrClient => "kodi.pvrclient",
            AddonType::Screensaver => "xbmc.ui.screensaver",
            AddonType::Visualization => "xbmc.player.musicviz",
            AddonType::Vfs => "kodi.vfs",
            AddonType::VideoCodec => "kodi.videocodec",
            AddonType::Web => "kodi.web",
            AddonType::Executable => "kodi.executable",
            AddonType::Service => "xbmc.service",
        }
    }

    /// Instance tag sent to the add-on, for types that have instances.
    pub fn instance_kind(self) -> Option<InstanceKind> {
        Some(match self {
            AddonType::AudioDecoder => InstanceKind::AudioDecoder,
            AddonType::AudioEncoder => InstanceKind::AudioEncoder,
            AddonType::GameClient => InstanceKind::Game,
            AddonType::ImageDecoder => InstanceKind::ImageDecoder,
            AddonType::Inputstream => InstanceKind::Inputstream,
            AddonType::Peripheral => InstanceKind::Peripheral,
            AddonType::PvrClient => InstanceKind::Pvr,
            AddonType::Screensaver => InstanceKind::Screensaver,
            AddonType::Visualization => InstanceKind::Visualization,
            AddonType::Vfs => InstanceKind::Vfs,
            AddonType::VideoCodec => InstanceKind::VideoCodec,
            AddonType::Web => InstanceKind::Web,
            _ => return None,
        })
    }
}

impl std::fmt::Display for AddonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension_point())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddonLanguage {
    #[default]
    Native,
    /// Runs in a JVM; crash details land in an `hs_err_pid` file.
    Java,
}

/// Static description of an installed add-on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    /// First entry is the main type.
    pub types: Vec<AddonType>,
    pub binary_path: PathBuf,
    pub path: PathBuf,
    pub profile_path: PathBuf,
    pub api_version: String,
    pub min_api_version: String,
    pub language: AddonLanguage,
    pub settings: Vec<SettingDefinition>,
}

impl AddonInfo {
    pub fn new(id: impl Into<String>, main_type: AddonType, binary_path: impl Into<PathBuf>) -> Self {
        let id = id.into();
        let binary_path = binary_path.into();
        let path = binary_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        Self {
            name: id.clone(),
            id,
            version: "1.0.0".to_string(),
            types: vec![main_type],
            binary_path,
            path,
            profile_path: PathBuf::new(),
            api_version: "1.0.0".to_string(),
            min_api_version: "1.0.0".to_string(),
            language: AddonLanguage::Native,
            settings: Vec::new(),
        }
    }

    pub fn with_profile_path(mut self, profile_path: impl Into<PathBuf>) -> Self {
        self.profile_path = profile_path.into();
        self
    }

    pub fn with_setting(mut self, setting: SettingDefinition) -> Self {
        self.settings.push(setting);
        self
    }

    pub fn with_language(mut self, language: AddonLanguage) -> Self {
        self.language = language;
        self
    }

    pub fn main_type(&self) -> AddonType {
        self.types.first().copied().unwrap_or(AddonType::Unknown)
    }

    pub fn has_type(&self, addon_type: AddonType) -> bool {
        self.types.contains(&addon_type)
    }

    pub fn instance_use(&self) -> InstanceUse {
        self.main_type().instance_use()
    }

    pub fn supports_multiple_instances(&self) -> bool {
        self.instance_use() != InstanceUse::None
    }

    pub fn supports_instance_settings(&self) -> bool {
        self.instance_use() == InstanceUse::SupportedBySettings
    }

    /// Instance ids that have settings on disk, or just `[0]` for add-ons
    /// without instance settings.
    pub fn known_instance_ids(&self) -> Vec<u32> {
        if !self.supports_instance_settings() {
            return vec![ADDON_SETTINGS_ID];
        }

        let Ok(entries) = std::fs::read_dir(&self.profile_path) else {
            return Vec::new();
        };
        let mut ids: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                name.to_str()?
                    .strip_prefix("instance-settings-")?
                    .strip_suffix(".xml")?
                    .parse()
                    .ok()
            })
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// An add-on bound to the type it runs as, with its loaded settings.
pub struct Addon {
    info: Arc<AddonInfo>,
    addon_type: AddonType,
    definitions: Arc<Vec<SettingDefinition>>,
    settings: Mutex<HashMap<u32, AddonSettings>>,
}

impl Addon {
    pub fn new(info: Arc<AddonInfo>, addon_type: AddonType) -> Self {
        let definitions = Arc::new(info.settings.clone());
        Self {
            info,
            addon_type,
            definitions,
            settings: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &Arc<AddonInfo> {
        &self.info
    }

    pub fn addon_type(&self) -> AddonType {
        self.addon_type
    }

    pub fn has_settings(&self) -> bool {
        !self.definitions.is_empty()
    }

    pub fn has_setting(&self, id: &str) -> bool {
        self.setting_definition(id).is_some()
    }

    pub fn setting_definition(&self, id: &str) -> Option<&SettingDefinition> {
        self.definitions.iter().find(|def| def.id == id)
    }

    /// Runs `f` on the settings of `instance_id`, loading them on first use.
    pub fn with_settings<R>(
        &self,
        instance_id: u32,
        f: impl FnOnce(&mut AddonSettings) -> R,
    ) -> Result<R> {
        if !self.has_settings() {
            return Err(InterfaceError::Settings(format!(
                "add-on {} has no settings",
                self.id()
            )));
        }

        let mut settings = self.settings.lock();
        let entry = match settings.entry(instance_id) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let file = settings_file(&self.info.profile_path, instance_id);
                entry.insert(AddonSettings::load(Arc::clone(&self.definitions), file)?)
            }
        };
        Ok(f(entry))
    }

    pub fn save_settings(&self, instance_id: u32) -> Result<()> {
        self.with_settings(instance_id, |settings| settings.save())?
    }
}
