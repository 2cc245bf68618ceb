//! Add-on settings values and their XML persistence.
//!
//! Definitions come from the add-on's metadata and fix each setting's type
//! and default. Values live per instance id: instance 0 uses the add-on's
//! `settings.xml`, every other instance `instance-settings-<N>.xml`, both in
//! the add-on profile directory.

use crate::error::{InterfaceError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingKind {
    Bool,
    Int,
    Number,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingValue {
    Bool(bool),
    Int(i32),
    Number(f64),
    String(String),
}

impl SettingValue {
    pub fn kind(&self) -> SettingKind {
        match self {
            SettingValue::Bool(_) => SettingKind::Bool,
            SettingValue::Int(_) => SettingKind::Int,
            SettingValue::Number(_) => SettingKind::Number,
            SettingValue::String(_) => SettingKind::String,
        }
    }

    /// Parses the textual form used in settings files and dialogs.
    pub fn parse(kind: SettingKind, text: &str) -> Option<Self> {
        let text = text.trim();
        match kind {
            SettingKind::Bool => match text {
                "true" | "1" => Some(SettingValue::Bool(true)),
                "false" | "0" => Some(SettingValue::Bool(false)),
                _ => None,
            },
            SettingKind::Int => text.parse().ok().map(SettingValue::Int),
            SettingKind::Number => text.parse().ok().map(SettingValue::Number),
            SettingKind::String => Some(SettingValue::String(text.to_string())),
        }
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{v}"),
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::Number(v) => write!(f, "{v}"),
            SettingValue::String(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDefinition {
    pub id: String,
    pub default: SettingValue,
}

impl SettingDefinition {
    pub fn new(id: impl Into<String>, default: SettingValue) -> Self {
        Self {
            id: id.into(),
            default,
        }
    }

    pub fn kind(&self) -> SettingKind {
        self.default.kind()
    }
}

/// File holding the settings of `instance_id` below `profile`.
pub fn settings_file(profile: &Path, instance_id: u32) -> PathBuf {
    if instance_id == 0 {
        profile.join("settings.xml")
    } else {
        profile.join(format!("instance-settings-{instance_id}.xml"))
    }
}

/// Current setting values of one add-on instance.
#[derive(Debug, Clone)]
pub struct AddonSettings {
    definitions: Arc<Vec<SettingDefinition>>,
    values: HashMap<String, SettingValue>,
    file: PathBuf,
}

impl AddonSettings {
    pub fn new(definitions: Arc<Vec<SettingDefinition>>, file: PathBuf) -> Self {
        Self {
            definitions,
            values: HashMap::new(),
            file,
        }
    }

    /// Loads `file` if it exists. Entries for unknown ids or with unparsable
    /// values are skipped so the definition's default applies.
    pub fn load(definitions: Arc<Vec<SettingDefinition>>, file: PathBuf) -> Result<Self> {
        let mut settings = Self::new(definitions, file);
        if !settings.file.exists() {
            return Ok(settings);
        }

        let text = std::fs::read_to_string(&settings.file)?;
        for (id, raw) in parse_settings_xml(&text)? {
            let Some(kind) = settings.definition(&id).map(SettingDefinition::kind) else {
                tracing::debug!(file = %settings.file.display(), id, "ignoring unknown setting");
                continue;
            };
            match SettingValue::parse(kind, &raw) {
                Some(value) => {
                    settings.values.insert(id, value);
                }
                None => {
                    tracing::warn!(file = %settings.file.display(), id, "ignoring malformed value {raw:?}");
                }
            }
        }
        Ok(settings)
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn definition(&self, id: &str) -> Option<&SettingDefinition> {
        self.definitions.iter().find(|def| def.id == id)
    }

    /// Current value, falling back to the default.
    pub fn get(&self, id: &str) -> Option<&SettingValue> {
        self.values
            .get(id)
            .or_else(|| self.definition(id).map(|def| &def.default))
    }

    /// `None` for unknown settings.
    pub fn is_default(&self, id: &str) -> Option<bool> {
        let def = self.definition(id)?;
        Some(self.values.get(id).map_or(true, |value| *value == def.default))
    }

    pub fn set(&mut self, id: &str, value: SettingValue) -> Result<()> {
        let def = self
            .definition(id)
            .ok_or_else(|| InterfaceError::Settings(format!("unknown setting '{id}'")))?;
        if def.kind() != value.kind() {
            return Err(InterfaceError::Settings(format!(
                "setting '{id}' is {:?}, not {:?}",
                def.kind(),
                value.kind()
            )));
        }
        self.values.insert(id.to_string(), value);
        Ok(())
    }

    /// Sets a value from its textual form.
    pub fn set_text(&mut self, id: &str, text: &str) -> Result<()> {
        let kind = self
            .definition(id)
            .map(SettingDefinition::kind)
            .ok_or_else(|| InterfaceError::Settings(format!("unknown setting '{id}'")))?;
        let value = SettingValue::parse(kind, text)
            .ok_or_else(|| InterfaceError::Settings(format!("'{text}' is not a valid {kind:?}")))?;
        self.set(id, value)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.file, self.to_xml())?;
        tracing::debug!(file = %self.file.display(), "settings saved");
        Ok(())
    }

    fn to_xml(&self) -> String {
        let mut out = String::from("<settings version=\"2\">\n");
        for def in self.definitions.iter() {
            let value = self.values.get(&def.id).unwrap_or(&def.default);
            let text = value.to_string();
            let id = quick_xml::escape::escape(def.id.as_str());
            let text = quick_xml::escape::escape(text.as_str());
            let _ = if *value == def.default {
                writeln!(out, "    <setting id=\"{id}\" default=\"true\">{text}</setting>")
            } else {
                writeln!(out, "    <setting id=\"{id}\">{text}</setting>")
            };
        }
        out.push_str("</settings>\n");
        out
    }
}

/// `(id, raw text)` of every `<setting>` element.
fn parse_settings_xml(text: &str) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_str(text);
    let mut entries = Vec::new();
    let mut current: Option<(String, String)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"setting" => {
                current = Some((setting_id(&e)?, String::new()));
            }
            Event::Empty(e) if e.name().as_ref() == b"setting" => {
                entries.push((setting_id(&e)?, String::new()));
            }
            Event::Text(t) => {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(&t.unescape()?);
                }
            }
            Event::End(e) if e.name().as_ref() == b"setting" => {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(entries)
}

fn setting_id(e: &quick_xml::events::BytesStart<'_>) -> Result<String> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"id" {
            return Ok(attr.unescape_value()?.into_owned());
        }
    }
    Err(InterfaceError::Xml("<setting> without id".to_string()))
}
