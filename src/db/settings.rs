//! Typed application settings.
//!
//! Settings rows declare their value type in the `type` column; access
//! goes through a tagged enum so callers get a checked value instead of
//! a raw string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    #[default]
    Text,
    Number,
    Boolean,
    Select,
    Json,
    Color,
}

impl SettingType {
    /// Unknown declarations fall back to `Text`, matching how legacy rows
    /// with a blank or unexpected type column behave.
    pub fn parse(s: &str) -> Self {
        match s {
            "number" => SettingType::Number,
            "boolean" => SettingType::Boolean,
            "select" => SettingType::Select,
            "json" => SettingType::Json,
            "color" => SettingType::Color,
            _ => SettingType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::Text => "text",
            SettingType::Number => "number",
            SettingType::Boolean => "boolean",
            SettingType::Select => "select",
            SettingType::Json => "json",
            SettingType::Color => "color",
        }
    }
}

/// A setting value cast to its declared type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Json(serde_json::Value),
}

/// One row of the settings table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Setting {
    pub id: i64,
    pub key: String,
    pub value: Option<String>,
    pub setting_type: SettingType,
    pub description: Option<String>,
    pub category: Option<String>,
    pub options: Option<String>,
}

impl Setting {
    /// Cast the raw value to its declared type.
    ///
    /// Fallbacks are forgiving: booleans accept `true`/`1`/`yes`, numbers
    /// try integer then float then 0, malformed JSON becomes an empty
    /// object. Select and color values stay textual.
    pub fn typed_value(&self) -> SettingValue {
        let raw = self.value.as_deref().unwrap_or("");
        match self.setting_type {
            SettingType::Boolean => {
                SettingValue::Boolean(matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes"))
            }
            SettingType::Number => {
                if let Ok(i) = raw.parse::<i64>() {
                    SettingValue::Integer(i)
                } else if let Ok(f) = raw.parse::<f64>() {
                    SettingValue::Float(f)
                } else {
                    SettingValue::Integer(0)
                }
            }
            SettingType::Json => SettingValue::Json(
                serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({})),
            ),
            SettingType::Text | SettingType::Select | SettingType::Color => {
                SettingValue::Text(raw.to_string())
            }
        }
    }

    /// Choices for a select-type setting, from the JSON array in `options`.
    pub fn options_list(&self) -> Vec<String> {
        self.options
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default()
    }
}
