//! Editor configuration.
//!
//! `Config` is always fully populated; partial updates travel as a
//! [`ConfigPatch`] and are merged field by field, so a patch never drops
//! a field it does not mention.

use serde::{Deserialize, Serialize};

pub const DEFAULT_FONT_SIZE: f64 = 24.0;
pub const DEFAULT_CONTENT_WIDTH: f64 = 800.0;

/// Code formatter preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrettierConfig {
    pub print_width: u32,
    pub tab_width: u32,
    pub use_tabs: bool,
    pub semi: bool,
    pub single_quote: bool,
}

impl Default for PrettierConfig {
    fn default() -> Self {
        Self {
            print_width: 80,
            tab_width: 2,
            use_tabs: false,
            semi: false,
            single_quote: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    pub font_size: f64,
    pub content_width: f64,
    pub always_on_top: bool,
    pub typewriter_mode: bool,
    pub prettier: PrettierConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: None,
            code_theme: None,
            font: None,
            font_size: DEFAULT_FONT_SIZE,
            content_width: DEFAULT_CONTENT_WIDTH,
            always_on_top: false,
            typewriter_mode: false,
            prettier: PrettierConfig::default(),
        }
    }
}

/// A partial [`Config`]. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub always_on_top: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typewriter_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prettier: Option<PrettierConfig>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Keep only the fields mirrored through a collaboration session.
    pub fn shared_subset(&self) -> ConfigPatch {
        ConfigPatch {
            font: self.font.clone(),
            font_size: self.font_size,
            content_width: self.content_width,
            ..Default::default()
        }
    }
}

impl Config {
    /// Returns a new config with every field set in `patch` replaced.
    pub fn merge(&self, patch: &ConfigPatch) -> Config {
        Config {
            theme: patch.theme.clone().or_else(|| self.theme.clone()),
            code_theme: patch.code_theme.clone().or_else(|| self.code_theme.clone()),
            font: patch.font.clone().or_else(|| self.font.clone()),
            font_size: patch.font_size.unwrap_or(self.font_size),
            content_width: patch.content_width.unwrap_or(self.content_width),
            always_on_top: patch.always_on_top.unwrap_or(self.always_on_top),
            typewriter_mode: patch.typewriter_mode.unwrap_or(self.typewriter_mode),
            prettier: patch
                .prettier
                .clone()
                .unwrap_or_else(|| self.prettier.clone()),
        }
    }

    /// Whether applying `patch` would change anything.
    pub fn differs(&self, patch: &ConfigPatch) -> bool {
        self.merge(patch) != *self
    }

    pub fn is_dark_theme(&self) -> bool {
        self.theme
            .as_deref()
            .and_then(Theme::by_name)
            .is_some_and(|theme| theme.dark)
    }

    /// Theme auto-detected from the host preference.
    ///
    /// Only applies when `force` is set or no theme was chosen explicitly;
    /// returns an empty patch when the current theme already matches.
    pub fn theme_for(&self, prefers_dark: bool, force: bool) -> ConfigPatch {
        let update = force || self.theme.is_none();
        let dark = self.is_dark_theme();
        if update && prefers_dark && !dark {
            ConfigPatch {
                theme: Some("dark".into()),
                code_theme: Some("material-dark".into()),
                ..Default::default()
            }
        } else if update && !prefers_dark && dark {
            ConfigPatch {
                theme: Some("light".into()),
                code_theme: Some("material-light".into()),
                ..Default::default()
            }
        } else {
            ConfigPatch::default()
        }
    }
}

// ─── Themes ─────────────────────────────────────────────────────────

/// Built-in color theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub name: &'static str,
    pub dark: bool,
    pub primary_background: &'static str,
    pub primary_foreground: &'static str,
}

pub const THEMES: [Theme; 5] = [
    Theme {
        name: "light",
        dark: false,
        primary_background: "#0b7dff",
        primary_foreground: "#ffffff",
    },
    Theme {
        name: "sand",
        dark: false,
        primary_background: "#b57a3c",
        primary_foreground: "#fffcf4",
    },
    Theme {
        name: "dark",
        dark: true,
        primary_background: "#d35ce5",
        primary_foreground: "#000000",
    },
    Theme {
        name: "solarized",
        dark: true,
        primary_background: "#268bd2",
        primary_foreground: "#002b36",
    },
    Theme {
        name: "material",
        dark: true,
        primary_background: "#80cbc4",
        primary_foreground: "#263238",
    },
];

impl Theme {
    pub fn by_name(name: &str) -> Option<&'static Theme> {
        THEMES.iter().find(|theme| theme.name == name)
    }
}
