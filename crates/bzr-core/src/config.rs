//! Report configuration loaded from `bzr.toml`.
//!
//! Top-level keys apply to every report. `[instances.<name>]` tables
//! override them for reports run with `instance=<name>`, and
//! `[alternates.<name>]` tables swap the connection settings for reports run
//! with `bzalternateconfig=<name>`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::Result;

/// Row cap applied when the configuration does not set one.
pub const DEFAULT_MAX_ROWS: usize = 100;
/// Row cap for bar-chart aggregation when the configuration does not set one.
pub const DEFAULT_MAX_ROWS_BAR: usize = 500;

/// One layer of optional settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub database: Option<PathBuf>,
    pub schema: Option<String>,
    pub bzserver: Option<String>,
    pub interwiki: Option<String>,
    pub raw_html: Option<bool>,
    pub maxrows: Option<usize>,
    pub maxrowsbar: Option<usize>,
    /// `|`-separated `name=value` parameters applied before the caller's.
    pub defaults: Option<String>,
}

/// Connection settings for an alternate bug database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlternateConfig {
    pub database: Option<PathBuf>,
    pub schema: Option<String>,
    pub bzserver: Option<String>,
}

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    #[serde(flatten)]
    pub base: ConfigLayer,
    pub instances: HashMap<String, ConfigLayer>,
    pub alternates: HashMap<String, AlternateConfig>,
}

impl ConfigFile {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ReportError::Config`] when the text is not valid TOML
    /// or has mistyped keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an I/O error for unreadable files and a config error for
    /// malformed ones.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Default parameters, split on `|`: the site-wide list followed by the
    /// instance's own, so instance entries win.
    #[must_use]
    pub fn default_parameters(&self, instance: Option<&str>) -> Vec<String> {
        let layers = [
            Some(&self.base),
            instance.and_then(|name| self.instances.get(name)),
        ];
        layers
            .into_iter()
            .flatten()
            .filter_map(|layer| layer.defaults.as_deref())
            .flat_map(|d| d.split('|'))
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Settings for one report, with instance and alternate overrides
    /// applied. Unknown instance or alternate names are reported and fall
    /// back to the base.
    #[must_use]
    pub fn resolve(
        &self,
        instance: Option<&str>,
        alternate: Option<&str>,
        diagnostics: &Diagnostics,
    ) -> ReportConfig {
        let overlay = instance.and_then(|name| {
            let layer = self.instances.get(name);
            if layer.is_none() {
                diagnostics.warn(
                    DiagnosticKind::UnsupportedParameter,
                    format!("Instance {name} is not configured"),
                );
            }
            layer
        });

        macro_rules! property {
            ($field:ident) => {
                overlay
                    .and_then(|o| o.$field.clone())
                    .or_else(|| self.base.$field.clone())
            };
        }

        let mut config = ReportConfig {
            database: property!(database),
            schema: property!(schema),
            bzserver: property!(bzserver).unwrap_or_default(),
            interwiki: property!(interwiki),
            raw_html: property!(raw_html).unwrap_or(false),
            maxrows: property!(maxrows).unwrap_or(DEFAULT_MAX_ROWS),
            maxrowsbar: property!(maxrowsbar).unwrap_or(DEFAULT_MAX_ROWS_BAR),
        };

        if let Some(name) = alternate {
            match self.alternates.get(name) {
                Some(alt) => {
                    tracing::debug!(alternate = name, "using alternate connection");
                    config.database = alt.database.clone();
                    config.schema = alt.schema.clone();
                    config.bzserver = alt.bzserver.clone().unwrap_or_default();
                }
                None => diagnostics.warn(
                    DiagnosticKind::UnsupportedParameter,
                    format!("Alternate configuration {name} is not configured"),
                ),
            }
        }

        config
    }
}

/// Fully resolved settings for a single report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportConfig {
    pub database: Option<PathBuf>,
    pub schema: Option<String>,
    pub bzserver: String,
    pub interwiki: Option<String>,
    pub raw_html: bool,
    pub maxrows: usize,
    pub maxrowsbar: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ConfigFile::default().resolve(None, None, &Diagnostics::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
database = "/var/lib/bugs.db"
bzserver = "https://bugs.example.com"
maxrows = 250
defaults = "sortable=0|nameformat=tla"

[instances.ops]
bzserver = "https://ops.example.com"
interwiki = "opsbugs"
defaults = "headers=hide"

[alternates.legacy]
database = "/srv/legacy.db"
schema = "legacy"
"#;

    #[test]
    fn base_settings_and_fallbacks() {
        let file = ConfigFile::from_toml_str(SAMPLE).unwrap();
        let config = file.resolve(None, None, &Diagnostics::new());
        assert_eq!(config.database, Some(PathBuf::from("/var/lib/bugs.db")));
        assert_eq!(config.bzserver, "https://bugs.example.com");
        assert_eq!(config.maxrows, 250);
        assert_eq!(config.maxrowsbar, DEFAULT_MAX_ROWS_BAR);
        assert!(!config.raw_html);
    }

    #[test]
    fn instance_overrides_base_keys() {
        let file = ConfigFile::from_toml_str(SAMPLE).unwrap();
        let config = file.resolve(Some("ops"), None, &Diagnostics::new());
        assert_eq!(config.bzserver, "https://ops.example.com");
        assert_eq!(config.interwiki.as_deref(), Some("opsbugs"));
        assert_eq!(config.maxrows, 250, "unset keys fall through to the base");
    }

    #[test]
    fn alternate_replaces_connection_settings() {
        let file = ConfigFile::from_toml_str(SAMPLE).unwrap();
        let config = file.resolve(None, Some("legacy"), &Diagnostics::new());
        assert_eq!(config.database, Some(PathBuf::from("/srv/legacy.db")));
        assert_eq!(config.schema.as_deref(), Some("legacy"));
        assert_eq!(config.bzserver, "");
    }

    #[test]
    fn unknown_names_fall_back_to_base() {
        let file = ConfigFile::from_toml_str(SAMPLE).unwrap();
        let diagnostics = Diagnostics::new();
        let config = file.resolve(Some("nope"), Some("gone"), &diagnostics);
        assert_eq!(config, file.resolve(None, None, &Diagnostics::new()));
        let messages: Vec<String> = diagnostics
            .to_vec()
            .into_iter()
            .map(|d| d.message)
            .collect();
        assert_eq!(
            messages,
            [
                "Instance nope is not configured",
                "Alternate configuration gone is not configured",
            ]
        );
        assert!(diagnostics.has(DiagnosticKind::UnsupportedParameter));
    }

    #[test]
    fn defaults_split_on_pipes() {
        let file = ConfigFile::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            file.default_parameters(None),
            vec!["sortable=0".to_string(), "nameformat=tla".to_string()]
        );
        assert_eq!(
            file.default_parameters(Some("ops")),
            ["sortable=0", "nameformat=tla", "headers=hide"]
        );
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::load(&dir.path().join("bzr.toml")).unwrap();
        assert_eq!(file, ConfigFile::default());
        assert_eq!(ReportConfig::default().maxrows, DEFAULT_MAX_ROWS);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bzr.toml");
        std::fs::write(&path, "maxrows = \"many\"").unwrap();
        let err = ConfigFile::load(&path).unwrap_err();
        assert!(matches!(err, crate::ReportError::Config(_)));
    }
}
