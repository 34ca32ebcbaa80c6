use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::reconcile::Mode;

/// Configuration for reconciliation runs.
///
/// This struct holds the settings that control how integrity violations are
/// treated and where artifacts of a sync are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Versions", into = "Versions")]
pub struct Config {
    /// How integrity violations in a module are handled.
    ///
    /// In [`Mode::Strict`] any violation discards the module's change set. In
    /// [`Mode::Force`] the offending attribute or definition is skipped and
    /// the rest of the module is still synchronized.
    pub mode: Mode,

    /// Display name given to a newly created requirement types folder.
    types_folder_name: String,

    /// Directory (relative to the working directory) that receives one
    /// change-set file per synchronized module.
    change_set_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            types_folder_name: default_types_folder_name(),
            change_set_dir: default_change_set_dir(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the TOML content is
    /// invalid.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {e}"))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {e}"))
    }

    /// Saves the configuration to a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized to TOML or if
    /// the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Returns the display name for a newly created types folder.
    #[must_use]
    pub fn types_folder_name(&self) -> &str {
        &self.types_folder_name
    }

    /// Returns the directory change-set files are written to.
    #[must_use]
    pub fn change_set_dir(&self) -> &Path {
        &self.change_set_dir
    }

    /// Sets the validation mode.
    pub const fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}

fn default_types_folder_name() -> String {
    "Types".to_string()
}

fn default_change_set_dir() -> PathBuf {
    PathBuf::from("change-sets")
}

/// The serialized versions of the configuration.
/// This allows for future changes to the configuration format and to the domain
/// type without breaking compatibility.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        #[serde(default)]
        mode: Mode,

        #[serde(default = "default_types_folder_name")]
        types_folder_name: String,

        #[serde(default = "default_change_set_dir")]
        change_set_dir: PathBuf,
    },
}

impl From<Versions> for Config {
    fn from(versions: Versions) -> Self {
        match versions {
            Versions::V1 {
                mode,
                types_folder_name,
                change_set_dir,
            } => Self {
                mode,
                types_folder_name,
                change_set_dir,
            },
        }
    }
}

impl From<Config> for Versions {
    fn from(config: Config) -> Self {
        Self::V1 {
            mode: config.mode,
            types_folder_name: config.types_folder_name,
            change_set_dir: config.change_set_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn load_reads_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"_version = "1"
mode = "force"
types_folder_name = "Typen"
change_set_dir = "out"
"#,
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.mode, Mode::Force);
        assert_eq!(config.types_folder_name(), "Typen");
        assert_eq!(config.change_set_dir(), Path::new("out"));
    }

    #[test]
    fn load_missing_file_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.toml");

        let error = Config::load(&missing).unwrap_err();
        assert!(error.starts_with("Failed to read config file:"));
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"_version = \"1\"\nmode = \"lenient\"\n")
            .unwrap();

        let error = Config::load(file.path()).unwrap_err();
        assert!(error.starts_with("Failed to parse config file:"));
    }

    #[test]
    fn empty_file_returns_default() {
        let expected = Config::default();
        let actual: Config = toml::from_str(r#"_version = "1""#).unwrap();
        assert_eq!(actual, expected);
        assert_eq!(actual.mode, Mode::Strict);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("reqsync.toml");

        let mut config = Config::default();
        config.set_mode(Mode::Force);
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
