use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::{DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_WINDOW_SECONDS};
use super::error::ConfigError;
use super::merger::MergeOptions;

/// Structure representing the merge configuration. Contains pathing and merge controls.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding the CFG/DAT pairs to merge
    pub input_path: PathBuf,
    /// Directory the merged files are written to
    pub output_path: PathBuf,
    pub window_seconds: f64,
    pub remove_duplicates: bool,
    pub remove_similar: bool,
    pub similarity_threshold: f64,
    /// JSON list of computed channel definitions to re-evaluate on every merged group
    pub computed_channels_path: Option<PathBuf>,
}

impl Default for Config {
    /// Generate a new Config object. The paths will be empty/invalid
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            window_seconds: DEFAULT_WINDOW_SECONDS,
            remove_duplicates: true,
            remove_similar: false,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            computed_channels_path: None,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    pub fn is_threshold_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.similarity_threshold)
    }

    pub fn is_window_valid(&self) -> bool {
        self.window_seconds.is_finite() && self.window_seconds >= 0.0
    }

    /// Get the output directory, if it exists
    pub fn get_output_directory(&self) -> Result<&Path, ConfigError> {
        if self.output_path.exists() {
            Ok(&self.output_path)
        } else {
            Err(ConfigError::BadFilePath(self.output_path.clone()))
        }
    }

    /// Paths of the CFG and DAT written for merged group `group`
    pub fn get_output_file_names(&self, group: usize) -> (PathBuf, PathBuf) {
        let stem = Self::get_output_stem(group);
        (
            self.output_path.join(format!("{stem}.cfg")),
            self.output_path.join(format!("{stem}.dat")),
        )
    }

    pub fn get_output_stem(group: usize) -> String {
        format!("merged_{group}")
    }

    pub fn has_computed_channels(&self) -> bool {
        self.computed_channels_path.is_some()
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            window_seconds: self.window_seconds,
            remove_duplicates: self.remove_duplicates,
            remove_similar: self.remove_similar,
            similarity_threshold: self.similarity_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "input_path: /data/in\noutput_path: /data/out\nremove_similar: true\n";
        let config = match serde_yaml::from_str::<Config>(yaml) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(config.input_path, PathBuf::from("/data/in"));
        assert_eq!(config.window_seconds, DEFAULT_WINDOW_SECONDS);
        assert!(config.remove_similar);
        assert!(config.is_threshold_valid());
        assert!(config.is_window_valid());
        let options = config.merge_options();
        assert!(options.remove_duplicates);
        assert!(options.remove_similar);
        assert_eq!(
            config.get_output_file_names(2),
            (
                PathBuf::from("/data/out/merged_2.cfg"),
                PathBuf::from("/data/out/merged_2.dat")
            )
        );
    }

    #[test]
    fn test_validation() {
        let config = Config {
            similarity_threshold: 1.5,
            window_seconds: -1.0,
            ..Default::default()
        };
        assert!(!config.is_threshold_valid());
        assert!(!config.is_window_valid());
        match Config::read_config_file(Path::new("/definitely/not/here.yml")) {
            Err(ConfigError::BadFilePath(_)) => (),
            _ => panic!(),
        }
    }
}
