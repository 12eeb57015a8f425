use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;
use super::exporter::MountRemap;

/// Structure representing the beamline configuration. Contains device names, DM tool and
/// pathing information.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device catalog, None uses the table bundled with the crate
    pub catalog_path: Option<PathBuf>,
    /// Detector profile table, None uses the table bundled with the crate
    pub detector_profiles_path: Option<PathBuf>,
    pub register_device: String,
    pub detector_device: String,
    pub connect_timeout_secs: f64,
    /// Workflow used for transfer-only jobs, None reads the `transfer` register
    pub transfer_workflow: Option<String>,
    /// Workflow used for analysis jobs, None reads the `analysis` register
    pub analysis_workflow: Option<String>,
    pub qmap_root: PathBuf,
    pub xpcs_qmap_file: String,
    pub xpcs_group_name: String,
    /// APS run cycle such as `2019-2`, None derives it from today's date
    pub aps_cycle: Option<String>,
    pub mount_remap: Vec<MountRemap>,
    /// Sourced before every DM command
    pub dm_setup_script: Option<PathBuf>,
    pub shell: String,
    pub start_job_command: String,
    pub list_jobs_command: String,
    pub list_jobs_limit: usize,
}

impl Default for Config {
    /// Generate a new Config object with the 8-ID-I defaults
    fn default() -> Self {
        Self {
            catalog_path: None,
            detector_profiles_path: None,
            register_device: String::from("dm_pars"),
            detector_device: String::from("lambdadet"),
            connect_timeout_secs: 10.0,
            transfer_workflow: Some(String::from("xpcs8-01-Lambda")),
            analysis_workflow: Some(String::from("xpcs8-02-Lambda")),
            qmap_root: PathBuf::from("/home/8-id-i/partitionMapLibrary"),
            xpcs_qmap_file: String::from("Lambda_qmap.h5"),
            xpcs_group_name: String::from("/xpcs"),
            aps_cycle: None,
            mount_remap: vec![MountRemap::default()],
            dm_setup_script: Some(PathBuf::from("/home/dm/etc/dm.setup.sh")),
            shell: String::from("bash"),
            start_job_command: String::from("dm-start-processing-job"),
            list_jobs_command: String::from(
                "dm-list-processing-jobs --display-keys=startTime,endTime,sgeJobName,status,stage,runTime,id",
            ),
            list_jobs_limit: 10,
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

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_secs.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_yaml::from_str("shell: sh\ndm_setup_script: null\nlist_jobs_limit: 3\n").unwrap();
        assert_eq!(config.shell, "sh");
        assert!(config.dm_setup_script.is_none());
        assert_eq!(config.list_jobs_limit, 3);
        assert_eq!(config.register_device, "dm_pars");
        assert_eq!(config.mount_remap, vec![MountRemap::default()]);
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        assert!(matches!(
            Config::read_config_file(&path),
            Err(ConfigError::BadFilePath(_))
        ));
        Config::default().write_config_file(&path).unwrap();
        let config = Config::read_config_file(&path).unwrap();
        assert_eq!(config.xpcs_qmap_file, "Lambda_qmap.h5");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }
}
