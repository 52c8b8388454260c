use std::path::{Path, PathBuf};

use config::{Config, FileFormat};
use serde::Deserialize;

use crate::error::FilterError;
use crate::schema::{default_cohort_rules, CohortLayout, CohortRule};

pub const DEFAULT_CONFIG_FILE: &str = "config.yml";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Process-wide settings read once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub paths: PathSettings,
    pub columns: ColumnSettings,
    pub files: FileSettings,
    #[serde(default)]
    pub boundaries: BoundarySettings,
    #[serde(default)]
    pub zones: ZoneSettings,
    #[serde(default)]
    pub cohorts: CohortSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathSettings {
    /// directory holding the trip record files
    #[serde(alias = "PATH_DATA")]
    pub path_data: PathBuf,
    /// directory where filtered files are written
    #[serde(alias = "PATH_RESULT")]
    pub path_result: PathBuf,
    /// community district boundaries, source of the airport polygon
    #[serde(alias = "PATH_CD")]
    pub path_cd: PathBuf,
    /// borough boundaries, source of the urban polygon
    #[serde(alias = "PATH_BB")]
    pub path_bb: PathBuf,
    /// taxi_zone_lookup.csv
    #[serde(alias = "PATH_TAXI_ZONES")]
    pub path_taxi_zones: PathBuf,
    // only read by the plotting notebooks
    #[serde(default, alias = "PATH_AP")]
    pub path_ap: Option<PathBuf>,
    #[serde(default, alias = "PATH_TMP")]
    pub path_tmp: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSettings {
    #[serde(alias = "ALL_COLUMNS")]
    pub all_columns: Vec<Vec<String>>,
    #[serde(alias = "SELECTED_COLUMNS")]
    pub selected_columns: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileSettings {
    pub chunksize: usize,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundarySettings {
    #[serde(default = "default_airport_shape")]
    pub airport_shape: usize,
    #[serde(default)]
    pub urban_shape: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneSettings {
    #[serde(default = "default_airport_keyword")]
    pub airport_keyword: String,
    #[serde(default = "default_urban_keyword")]
    pub urban_keyword: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CohortSettings {
    #[serde(default = "default_cohort_rules")]
    pub rules: Vec<CohortRule>,
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

fn default_jobs() -> usize {
    1
}

fn default_airport_shape() -> usize {
    35
}

fn default_airport_keyword() -> String {
    String::from("jfk")
}

fn default_urban_keyword() -> String {
    String::from("manhattan")
}

impl Default for BoundarySettings {
    fn default() -> Self {
        BoundarySettings {
            airport_shape: default_airport_shape(),
            urban_shape: 0,
        }
    }
}

impl Default for ZoneSettings {
    fn default() -> Self {
        ZoneSettings {
            airport_keyword: default_airport_keyword(),
            urban_keyword: default_urban_keyword(),
        }
    }
}

impl Default for CohortSettings {
    fn default() -> Self {
        CohortSettings {
            rules: default_cohort_rules(),
        }
    }
}

impl Settings {
    /// Reads and validates a YAML configuration file.
    pub fn from_path(path: &Path) -> Result<Settings, FilterError> {
        log::info!("Reading config file {}...", path.display());
        let source = config::File::from(path).format(FileFormat::Yaml);
        let settings = Self::build(source, &path.display().to_string())?;
        log::info!("Config file read successfully");
        Ok(settings)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Settings, FilterError> {
        Self::build(config::File::from_str(yaml, FileFormat::Yaml), "inline config")
    }

    fn build<S>(source: S, name: &str) -> Result<Settings, FilterError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = Config::builder()
            .add_source(source)
            .build()
            .map_err(|e| FilterError::ConfigRead {
                msg: format!("failed reading '{name}'"),
                source: e,
            })?;
        let settings = config
            .try_deserialize::<Settings>()
            .map_err(|e| FilterError::ConfigRead {
                msg: format!("failed deserializing '{name}'"),
                source: e,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.files.chunksize == 0 {
            return Err(FilterError::InvalidConfig(
                "files.chunksize must be a positive integer".to_string(),
            ));
        }
        if self.files.jobs == 0 {
            return Err(FilterError::InvalidConfig(
                "files.jobs must be a positive integer".to_string(),
            ));
        }
        let all = &self.columns.all_columns;
        let selected = &self.columns.selected_columns;
        if all.len() != selected.len() {
            return Err(FilterError::InvalidConfig(format!(
                "ALL_COLUMNS has {} entries but SELECTED_COLUMNS has {}",
                all.len(),
                selected.len()
            )));
        }
        for (idx, (full, sel)) in all.iter().zip(selected).enumerate() {
            if full.len() < 2 {
                return Err(FilterError::InvalidConfig(format!(
                    "ALL_COLUMNS[{idx}] needs at least 2 columns, timestamp is column 1"
                )));
            }
            if sel.len() != 3 && sel.len() != 5 {
                return Err(FilterError::InvalidConfig(format!(
                    "SELECTED_COLUMNS[{idx}] has {} columns, expected 3 or 5",
                    sel.len()
                )));
            }
            if let Some(missing) = sel.iter().find(|c| !full.contains(c)) {
                return Err(FilterError::InvalidConfig(format!(
                    "SELECTED_COLUMNS[{idx}] column '{missing}' is not in ALL_COLUMNS[{idx}]"
                )));
            }
        }
        Ok(())
    }

    /// Column layouts for cohorts 1..=N, in cohort order.
    pub fn layouts(&self) -> Vec<CohortLayout> {
        self.columns
            .all_columns
            .iter()
            .zip(&self.columns.selected_columns)
            .map(|(full, selected)| CohortLayout::new(full.clone(), selected.clone()))
            .collect()
    }
}
