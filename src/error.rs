use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    #[error("{msg}: {source}")]
    ConfigRead {
        msg: String,
        source: config::ConfigError,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("malformed boundary in {origin}: {msg}")]
    Boundary { origin: String, msg: String },
    #[error("failed reading shapefile '{}': {source}", path.display())]
    Shapefile {
        path: PathBuf,
        source: shapefile::Error,
    },
    #[error("failed reading GeoJSON '{}': {source}", path.display())]
    GeoJson {
        path: PathBuf,
        source: geojson::Error,
    },
    #[error("failed reading zone lookup '{}': {source}", path.display())]
    ZoneLookup { path: PathBuf, source: csv::Error },
    #[error("cohort rule refers to group {group} but only {available} groups were found")]
    CohortRule { group: usize, available: usize },
    #[error("{cohorts} cohorts need a column layout but {layouts} layouts are configured")]
    CohortCount { cohorts: usize, layouts: usize },
    #[error("please specify the file name you want to filter")]
    MissingArgument,
    #[error("failed accessing '{}': {source}", path.display())]
    FileAccess {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed reading rows of '{}': {source}", path.display())]
    Csv { path: PathBuf, source: csv::Error },
    #[error("file {0} does not belong to any cohort")]
    Unclassified(String),
    #[error("{0} file(s) failed, see log for details")]
    FilesFailed(usize),
}

impl FilterError {
    /// Errors that abort the process at startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FilterError::ConfigRead { .. }
                | FilterError::InvalidConfig(_)
                | FilterError::Boundary { .. }
                | FilterError::Shapefile { .. }
                | FilterError::GeoJson { .. }
                | FilterError::ZoneLookup { .. }
                | FilterError::CohortRule { .. }
                | FilterError::CohortCount { .. }
        )
    }

    pub(crate) fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FilterError::FileAccess {
            path: path.into(),
            source,
        }
    }
}
