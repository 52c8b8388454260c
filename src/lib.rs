pub mod config;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod pipeline;
pub mod schema;
pub mod zones;

pub use config::Settings;
pub use error::FilterError;
pub use filter::{FileReport, FilterOutcome};
pub use pipeline::{Pipeline, RunSummary};

/// Filters one file of the data directory. Fails with
/// `FilterError::MissingArgument` when no file name is given.
pub fn process_file(
    settings: Settings,
    file_name: Option<&str>,
) -> Result<FilterOutcome, FilterError> {
    let file_name = file_name.ok_or(FilterError::MissingArgument)?;
    Pipeline::new(settings)?.run_one(Some(file_name))
}

/// Filters every file of the data directory.
pub fn process_files(settings: Settings) -> Result<RunSummary, FilterError> {
    Pipeline::new(settings)?.run_all()
}
