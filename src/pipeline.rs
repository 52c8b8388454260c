use rayon::prelude::*;

use crate::config::Settings;
use crate::error::FilterError;
use crate::filter::{FilterContext, FilterOutcome, RideFilter};
use crate::schema::{directory_listing, Classification};

/// Totals of a whole-directory run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub filtered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rows_read: usize,
    pub rows_kept: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &Result<FilterOutcome, FilterError>) {
        match outcome {
            Ok(FilterOutcome::Skipped { .. }) => self.skipped += 1,
            Ok(FilterOutcome::Filtered(report)) => {
                self.filtered += 1;
                self.rows_read += report.rows_read;
                self.rows_kept += report.rows_kept;
            }
            Err(_) => self.failed += 1,
        }
    }
}

/// Everything a run needs, built once: settings, boundary lookups, and the
/// cohort classification of the data directory.
pub struct Pipeline {
    settings: Settings,
    context: FilterContext,
    listing: Vec<String>,
    classification: Classification,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Result<Pipeline, FilterError> {
        let context = FilterContext::load(&settings)?;
        Pipeline::with_context(settings, context)
    }

    pub fn with_context(settings: Settings, context: FilterContext) -> Result<Pipeline, FilterError> {
        let listing = directory_listing(&settings.paths.path_data)?;
        let classification = Classification::classify(
            &settings.paths.path_data,
            &listing,
            &settings.cohorts.rules,
            settings.layouts(),
        )?;
        Ok(Pipeline {
            settings,
            context,
            listing,
            classification,
        })
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn listing(&self) -> &[String] {
        &self.listing
    }

    /// Filters a single named file.
    pub fn run_one(&self, file_name: Option<&str>) -> Result<FilterOutcome, FilterError> {
        let file_name = file_name.ok_or(FilterError::MissingArgument)?;
        RideFilter::new(&self.context, &self.settings).filter_file(file_name, &self.classification)
    }

    /// Filters every file of the data directory in listing order, on
    /// `files.jobs` workers. A failing file is logged and does not stop
    /// the others.
    pub fn run_all(&self) -> Result<RunSummary, FilterError> {
        let filter = RideFilter::new(&self.context, &self.settings);
        let jobs = self.settings.files.jobs;
        let mut summary = RunSummary::default();

        if jobs <= 1 {
            for file_name in &self.listing {
                log::info!("{file_name}");
                let outcome = filter.filter_file(file_name, &self.classification);
                if let Err(e) = &outcome {
                    log::error!("{file_name}: {e}");
                }
                summary.record(&outcome);
                log::info!("{}", "=".repeat(30));
            }
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .map_err(|e| FilterError::InvalidConfig(format!("cannot start {jobs} workers: {e}")))?;
            log::info!("filtering {} files on {jobs} workers", self.listing.len());
            let outcomes: Vec<_> = pool.install(|| {
                self.listing
                    .par_iter()
                    .map(|file_name| {
                        let outcome = filter.filter_file(file_name, &self.classification);
                        if let Err(e) = &outcome {
                            log::error!("{file_name}: {e}");
                        }
                        outcome
                    })
                    .collect()
            });
            for outcome in &outcomes {
                summary.record(outcome);
            }
        }

        log::info!(
            "{} files filtered, {} skipped, {} failed; {} of {} rows kept",
            summary.filtered,
            summary.skipped,
            summary.failed,
            summary.rows_kept,
            summary.rows_read
        );
        if summary.failed > 0 {
            return Err(FilterError::FilesFailed(summary.failed));
        }
        Ok(summary)
    }
}
