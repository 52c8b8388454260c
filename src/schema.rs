//! Groups trip record files into schema cohorts from their header rows.
//!
//! Classification is order sensitive: the listing order of the data
//! directory decides where groups start, so every function here takes the
//! file list explicitly instead of reading the directory itself.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;

use serde::Deserialize;

use crate::error::FilterError;

pub type Header = Vec<String>;

/// Header of each file that changed the header relative to the file
/// listed right before it.
pub type HeaderMap = HashMap<String, Header>;

/// Names of the regular files in `dir`, sorted by name.
pub fn directory_listing(dir: &Path) -> Result<Vec<String>, FilterError> {
    let entries = fs::read_dir(dir).map_err(|e| FilterError::file_access(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FilterError::file_access(dir, e))?;
        let is_file = entry
            .file_type()
            .map_err(|e| FilterError::file_access(entry.path(), e))?
            .is_file();
        if is_file {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Reads only the first record of a delimited file, fields kept verbatim.
/// An empty file has an empty header.
pub fn read_header(path: &Path) -> Result<Header, FilterError> {
    let file = File::open(path).map_err(|e| FilterError::file_access(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    let mut record = csv::StringRecord::new();
    let found = reader
        .read_record(&mut record)
        .map_err(|e| FilterError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
    if !found {
        return Ok(Vec::new());
    }
    Ok(record.iter().map(str::to_string).collect())
}

/// Records a file whenever its header differs from the header of the
/// file immediately before it.
///
/// This compares against the previous file only, not against every header
/// seen so far: a header that comes back after a different one is recorded
/// again. Grouping relies on exactly these change points.
pub fn header_changes<I>(headers: I) -> HeaderMap
where
    I: IntoIterator<Item = (String, Header)>,
{
    let (changes, _) = headers.into_iter().fold(
        (HeaderMap::new(), Header::new()),
        |(mut changes, previous), (file_name, header)| {
            if header != previous {
                changes.insert(file_name, header.clone());
                (changes, header)
            } else {
                (changes, previous)
            }
        },
    );
    changes
}

/// Reads the header of every listed file under `dir` and returns the
/// header change points.
pub fn unique_headers(dir: &Path, listing: &[String]) -> Result<HeaderMap, FilterError> {
    let headers = listing
        .iter()
        .map(|name| Ok((name.clone(), read_header(&dir.join(name))?)))
        .collect::<Result<Vec<_>, FilterError>>()?;
    Ok(header_changes(headers))
}

/// Splits the listing into runs that each start at a header change point.
///
/// Files listed before the first change point form their own leading
/// group.
pub fn group_files(listing: &[String], header_map: &HeaderMap) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for name in listing {
        if header_map.contains_key(name) && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
        }
        current.push(name.clone());
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Maps one header group to one cohort, or to two cohorts when the files
/// changed layout part way through without changing their header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CohortRule {
    pub group: usize,
    #[serde(default)]
    pub split_at: Option<usize>,
}

impl CohortRule {
    pub const fn whole(group: usize) -> Self {
        CohortRule {
            group,
            split_at: None,
        }
    }

    pub const fn split(group: usize, at: usize) -> Self {
        CohortRule {
            group,
            split_at: Some(at),
        }
    }
}

/// Rules for the NYC trip record history: 12 header groups, of which
/// groups 4, 5 and 11 each hold two layouts, giving 15 cohorts.
pub fn default_cohort_rules() -> Vec<CohortRule> {
    vec![
        CohortRule::whole(0),
        CohortRule::whole(1),
        CohortRule::whole(2),
        CohortRule::whole(3),
        CohortRule::split(4, 6),
        CohortRule::split(5, 6),
        CohortRule::whole(6),
        CohortRule::whole(7),
        CohortRule::whole(8),
        CohortRule::whole(9),
        CohortRule::whole(10),
        CohortRule::split(11, 6),
    ]
}

/// Applies `rules` in order. A split point past the end of its group
/// yields an empty second cohort.
pub fn assemble_cohorts(
    groups: &[Vec<String>],
    rules: &[CohortRule],
) -> Result<Vec<Vec<String>>, FilterError> {
    let mut cohorts = Vec::with_capacity(rules.len() * 2);
    for rule in rules {
        let group = groups.get(rule.group).ok_or(FilterError::CohortRule {
            group: rule.group,
            available: groups.len(),
        })?;
        match rule.split_at {
            None => cohorts.push(group.clone()),
            Some(at) => {
                let at = at.min(group.len());
                cohorts.push(group[..at].to_vec());
                cohorts.push(group[at..].to_vec());
            }
        }
    }
    Ok(cohorts)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// pickup and dropoff given as taxi zone ids
    ZoneId,
    /// pickup and dropoff given as longitude/latitude pairs
    Coordinate,
}

/// Column layout applied to every file of a cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortLayout {
    pub full_columns: Vec<String>,
    pub selected_columns: Vec<String>,
    pub mode: FilterMode,
    /// positions of `selected_columns` within `full_columns`
    pub selected_idx: Vec<usize>,
}

impl CohortLayout {
    /// Expects a layout that passed `Settings::validate`.
    pub fn new(full_columns: Vec<String>, selected_columns: Vec<String>) -> Self {
        let mode = if selected_columns.len() == 3 {
            FilterMode::ZoneId
        } else {
            FilterMode::Coordinate
        };
        let selected_idx = selected_columns
            .iter()
            .filter_map(|col| full_columns.iter().position(|c| c == col))
            .collect();
        CohortLayout {
            full_columns,
            selected_columns,
            mode,
            selected_idx,
        }
    }

    /// Index of the timestamp column.
    pub fn timestamp_idx(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone)]
pub struct Cohort {
    pub index: usize,
    pub files: Vec<String>,
    /// None for cohort 0, whose files lack pickup or dropoff information
    pub layout: Option<CohortLayout>,
}

impl Cohort {
    pub fn is_skipped(&self) -> bool {
        self.layout.is_none()
    }
}

/// Result of classifying a whole run's file listing. Built once and
/// shared read-only by every file task.
#[derive(Debug, Clone)]
pub struct Classification {
    cohorts: Vec<Cohort>,
    by_file: HashMap<String, usize>,
}

impl Classification {
    /// Pairs cohort `k` (k >= 1) with `layouts[k - 1]`.
    pub fn new(
        cohort_files: Vec<Vec<String>>,
        layouts: Vec<CohortLayout>,
    ) -> Result<Classification, FilterError> {
        let needed = cohort_files.len().saturating_sub(1);
        if needed != layouts.len() {
            return Err(FilterError::CohortCount {
                cohorts: needed,
                layouts: layouts.len(),
            });
        }
        let mut by_file = HashMap::new();
        let mut cohorts = Vec::with_capacity(cohort_files.len());
        let layouts = std::iter::once(None).chain(layouts.into_iter().map(Some));
        for (index, (files, layout)) in cohort_files.into_iter().zip(layouts).enumerate() {
            for name in &files {
                by_file.entry(name.clone()).or_insert(index);
            }
            cohorts.push(Cohort {
                index,
                files,
                layout,
            });
        }
        Ok(Classification { cohorts, by_file })
    }

    /// Runs header detection, grouping and cohort assembly over `listing`.
    pub fn classify(
        dir: &Path,
        listing: &[String],
        rules: &[CohortRule],
        layouts: Vec<CohortLayout>,
    ) -> Result<Classification, FilterError> {
        let header_map = unique_headers(dir, listing)?;
        let groups = group_files(listing, &header_map);
        log::info!(
            "{} files form {} header groups",
            listing.len(),
            groups.len()
        );
        let cohorts = assemble_cohorts(&groups, rules)?;
        Classification::new(cohorts, layouts)
    }

    pub fn cohorts(&self) -> &[Cohort] {
        &self.cohorts
    }

    pub fn cohort_of(&self, file_name: &str) -> Option<&Cohort> {
        self.by_file.get(file_name).map(|&idx| &self.cohorts[idx])
    }
}
