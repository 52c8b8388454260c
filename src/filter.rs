//! Streams one trip record file in fixed-size chunks and keeps the rides
//! that start in the urban region and end at the airport.

use std::fs::{create_dir_all, File};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use csv::StringRecord;

use crate::config::Settings;
use crate::error::FilterError;
use crate::geometry::RegionIndex;
use crate::schema::{Classification, CohortLayout, FilterMode};
use crate::zones::LocationSetIndex;

/// Field values read as missing, besides empty ones.
const NA_VALUES: &[&str] = &["NA", "N/A", "NaN", "nan", "NULL", "null", "#N/A", "n/a", "<NA>"];

/// Read-only lookups shared by every file of a run.
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub regions: RegionIndex,
    pub zones: LocationSetIndex,
}

impl FilterContext {
    pub fn load(settings: &Settings) -> Result<FilterContext, FilterError> {
        let regions = RegionIndex::load(settings)?;
        let zones = LocationSetIndex::from_path(&settings.paths.path_taxi_zones, &settings.zones)?;
        Ok(FilterContext { regions, zones })
    }
}

#[derive(Debug, Clone)]
pub enum FilterOutcome {
    /// the file belongs to cohort 0 and was not read
    Skipped { file_name: String },
    Filtered(FileReport),
}

#[derive(Debug, Clone, Default)]
pub struct FileReport {
    pub file_name: String,
    pub cohort: usize,
    pub output: PathBuf,
    pub chunks: usize,
    pub rows_read: usize,
    /// rows whose field count does not match the cohort layout
    pub rows_malformed: usize,
    /// rows missing a selected column
    pub rows_missing: usize,
    pub rows_kept: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
enum RowVerdict {
    Malformed,
    Missing,
    Rejected,
    Kept(StringRecord),
}

pub struct RideFilter<'a> {
    context: &'a FilterContext,
    data_dir: PathBuf,
    output_dir: PathBuf,
    chunksize: usize,
    timestamp_format: String,
}

impl<'a> RideFilter<'a> {
    pub fn new(context: &'a FilterContext, settings: &Settings) -> Self {
        RideFilter {
            context,
            data_dir: settings.paths.path_data.clone(),
            output_dir: settings.paths.path_result.clone(),
            chunksize: settings.files.chunksize,
            timestamp_format: settings.files.timestamp_format.clone(),
        }
    }

    /// Filters `file_name` from the data directory into a file of the same
    /// name in the output directory.
    pub fn filter_file(
        &self,
        file_name: &str,
        classification: &Classification,
    ) -> Result<FilterOutcome, FilterError> {
        let cohort = classification
            .cohort_of(file_name)
            .ok_or_else(|| FilterError::Unclassified(file_name.to_string()))?;
        let Some(layout) = &cohort.layout else {
            log::info!(
                "File {file_name} doesn't contain all required information (date, PU and DO locations) and therefore ignored"
            );
            return Ok(FilterOutcome::Skipped {
                file_name: file_name.to_string(),
            });
        };
        let report = self.filter_with_layout(file_name, cohort.index, layout)?;
        Ok(FilterOutcome::Filtered(report))
    }

    fn filter_with_layout(
        &self,
        file_name: &str,
        cohort: usize,
        layout: &CohortLayout,
    ) -> Result<FileReport, FilterError> {
        let t0 = Instant::now();
        let input = self.data_dir.join(file_name);
        let output = self.output_dir.join(file_name);
        let mut report = FileReport {
            file_name: file_name.to_string(),
            cohort,
            output: output.clone(),
            ..Default::default()
        };

        let file = File::open(&input).map_err(|e| FilterError::file_access(&input, e))?;
        // the on-disk header is discarded, the cohort layout names the columns
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        create_dir_all(&self.output_dir).map_err(|e| FilterError::file_access(&self.output_dir, e))?;
        // same mode a plain File::create would give, umask applied
        let mut builder = tempfile::Builder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o666));
        }
        let pending = builder
            .tempfile_in(&self.output_dir)
            .map_err(|e| FilterError::file_access(&self.output_dir, e))?;
        let mut writer = csv::Writer::from_writer(pending);
        let write_err = |e: csv::Error| FilterError::Csv {
            path: output.clone(),
            source: e,
        };
        writer.write_record(&layout.full_columns).map_err(write_err)?;

        let mut records = reader.records();
        let mut chunk: Vec<StringRecord> = Vec::with_capacity(self.chunksize);
        loop {
            chunk.clear();
            let mut pulled = 0;
            for result in records.by_ref().take(self.chunksize) {
                pulled += 1;
                match result {
                    Ok(record) => chunk.push(record),
                    Err(e) if e.is_io_error() => {
                        return Err(FilterError::Csv {
                            path: input.clone(),
                            source: e,
                        })
                    }
                    Err(e) => {
                        log::debug!("dropping unreadable row of {file_name}: {e}");
                        report.rows_read += 1;
                        report.rows_malformed += 1;
                    }
                }
            }
            if pulled == 0 {
                break;
            }
            let i = report.chunks;
            report.chunks += 1;

            let t1 = Instant::now();
            let verdicts: Vec<RowVerdict> = chunk.iter().map(|r| self.judge(layout, r)).collect();
            report.rows_read += chunk.len();
            let complete = verdicts
                .iter()
                .filter(|v| !matches!(v, RowVerdict::Malformed | RowVerdict::Missing))
                .count();
            log::info!("#{i} chunk of file {file_name} is read. Chunksize = {complete}");

            for verdict in verdicts {
                match verdict {
                    RowVerdict::Malformed => report.rows_malformed += 1,
                    RowVerdict::Missing => report.rows_missing += 1,
                    RowVerdict::Rejected => {}
                    RowVerdict::Kept(row) => {
                        writer.write_record(&row).map_err(write_err)?;
                        report.rows_kept += 1;
                    }
                }
            }
            log::info!(
                "#{i} chunk of file {file_name} processed in {:.3} seconds",
                t1.elapsed().as_secs_f64()
            );
        }

        let pending = writer
            .into_inner()
            .map_err(|e| {
                let cause = e.error();
                FilterError::file_access(&output, std::io::Error::new(cause.kind(), cause.to_string()))
            })?;
        pending
            .persist(&output)
            .map_err(|e| FilterError::file_access(&output, e.error))?;

        report.elapsed = t0.elapsed();
        log::info!(
            "Whole processing of {file_name} took {:.2} minutes, {} of {} rows kept",
            report.elapsed.as_secs_f64() / 60.0,
            report.rows_kept,
            report.rows_read
        );
        Ok(report)
    }

    /// Decides the fate of one row. Kept rows come back with the timestamp
    /// re-emitted in the configured format.
    fn judge(&self, layout: &CohortLayout, record: &StringRecord) -> RowVerdict {
        if record.len() != layout.full_columns.len() {
            return RowVerdict::Malformed;
        }
        let ts_idx = layout.timestamp_idx();
        let timestamp = record
            .get(ts_idx)
            .and_then(|raw| parse_timestamp(raw, &self.timestamp_format));

        let any_missing = layout.selected_idx.iter().any(|&idx| {
            let raw = record.get(idx).unwrap_or_default();
            is_missing(raw) || (idx == ts_idx && timestamp.is_none())
        });
        if any_missing {
            return RowVerdict::Missing;
        }

        let field = move |n: usize| record.get(layout.selected_idx[n]).unwrap_or_default();
        let keep = match layout.mode {
            FilterMode::ZoneId => match (parse_zone_id(field(1)), parse_zone_id(field(2))) {
                (Some(pickup), Some(dropoff)) => self.context.zones.is_trip_match(pickup, dropoff),
                _ => false,
            },
            FilterMode::Coordinate => {
                let coords = [field(1), field(2), field(3), field(4)]
                    .map(|raw| raw.trim().parse::<f64>().ok());
                match coords {
                    [Some(pu_x), Some(pu_y), Some(do_x), Some(do_y)] => self
                        .context
                        .regions
                        .is_trip_match((pu_x, pu_y), (do_x, do_y)),
                    _ => false,
                }
            }
        };
        if !keep {
            return RowVerdict::Rejected;
        }

        let row = record
            .iter()
            .enumerate()
            .map(|(idx, raw)| {
                if idx == ts_idx {
                    timestamp
                        .map(|ts| ts.format(&self.timestamp_format).to_string())
                        .unwrap_or_default()
                } else {
                    raw.to_string()
                }
            })
            .collect::<StringRecord>();
        RowVerdict::Kept(row)
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }
}

pub fn is_missing(raw: &str) -> bool {
    let value = raw.trim();
    value.is_empty() || NA_VALUES.contains(&value)
}

/// Unparseable timestamps read as missing.
pub fn parse_timestamp(raw: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), format).ok()
}

/// Accepts integral values written either as integers or as floats, e.g.
/// `161` and `161.0`.
pub fn parse_zone_id(raw: &str) -> Option<u32> {
    let value = raw.trim();
    if let Ok(id) = value.parse::<u32>() {
        return Some(id);
    }
    let float = value.parse::<f64>().ok()?;
    if float.is_finite() && float.fract() == 0.0 && float >= 0.0 && float <= u32::MAX as f64 {
        Some(float as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::geometry::Region;
    use crate::zones::ZoneLookupRow;

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn context() -> FilterContext {
        let square = |x0: f64, y0: f64| {
            Region::from_points(&[(x0, y0), (x0 + 1.0, y0), (x0 + 1.0, y0 + 1.0), (x0, y0 + 1.0)], "square")
                .unwrap()
        };
        let rows = vec![
            ZoneLookupRow {
                location_id: 161,
                borough: "Manhattan".into(),
                zone: "Midtown Center".into(),
            },
            ZoneLookupRow {
                location_id: 132,
                borough: "Queens".into(),
                zone: "JFK Airport".into(),
            },
        ];
        FilterContext {
            regions: RegionIndex {
                urban: square(0.0, 0.0),
                airport: square(10.0, 10.0),
            },
            zones: LocationSetIndex::from_rows(&rows, "manhattan", "jfk"),
        }
    }

    fn settings(data: &Path, result: &Path, chunksize: usize) -> Settings {
        let yaml = format!(
            r#"
paths:
  PATH_DATA: "{}"
  PATH_RESULT: "{}"
  PATH_CD: cd.geojson
  PATH_BB: bb.geojson
  PATH_TAXI_ZONES: zones.csv
columns:
  ALL_COLUMNS:
    - [VendorID, pickup_datetime, PULocationID, DOLocationID]
  SELECTED_COLUMNS:
    - [pickup_datetime, PULocationID, DOLocationID]
files:
  chunksize: {chunksize}
"#,
            data.display(),
            result.display()
        );
        Settings::from_yaml_str(&yaml).unwrap()
    }

    fn zone_layout() -> CohortLayout {
        CohortLayout::new(
            names(&["VendorID", "pickup_datetime", "PULocationID", "DOLocationID"]),
            names(&["pickup_datetime", "PULocationID", "DOLocationID"]),
        )
    }

    fn coordinate_layout() -> CohortLayout {
        CohortLayout::new(
            names(&["vendor", "pickup_datetime", "pu_lon", "pu_lat", "do_lon", "do_lat"]),
            names(&["pickup_datetime", "pu_lon", "pu_lat", "do_lon", "do_lat"]),
        )
    }

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn zone_rows_need_urban_pickup_and_airport_dropoff() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let filter = RideFilter::new(&ctx, &settings(dir.path(), dir.path(), 10));
        let layout = zone_layout();
        let kept = filter.judge(&layout, &record(&["1", "2016-07-01 10:00:00", "161", "132"]));
        assert_eq!(
            kept,
            RowVerdict::Kept(record(&["1", "2016-07-01 10:00:00", "161", "132"]))
        );
        let reversed = filter.judge(&layout, &record(&["1", "2016-07-01 10:00:00", "132", "161"]));
        assert_eq!(reversed, RowVerdict::Rejected);
        let float_ids = filter.judge(&layout, &record(&["1", "2016-07-01 10:00:00", "161.0", "132.0"]));
        assert!(matches!(float_ids, RowVerdict::Kept(_)));
    }

    #[test]
    fn coordinate_rows_use_both_regions() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let filter = RideFilter::new(&ctx, &settings(dir.path(), dir.path(), 10));
        let layout = coordinate_layout();
        let inside = record(&["2", "2014-01-01 00:00:00", "0.5", "0.5", "10.5", "10.5"]);
        assert!(matches!(filter.judge(&layout, &inside), RowVerdict::Kept(_)));
        let wrong_dropoff = record(&["2", "2014-01-01 00:00:00", "0.5", "0.5", "0.5", "0.5"]);
        assert_eq!(filter.judge(&layout, &wrong_dropoff), RowVerdict::Rejected);
        let text = record(&["2", "2014-01-01 00:00:00", "abc", "0.5", "10.5", "10.5"]);
        assert_eq!(filter.judge(&layout, &text), RowVerdict::Rejected);
    }

    #[test]
    fn missing_and_malformed_rows_are_dropped() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let filter = RideFilter::new(&ctx, &settings(dir.path(), dir.path(), 10));
        let layout = zone_layout();
        let short = record(&["1", "2016-07-01 10:00:00", "161"]);
        assert_eq!(filter.judge(&layout, &short), RowVerdict::Malformed);
        let empty_id = record(&["1", "2016-07-01 10:00:00", "", "132"]);
        assert_eq!(filter.judge(&layout, &empty_id), RowVerdict::Missing);
        let na_id = record(&["1", "2016-07-01 10:00:00", "161", "NaN"]);
        assert_eq!(filter.judge(&layout, &na_id), RowVerdict::Missing);
        let bad_time = record(&["1", "01/07/2016 10:00", "161", "132"]);
        assert_eq!(filter.judge(&layout, &bad_time), RowVerdict::Missing);
    }

    #[test]
    fn unparseable_timestamp_outside_selection_is_emptied() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let filter = RideFilter::new(&ctx, &settings(dir.path(), dir.path(), 10));
        let layout = CohortLayout::new(
            names(&["VendorID", "pickup_datetime", "dropoff_datetime", "PULocationID", "DOLocationID"]),
            names(&["dropoff_datetime", "PULocationID", "DOLocationID"]),
        );
        let row = record(&["1", "garbage", "2016-07-01 10:30:00", "161", "132"]);
        assert_eq!(
            filter.judge(&layout, &row),
            RowVerdict::Kept(record(&["1", "", "2016-07-01 10:30:00", "161", "132"]))
        );
    }

    #[test]
    fn filters_file_across_chunks_in_order() {
        let ctx = context();
        let data = tempfile::tempdir().unwrap();
        let result = tempfile::tempdir().unwrap();
        let out_dir = result.path().join("nested");
        let body = "\
VendorID,tpep_pickup_datetime,PULocationID,DOLocationID
1,2016-07-01 10:00:00,161,132
1,2016-07-01 10:05:00,132,161
2,2016-07-01 10:10:00,161,132
2,,161,132
2,2016-07-01 10:20:00,161
1,2016-07-01 10:25:00,161,132
";
        std::fs::write(data.path().join("yellow.csv"), body).unwrap();
        let filter = RideFilter::new(&ctx, &settings(data.path(), &out_dir, 2));
        let report = filter
            .filter_with_layout("yellow.csv", 1, &zone_layout())
            .unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.rows_read, 6);
        assert_eq!(report.rows_kept, 3);
        assert_eq!(report.rows_missing, 1);
        assert_eq!(report.rows_malformed, 1);

        let written = std::fs::read_to_string(out_dir.join("yellow.csv")).unwrap();
        assert_eq!(
            written,
            "\
VendorID,pickup_datetime,PULocationID,DOLocationID
1,2016-07-01 10:00:00,161,132
2,2016-07-01 10:10:00,161,132
1,2016-07-01 10:25:00,161,132
"
        );
    }

    #[test]
    fn no_matches_still_writes_header() {
        let ctx = context();
        let data = tempfile::tempdir().unwrap();
        let result = tempfile::tempdir().unwrap();
        std::fs::write(
            data.path().join("empty.csv"),
            "a,b,c,d\n1,2016-07-01 10:00:00,1,1\n",
        )
        .unwrap();
        let filter = RideFilter::new(&ctx, &settings(data.path(), result.path(), 10));
        let report = filter
            .filter_with_layout("empty.csv", 1, &zone_layout())
            .unwrap();
        assert_eq!(report.rows_kept, 0);
        let written = std::fs::read_to_string(result.path().join("empty.csv")).unwrap();
        assert_eq!(written, "VendorID,pickup_datetime,PULocationID,DOLocationID\n");
    }

    #[cfg(unix)]
    #[test]
    fn output_mode_matches_a_plainly_created_file() {
        use std::os::unix::fs::PermissionsExt;

        let ctx = context();
        let data = tempfile::tempdir().unwrap();
        let result = tempfile::tempdir().unwrap();
        std::fs::write(
            data.path().join("f.csv"),
            "a,b,c,d\n1,2016-07-01 10:00:00,161,132\n",
        )
        .unwrap();
        let filter = RideFilter::new(&ctx, &settings(data.path(), result.path(), 10));
        filter.filter_with_layout("f.csv", 1, &zone_layout()).unwrap();

        let plain = result.path().join("plain.csv");
        File::create(&plain).unwrap();
        let mode = |p: &std::path::Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&result.path().join("f.csv")), mode(&plain));
    }

    #[test]
    fn missing_input_is_a_file_access_error() {
        let ctx = context();
        let data = tempfile::tempdir().unwrap();
        let filter = RideFilter::new(&ctx, &settings(data.path(), data.path(), 10));
        let err = filter
            .filter_with_layout("absent.csv", 1, &zone_layout())
            .unwrap_err();
        assert!(matches!(err, FilterError::FileAccess { .. }));
        assert!(!filter.output_path("absent.csv").exists());
    }

    #[test]
    fn zone_id_parsing() {
        assert_eq!(parse_zone_id("161"), Some(161));
        assert_eq!(parse_zone_id(" 132.0 "), Some(132));
        assert_eq!(parse_zone_id("132.5"), None);
        assert_eq!(parse_zone_id("-1"), None);
        assert_eq!(parse_zone_id("JFK"), None);
    }

    #[test]
    fn missing_values() {
        assert!(is_missing(""));
        assert!(is_missing("  "));
        assert!(is_missing("NaN"));
        assert!(!is_missing("0"));
    }
}
