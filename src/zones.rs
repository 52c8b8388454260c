use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::config::ZoneSettings;
use crate::error::FilterError;

/// One row of taxi_zone_lookup.csv.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneLookupRow {
    #[serde(rename = "LocationID")]
    pub location_id: u32,
    #[serde(rename = "Borough", default)]
    pub borough: String,
    #[serde(rename = "Zone", default)]
    pub zone: String,
}

/// Taxi zone ids of the urban area (matched on borough name) and of the
/// airport (matched on zone name).
#[derive(Debug, Clone, Default)]
pub struct LocationSetIndex {
    urban_ids: HashSet<u32>,
    airport_ids: HashSet<u32>,
}

impl LocationSetIndex {
    /// Keywords match case-insensitively as substrings.
    pub fn from_rows<'a, I>(rows: I, urban_keyword: &str, airport_keyword: &str) -> Self
    where
        I: IntoIterator<Item = &'a ZoneLookupRow>,
    {
        let urban_keyword = urban_keyword.to_lowercase();
        let airport_keyword = airport_keyword.to_lowercase();
        let mut index = LocationSetIndex::default();
        for row in rows {
            if row.borough.to_lowercase().contains(&urban_keyword) {
                index.urban_ids.insert(row.location_id);
            }
            if row.zone.to_lowercase().contains(&airport_keyword) {
                index.airport_ids.insert(row.location_id);
            }
        }
        index
    }

    pub fn from_path(path: &Path, keywords: &ZoneSettings) -> Result<Self, FilterError> {
        let as_error = |e: csv::Error| FilterError::ZoneLookup {
            path: path.to_path_buf(),
            source: e,
        };
        let mut reader = csv::Reader::from_path(path).map_err(as_error)?;
        let rows = reader
            .deserialize::<ZoneLookupRow>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(as_error)?;
        let index = Self::from_rows(&rows, &keywords.urban_keyword, &keywords.airport_keyword);
        log::info!(
            "{} zones read from {}: {} urban, {} airport",
            rows.len(),
            path.display(),
            index.urban_ids.len(),
            index.airport_ids.len()
        );
        Ok(index)
    }

    pub fn is_urban(&self, id: u32) -> bool {
        self.urban_ids.contains(&id)
    }

    pub fn is_airport(&self, id: u32) -> bool {
        self.airport_ids.contains(&id)
    }

    pub fn is_trip_match(&self, pickup: u32, dropoff: u32) -> bool {
        self.is_urban(pickup) && self.is_airport(dropoff)
    }

    pub fn urban_ids(&self) -> &HashSet<u32> {
        &self.urban_ids
    }

    pub fn airport_ids(&self) -> &HashSet<u32> {
        &self.airport_ids
    }
}
