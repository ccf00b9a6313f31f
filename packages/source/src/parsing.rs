//! Shared parsing utilities for upstream tables and API rows.

use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;

use crate::SourceError;
use crate::admin::fold_accents;

/// Markers upstream tables use for "not available".
const NOT_AVAILABLE: &[&str] = &["n.d.", "n.d", "nd", "na", "n/a", "-"];

/// Parses an ACLED-style `YYYY-MM-DD` date (a trailing time part is
/// ignored).
#[must_use]
pub fn parse_event_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let date_part = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Parses lat/lng from optional string fields. Returns `None` if missing,
/// unparseable, out of range, or exactly zero.
#[must_use]
pub fn parse_lat_lng_str(lat: Option<&str>, lng: Option<&str>) -> Option<(f64, f64)> {
    let latitude = lat?.trim().parse::<f64>().ok()?;
    let longitude = lng?.trim().parse::<f64>().ok()?;
    parse_lat_lng_f64(Some(latitude), Some(longitude))
}

/// Validates lat/lng. Returns `None` if missing, non-finite, out of range,
/// or exactly zero.
#[must_use]
pub fn parse_lat_lng_f64(lat: Option<f64>, lng: Option<f64>) -> Option<(f64, f64)> {
    let latitude = lat?;
    let longitude = lng?;
    if !latitude.is_finite() || !longitude.is_finite() {
        return None;
    }
    if latitude == 0.0 || longitude == 0.0 {
        return None;
    }
    if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
        return None;
    }
    Some((latitude, longitude))
}

/// Parses a percentage leniently.
///
/// Not-available markers and blanks are missing, a comma decimal separator
/// is accepted, and the result is clamped to `[0, 100]`.
#[must_use]
pub fn parse_percent(s: &str) -> Option<f64> {
    let s = s.trim().to_lowercase();
    if s.is_empty() || NOT_AVAILABLE.contains(&s.as_str()) {
        return None;
    }
    let value = s.trim_end_matches('%').trim().replace(',', ".").parse::<f64>().ok()?;
    value.is_finite().then(|| value.clamp(0.0, 100.0))
}

/// Parses a non-negative count that may be written as a float
/// (`"1234.0"`), rounding to the nearest integer. Negative values become
/// zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_count(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<u64>() {
        return Some(n);
    }
    let value = s.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(value.max(0.0).round() as u64)
}

/// Normalizes a table header: trimmed, accent-folded, lowercased, with
/// spaces replaced by underscores (`"Clave de la Institución"` →
/// `"clave_de_la_institucion"`).
#[must_use]
pub fn normalize_header(header: &str) -> String {
    fold_accents(header.trim()).to_lowercase().replace(' ', "_")
}

/// A CSV table opened from disk with its normalized headers.
pub struct Table {
    reader: csv::Reader<File>,
    headers: Vec<String>,
    label: String,
}

impl Table {
    /// Opens a CSV file. Cells are trimmed and rows may have differing
    /// lengths.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Csv`] if the file can't be opened or has no
    /// header row.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.iter().map(normalize_header).collect();
        Ok(Self {
            reader,
            headers,
            label: path.display().to_string(),
        })
    }

    /// Index of the first present column among `candidates`.
    #[must_use]
    pub fn find(&self, candidates: &[&str]) -> Option<usize> {
        candidates
            .iter()
            .find_map(|c| self.headers.iter().position(|h| *h == normalize_header(c)))
    }

    /// Index of a required column.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Format`] naming the file and the
    /// accepted column names if none is present.
    pub fn require(&self, candidates: &[&str]) -> Result<usize, SourceError> {
        self.find(candidates).ok_or_else(|| SourceError::Format {
            message: format!(
                "{} has no column named {}",
                self.label,
                candidates.join(" or ")
            ),
        })
    }

    /// File name for log messages.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Iterates data rows.
    pub fn rows(&mut self) -> csv::StringRecordsIter<'_, File> {
        self.reader.records()
    }
}
