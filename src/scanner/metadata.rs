use chrono::{Local, NaiveDate, NaiveDateTime};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

use crate::db::{Location, TIMESTAMP_FORMAT};

/// What the catalog keeps from a file's EXIF block.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoMetadata {
    /// `YYYY-MM-DDTHH:MM:SS`
    pub taken_at: String,
    pub location: Option<Location>,
}

/// Read capture time and GPS position from `path`.
///
/// Never fails: a file without usable EXIF gets the current local time and
/// no location.
pub fn extract_metadata(path: &Path) -> PhotoMetadata {
    let exif = match read_exif(path) {
        Ok(exif) => exif,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No EXIF data, using import time");
            return PhotoMetadata {
                taken_at: now(),
                location: None,
            };
        }
    };

    let taken_at = [exif::Tag::DateTimeOriginal, exif::Tag::DateTime]
        .into_iter()
        .find_map(|tag| exif_datetime(&exif, tag))
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(now);

    PhotoMetadata {
        taken_at,
        location: gps_location(&exif),
    }
}

fn read_exif(path: &Path) -> Result<exif::Exif, exif::Error> {
    let file = File::open(path)?;
    let mut bufreader = BufReader::new(file);
    exif::Reader::new().read_from_container(&mut bufreader)
}

fn now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn exif_datetime(exif: &exif::Exif, tag: exif::Tag) -> Option<NaiveDateTime> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    let exif::Value::Ascii(ref parts) = field.value else {
        return None;
    };
    let dt = exif::DateTime::from_ascii(parts.first()?).ok()?;
    NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?.and_hms_opt(
        dt.hour as u32,
        dt.minute as u32,
        dt.second as u32,
    )
}

fn gps_location(exif: &exif::Exif) -> Option<Location> {
    let lat = gps_coordinate(exif, exif::Tag::GPSLatitude, exif::Tag::GPSLatitudeRef, 'S')?;
    let lon = gps_coordinate(exif, exif::Tag::GPSLongitude, exif::Tag::GPSLongitudeRef, 'W')?;
    Some(Location { lat, lon })
}

/// Signed decimal degrees; `negative_ref` is the hemisphere letter that flips the sign.
fn gps_coordinate(
    exif: &exif::Exif,
    value_tag: exif::Tag,
    ref_tag: exif::Tag,
    negative_ref: char,
) -> Option<f64> {
    let value = exif.get_field(value_tag, exif::In::PRIMARY)?;
    let reference = exif.get_field(ref_tag, exif::In::PRIMARY)?;

    let exif::Value::Rational(ref dms) = value.value else {
        return None;
    };
    if dms.len() < 3 || dms[..3].iter().any(|r| r.denom == 0) {
        return None;
    }

    let decimal = dms_to_decimal(dms[0].to_f64(), dms[1].to_f64(), dms[2].to_f64());
    let reference = reference.display_value().to_string();
    Some(if reference.contains(negative_ref) { -decimal } else { decimal })
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}
