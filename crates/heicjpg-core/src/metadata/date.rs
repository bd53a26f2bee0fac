use chrono::NaiveDateTime;
use exif::{Exif, Field, In, Tag, Value};

/// EXIF datetime layout, used for both parsing and writing.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Tags consulted for the capture time, best first.
const DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

/// Extract the capture time from parsed EXIF data.
/// EXIF datetimes have no timezone info - they are local time as-is.
pub fn capture_time(exif: &Exif) -> Option<NaiveDateTime> {
    DATE_TAGS
        .iter()
        .filter_map(|tag| exif.get_field(*tag, In::PRIMARY))
        .find_map(field_datetime)
}

fn field_datetime(field: &Field) -> Option<NaiveDateTime> {
    let Value::Ascii(ref parts) = field.value else {
        return None;
    };
    let raw = std::str::from_utf8(parts.first()?).ok()?;
    parse_exif_datetime(raw)
}

/// Parse `YYYY:MM:DD HH:MM:SS`, tolerating the `-`, `/` and `.` date separators
/// some writers emit.
pub fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let cleaned = s
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .replace(['-', '/', '\\', '.'], ":");

    NaiveDateTime::parse_from_str(&cleaned, EXIF_DATETIME_FORMAT).ok()
}

pub fn format_exif_datetime(dt: &NaiveDateTime) -> String {
    dt.format(EXIF_DATETIME_FORMAT).to_string()
}
