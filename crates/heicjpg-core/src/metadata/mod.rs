//! Capture-time and orientation normalization for the embedded EXIF block.
//!
//! The source container is loaded into four groups (primary, EXIF, GPS,
//! thumbnail), the primary `DateTime` and `Orientation` fields are replaced,
//! and the result is serialized back to TIFF-structured EXIF bytes ready to be
//! wrapped in a JPEG APP1 segment.

pub mod date;

use std::io::Cursor;

use chrono::NaiveDateTime;
use exif::experimental::Writer;
use exif::{Context, Exif, Field, In, Reader, Tag, Value};

use crate::error::MetadataError;

/// Orientation value meaning "no rotation or flip".
pub const IDENTITY_ORIENTATION: u16 = 1;

/// Placeholder written when the source carried no metadata at all, so the
/// serialized block is never just the two mandatory fields of an otherwise
/// empty IFD.
pub const PLACEHOLDER_SOFTWARE: &str = concat!("heicjpg ", env!("CARGO_PKG_VERSION"));

/// Largest EXIF payload a JPEG APP1 segment can carry after the length field
/// and the `Exif\0\0` identifier.
pub const MAX_EXIF_LEN: usize = u16::MAX as usize - 2 - 6;

/// Tags describing the container layout itself; the writer regenerates them.
const STRUCTURAL_TAGS: [Tag; 9] = [
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
    Tag::StripOffsets,
    Tag::StripByteCounts,
    Tag::TileOffsets,
    Tag::TileByteCounts,
];

/// EXIF fields grouped the way they are laid out in the container.
#[derive(Debug, Clone, Default)]
pub struct ExifGroups {
    /// IFD0 TIFF fields
    pub primary: Vec<Field>,
    /// EXIF sub-IFD fields (interop included)
    pub exif: Vec<Field>,
    /// GPS sub-IFD fields
    pub gps: Vec<Field>,
    /// IFD1 fields, kept only together with the thumbnail image
    pub thumbnail: Vec<Field>,
    /// Embedded JPEG thumbnail
    pub thumbnail_jpeg: Option<Vec<u8>>,
}

impl ExifGroups {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
            && self.exif.is_empty()
            && self.gps.is_empty()
            && self.thumbnail.is_empty()
            && self.thumbnail_jpeg.is_none()
    }

    /// Split a parsed container into groups, dropping layout tags.
    pub fn from_exif(exif: &Exif) -> Self {
        let mut groups = ExifGroups::default();

        for field in exif.fields() {
            if STRUCTURAL_TAGS.contains(&field.tag) {
                continue;
            }
            // the writer cannot serialize values of unknown type
            if let Value::Unknown(typ, count, _) = field.value {
                tracing::debug!(
                    "Dropping EXIF field {} of unknown type {} ({} values)",
                    field.tag,
                    typ,
                    count
                );
                continue;
            }
            match (field.ifd_num, field.tag.context()) {
                (In::PRIMARY, Context::Tiff) => groups.primary.push(field.clone()),
                (In::PRIMARY, Context::Exif | Context::Interop) => groups.exif.push(field.clone()),
                (In::PRIMARY, Context::Gps) => groups.gps.push(field.clone()),
                (In::THUMBNAIL, Context::Tiff) => groups.thumbnail.push(field.clone()),
                _ => tracing::debug!("Dropping EXIF field {} in {}", field.tag, field.ifd_num),
            }
        }

        groups.thumbnail_jpeg = thumbnail_jpeg(exif);
        if groups.thumbnail_jpeg.is_none() && !groups.thumbnail.is_empty() {
            tracing::debug!("Dropping thumbnail IFD without recoverable JPEG data");
            groups.thumbnail.clear();
        }

        groups
    }

    /// Replace (or add) a field in the primary group.
    pub fn set_primary(&mut self, tag: Tag, value: Value) {
        self.primary.retain(|f| f.tag != tag);
        self.primary.push(Field {
            tag,
            ifd_num: In::PRIMARY,
            value,
        });
    }

    pub fn primary_field(&self, tag: Tag) -> Option<&Field> {
        self.primary.iter().find(|f| f.tag == tag)
    }

    fn fields(&self, with_thumbnail: bool) -> impl Iterator<Item = &Field> {
        let thumbnail: &[Field] = if with_thumbnail { &self.thumbnail } else { &[] };
        self.primary
            .iter()
            .chain(&self.exif)
            .chain(&self.gps)
            .chain(thumbnail)
    }
}

fn thumbnail_jpeg(exif: &Exif) -> Option<Vec<u8>> {
    let offset = exif
        .get_field(Tag::JPEGInterchangeFormat, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    let len = exif
        .get_field(Tag::JPEGInterchangeFormatLength, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    exif.buf().get(offset..offset.checked_add(len)?).map(<[u8]>::to_vec)
}

/// Load the EXIF container from any file layout kamadak-exif understands
/// (JPEG, HEIF, PNG, WebP, TIFF).
pub fn load_exif(bytes: &[u8]) -> Result<Exif, MetadataError> {
    match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => Ok(exif),
        Err(exif::Error::NotFound(_)) => Err(MetadataError::Missing),
        Err(err) => Err(MetadataError::Parse(err)),
    }
}

/// Metadata to embed in the converted file.
#[derive(Debug, Clone)]
pub struct NormalizedMetadata {
    pub capture_time: NaiveDateTime,
    /// False when the capture time is the wall clock at conversion time
    pub capture_time_from_source: bool,
    pub groups: ExifGroups,
    little_endian: bool,
}

impl NormalizedMetadata {
    /// Serialize the groups back to TIFF-structured EXIF bytes.
    ///
    /// The thumbnail is dropped if it would push the block past what a single
    /// JPEG APP1 segment can hold.
    pub fn to_exif_bytes(&self) -> Result<Vec<u8>, exif::Error> {
        let bytes = self.serialize(true)?;
        if bytes.len() <= MAX_EXIF_LEN {
            return Ok(bytes);
        }
        if self.groups.thumbnail_jpeg.is_some() {
            tracing::debug!("EXIF block too large ({} bytes), dropping thumbnail", bytes.len());
            let bytes = self.serialize(false)?;
            if bytes.len() <= MAX_EXIF_LEN {
                return Ok(bytes);
            }
        }
        Err(exif::Error::TooBig("EXIF block exceeds a JPEG APP1 segment"))
    }

    /// Like [`to_exif_bytes`](Self::to_exif_bytes), but a source block that
    /// cannot be written back is replaced by a minimal one carrying only the
    /// capture time, the identity orientation and the placeholder `Software`.
    pub fn to_exif_bytes_or_minimal(&self) -> Result<Vec<u8>, exif::Error> {
        match self.to_exif_bytes() {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                tracing::warn!("Source metadata cannot be written back ({}), keeping timestamp only", err);
                self.minimal().to_exif_bytes()
            }
        }
    }

    fn minimal(&self) -> NormalizedMetadata {
        let mut meta = normalize_groups(ExifGroups::default(), Some(self.capture_time), self.little_endian);
        meta.capture_time_from_source = self.capture_time_from_source;
        meta
    }

    fn serialize(&self, with_thumbnail: bool) -> Result<Vec<u8>, exif::Error> {
        let mut writer = Writer::new();
        let mut fields: Vec<&Field> = self.groups.fields(with_thumbnail).collect();
        fields.sort_by_key(|f| f.tag.number());
        for field in fields {
            writer.push_field(field);
        }
        if let (true, Some(jpeg)) = (with_thumbnail, &self.groups.thumbnail_jpeg) {
            writer.set_jpeg(jpeg, In::THUMBNAIL);
        }

        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, self.little_endian)?;
        Ok(buf.into_inner())
    }
}

/// Derive the metadata for a converted image from the raw source file bytes.
///
/// Never fails: an unreadable or absent container starts from empty groups and
/// the capture time falls back to the current local time.
pub fn normalize(source: &[u8]) -> NormalizedMetadata {
    let loaded = match load_exif(source) {
        Ok(exif) => Some(exif),
        Err(MetadataError::Missing) => {
            tracing::debug!("Source has no EXIF container");
            None
        }
        Err(err) => {
            tracing::warn!("Ignoring unreadable EXIF container: {}", err);
            None
        }
    };

    let source_time = loaded.as_ref().and_then(date::capture_time);
    let little_endian = loaded.as_ref().is_some_and(Exif::little_endian);
    let groups = loaded.as_ref().map(ExifGroups::from_exif).unwrap_or_default();

    normalize_groups(groups, source_time, little_endian)
}

fn normalize_groups(
    mut groups: ExifGroups,
    source_time: Option<NaiveDateTime>,
    little_endian: bool,
) -> NormalizedMetadata {
    let had_metadata = !groups.is_empty();
    let capture_time_from_source = source_time.is_some();
    let capture_time = source_time.unwrap_or_else(|| chrono::Local::now().naive_local());

    groups.set_primary(
        Tag::DateTime,
        Value::Ascii(vec![date::format_exif_datetime(&capture_time).into_bytes()]),
    );
    groups.set_primary(Tag::Orientation, Value::Short(vec![IDENTITY_ORIENTATION]));
    if !had_metadata {
        groups.set_primary(
            Tag::Software,
            Value::Ascii(vec![PLACEHOLDER_SOFTWARE.as_bytes().to_vec()]),
        );
    }

    NormalizedMetadata {
        capture_time,
        capture_time_from_source,
        groups,
        little_endian,
    }
}
