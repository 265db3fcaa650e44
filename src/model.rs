use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Text layout used for stored publish dates (`2020-01-01 10:00:00`).
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Publish,
    Draft,
    Private,
    Trash,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Publish => "publish",
            RecordStatus::Draft => "draft",
            RecordStatus::Private => "private",
            RecordStatus::Trash => "trash",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "publish" => Some(RecordStatus::Publish),
            "draft" => Some(RecordStatus::Draft),
            "private" => Some(RecordStatus::Private),
            "trash" => Some(RecordStatus::Trash),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Taxonomy {
    Category,
    PostTag,
}

impl Taxonomy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Taxonomy::Category => "category",
            Taxonomy::PostTag => "post_tag",
        }
    }

    pub fn parse_taxonomy(s: &str) -> Option<Self> {
        match s {
            "category" => Some(Taxonomy::Category),
            "post_tag" => Some(Taxonomy::PostTag),
            _ => None,
        }
    }
}

/// A publish timestamp in site-local time together with its UTC equivalent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishDate {
    pub local: NaiveDateTime,
    pub utc: DateTime<Utc>,
}

impl PublishDate {
    pub fn new(local: NaiveDateTime, utc: DateTime<Utc>) -> Self {
        Self { local, utc }
    }

    /// Derive the UTC form from a local time and the site's fixed offset.
    pub fn from_local(local: NaiveDateTime, offset: FixedOffset) -> Self {
        let utc = match offset.from_local_datetime(&local).single() {
            Some(dt) => dt.with_timezone(&Utc),
            None => Utc.from_utc_datetime(
                &(local - Duration::seconds(i64::from(offset.local_minus_utc()))),
            ),
        };
        Self { local, utc }
    }

    pub fn local_string(&self) -> String {
        self.local.format(DATE_FORMAT).to_string()
    }

    pub fn utc_string(&self) -> String {
        self.utc.naive_utc().format(DATE_FORMAT).to_string()
    }
}

/// A term in one of the site taxonomies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Term {
    pub id: i64,
    pub taxonomy: Taxonomy,
    pub name: String,
    pub slug: String,
}

/// Legacy gallery item assembled from the content store. Never mutated by the
/// converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub published: PublishDate,
    /// Raw value of the legacy gallery meta field, if present.
    pub gallery_payload: Option<String>,
    pub categories: Vec<i64>,
    pub tags: Vec<i64>,
    pub featured_image: Option<i64>,
}

/// Normalized view over one attachment's stored metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDescriptor {
    pub id: i64,
    pub url: String,
    pub thumb_url: String,
    pub alt: String,
    pub width: u32,
    pub height: u32,
}

/// Fields of a standard post produced by converting one source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecordDraft {
    /// Copied verbatim from the source; the reconciliation key.
    pub title: String,
    pub body: String,
    pub status: RecordStatus,
    pub published: PublishDate,
    pub categories: Vec<i64>,
    pub tags: Vec<i64>,
    pub featured_image: Option<i64>,
}

/// Window of source records processed by one batch step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchCursor {
    pub size: u32,
    pub offset: u32,
}

impl BatchCursor {
    pub fn new(size: u32, offset: u32) -> Self {
        Self { size, offset }
    }
}
