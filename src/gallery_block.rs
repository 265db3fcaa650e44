//! Typed gallery block attributes and their embeddable markup form.
//!
//! The fragment is a self-closing block comment consumed by the front-end
//! gallery renderer:
//!
//! ```text
//! <!-- wp:kadence/advancedgallery {"uniqueID":"…","ids":[11],"imagesDynamic":[…],"kbVersion":2} /-->
//! ```
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::AttachmentDescriptor;

pub const BLOCK_FORMAT_VERSION: u32 = 2;

const OPEN_PREFIX: &str = "<!-- wp:kadence/advancedgallery ";
const CLOSE_SUFFIX: &str = " /-->";

#[derive(Debug, Error)]
pub enum BlockDecodeError {
    #[error("fragment is not a gallery block")]
    NotAGalleryBlock,
    #[error("invalid block attributes: {0}")]
    Attributes(#[from] serde_json::Error),
}

/// Source of fresh block identifiers.
pub trait UniqueIdSource: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random identifiers; never repeats in practice.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl UniqueIdSource for RandomIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// One image entry as the renderer expects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GalleryImage {
    pub id: i64,
    pub link: String,
    pub alt: String,
    pub url: String,
    pub thumb_url: String,
    pub light_url: String,
    pub width: u32,
    pub height: u32,
}

impl From<&AttachmentDescriptor> for GalleryImage {
    fn from(d: &AttachmentDescriptor) -> Self {
        Self {
            id: d.id,
            link: d.url.clone(),
            alt: d.alt.clone(),
            url: d.url.clone(),
            thumb_url: d.thumb_url.clone(),
            light_url: d.url.clone(),
            width: d.width,
            height: d.height,
        }
    }
}

/// Block attributes; field order is the serialized order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GalleryBlockPayload {
    #[serde(rename = "uniqueID")]
    pub unique_id: String,
    pub ids: Vec<i64>,
    #[serde(rename = "imagesDynamic")]
    pub images_dynamic: Vec<GalleryImage>,
    #[serde(rename = "kbVersion")]
    pub kb_version: u32,
}

impl GalleryBlockPayload {
    /// Render the embeddable markup fragment.
    pub fn to_markup(&self) -> Result<String, serde_json::Error> {
        let attrs = serde_json::to_string(self)?;
        Ok(format!("{}{}{}", OPEN_PREFIX, escape_attributes(&attrs), CLOSE_SUFFIX))
    }
}

/// Builds gallery payloads, drawing a fresh identifier for every call.
pub struct GalleryBlockEncoder<'a> {
    ids: &'a dyn UniqueIdSource,
}

impl<'a> GalleryBlockEncoder<'a> {
    pub fn new(ids: &'a dyn UniqueIdSource) -> Self {
        Self { ids }
    }

    pub fn encode(&self, images: &[AttachmentDescriptor]) -> GalleryBlockPayload {
        GalleryBlockPayload {
            unique_id: self.ids.next_id(),
            ids: images.iter().map(|d| d.id).collect(),
            images_dynamic: images.iter().map(GalleryImage::from).collect(),
            kb_version: BLOCK_FORMAT_VERSION,
        }
    }
}

/// Keep attribute JSON from terminating the surrounding comment.
fn escape_attributes(json: &str) -> String {
    json.replace("--", "\\u002d\\u002d")
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
}

/// Parse the first gallery block fragment found in `text`.
pub fn decode(text: &str) -> Result<GalleryBlockPayload, BlockDecodeError> {
    let start = text
        .find(OPEN_PREFIX)
        .ok_or(BlockDecodeError::NotAGalleryBlock)?;
    let rest = &text[start + OPEN_PREFIX.len()..];
    let end = rest
        .find(CLOSE_SUFFIX)
        .ok_or(BlockDecodeError::NotAGalleryBlock)?;
    Ok(serde_json::from_str(&rest[..end])?)
}
