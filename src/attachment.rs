use anyhow::{Context, Result};
use tracing::instrument;

use crate::model::AttachmentDescriptor;
use crate::repository::ContentRepository;

/// Turns attachment ids into normalized image descriptors.
pub struct AttachmentResolver<'a> {
    content: &'a dyn ContentRepository,
}

impl<'a> AttachmentResolver<'a> {
    pub fn new(content: &'a dyn ContentRepository) -> Self {
        Self { content }
    }

    /// Resolve one attachment. Returns `None` when the attachment is unknown or
    /// has no URL; missing alt text and dimensions fall back to empty/zero.
    #[instrument(skip(self))]
    pub async fn resolve(&self, id: i64) -> Result<Option<AttachmentDescriptor>> {
        let meta = self
            .content
            .attachment(id)
            .await
            .with_context(|| format!("failed to read attachment {}", id))?;
        let Some(meta) = meta else {
            return Ok(None);
        };
        let Some(url) = meta.url.filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };
        let thumb_url = meta
            .thumb_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| url.clone());
        Ok(Some(AttachmentDescriptor {
            id,
            url,
            thumb_url,
            alt: meta.alt.unwrap_or_default(),
            width: meta.width.unwrap_or(0),
            height: meta.height.unwrap_or(0),
        }))
    }
}
