use anyhow::{Context, Result};
use tracing::{instrument, warn};

use crate::attachment::AttachmentResolver;
use crate::gallery_block::{GalleryBlockEncoder, UniqueIdSource};
use crate::legacy::{self, LegacyPayloadError};
use crate::model::{RecordStatus, SourceRecord, TargetRecordDraft};
use crate::repository::ContentRepository;

/// Why a source record produced no draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The record has no legacy gallery field at all.
    MissingGalleryData,
    /// The legacy gallery field does not decode to a list.
    MalformedGalleryData(LegacyPayloadError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    Draft(TargetRecordDraft),
    Skip(SkipReason),
}

/// Term ids the converter needs to compose the draft's categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryTerms {
    pub destination: i64,
    pub default_category: Option<i64>,
}

pub struct RecordConverter<'a> {
    resolver: AttachmentResolver<'a>,
    encoder: GalleryBlockEncoder<'a>,
    terms: CategoryTerms,
}

impl<'a> RecordConverter<'a> {
    pub fn new(
        content: &'a dyn ContentRepository,
        ids: &'a dyn UniqueIdSource,
        terms: CategoryTerms,
    ) -> Self {
        Self {
            resolver: AttachmentResolver::new(content),
            encoder: GalleryBlockEncoder::new(ids),
            terms,
        }
    }

    #[instrument(skip_all, fields(source_id = source.id))]
    pub async fn convert(&self, source: &SourceRecord) -> Result<Conversion> {
        let Some(payload) = source.gallery_payload.as_deref() else {
            return Ok(Conversion::Skip(SkipReason::MissingGalleryData));
        };
        let attachment_ids = match legacy::attachment_ids(payload) {
            Ok(ids) => ids,
            Err(err) => return Ok(Conversion::Skip(SkipReason::MalformedGalleryData(err))),
        };

        let mut images = Vec::with_capacity(attachment_ids.len());
        for attachment_id in attachment_ids {
            match self.resolver.resolve(attachment_id).await? {
                Some(image) => images.push(image),
                None => warn!(
                    source_id = source.id,
                    attachment_id, "attachment has no URL; dropped from gallery"
                ),
            }
        }

        let block = self.encoder.encode(&images);
        let markup = block
            .to_markup()
            .context("failed to serialize gallery block")?;

        Ok(Conversion::Draft(TargetRecordDraft {
            title: source.title.clone(),
            body: format!("{}\n\n{}", source.body, markup),
            status: RecordStatus::Publish,
            published: source.published,
            categories: compose_categories(&source.categories, self.terms),
            tags: source.tags.clone(),
            featured_image: source.featured_image,
        }))
    }
}

/// Source categories without the default term, followed by the destination
/// term, each id at most once and in first-seen order.
pub fn compose_categories(source: &[i64], terms: CategoryTerms) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(source.len() + 1);
    for id in source
        .iter()
        .copied()
        .chain(std::iter::once(terms.destination))
    {
        if Some(id) == terms.default_category || out.contains(&id) {
            continue;
        }
        out.push(id);
    }
    out
}
