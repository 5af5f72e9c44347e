//! Content rendering and media resolution
//!
//! Both are collaborators of the dispatcher: a renderer turns a job into final
//! post text plus an optional media reference, and a resolver turns that
//! reference into a publicly fetchable URL. Resolved media is released through
//! [`MediaResolver::cleanup`] once the job reaches `published` or `failed`.

use async_trait::async_trait;

use crate::db::Database;
use crate::error::PublishError;
use crate::types::{CampaignPost, ContentType};

/// Final post text for one job
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedContent {
    pub text: String,
    /// Unresolved media reference (URL, storage key, ...)
    pub media_ref: Option<String>,
}

/// Media reference resolved to a fetchable URL
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub url: String,
    /// Resolver-specific handle needed to release the resource
    pub handle: Option<String>,
}

#[async_trait]
pub trait ContentRenderer: Send + Sync {
    /// Render the text for `post` on its target platform
    ///
    /// # Errors
    ///
    /// Errors are classified like adapter errors: a missing item is
    /// `content_rejected`, a storage hiccup `transient_network`.
    async fn render(&self, post: &CampaignPost) -> Result<RenderedContent, PublishError>;
}

#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, media_ref: &str) -> Result<ResolvedMedia, PublishError>;

    /// Release anything `resolve` allocated
    async fn cleanup(&self, media: &ResolvedMedia) -> crate::Result<()>;
}

/// Renders posts from the `catalog_items` table
///
/// Content posts lead with the item blurb; sales posts carry the title and the
/// purchase link.
#[derive(Clone)]
pub struct CatalogRenderer {
    db: Database,
}

impl CatalogRenderer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ContentRenderer for CatalogRenderer {
    async fn render(&self, post: &CampaignPost) -> Result<RenderedContent, PublishError> {
        let item = self
            .db
            .get_catalog_item(&post.item_id)
            .await
            .map_err(|e| PublishError::transient_network(format!("catalog lookup failed: {}", e)))?
            .ok_or_else(|| {
                PublishError::content_rejected(format!("catalog item {} not found", post.item_id))
            })?;

        let text = match post.content_type {
            ContentType::Content if !item.blurb.trim().is_empty() => item.blurb.trim().to_string(),
            ContentType::Content => item.title.clone(),
            ContentType::Sales => match &item.link {
                Some(link) => format!("{}\n{}", item.title, link),
                None => item.title.clone(),
            },
        };

        Ok(RenderedContent {
            text,
            media_ref: item.media_ref,
        })
    }
}

/// Accepts http(s) references unchanged; anything else is unsupported
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughResolver;

#[async_trait]
impl MediaResolver for PassthroughResolver {
    async fn resolve(&self, media_ref: &str) -> Result<ResolvedMedia, PublishError> {
        let media_ref = media_ref.trim();
        if media_ref.starts_with("https://") || media_ref.starts_with("http://") {
            Ok(ResolvedMedia {
                url: media_ref.to_string(),
                handle: None,
            })
        } else {
            Err(PublishError::unsupported_media(format!(
                "media reference '{}' is not a public URL",
                media_ref
            )))
        }
    }

    async fn cleanup(&self, _media: &ResolvedMedia) -> crate::Result<()> {
        Ok(())
    }
}
