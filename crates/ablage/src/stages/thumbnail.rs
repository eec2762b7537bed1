//! Thumbnail stage.
//!
//! Asks an external rendering service for a first-page preview. The request
//! carries a short-lived signed token so the service can download the
//! original from us without holding credentials. Guarded by
//! `thumbnail.enabled`.

use crate::core::config::{PipelineConfig, ThumbnailConfig};
use crate::plugins::{Plugin, Stage, StageContext, StageOutcome};
use crate::types::{BlobRef, Document, DocumentId, DocumentUpdate};
use crate::{AblageError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Signed, expiring grant to download one document's original.
///
/// Format: `base64url("<document id>:<expiry unix secs>") "." base64url(hmac)`.
#[derive(Debug, Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AblageError::configuration(format!("Invalid thumbnail signing secret: {}", e)))?;
        mac.update(payload);
        Ok(mac)
    }

    pub fn sign_at(&self, document_id: DocumentId, now: SystemTime) -> Result<String> {
        let expires = (now + self.ttl)
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AblageError::validation(format!("Clock before unix epoch: {}", e)))?
            .as_secs();
        let payload = format!("{}:{}", document_id, expires);
        let signature = self.mac(payload.as_bytes())?.finalize().into_bytes();

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    pub fn sign(&self, document_id: DocumentId) -> Result<String> {
        self.sign_at(document_id, SystemTime::now())
    }

    /// Check signature and expiry; returns the document the token grants.
    pub fn verify_at(&self, token: &str, now: SystemTime) -> Result<DocumentId> {
        let invalid = |reason: &str| AblageError::validation(format!("Invalid thumbnail token: {}", reason));

        let (payload, signature) = token.split_once('.').ok_or_else(|| invalid("malformed"))?;
        let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid("malformed payload"))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| invalid("malformed signature"))?;

        self.mac(&payload)?
            .verify_slice(&signature)
            .map_err(|_| invalid("bad signature"))?;

        let payload = String::from_utf8(payload).map_err(|_| invalid("malformed payload"))?;
        let (id, expires) = payload.rsplit_once(':').ok_or_else(|| invalid("malformed payload"))?;
        let expires: u64 = expires.parse().map_err(|_| invalid("malformed expiry"))?;
        let now = now
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AblageError::validation(format!("Clock before unix epoch: {}", e)))?
            .as_secs();
        if now > expires {
            return Err(invalid("expired"));
        }

        id.parse()
    }
}

/// What the rendering service needs to produce a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderRequest {
    pub token: String,
    pub document_id: DocumentId,
    pub download_url: String,
}

/// Thumbnail rendering collaborator; returns PNG bytes.
#[async_trait]
pub trait ThumbnailRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>>;
}

#[cfg(feature = "http")]
mod http {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct RenderResponse {
        image_url: String,
    }

    /// Posts the render request and downloads the image at the returned URL.
    pub struct HttpThumbnailRenderer {
        client: reqwest::Client,
        service_url: String,
    }

    impl HttpThumbnailRenderer {
        pub fn new(service_url: impl Into<String>, timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
                AblageError::configuration_with_source("Failed to create thumbnail HTTP client", e)
            })?;
            Ok(Self {
                client,
                service_url: service_url.into(),
            })
        }
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AblageError::external("thumbnail", body, Some(status.as_u16())))
    }

    #[async_trait]
    impl ThumbnailRenderer for HttpThumbnailRenderer {
        async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>> {
            let response = checked(self.client.post(&self.service_url).json(request).send().await?).await?;
            let rendered: RenderResponse = response.json().await?;

            let image = checked(self.client.get(&rendered.image_url).send().await?).await?;
            Ok(image.bytes().await?.to_vec())
        }
    }
}

#[cfg(feature = "http")]
pub use http::HttpThumbnailRenderer;

/// Blob key thumbnails are stored under.
pub fn thumbnail_blob(document_id: DocumentId) -> BlobRef {
    BlobRef::new(format!("thumbnails/{}.png", document_id))
}

struct Renderer {
    renderer: Arc<dyn ThumbnailRenderer>,
    signer: TokenSigner,
    download_base_url: String,
}

/// Renders and stores a first-page preview.
pub struct ThumbnailStage {
    renderer: Option<Renderer>,
}

impl ThumbnailStage {
    /// A stage that only logs that thumbnails are disabled.
    pub fn disabled() -> Self {
        Self { renderer: None }
    }

    pub fn new(renderer: Arc<dyn ThumbnailRenderer>, signer: TokenSigner, download_base_url: impl Into<String>) -> Self {
        Self {
            renderer: Some(Renderer {
                renderer,
                signer,
                download_base_url: download_base_url.into().trim_end_matches('/').to_string(),
            }),
        }
    }

    /// Build from `thumbnail`. An enabled section missing its secret, service
    /// or download URL is a configuration error.
    pub(crate) fn from_config(config: &PipelineConfig) -> Result<Arc<dyn Stage>> {
        let section = &config.thumbnail;
        if !section.enabled {
            return Ok(Arc::new(Self::disabled()));
        }

        let secret = section.resolve_signing_secret().ok_or_else(|| {
            AblageError::configuration(format!(
                "thumbnail.signing_secret (or ${}) is required when thumbnails are enabled",
                section.signing_secret_env
            ))
        })?;
        let download_base_url = section
            .download_base_url
            .clone()
            .ok_or_else(|| AblageError::configuration("thumbnail.download_base_url is required when thumbnails are enabled"))?;
        let renderer = Self::http_renderer(section)?;

        Ok(Arc::new(Self::new(
            renderer,
            TokenSigner::new(secret, Duration::from_secs(section.token_ttl_secs)),
            download_base_url,
        )))
    }

    #[cfg(feature = "http")]
    fn http_renderer(section: &ThumbnailConfig) -> Result<Arc<dyn ThumbnailRenderer>> {
        let url = section
            .service_url
            .clone()
            .ok_or_else(|| AblageError::configuration("thumbnail.service_url is required when thumbnails are enabled"))?;
        Ok(Arc::new(HttpThumbnailRenderer::new(
            url,
            Duration::from_secs(section.request_timeout_secs),
        )?))
    }

    #[cfg(not(feature = "http"))]
    fn http_renderer(_section: &ThumbnailConfig) -> Result<Arc<dyn ThumbnailRenderer>> {
        Err(AblageError::configuration(
            "thumbnails are enabled but the `http` feature is disabled",
        ))
    }
}

impl Plugin for ThumbnailStage {
    fn name(&self) -> &str {
        "thumbnail"
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Stage for ThumbnailStage {
    async fn process(&self, document: &Document, force: bool, ctx: &StageContext) -> Result<StageOutcome> {
        let Some(renderer) = &self.renderer else {
            tracing::warn!(document_id = %document.id, "Thumbnail generation is disabled (thumbnail.enabled = false)");
            return Ok(StageOutcome::skipped("thumbnails disabled"));
        };

        if !force && document.thumbnail.is_some() {
            return Ok(StageOutcome::skipped("thumbnail already rendered"));
        }

        let token = renderer.signer.sign(document.id)?;
        let request = RenderRequest {
            download_url: format!("{}/{}?token={}", renderer.download_base_url, document.id, token),
            token,
            document_id: document.id,
        };

        let image = renderer.renderer.render(&request).await?;
        if image.is_empty() {
            return Err(AblageError::external("thumbnail", "renderer returned an empty image", None));
        }

        let blob = thumbnail_blob(document.id);
        ctx.blobs.write(&blob, image).await?;
        Ok(StageOutcome::Updated(DocumentUpdate::new().thumbnail(blob)))
    }
}
