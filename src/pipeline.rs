use crate::compose::{ArticlePayload, ResolvedImage, build_article_payload};
use crate::models::{
    FIELD_OFFER_TIER, FIELD_SELLER, FIELD_STARTING_PRICE, FIELD_TITLE, ImagePart, StageReport,
    SubmissionRequest,
};
use crate::shopify::articles::{self, CreatedArticle};
use crate::shopify::client::{ShopifyApiError, ShopifyClient};
use crate::shopify::config::ShopifyConfig;
use crate::shopify::files::{
    MediaError, PollPolicy, ReadyMedia, await_media_ready, register_staged_media,
};
use crate::shopify::staged_upload::{StagingError, create_staged_upload};
use crate::shopify::upload::{UploadError, upload_to_staged_target};
use serde::Serialize;
use serde_json::{Value, json};
use std::{future::Future, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Drives one submission end to end: validation, the sequential per-image
/// staged-upload pipeline, article composition and creation, then metafield
/// attachment. A fresh `run` owns everything for its submission; nothing is
/// shared across submissions.
#[derive(Clone)]
pub struct Publisher {
    shopify: ShopifyClient,
    poll: PollPolicy,
}

impl Publisher {
    pub fn new(shopify: ShopifyClient, poll: PollPolicy) -> Self {
        Self { shopify, poll }
    }

    pub fn from_env() -> Self {
        Self::new(
            ShopifyClient::new(ShopifyConfig::from_env()),
            PollPolicy::from_env(),
        )
    }

    pub fn client(&self) -> &ShopifyClient {
        &self.shopify
    }

    pub async fn run(&self, request: SubmissionRequest) -> Result<PublishReceipt, PublishError> {
        let mut stages = Vec::new();
        let starting_price = validate(&request)?;

        let mut resolved = Vec::with_capacity(request.images.len());
        for image in &request.images {
            let ready = self.publish_image(image, &mut stages).await?;
            resolved.push(ResolvedImage {
                url: ready.image_url,
                original_name: image.file_name.clone(),
            });
        }
        if request.images.is_empty() {
            info!(target = "subasta.pipeline", "no images attached; article will have no cover");
        }

        let payload: ArticlePayload = self
            .capture_stage("compose_article", &mut stages, async {
                let payload = build_article_payload(&request, starting_price, &resolved);
                let output = json!({
                    "images": resolved.len(),
                    "cover_present": payload.cover_image.is_some(),
                    "metafields": payload.metafields.len(),
                });
                Ok(StageOutcome::new(payload, output))
            })
            .await?;

        let created: CreatedArticle = self
            .capture_stage("create_article", &mut stages, async {
                let created = articles::create_article(&self.shopify, &payload)
                    .await
                    .map_err(|source| PublishError::ArticleCreate { source })?;
                let output = json!({ "article_id": created.id });
                Ok(StageOutcome::new(created, output))
            })
            .await?;

        self.capture_stage("attach_metafields", &mut stages, async {
            for entry in &payload.metafields {
                articles::create_article_metafield(&self.shopify, created.id, entry)
                    .await
                    .map_err(|source| PublishError::PartialPublish {
                        article_id: created.id,
                        article: created.record.clone(),
                        key: entry.key,
                        source,
                    })?;
            }
            Ok(StageOutcome::new(
                (),
                json!({ "attached": payload.metafields.len() }),
            ))
        })
        .await?;

        info!(
            target = "subasta.pipeline",
            article_id = created.id,
            images = resolved.len(),
            "auction published"
        );

        Ok(PublishReceipt {
            article_id: created.id,
            article: created.record,
            stages,
        })
    }

    /// Negotiate, upload, register and poll one image. The returned media
    /// carries the resolved serving URL.
    async fn publish_image(
        &self,
        image: &ImagePart,
        stages: &mut Vec<StageReport>,
    ) -> Result<ReadyMedia, PublishError> {
        let target = self
            .capture_stage("stage_upload", stages, async {
                let target =
                    create_staged_upload(&self.shopify, &image.file_name, &image.content_type)
                        .await
                        .map_err(|source| PublishError::Staging {
                            file: image.file_name.clone(),
                            source,
                        })?;
                let output = json!({
                    "file": image.file_name,
                    "parameters": target.parameters.len(),
                });
                Ok(StageOutcome::new(target, output))
            })
            .await?;

        self.capture_stage("upload_asset", stages, async {
            upload_to_staged_target(&target, image.bytes.clone())
                .await
                .map_err(|source| PublishError::Upload {
                    file: image.file_name.clone(),
                    source,
                })?;
            Ok(StageOutcome::new(
                (),
                json!({ "file": image.file_name, "bytes": image.bytes.len() }),
            ))
        })
        .await?;

        let registered = self
            .capture_stage("register_media", stages, async {
                let media =
                    register_staged_media(&self.shopify, &target.resource_url, &image.file_name)
                        .await
                        .map_err(|source| media_failure(&image.file_name, source))?;
                let output = json!({ "file": image.file_name, "media_id": media.id });
                Ok(StageOutcome::new(media, output))
            })
            .await?;

        self.capture_stage("await_media", stages, async {
            let ready = await_media_ready(&self.shopify, registered, &self.poll)
                .await
                .map_err(|source| media_failure(&image.file_name, source))?;
            let output = json!({
                "file": image.file_name,
                "media_id": ready.id,
                "url": ready.image_url,
            });
            Ok(StageOutcome::new(ready, output))
        })
        .await
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PublishError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PublishError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub article_id: i64,
    pub article: Value,
    pub stages: Vec<StageReport>,
}

#[derive(Debug)]
struct StageOutcome<T> {
    value: T,
    output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<String> },
    #[error("field `Precio Inicial` must be a whole number, got `{value}`")]
    InvalidPrice { value: String },
    #[error("staged upload negotiation failed for `{file}`: {source}")]
    Staging {
        file: String,
        #[source]
        source: StagingError,
    },
    #[error("image upload failed for `{file}`: {source}")]
    Upload {
        file: String,
        #[source]
        source: UploadError,
    },
    #[error("media registration failed for `{file}`: {source}")]
    Registration {
        file: String,
        #[source]
        source: MediaError,
    },
    #[error("media processing failed for `{file}`")]
    Processing { file: String },
    #[error("media for `{file}` became ready without an image url")]
    IncompleteAsset { file: String },
    #[error("media for `{file}` still unresolved after {attempts} polls")]
    PollTimeout { file: String, attempts: u32 },
    #[error("article creation failed: {source}")]
    ArticleCreate {
        #[source]
        source: ShopifyApiError,
    },
    #[error("article {article_id} created but metafield `{key}` failed: {source}")]
    PartialPublish {
        article_id: i64,
        article: Value,
        key: &'static str,
        #[source]
        source: ShopifyApiError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishErrorKind {
    InvalidInput,
    Internal,
}

impl PublishError {
    /// Input and per-image pipeline failures map to client errors; anything
    /// after article creation starts is server-side.
    pub fn kind(&self) -> PublishErrorKind {
        match self {
            Self::Validation { .. }
            | Self::InvalidPrice { .. }
            | Self::Staging { .. }
            | Self::Upload { .. }
            | Self::Registration { .. }
            | Self::Processing { .. }
            | Self::IncompleteAsset { .. }
            | Self::PollTimeout { .. } => PublishErrorKind::InvalidInput,
            Self::ArticleCreate { .. } | Self::PartialPublish { .. } => PublishErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::InvalidPrice { .. } => "validate",
            Self::Staging { .. } => "stage_upload",
            Self::Upload { .. } => "upload_asset",
            Self::Registration { .. } => "register_media",
            Self::Processing { .. } | Self::IncompleteAsset { .. } | Self::PollTimeout { .. } => {
                "await_media"
            }
            Self::ArticleCreate { .. } => "create_article",
            Self::PartialPublish { .. } => "attach_metafields",
        }
    }
}

/// Check the four required scalar fields and the price format before any
/// remote call is made. Returns the parsed starting price.
fn validate(request: &SubmissionRequest) -> Result<i64, PublishError> {
    let mut missing = Vec::new();
    if request.title.trim().is_empty() {
        missing.push(FIELD_TITLE);
    }
    if request.seller_name.trim().is_empty() {
        missing.push(FIELD_SELLER);
    }
    if request.starting_price.trim().is_empty() {
        missing.push(FIELD_STARTING_PRICE);
    }
    if request.offer_tier.trim().is_empty() {
        missing.push(FIELD_OFFER_TIER);
    }
    if !missing.is_empty() {
        warn!(
            target = "subasta.pipeline",
            missing = ?missing,
            "submission rejected before any remote call"
        );
        return Err(PublishError::Validation {
            missing: missing.iter().map(|field| field.to_string()).collect(),
        });
    }

    let price = &request.starting_price;
    if !price.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(PublishError::InvalidPrice {
            value: price.clone(),
        });
    }
    price.parse::<i64>().map_err(|_| PublishError::InvalidPrice {
        value: price.clone(),
    })
}

fn media_failure(file: &str, err: MediaError) -> PublishError {
    match err {
        MediaError::ProcessingFailed => PublishError::Processing {
            file: file.to_string(),
        },
        MediaError::MissingImageUrl => PublishError::IncompleteAsset {
            file: file.to_string(),
        },
        MediaError::Timeout { attempts } => PublishError::PollTimeout {
            file: file.to_string(),
            attempts,
        },
        other => PublishError::Registration {
            file: file.to_string(),
            source: other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::post,
    };
    use std::{sync::Arc, time::Duration};
    use tokio::sync::Mutex;

    fn submission(images: &[&str]) -> SubmissionRequest {
        SubmissionRequest {
            seller_name: "Ana".into(),
            title: "Vintage Lamp".into(),
            starting_price: "100".into(),
            offer_tier: "5 Pesos".into(),
            images: images
                .iter()
                .map(|name| ImagePart {
                    file_name: name.to_string(),
                    content_type: "image/jpeg".into(),
                    bytes: vec![0xFF, 0xD8, 0xFF],
                })
                .collect(),
        }
    }

    #[test]
    fn validate_lists_every_missing_field() {
        let err = validate(&SubmissionRequest::default()).expect_err("empty submission");
        let PublishError::Validation { missing } = &err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(
            missing,
            &vec![
                FIELD_TITLE.to_string(),
                FIELD_SELLER.to_string(),
                FIELD_STARTING_PRICE.to_string(),
                FIELD_OFFER_TIER.to_string(),
            ]
        );
        assert_eq!(err.kind(), PublishErrorKind::InvalidInput);
    }

    #[test]
    fn validate_rejects_non_integer_prices() {
        for bad in ["100.50", "abc", "12,5", "-3", " 100"] {
            let mut request = submission(&[]);
            request.starting_price = bad.into();
            let err = validate(&request).expect_err("price must be rejected");
            assert!(matches!(err, PublishError::InvalidPrice { .. }), "{bad}");
            assert!(err.to_string().contains("Precio Inicial"));
        }
    }

    #[test]
    fn validate_parses_the_price() {
        assert_eq!(validate(&submission(&[])).expect("valid"), 100);
    }

    #[test]
    fn error_kinds_split_client_and_server_failures() {
        let processing = PublishError::Processing {
            file: "img1.jpg".into(),
        };
        assert_eq!(processing.kind(), PublishErrorKind::InvalidInput);
        assert_eq!(processing.stage(), "await_media");

        let partial = PublishError::PartialPublish {
            article_id: 987,
            article: json!({}),
            key: "Precio Inicial",
            source: ShopifyApiError::Http {
                status: 500,
                body: "boom".into(),
            },
        };
        assert_eq!(partial.kind(), PublishErrorKind::Internal);
        assert!(partial.to_string().contains("987"));
    }

    #[tokio::test]
    async fn validation_failure_never_touches_the_network() {
        // Unroutable host: reaching the network would hang or error out.
        let publisher = test_publisher("https://unreachable.invalid");
        let mut request = submission(&["img1.jpg"]);
        request.starting_price = "100.50".into();
        let err = publisher.run(request).await.expect_err("invalid price");
        assert!(matches!(err, PublishError::InvalidPrice { .. }));
    }

    // ---- end-to-end runs against an in-process stand-in platform ----

    #[derive(Clone, Default)]
    struct FakeState {
        base: String,
        fail_media: bool,
        processing_first: bool,
        fail_metafields: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    async fn fake_graphql(State(state): State<FakeState>, Json(body): Json<Value>) -> Json<Value> {
        let query = body["query"].as_str().unwrap_or_default();
        if query.contains("stagedUploadsCreate") {
            let filename = body["variables"]["input"][0]["filename"]
                .as_str()
                .unwrap_or("file")
                .to_string();
            state.calls.lock().await.push(format!("staged:{filename}"));
            Json(json!({ "data": { "stagedUploadsCreate": {
                "stagedTargets": [{
                    "url": format!("{}/upload", state.base),
                    "resourceUrl": format!("{}/staged/{filename}", state.base),
                    "parameters": [
                        { "name": "key", "value": format!("tmp/{filename}") },
                        { "name": "policy", "value": "cG9saWN5" },
                    ],
                }],
                "userErrors": [],
            }}}))
        } else if query.contains("fileCreate") {
            let alt = body["variables"]["files"][0]["alt"]
                .as_str()
                .unwrap_or("file")
                .to_string();
            state.calls.lock().await.push(format!("register:{alt}"));
            let id = format!("gid://shopify/MediaImage/{alt}");
            let file = if state.fail_media {
                json!({ "id": id, "fileStatus": "FAILED" })
            } else if state.processing_first {
                json!({ "id": id, "fileStatus": "PROCESSING" })
            } else {
                json!({
                    "id": id,
                    "fileStatus": "READY",
                    "image": { "url": format!("https://cdn.example.com/{alt}") },
                })
            };
            Json(json!({ "data": { "fileCreate": { "files": [file], "userErrors": [] }}}))
        } else {
            let id = body["variables"]["id"].as_str().unwrap_or_default().to_string();
            let alt = id.rsplit('/').next().unwrap_or("file").to_string();
            state.calls.lock().await.push(format!("poll:{alt}"));
            Json(json!({ "data": { "node": {
                "id": id,
                "status": "READY",
                "image": { "url": format!("https://cdn.example.com/{alt}") },
            }}}))
        }
    }

    async fn fake_upload(State(state): State<FakeState>) -> StatusCode {
        state.calls.lock().await.push("upload".into());
        StatusCode::NO_CONTENT
    }

    async fn fake_create_article(
        State(state): State<FakeState>,
        Path(blog_id): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        state.calls.lock().await.push(format!("article:{blog_id}"));
        let mut article = body["article"].clone();
        article["id"] = json!(987);
        Json(json!({ "article": article }))
    }

    async fn fake_create_metafield(
        State(state): State<FakeState>,
        Path(article_id): Path<i64>,
        Json(body): Json<Value>,
    ) -> Response {
        let key = body["metafield"]["key"].as_str().unwrap_or_default().to_string();
        state
            .calls
            .lock()
            .await
            .push(format!("metafield:{article_id}:{key}"));
        if state.fail_metafields {
            (StatusCode::INTERNAL_SERVER_ERROR, "metafield boom").into_response()
        } else {
            Json(json!({ "metafield": body["metafield"] })).into_response()
        }
    }

    async fn spawn_platform(
        fail_media: bool,
        processing_first: bool,
        fail_metafields: bool,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake platform");
        let addr = listener.local_addr().expect("local addr");
        let base = format!("http://{addr}");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let state = FakeState {
            base: base.clone(),
            fail_media,
            processing_first,
            fail_metafields,
            calls: calls.clone(),
        };
        let app = Router::new()
            .route("/admin/api/2023-10/graphql.json", post(fake_graphql))
            .route("/upload", post(fake_upload))
            .route(
                "/admin/api/2023-10/blogs/{blog_id}/articles.json",
                post(fake_create_article),
            )
            .route(
                "/admin/api/2023-10/articles/{article_id}/metafields.json",
                post(fake_create_metafield),
            )
            .with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake platform serve");
        });
        (base, calls)
    }

    fn test_publisher(base: &str) -> Publisher {
        let config = ShopifyConfig {
            store_domain: base.to_string(),
            access_token: "shpat_test".into(),
            blog_id: "42".into(),
            api_version: "2023-10".into(),
        };
        Publisher::new(
            ShopifyClient::new(config),
            PollPolicy {
                interval: Duration::from_millis(10),
                max_attempts: 5,
            },
        )
    }

    #[tokio::test]
    async fn publishes_two_images_with_cover_and_metafields() {
        let (base, calls) = spawn_platform(false, false, false).await;
        let publisher = test_publisher(&base);

        let receipt = publisher
            .run(submission(&["img1.jpg", "img2.png"]))
            .await
            .expect("publish");

        assert_eq!(receipt.article_id, 987);
        let body_html = receipt.article["article"]["body_html"]
            .as_str()
            .expect("body html");
        assert_eq!(body_html.matches("<img ").count(), 2);
        assert_eq!(
            receipt.article["article"]["image"]["src"],
            json!("https://cdn.example.com/img1.jpg")
        );

        let names: Vec<&str> = receipt.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "stage_upload",
                "upload_asset",
                "register_media",
                "await_media",
                "stage_upload",
                "upload_asset",
                "register_media",
                "await_media",
                "compose_article",
                "create_article",
                "attach_metafields",
            ]
        );

        let calls = calls.lock().await;
        assert_eq!(calls.iter().filter(|c| c.starts_with("metafield:987")).count(), 3);
        assert_eq!(calls.iter().filter(|c| *c == "upload").count(), 2);
        let first = calls.iter().position(|c| c == "staged:img1.jpg").expect("img1");
        let second = calls.iter().position(|c| c == "staged:img2.png").expect("img2");
        assert!(first < second);
    }

    #[tokio::test]
    async fn poller_resolves_media_that_starts_processing() {
        let (base, calls) = spawn_platform(false, true, false).await;
        let publisher = test_publisher(&base);

        let receipt = publisher
            .run(submission(&["img1.jpg"]))
            .await
            .expect("publish after polling");

        assert_eq!(receipt.article_id, 987);
        let calls = calls.lock().await;
        assert!(calls.iter().any(|c| c == "poll:img1.jpg"));
    }

    #[tokio::test]
    async fn failed_media_aborts_and_names_the_file() {
        let (base, calls) = spawn_platform(true, false, false).await;
        let publisher = test_publisher(&base);

        let err = publisher
            .run(submission(&["img1.jpg", "img2.png"]))
            .await
            .expect_err("processing failure");

        assert!(matches!(err, PublishError::Processing { ref file } if file == "img1.jpg"));
        assert!(err.to_string().contains("img1.jpg"));

        let calls = calls.lock().await;
        assert!(!calls.iter().any(|c| c.starts_with("article:")), "no article");
        assert!(!calls.iter().any(|c| c.starts_with("staged:img2")), "second image skipped");
    }

    #[tokio::test]
    async fn metafield_failure_reports_partial_publish_with_article_id() {
        let (base, calls) = spawn_platform(false, false, true).await;
        let publisher = test_publisher(&base);

        let err = publisher
            .run(submission(&["img1.jpg"]))
            .await
            .expect_err("metafield failure");

        let PublishError::PartialPublish {
            article_id,
            ref article,
            key,
            ..
        } = err
        else {
            panic!("expected partial publish, got {err:?}");
        };
        assert_eq!(article_id, 987);
        assert_eq!(key, "Nombre del Vendedor");
        assert_eq!(article["article"]["id"], json!(987));
        assert_eq!(err.kind(), PublishErrorKind::Internal);

        let calls = calls.lock().await;
        assert!(calls.iter().any(|c| c.starts_with("article:42")));
    }

    #[tokio::test]
    async fn zero_image_submission_publishes_without_cover() {
        let (base, calls) = spawn_platform(false, false, false).await;
        let publisher = test_publisher(&base);

        let receipt = publisher.run(submission(&[])).await.expect("publish");

        assert_eq!(receipt.article_id, 987);
        assert!(receipt.article["article"].get("image").is_none());
        let body_html = receipt.article["article"]["body_html"]
            .as_str()
            .expect("body html");
        assert_eq!(body_html.matches("<img ").count(), 0);

        let calls = calls.lock().await;
        assert!(!calls.iter().any(|c| c.starts_with("staged:")));
    }
}
