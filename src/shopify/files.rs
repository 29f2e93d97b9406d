use crate::shopify::client::{ShopifyApiError, ShopifyClient, UserError, join_user_errors};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

const FILE_CREATE: &str = r#"
mutation fileCreate($files: [FileCreateInput!]!) {
  fileCreate(files: $files) {
    files {
      id
      fileStatus
      ... on MediaImage {
        image {
          url
        }
      }
    }
    userErrors {
      field
      message
    }
  }
}
"#;

const FILE_STATUS: &str = r#"
query getFileStatus($id: ID!) {
  node(id: $id) {
    ... on MediaImage {
      id
      status
      image {
        url
      }
    }
  }
}
"#;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("file registration rejected: {0}")]
    Rejected(String),
    #[error("no files returned from registration")]
    Empty,
    #[error("media `{0}` not found during status poll")]
    NotFound(String),
    #[error("media processing failed")]
    ProcessingFailed,
    #[error("media ready but no image url present")]
    MissingImageUrl,
    #[error("media still unresolved after {attempts} polls")]
    Timeout { attempts: u32 },
    #[error(transparent)]
    Api(#[from] ShopifyApiError),
}

/// Processing state reported by the platform. `Ready` and `Failed` are
/// terminal; anything else keeps the poller going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaStatus {
    Processing,
    Ready,
    Failed,
    Other(String),
}

impl MediaStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("READY") => Self::Ready,
            Some("FAILED") => Self::Failed,
            Some("PROCESSING") | None => Self::Processing,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredMedia {
    pub id: String,
    pub status: MediaStatus,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReadyMedia {
    pub id: String,
    pub image_url: String,
}

/// Poll cadence and bound. The original flow waited forever; the bound keeps
/// a stuck asset from pinning a submission indefinitely.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

impl PollPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval = std::env::var("MEDIA_POLL_INTERVAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.interval);
        let max_attempts = std::env::var("MEDIA_POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(defaults.max_attempts);
        Self {
            interval,
            max_attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileCreatePayload {
    #[serde(rename = "fileCreate")]
    file_create: FileCreateResult,
}

#[derive(Debug, Deserialize)]
struct FileCreateResult {
    #[serde(default)]
    files: Vec<CreatedFile>,
    #[serde(rename = "userErrors", default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
    #[serde(rename = "fileStatus", default)]
    file_status: Option<String>,
    #[serde(default)]
    image: Option<ImageRef>,
}

#[derive(Debug, Deserialize)]
struct ImageRef {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NodePayload {
    #[serde(default)]
    node: Option<NodeFile>,
}

#[derive(Debug, Deserialize)]
struct NodeFile {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    image: Option<ImageRef>,
}

/// Register the staged resource as a managed media object.
pub async fn register_staged_media(
    client: &ShopifyClient,
    resource_url: &str,
    alt: &str,
) -> Result<RegisteredMedia, MediaError> {
    let variables = json!({
        "files": [{
            "alt": alt,
            "contentType": "IMAGE",
            "originalSource": resource_url,
        }],
    });

    let data = client.graphql(FILE_CREATE, variables).await?;
    let payload: FileCreatePayload = serde_json::from_value(data)
        .map_err(|err| MediaError::Api(ShopifyApiError::Contract(err.to_string())))?;

    if !payload.file_create.user_errors.is_empty() {
        return Err(MediaError::Rejected(join_user_errors(
            &payload.file_create.user_errors,
        )));
    }

    let file = payload
        .file_create
        .files
        .into_iter()
        .next()
        .ok_or(MediaError::Empty)?;

    Ok(RegisteredMedia {
        status: MediaStatus::parse(file.file_status.as_deref()),
        image_url: file.image.and_then(|image| image.url),
        id: file.id,
    })
}

/// Drive a registered media object to a terminal state. The platform is the
/// only source of truth: every cycle re-fetches authoritative status rather
/// than mutating it locally.
pub async fn await_media_ready(
    client: &ShopifyClient,
    media: RegisteredMedia,
    policy: &PollPolicy,
) -> Result<ReadyMedia, MediaError> {
    let mut media = media;
    let mut attempts = 0u32;
    loop {
        match media.status {
            MediaStatus::Ready => {
                let image_url = media.image_url.ok_or(MediaError::MissingImageUrl)?;
                return Ok(ReadyMedia {
                    id: media.id,
                    image_url,
                });
            }
            MediaStatus::Failed => return Err(MediaError::ProcessingFailed),
            MediaStatus::Processing | MediaStatus::Other(_) => {
                if attempts >= policy.max_attempts {
                    return Err(MediaError::Timeout { attempts });
                }
                attempts += 1;
                debug!(
                    target = "subasta.shopify",
                    media = %media.id,
                    attempt = attempts,
                    "media not ready yet"
                );
                sleep(policy.interval).await;
                media = fetch_media_status(client, &media.id).await?;
            }
        }
    }
}

async fn fetch_media_status(
    client: &ShopifyClient,
    id: &str,
) -> Result<RegisteredMedia, MediaError> {
    let data = client.graphql(FILE_STATUS, json!({ "id": id })).await?;
    let payload: NodePayload = serde_json::from_value(data)
        .map_err(|err| MediaError::Api(ShopifyApiError::Contract(err.to_string())))?;
    let node = payload
        .node
        .ok_or_else(|| MediaError::NotFound(id.to_string()))?;
    Ok(RegisteredMedia {
        status: MediaStatus::parse(node.status.as_deref()),
        image_url: node.image.and_then(|image| image.url),
        id: node.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_covers_terminal_and_transient() {
        assert_eq!(MediaStatus::parse(Some("READY")), MediaStatus::Ready);
        assert_eq!(MediaStatus::parse(Some("FAILED")), MediaStatus::Failed);
        assert_eq!(
            MediaStatus::parse(Some("PROCESSING")),
            MediaStatus::Processing
        );
        assert_eq!(MediaStatus::parse(None), MediaStatus::Processing);
        assert_eq!(
            MediaStatus::parse(Some("UPLOADED")),
            MediaStatus::Other("UPLOADED".into())
        );
    }

    #[test]
    fn file_create_payload_decodes_media_image() {
        let payload: FileCreatePayload = serde_json::from_value(json!({
            "fileCreate": {
                "files": [{
                    "id": "gid://shopify/MediaImage/1",
                    "fileStatus": "PROCESSING",
                    "image": null,
                }],
                "userErrors": [],
            },
        }))
        .expect("file create payload");
        let file = &payload.file_create.files[0];
        assert_eq!(file.id, "gid://shopify/MediaImage/1");
        assert_eq!(
            MediaStatus::parse(file.file_status.as_deref()),
            MediaStatus::Processing
        );
    }

    #[test]
    fn node_payload_null_means_not_found() {
        let payload: NodePayload =
            serde_json::from_value(json!({ "node": null })).expect("node payload");
        assert!(payload.node.is_none());
    }

    #[test]
    fn poll_policy_defaults_are_bounded() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 30);
    }

    #[tokio::test]
    async fn ready_without_url_is_a_contract_violation() {
        let client = ShopifyClient::new(crate::shopify::config::ShopifyConfig {
            store_domain: "unreachable.invalid".into(),
            access_token: "token".into(),
            blog_id: "1".into(),
            api_version: "2023-10".into(),
        });
        let media = RegisteredMedia {
            id: "gid://shopify/MediaImage/9".into(),
            status: MediaStatus::Ready,
            image_url: None,
        };
        let err = await_media_ready(&client, media, &PollPolicy::default())
            .await
            .expect_err("missing url must fail");
        assert!(matches!(err, MediaError::MissingImageUrl));
    }

    #[tokio::test]
    async fn failed_media_is_terminal_without_polling() {
        let client = ShopifyClient::new(crate::shopify::config::ShopifyConfig {
            store_domain: "unreachable.invalid".into(),
            access_token: "token".into(),
            blog_id: "1".into(),
            api_version: "2023-10".into(),
        });
        let media = RegisteredMedia {
            id: "gid://shopify/MediaImage/9".into(),
            status: MediaStatus::Failed,
            image_url: None,
        };
        let err = await_media_ready(&client, media, &PollPolicy::default())
            .await
            .expect_err("failed media must fail");
        assert!(matches!(err, MediaError::ProcessingFailed));
    }
}
