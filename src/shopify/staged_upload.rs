use crate::shopify::client::{ShopifyApiError, ShopifyClient, UserError, join_user_errors};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

const STAGED_UPLOADS_CREATE: &str = r#"
mutation stagedUploadsCreate($input: [StagedUploadInput!]!) {
  stagedUploadsCreate(input: $input) {
    stagedTargets {
      url
      resourceUrl
      parameters {
        name
        value
      }
    }
    userErrors {
      field
      message
    }
  }
}
"#;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staged upload rejected: {0}")]
    Rejected(String),
    #[error("no staged targets returned")]
    Empty,
    #[error(transparent)]
    Api(#[from] ShopifyApiError),
}

/// One-time upload target issued by the platform. The signed parameters must
/// be replayed verbatim and in order; the target is dropped after a single
/// upload attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct StagedTarget {
    pub url: String,
    #[serde(rename = "resourceUrl")]
    pub resource_url: String,
    #[serde(default)]
    pub parameters: Vec<StagedParameter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedParameter {
    pub name: String,
    pub value: String,
}

impl StagedTarget {
    /// Remote file name dictated by the signed `key` parameter.
    pub fn remote_file_name(&self) -> &str {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == "key")
            .map(|parameter| parameter.value.as_str())
            .unwrap_or("file")
    }
}

#[derive(Debug, Deserialize)]
struct StagedUploadsPayload {
    #[serde(rename = "stagedUploadsCreate")]
    staged_uploads_create: StagedUploadsResult,
}

#[derive(Debug, Deserialize)]
struct StagedUploadsResult {
    #[serde(rename = "stagedTargets", default)]
    staged_targets: Vec<StagedTarget>,
    #[serde(rename = "userErrors", default)]
    user_errors: Vec<UserError>,
}

/// Request exactly one upload target for an IMAGE resource.
pub async fn create_staged_upload(
    client: &ShopifyClient,
    file_name: &str,
    content_type: &str,
) -> Result<StagedTarget, StagingError> {
    let variables = json!({
        "input": [{
            "resource": "IMAGE",
            "filename": file_name,
            "mimeType": content_type,
            "httpMethod": "POST",
        }],
    });

    let data = client.graphql(STAGED_UPLOADS_CREATE, variables).await?;
    let payload: StagedUploadsPayload = serde_json::from_value(data)
        .map_err(|err| StagingError::Api(ShopifyApiError::Contract(err.to_string())))?;

    if !payload.staged_uploads_create.user_errors.is_empty() {
        return Err(StagingError::Rejected(join_user_errors(
            &payload.staged_uploads_create.user_errors,
        )));
    }

    let target = payload
        .staged_uploads_create
        .staged_targets
        .into_iter()
        .next()
        .ok_or(StagingError::Empty)?;

    debug!(
        target = "subasta.shopify",
        file = file_name,
        parameters = target.parameters.len(),
        "staged upload target issued"
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: serde_json::Value) -> StagedUploadsPayload {
        serde_json::from_value(raw).expect("staged uploads payload")
    }

    #[test]
    fn decodes_target_with_ordered_parameters() {
        let payload = decode(json!({
            "stagedUploadsCreate": {
                "stagedTargets": [{
                    "url": "https://storage.example.com/bucket",
                    "resourceUrl": "https://storage.example.com/bucket/tmp/abc.jpg",
                    "parameters": [
                        {"name": "key", "value": "tmp/abc.jpg"},
                        {"name": "policy", "value": "cG9saWN5"},
                        {"name": "signature", "value": "sig=="},
                    ],
                }],
                "userErrors": [],
            },
        }));
        let target = &payload.staged_uploads_create.staged_targets[0];
        assert_eq!(target.remote_file_name(), "tmp/abc.jpg");
        let names: Vec<&str> = target
            .parameters
            .iter()
            .map(|parameter| parameter.name.as_str())
            .collect();
        assert_eq!(names, vec!["key", "policy", "signature"]);
    }

    #[test]
    fn remote_file_name_defaults_without_key_parameter() {
        let target = StagedTarget {
            url: "https://storage.example.com".into(),
            resource_url: "https://storage.example.com/tmp".into(),
            parameters: vec![StagedParameter {
                name: "policy".into(),
                value: "cG9saWN5".into(),
            }],
        };
        assert_eq!(target.remote_file_name(), "file");
    }

    #[test]
    fn missing_targets_decode_as_empty() {
        let payload = decode(json!({
            "stagedUploadsCreate": {
                "userErrors": [{"field": null, "message": "quota exceeded"}],
            },
        }));
        assert!(payload.staged_uploads_create.staged_targets.is_empty());
        assert_eq!(
            join_user_errors(&payload.staged_uploads_create.user_errors),
            "quota exceeded"
        );
    }
}
