use crate::http::build_client;
use crate::shopify::config::ShopifyConfig;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

pub const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

#[derive(Debug, Error)]
pub enum ShopifyApiError {
    /// The structured endpoint answered with a non-empty `errors` list. The
    /// list is carried verbatim; the mutation must be treated as not applied.
    #[error("graphql errors: {errors}")]
    Protocol { errors: Value },
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response shape: {0}")]
    Contract(String),
}

/// Application-level error entry returned inside GraphQL mutation payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct UserError {
    #[serde(default)]
    #[allow(dead_code)]
    pub field: Option<Value>,
    pub message: String,
}

pub fn join_user_errors(errors: &[UserError]) -> String {
    errors
        .iter()
        .map(|err| err.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
pub struct ShopifyClient {
    http: Client,
    config: ShopifyConfig,
}

impl ShopifyClient {
    pub fn new(config: ShopifyConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn config(&self) -> &ShopifyConfig {
        &self.config
    }

    /// Structured query call. Returns the `data` payload; a non-empty
    /// `errors` array fails the whole call even when `data` is present.
    pub async fn graphql(&self, query: &str, variables: Value) -> Result<Value, ShopifyApiError> {
        let response = self
            .http
            .post(self.config.graphql_url())
            .header(ACCESS_TOKEN_HEADER, &self.config.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|err| ShopifyApiError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShopifyApiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let mut payload: Value = response
            .json()
            .await
            .map_err(|err| ShopifyApiError::Transport(err.to_string()))?;

        if let Some(errors) = payload.get("errors")
            && errors.as_array().is_none_or(|list| !list.is_empty())
        {
            return Err(ShopifyApiError::Protocol {
                errors: errors.clone(),
            });
        }

        debug!(target = "subasta.shopify", "graphql call ok");
        Ok(payload
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Resource call against the admin REST surface. `path` is relative to
    /// the versioned API root, e.g. `blogs/1/articles.json`.
    pub async fn rest(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value, ShopifyApiError> {
        let url = format!("{}/{path}", self.config.admin_base());
        let mut request = self
            .http
            .request(method, url)
            .header(ACCESS_TOKEN_HEADER, &self.config.access_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ShopifyApiError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShopifyApiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|err| ShopifyApiError::Transport(err.to_string()))
    }

    /// Startup smoke test: one read-only call so a bad token shows up in the
    /// logs immediately instead of on the first submission.
    pub async fn verify_credentials(&self) -> Result<(), ShopifyApiError> {
        self.rest("shop.json", Method::GET, None).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_join_messages() {
        let errors = vec![
            UserError {
                field: None,
                message: "filename is invalid".into(),
            },
            UserError {
                field: Some(json!(["input", 0, "mimeType"])),
                message: "unsupported mime type".into(),
            },
        ];
        assert_eq!(
            join_user_errors(&errors),
            "filename is invalid, unsupported mime type"
        );
    }

    #[test]
    fn protocol_error_displays_errors_verbatim() {
        let err = ShopifyApiError::Protocol {
            errors: json!([{"message": "Throttled"}]),
        };
        assert!(err.to_string().contains("Throttled"));
    }

    #[test]
    fn http_error_carries_status_and_body() {
        let err = ShopifyApiError::Http {
            status: 404,
            body: "Not Found".into(),
        };
        assert_eq!(err.to_string(), "HTTP 404: Not Found");
    }
}
