use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Multipart form field names used by the form client, kept verbatim.
pub const FIELD_TITLE: &str = "Titulo de la Subasta";
pub const FIELD_SELLER: &str = "Nombre del Vendedor";
pub const FIELD_STARTING_PRICE: &str = "Precio Inicial";
pub const FIELD_OFFER_TIER: &str = "Monto Minimo de Oferta";
pub const FIELD_IMAGES: &str = "images";

/// One auction submission as it comes off the wire. Missing form fields
/// arrive as empty strings; the publisher enforces the non-empty invariant
/// before any remote call.
#[derive(Debug, Clone, Default)]
pub struct SubmissionRequest {
    pub seller_name: String,
    pub title: String,
    pub starting_price: String,
    pub offer_tier: String,
    pub images: Vec<ImagePart>,
}

#[derive(Debug, Clone)]
pub struct ImagePart {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// The inbound-boundary response contract: `success` plus either the full
/// platform article record or a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuctionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CreateAuctionResponse {
    pub fn ok(article: Value) -> Self {
        Self {
            success: true,
            article: Some(article),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            article: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_response_omits_message() {
        let raw = serde_json::to_value(CreateAuctionResponse::ok(json!({"id": 1})))
            .expect("response json");
        assert_eq!(raw["success"], json!(true));
        assert!(raw.get("message").is_none());
        assert_eq!(raw["article"]["id"], json!(1));
    }

    #[test]
    fn error_response_omits_article() {
        let raw = serde_json::to_value(CreateAuctionResponse::error("boom")).expect("json");
        assert_eq!(raw["success"], json!(false));
        assert!(raw.get("article").is_none());
        assert_eq!(raw["message"], json!("boom"));
    }
}
