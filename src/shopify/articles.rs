use crate::compose::{ArticlePayload, MetafieldEntry};
use crate::shopify::client::{ShopifyApiError, ShopifyClient};
use reqwest::Method;
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Clone)]
pub struct CreatedArticle {
    pub id: i64,
    pub record: Value,
}

fn article_body(payload: &ArticlePayload) -> Value {
    let mut article = json!({
        "title": payload.title,
        "body_html": payload.body_html,
        "published": true,
    });
    if let Some(cover) = &payload.cover_image {
        article["image"] = json!({ "src": cover });
    }
    json!({ "article": article })
}

fn metafield_body(entry: &MetafieldEntry) -> Value {
    json!({
        "metafield": {
            "namespace": entry.namespace,
            "key": entry.key,
            "value": entry.value,
            "type": entry.value_type,
        },
    })
}

/// Create the published blog article. The cover image is attached only when
/// present; the key is absent otherwise.
pub async fn create_article(
    client: &ShopifyClient,
    payload: &ArticlePayload,
) -> Result<CreatedArticle, ShopifyApiError> {
    let blog_id = urlencoding::encode(&client.config().blog_id).into_owned();
    let path = format!("blogs/{blog_id}/articles.json");
    let record = client
        .rest(&path, Method::POST, Some(&article_body(payload)))
        .await?;

    let id = record
        .get("article")
        .and_then(|article| article.get("id"))
        .and_then(Value::as_i64)
        .ok_or_else(|| ShopifyApiError::Contract("article id missing from response".into()))?;

    info!(target = "subasta.shopify", article_id = id, "article created");
    Ok(CreatedArticle { id, record })
}

/// Attach one metafield entry to an already-created article.
pub async fn create_article_metafield(
    client: &ShopifyClient,
    article_id: i64,
    entry: &MetafieldEntry,
) -> Result<Value, ShopifyApiError> {
    let path = format!("articles/{article_id}/metafields.json");
    client
        .rest(&path, Method::POST, Some(&metafield_body(entry)))
        .await
}
