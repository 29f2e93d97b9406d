use crate::models::SubmissionRequest;
use serde::Serialize;

pub const METAFIELD_NAMESPACE: &str = "auction";
pub const METAFIELD_SELLER: &str = "Nombre del Vendedor";
pub const METAFIELD_STARTING_PRICE: &str = "Precio Inicial";
pub const METAFIELD_OFFER_TIER: &str = "Monto Minimo de Oferta";

const TEXT_TYPE: &str = "single_line_text_field";
const INTEGER_TYPE: &str = "number_integer";

/// Image resolved through the staged-upload pipeline, in input order. The
/// first one becomes the article's cover image.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedImage {
    pub url: String,
    pub original_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticlePayload {
    pub title: String,
    pub body_html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    pub metafields: Vec<MetafieldEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetafieldEntry {
    pub namespace: &'static str,
    pub key: &'static str,
    pub value: MetafieldValue,
    #[serde(rename = "type")]
    pub value_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MetafieldValue {
    Text(String),
    Integer(i64),
}

/// Assemble the final article payload once every image has resolved. Pure
/// and deterministic: no I/O, ordering taken from the resolved list.
pub fn build_article_payload(
    request: &SubmissionRequest,
    starting_price: i64,
    images: &[ResolvedImage],
) -> ArticlePayload {
    let images_html = images
        .iter()
        .map(|image| {
            format!(
                r#"<p><img src="{}" alt="Auction Image" style="max-width:100%;"></p>"#,
                image.url
            )
        })
        .collect::<Vec<_>>()
        .join("");

    let body_html = format!(
        r#"
  <p style="font-size: 0.95em; color: #555;"><em>Publicado por: {seller}</em></p>

  <div style="display: flex; gap: 1em;">
    <p><strong>Precio Inicial:</strong> ${price}</p>
    <p><strong>Monto Mínimo de Oferta:</strong> {tier}</p>
  </div>

  <div style="display: flex; flex-wrap: wrap; gap: 10px; margin-top: 10px;">
    {images_html}
  </div>
"#,
        seller = request.seller_name,
        price = starting_price,
        tier = request.offer_tier,
    );

    ArticlePayload {
        title: request.title.clone(),
        body_html,
        cover_image: images.first().map(|image| image.url.clone()),
        metafields: vec![
            MetafieldEntry {
                namespace: METAFIELD_NAMESPACE,
                key: METAFIELD_SELLER,
                value: MetafieldValue::Text(request.seller_name.clone()),
                value_type: TEXT_TYPE,
            },
            MetafieldEntry {
                namespace: METAFIELD_NAMESPACE,
                key: METAFIELD_STARTING_PRICE,
                value: MetafieldValue::Integer(starting_price),
                value_type: INTEGER_TYPE,
            },
            MetafieldEntry {
                namespace: METAFIELD_NAMESPACE,
                key: METAFIELD_OFFER_TIER,
                value: MetafieldValue::Text(request.offer_tier.clone()),
                value_type: TEXT_TYPE,
            },
        ],
    }
}
