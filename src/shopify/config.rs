use std::env;

/// Connection settings for the commerce platform. Built once at startup and
/// handed to `ShopifyClient::new`; nothing in the crate reads the token from
/// the environment after this point.
#[derive(Debug, Clone)]
pub struct ShopifyConfig {
    pub store_domain: String,
    pub access_token: String,
    pub blog_id: String,
    pub api_version: String,
}

impl ShopifyConfig {
    pub fn from_env() -> Self {
        Self {
            store_domain: env::var("SHOPIFY_STORE").unwrap_or_default(),
            access_token: env::var("SHOPIFY_ACCESS_TOKEN").unwrap_or_default(),
            blog_id: env::var("SHOPIFY_BLOG_ID").unwrap_or_default(),
            api_version: env::var("SHOPIFY_API_VERSION").unwrap_or_else(|_| "2023-10".to_string()),
        }
    }

    /// Root of the admin API. `store_domain` is normally a bare
    /// `*.myshopify.com` host; a full `http(s)://` origin is accepted so the
    /// client can be pointed at a local stand-in.
    pub fn admin_base(&self) -> String {
        let origin = if self.store_domain.starts_with("http://")
            || self.store_domain.starts_with("https://")
        {
            self.store_domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.store_domain)
        };
        format!("{origin}/admin/api/{}", self.api_version)
    }

    pub fn graphql_url(&self) -> String {
        format!("{}/graphql.json", self.admin_base())
    }
}
