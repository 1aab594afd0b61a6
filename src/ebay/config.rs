use std::env;

const PROD_ROOT: &str = "https://api.ebay.com";
const SANDBOX_ROOT: &str = "https://api.sandbox.ebay.com";
const PROD_FINDING_URL: &str = "https://svcs.ebay.com/services/search/FindingService/v1";
const SANDBOX_FINDING_URL: &str = "https://svcs.sandbox.ebay.com/services/search/FindingService/v1";

/// Which eBay search API backs the market lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchApi {
    #[default]
    Browse,
    Finding,
}

impl SearchApi {
    pub fn from_raw(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "browse" => Some(Self::Browse),
            "finding" => Some(Self::Finding),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browse => "browse",
            Self::Finding => "finding",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EbayConfig {
    pub app_token: Option<String>,
    pub app_id: Option<String>,
    pub cert_id: Option<String>,
    pub marketplace_id: String,
    pub search_api: SearchApi,
    root: String,
    finding_url: String,
}

impl EbayConfig {
    pub fn from_env() -> Self {
        let sandbox = env::var("EBAY_ENV")
            .map(|value| value.trim().eq_ignore_ascii_case("SANDBOX"))
            .unwrap_or(false);
        let search_api = env::var("EBAY_SEARCH_API")
            .ok()
            .and_then(|value| SearchApi::from_raw(&value))
            .unwrap_or_default();
        let config = Self {
            app_token: non_empty_env("EBAY_APP_TOKEN"),
            app_id: non_empty_env("EBAY_APP_ID"),
            cert_id: non_empty_env("EBAY_CERT_ID"),
            marketplace_id: non_empty_env("EBAY_MARKETPLACE_ID")
                .unwrap_or_else(|| "EBAY_US".to_string()),
            search_api,
            root: if sandbox { SANDBOX_ROOT } else { PROD_ROOT }.to_string(),
            finding_url: if sandbox {
                SANDBOX_FINDING_URL
            } else {
                PROD_FINDING_URL
            }
            .to_string(),
        };
        match non_empty_env("EBAY_API_ROOT") {
            Some(root) => config.with_root(&root),
            None => config,
        }
    }

    /// Point every endpoint at `root`; used for sandboxes and local fakes.
    pub fn with_root(mut self, root: &str) -> Self {
        let root = root.trim_end_matches('/');
        self.root = root.to_string();
        self.finding_url = format!("{root}/services/search/FindingService/v1");
        self
    }

    pub fn oauth_token_url(&self) -> String {
        format!("{}/identity/v1/oauth2/token", self.root)
    }

    pub fn browse_search_url(&self) -> String {
        format!("{}/buy/browse/v1/item_summary/search", self.root)
    }

    pub fn finding_url(&self) -> &str {
        &self.finding_url
    }

    pub fn client_credentials(&self) -> Option<(&str, &str)> {
        Some((self.app_id.as_deref()?, self.cert_id.as_deref()?))
    }
}

impl Default for EbayConfig {
    fn default() -> Self {
        Self {
            app_token: None,
            app_id: None,
            cert_id: None,
            marketplace_id: "EBAY_US".to_string(),
            search_api: SearchApi::Browse,
            root: PROD_ROOT.to_string(),
            finding_url: PROD_FINDING_URL.to_string(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_api_parsing() {
        assert_eq!(SearchApi::from_raw(" Finding "), Some(SearchApi::Finding));
        assert_eq!(SearchApi::from_raw("BROWSE"), Some(SearchApi::Browse));
        assert_eq!(SearchApi::from_raw("trading"), None);
    }

    #[test]
    fn credentials_need_both_halves() {
        let mut config = EbayConfig {
            app_id: Some("app".into()),
            ..EbayConfig::default()
        };
        assert!(config.client_credentials().is_none());
        config.cert_id = Some("cert".into());
        assert_eq!(config.client_credentials(), Some(("app", "cert")));
    }

    #[test]
    fn root_override_rewrites_endpoints() {
        let config = EbayConfig::default().with_root("http://127.0.0.1:9000/");
        assert_eq!(
            config.oauth_token_url(),
            "http://127.0.0.1:9000/identity/v1/oauth2/token"
        );
        assert_eq!(
            config.browse_search_url(),
            "http://127.0.0.1:9000/buy/browse/v1/item_summary/search"
        );
        assert!(config.finding_url().starts_with("http://127.0.0.1:9000/services"));
    }
}
