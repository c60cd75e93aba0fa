//! Image search by scraping a Bing image results page.
//!
//! Every result anchor (`a.iusc`) carries a JSON `m` attribute whose `murl`
//! field is the full-size image URL. The first hit that downloads wins.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use thesiskit_shared::{ImageSearch, ImagesConfig, Result, ThesisError};

/// Results pages are served differently to non-browser agents.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";

/// Hits tried before giving up on a query.
const MAX_CANDIDATES: usize = 3;

static RESULT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.iusc[m]").expect("result selector is valid"));

pub struct BingImageSearch {
    client: Client,
    endpoint: Url,
}

impl BingImageSearch {
    pub fn new(config: &ImagesConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            ThesisError::config(format!("invalid images endpoint '{}': {e}", config.endpoint))
        })?;
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ThesisError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ThesisError::Network(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ThesisError::Network(format!("{url}: HTTP {status}")));
        }
        Ok(response)
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>> {
        let bytes = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| ThesisError::Network(format!("{url}: body read failed: {e}")))?;
        if bytes.is_empty() {
            return Err(ThesisError::Network(format!("{url}: empty body")));
        }
        Ok(bytes.to_vec())
    }
}

/// Full-size image URLs on a results page, in page order.
pub fn extract_image_urls(html: &str) -> Vec<Url> {
    let doc = Html::parse_document(html);
    doc.select(&RESULT_SELECTOR)
        .filter_map(|anchor| anchor.value().attr("m"))
        .filter_map(|m| serde_json::from_str::<serde_json::Value>(m).ok())
        .filter_map(|meta| meta.get("murl")?.as_str().map(String::from))
        .filter_map(|murl| Url::parse(&murl).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .collect()
}

#[async_trait]
impl ImageSearch for BingImageSearch {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<u8>> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("form", "HDRSC2");

        let html = self
            .get(&url)
            .await?
            .text()
            .await
            .map_err(|e| ThesisError::Network(format!("{url}: body read failed: {e}")))?;

        let candidates = extract_image_urls(&html);
        debug!(candidates = candidates.len(), "parsed results page");

        for candidate in candidates.iter().take(MAX_CANDIDATES) {
            match self.download(candidate).await {
                Ok(bytes) => {
                    debug!(url = %candidate, size = bytes.len(), "downloaded image");
                    return Ok(bytes);
                }
                Err(e) => warn!(url = %candidate, error = %e, "image download failed, trying next"),
            }
        }

        Err(ThesisError::NotFound {
            query: query.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn results_page(urls: &[String]) -> String {
        let anchors: String = urls
            .iter()
            .map(|u| format!(r#"<a class="iusc" m="{{&quot;murl&quot;:&quot;{u}&quot;}}">x</a>"#))
            .collect();
        format!("<html><body><div>{anchors}</div></body></html>")
    }

    fn search(server: &MockServer) -> BingImageSearch {
        BingImageSearch::new(&ImagesConfig {
            enabled: true,
            endpoint: format!("{}/images/search", server.uri()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn extracts_murl_in_page_order() {
        let html = results_page(&[
            "https://a.example/1.jpg".into(),
            "not a url".into(),
            "https://b.example/2.png".into(),
        ]);
        let urls: Vec<String> = extract_image_urls(&html)
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(urls, vec!["https://a.example/1.jpg", "https://b.example/2.png"]);
    }

    #[tokio::test]
    async fn downloads_first_working_hit() {
        let server = MockServer::start().await;
        let page = results_page(&[
            format!("{}/missing.jpg", server.uri()),
            format!("{}/panel.png", server.uri()),
        ]);
        Mock::given(method("GET"))
            .and(path("/images/search"))
            .and(query_param("q", "solar panel"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/panel.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG bytes".to_vec()))
            .mount(&server)
            .await;

        let bytes = search(&server).search("solar panel").await.unwrap();
        assert_eq!(bytes, b"\x89PNG bytes");
    }

    #[tokio::test]
    async fn no_results_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/images/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let err = search(&server).search("nothing").await.unwrap_err();
        assert!(matches!(err, ThesisError::NotFound { query } if query == "nothing"));
    }

    #[tokio::test]
    async fn results_page_failure_is_a_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = search(&server).search("x").await.unwrap_err();
        assert!(matches!(err, ThesisError::Network(_)));
    }
}
