//! Web search backends that feed the identifier extractor.
//!
//! Two backends are built in:
//! - [`SerperSearch`]: Serper-compatible JSON API (needs an API key)
//! - [`HtmlSearch`]: scrapes a DuckDuckGo-style HTML results page

use std::time::Duration;

use async_trait::async_trait;
use prospector_shared::{AppConfig, ProspectorError, Result, search_api_key};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::extractor::IdentifierSet;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("Prospector/", env!("CARGO_PKG_VERSION"));

/// One organic search result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

impl SearchHit {
    /// All scrapeable text of the hit, for identifier extraction.
    pub fn text(&self) -> String {
        format!("{}\n{}\n{}", self.title, self.snippet, self.url)
    }
}

/// A source of search results.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short identifier for logs.
    fn id(&self) -> &'static str;

    /// Run one query.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// Build the backend selected by `search.provider`.
pub fn search_provider_from_config(config: &AppConfig) -> Result<Box<dyn SearchProvider>> {
    let search = &config.search;
    let timeout = Duration::from_secs(search.timeout_secs);
    match search.provider.as_str() {
        "serper" => {
            let key = search_api_key(config)?;
            Ok(Box::new(SerperSearch::new(
                &search.endpoint,
                key,
                search.results_per_query,
                &search.country,
                &search.language,
                timeout,
            )?))
        }
        "html" => Ok(Box::new(HtmlSearch::new(&search.html_endpoint, timeout)?)),
        other => Err(ProspectorError::config(format!(
            "unknown search provider {other:?} (expected \"serper\" or \"html\")"
        ))),
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ProspectorError::Network(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Serper
// ---------------------------------------------------------------------------

/// Serper-compatible JSON search API.
pub struct SerperSearch {
    client: Client,
    endpoint: String,
    api_key: String,
    num: u32,
    country: String,
    language: String,
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    gl: &'a str,
    hl: &'a str,
    num: u32,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
    #[serde(default, rename = "answerBox")]
    answer_box: Option<SerperAnswerBox>,
}

#[derive(Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Deserialize)]
struct SerperAnswerBox {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
}

impl SerperSearch {
    pub fn new(
        endpoint: &str,
        api_key: String,
        num: u32,
        country: &str,
        language: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.to_string(),
            api_key,
            num,
            country: country.to_string(),
            language: language.to_string(),
        })
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    fn id(&self) -> &'static str {
        "serper"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let body = SerperRequest {
            q: query,
            gl: &self.country,
            hl: &self.language,
            num: self.num,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProspectorError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProspectorError::Network(format!(
                "{}: HTTP {status}",
                self.endpoint
            )));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| ProspectorError::parse(format!("search response: {e}")))?;

        let mut hits: Vec<SearchHit> = parsed
            .answer_box
            .map(|a| SearchHit {
                title: a.title,
                snippet: a.snippet,
                url: a.link,
            })
            .into_iter()
            .collect();
        hits.extend(parsed.organic.into_iter().map(|o| SearchHit {
            title: o.title,
            snippet: o.snippet,
            url: o.link,
        }));

        debug!(query, hits = hits.len(), "serper search");
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// HTML results page
// ---------------------------------------------------------------------------

/// Scrapes a DuckDuckGo-style HTML results page (`?q=` GET).
pub struct HtmlSearch {
    client: Client,
    endpoint: String,
}

impl HtmlSearch {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl SearchProvider for HtmlSearch {
    fn id(&self) -> &'static str {
        "html"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| ProspectorError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProspectorError::Network(format!(
                "{}: HTTP {status}",
                self.endpoint
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProspectorError::Network(format!("{}: body read failed: {e}", self.endpoint)))?;

        let hits = parse_html_results(&body);
        debug!(query, hits = hits.len(), "html search");
        Ok(hits)
    }
}

/// Pull title/snippet/url out of each `.result` block.
pub(crate) fn parse_html_results(body: &str) -> Vec<SearchHit> {
    let doc = Html::parse_document(body);
    let result_sel = Selector::parse(".result").expect("result selector");
    let link_sel = Selector::parse("a.result__a").expect("link selector");
    let title_sel = Selector::parse(".result__title").expect("title selector");
    let snippet_sel = Selector::parse(".result__snippet").expect("snippet selector");
    let url_sel = Selector::parse(".result__url").expect("url selector");

    let text_of = |el: scraper::ElementRef<'_>| {
        el.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    };

    doc.select(&result_sel)
        .map(|result| {
            let link_el = result.select(&link_sel).next();
            let title_el = link_el.or_else(|| result.select(&title_sel).next());
            let href = link_el
                .and_then(|el| el.value().attr("href"))
                .unwrap_or_default()
                .to_string();
            let shown_url = result.select(&url_sel).next().map(text_of);
            SearchHit {
                title: title_el.map(text_of).unwrap_or_default(),
                snippet: result.select(&snippet_sel).next().map(text_of).unwrap_or_default(),
                url: match shown_url {
                    Some(shown) if !shown.is_empty() && !href.is_empty() => {
                        format!("{href} {shown}")
                    }
                    Some(shown) if !shown.is_empty() => shown,
                    _ => href,
                },
            }
        })
        .filter(|hit| !hit.title.is_empty() || !hit.snippet.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Unavailable
// ---------------------------------------------------------------------------

/// Stand-in used when no real backend could be configured (e.g. the API key
/// is missing). Every query fails with [`ProspectorError::SearchUnavailable`].
pub struct UnavailableSearch {
    reason: String,
}

impl UnavailableSearch {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SearchProvider for UnavailableSearch {
    fn id(&self) -> &'static str {
        "unavailable"
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
        Err(ProspectorError::SearchUnavailable(self.reason.clone()))
    }
}

// ---------------------------------------------------------------------------
// Candidate collection
// ---------------------------------------------------------------------------

/// Run `queries` one after another and collect every identifier found.
///
/// `on_query(completed, total, candidates)` fires after each query, whether it
/// succeeded or not. A failing query is logged and skipped; only when every
/// query fails is the provider reported as unavailable. A provider that
/// already reports itself unavailable stops the loop at once.
#[instrument(skip_all, fields(provider = provider.id(), queries = queries.len()))]
pub async fn search_candidates<F>(
    provider: &dyn SearchProvider,
    queries: &[String],
    mut on_query: F,
) -> Result<IdentifierSet>
where
    F: FnMut(usize, usize, usize) + Send,
{
    let total = queries.len();
    let mut found = IdentifierSet::new();
    let mut failures = 0usize;
    let mut last_error = None;

    for (i, query) in queries.iter().enumerate() {
        match provider.search(query).await {
            Ok(hits) => {
                let before = found.len();
                for hit in &hits {
                    found.extend_from_text(&hit.text());
                }
                debug!(query = %query, new = found.len() - before, "query done");
            }
            Err(e @ ProspectorError::SearchUnavailable(_)) => return Err(e),
            Err(e) => {
                warn!(query = %query, error = %e, "search query failed");
                failures += 1;
                last_error = Some(e);
            }
        }
        on_query(i + 1, total, found.len());
    }

    if total > 0 && failures == total {
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no queries succeeded".to_string());
        return Err(ProspectorError::SearchUnavailable(format!(
            "all {total} search queries failed ({reason})"
        )));
    }

    info!(candidates = found.len(), failures, "search finished");
    Ok(found)
}
