//! Registry provider trait and the built-in provider clients.
//!
//! Each provider speaks its own JSON dialect; every one of them normalizes
//! its answer into a [`ResolvedEntity`] before returning.

mod brasilapi;
mod receitaws;

use std::time::Duration;

use async_trait::async_trait;
use prospector_shared::{Cnpj, ProspectorError, ResolvedEntity, Result};
use reqwest::Client;

pub use brasilapi::BrasilApi;
pub use receitaws::ReceitaWs;

/// User-Agent string for registry requests.
const USER_AGENT: &str = concat!("Prospector/", env!("CARGO_PKG_VERSION"));

/// Hard ceiling on one HTTP exchange. The resolver applies its own, usually
/// shorter, budget on top.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A source of registry records.
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    /// Stable identifier, stored as the cache entry's `source`.
    fn id(&self) -> &'static str;

    /// Fetch and normalize the record for `cnpj`.
    ///
    /// Any failure (HTTP error, unknown identifier, malformed body) is an
    /// `Err`; the resolver decides what to do with it.
    async fn fetch(&self, cnpj: &Cnpj) -> Result<ResolvedEntity>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(CLIENT_TIMEOUT)
        .build()
        .map_err(|e| ProspectorError::Network(format!("failed to build HTTP client: {e}")))
}

/// Trimmed value, or `None` when missing or blank.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_collapse_to_none() {
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("   ".into())), None);
        assert_eq!(non_empty(Some(" x@y.com ".into())), Some("x@y.com".into()));
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        assert_eq!(base_url("https://brasilapi.com.br/"), "https://brasilapi.com.br");
    }
}
