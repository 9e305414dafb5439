//! Cache-first identifier resolution with provider fallback.
//!
//! Order for one identifier, stopping at the first success:
//! 1. fresh cache entry (hit counter bumped in the background)
//! 2. primary provider, under the per-provider timeout
//! 3. secondary provider, same budget
//!
//! A fresh provider result is written back with an expiry that depends on
//! the entity's registration status. If both providers fail the identifier
//! resolves to `None`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use prospector_shared::{
    AppConfig, CacheEntry, Cnpj, RegistrationStatus, ResolvedEntity, ResolverConfig, Result,
};
use prospector_storage::Storage;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::providers::{BrasilApi, ReceitaWs, RegistryProvider};

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Cache,
    Primary,
    Secondary,
}

/// A successfully resolved identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub entity: ResolvedEntity,
    pub source: ResolutionSource,
    /// Id of the provider that produced the payload. For cache hits this is
    /// the provider recorded with the entry.
    pub provider: String,
}

/// Anything that can turn identifiers into entities.
///
/// The batch orchestrator only depends on this trait.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn resolve(&self, cnpj: &Cnpj) -> Option<Resolution>;

    /// Resolve several identifiers concurrently. Output order matches `ids`.
    async fn resolve_batch(&self, ids: &[Cnpj]) -> Vec<Option<Resolution>> {
        join_all(ids.iter().map(|id| self.resolve(id))).await
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Cache-backed resolver over a primary and a secondary provider.
pub struct Resolver {
    storage: Arc<Storage>,
    primary: Arc<dyn RegistryProvider>,
    secondary: Arc<dyn RegistryProvider>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(
        storage: Arc<Storage>,
        primary: Arc<dyn RegistryProvider>,
        secondary: Arc<dyn RegistryProvider>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            storage,
            primary,
            secondary,
            config,
        }
    }

    /// Resolver with the built-in BrasilAPI/ReceitaWS providers.
    pub fn from_config(config: &AppConfig, storage: Arc<Storage>) -> Result<Self> {
        Ok(Self::new(
            storage,
            Arc::new(BrasilApi::new(&config.providers.primary_base_url)?),
            Arc::new(ReceitaWs::new(&config.providers.secondary_base_url)?),
            ResolverConfig::from(config),
        ))
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Build the cache entry for a fresh provider result.
    ///
    /// Inactive entities change rarely, so they live longer than active ones.
    pub fn cache_entry(
        &self,
        entity: ResolvedEntity,
        provider: &str,
        now: DateTime<Utc>,
    ) -> CacheEntry {
        let ttl = match entity.status {
            RegistrationStatus::Active => self.config.active_ttl,
            RegistrationStatus::Inactive => self.config.inactive_ttl,
        };
        CacheEntry {
            cnpj: entity.cnpj.clone(),
            status: entity.status,
            entity,
            source: provider.to_string(),
            fetched_at: now,
            expires_at: now
                .checked_add_signed(ttl_delta(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            hit_count: 0,
            last_accessed_at: None,
        }
    }

    /// Fresh cache entry for `cnpj`, if any. Read errors count as a miss.
    async fn from_cache(&self, cnpj: &Cnpj) -> Option<Resolution> {
        let entry = match self.storage.get_fresh_cache_entry(cnpj, Utc::now()).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(cnpj = %cnpj, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        let storage = Arc::clone(&self.storage);
        let id = cnpj.clone();
        tokio::spawn(async move {
            if let Err(e) = storage.record_cache_hit(&id, Utc::now()).await {
                debug!(cnpj = %id, error = %e, "hit count update failed");
            }
        });

        debug!(cnpj = %cnpj, "cache hit");
        Some(Resolution {
            entity: entry.entity,
            source: ResolutionSource::Cache,
            provider: entry.source,
        })
    }

    /// Ask the primary, then the secondary provider. Nothing is written.
    async fn from_providers(&self, cnpj: &Cnpj) -> Option<Resolution> {
        let attempts = [
            (&self.primary, ResolutionSource::Primary),
            (&self.secondary, ResolutionSource::Secondary),
        ];
        for (provider, source) in attempts {
            match tokio::time::timeout(self.config.provider_timeout, provider.fetch(cnpj)).await {
                Ok(Ok(entity)) => {
                    debug!(cnpj = %cnpj, provider = provider.id(), "resolved");
                    return Some(Resolution {
                        entity,
                        source,
                        provider: provider.id().to_string(),
                    });
                }
                Ok(Err(e)) => {
                    debug!(cnpj = %cnpj, provider = provider.id(), error = %e, "provider failed");
                }
                Err(_) => {
                    warn!(
                        cnpj = %cnpj,
                        provider = provider.id(),
                        timeout_ms = self.config.provider_timeout.as_millis() as u64,
                        "provider timed out"
                    );
                }
            }
        }
        debug!(cnpj = %cnpj, "unresolvable");
        None
    }
}

#[async_trait]
impl EntityResolver for Resolver {
    #[instrument(skip_all, fields(cnpj = %cnpj))]
    async fn resolve(&self, cnpj: &Cnpj) -> Option<Resolution> {
        if let Some(hit) = self.from_cache(cnpj).await {
            return Some(hit);
        }

        let resolution = self.from_providers(cnpj).await?;
        let entry = self.cache_entry(resolution.entity.clone(), &resolution.provider, Utc::now());
        if let Err(e) = self.storage.put_cache_entry(&entry).await {
            warn!(cnpj = %cnpj, error = %e, "cache write failed");
        }
        Some(resolution)
    }

    /// Concurrent resolution with one coalesced cache write for every
    /// provider result in the batch.
    #[instrument(skip_all, fields(batch = ids.len()))]
    async fn resolve_batch(&self, ids: &[Cnpj]) -> Vec<Option<Resolution>> {
        let results = join_all(ids.iter().map(|id| async move {
            match self.from_cache(id).await {
                Some(hit) => Some(hit),
                None => self.from_providers(id).await,
            }
        }))
        .await;

        let now = Utc::now();
        let fresh: Vec<CacheEntry> = results
            .iter()
            .flatten()
            .filter(|r| r.source != ResolutionSource::Cache)
            .map(|r| self.cache_entry(r.entity.clone(), &r.provider, now))
            .collect();

        if !fresh.is_empty() {
            if let Err(e) = self.storage.put_cache_entries(&fresh).await {
                warn!(rows = fresh.len(), error = %e, "batch cache write failed");
            }
        }
        results
    }
}

fn ttl_delta(ttl: Duration) -> TimeDelta {
    TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use prospector_shared::{Contacts, ProspectorError, SizeBand};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cnpj(base: &str) -> Cnpj {
        Cnpj::from_base(base).expect("valid base")
    }

    fn entity(cnpj: &Cnpj, status: RegistrationStatus) -> ResolvedEntity {
        ResolvedEntity {
            cnpj: cnpj.clone(),
            legal_name: format!("EMPRESA {}", cnpj.as_str()),
            trade_name: None,
            size_band: SizeBand::Micro,
            size_label: "MICRO EMPRESA".into(),
            status,
            status_label: match status {
                RegistrationStatus::Active => "ATIVA".into(),
                RegistrationStatus::Inactive => "BAIXADA".into(),
            },
            municipality: "CAMPINAS".into(),
            region: "SP".into(),
            primary_activity: None,
            contacts: Contacts::default(),
        }
    }

    /// In-memory provider that counts calls.
    struct FakeProvider {
        id: &'static str,
        known: HashMap<Cnpj, ResolvedEntity>,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(id: &'static str, entities: Vec<ResolvedEntity>) -> Arc<Self> {
            Arc::new(Self {
                id,
                known: entities.into_iter().map(|e| (e.cnpj.clone(), e)).collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RegistryProvider for FakeProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn fetch(&self, cnpj: &Cnpj) -> Result<ResolvedEntity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.known
                .get(cnpj)
                .cloned()
                .ok_or_else(|| ProspectorError::Network("not found".into()))
        }
    }

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("prospector_registry_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open storage"))
    }

    fn config(timeout: Duration) -> ResolverConfig {
        ResolverConfig {
            provider_timeout: timeout,
            active_ttl: Duration::from_secs(7 * 24 * 3600),
            inactive_ttl: Duration::from_secs(30 * 24 * 3600),
        }
    }

    #[tokio::test]
    async fn second_resolve_hits_cache_and_counts_hit() {
        let id = cnpj("112223330001");
        let primary = FakeProvider::new("primary", vec![entity(&id, RegistrationStatus::Active)]);
        let secondary = FakeProvider::new("secondary", vec![]);
        let storage = test_storage().await;
        let resolver = Resolver::new(
            storage.clone(),
            primary.clone(),
            secondary.clone(),
            config(Duration::from_secs(5)),
        );

        let first = resolver.resolve(&id).await.expect("resolved");
        assert_eq!(first.source, ResolutionSource::Primary);
        let second = resolver.resolve(&id).await.expect("cached");
        assert_eq!(second.source, ResolutionSource::Cache);
        assert_eq!(second.provider, "primary");
        assert_eq!(second.entity, first.entity);
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 0);

        // The hit counter is bumped in a background task.
        let mut hits = 0;
        for _ in 0..100 {
            hits = storage.get_cache_entry(&id).await.unwrap().unwrap().hit_count;
            if hits > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hits, 1);
    }

    #[tokio::test]
    async fn inactive_entries_outlive_active_ones() {
        let a = cnpj("112223330001");
        let b = cnpj("456789010001");
        let resolver = Resolver::new(
            test_storage().await,
            FakeProvider::new("p", vec![]),
            FakeProvider::new("s", vec![]),
            config(Duration::from_secs(5)),
        );

        let now = Utc::now();
        let active = resolver.cache_entry(entity(&a, RegistrationStatus::Active), "p", now);
        let inactive = resolver.cache_entry(entity(&b, RegistrationStatus::Inactive), "p", now);
        assert!(inactive.expires_at > active.expires_at);
        assert_eq!(active.fetched_at, inactive.fetched_at);
    }

    #[tokio::test]
    async fn both_providers_failing_is_none_and_nothing_is_cached() {
        let id = cnpj("190131470001");
        let storage = test_storage().await;
        let resolver = Resolver::new(
            storage.clone(),
            FakeProvider::new("p", vec![]),
            FakeProvider::new("s", vec![]),
            config(Duration::from_secs(5)),
        );

        assert!(resolver.resolve(&id).await.is_none());
        assert!(storage.get_cache_entry(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn primary_timeout_falls_back_to_secondary() {
        let id = cnpj("334130000001");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/api/cnpj/v1/{}", id.as_str())))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(800))
                    .set_body_json(serde_json::json!({"razao_social": "LENTO LTDA"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/cnpj/{}", id.as_str())))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "nome": "CANTINA BELLA LTDA",
                "porte": "MICRO EMPRESA",
                "situacao": "ATIVA",
                "municipio": "CAMPINAS",
                "uf": "SP"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let resolver = Resolver::new(
            storage.clone(),
            Arc::new(BrasilApi::new(&server.uri()).unwrap()),
            Arc::new(ReceitaWs::new(&server.uri()).unwrap()),
            config(Duration::from_millis(200)),
        );

        let resolution = resolver.resolve(&id).await.expect("secondary answers");
        assert_eq!(resolution.source, ResolutionSource::Secondary);
        assert_eq!(resolution.entity.legal_name, "CANTINA BELLA LTDA");

        let entry = storage.get_cache_entry(&id).await.unwrap().expect("cached");
        assert_eq!(entry.source, "receitaws");
    }

    #[tokio::test]
    async fn batch_resolution_coalesces_writes_and_keeps_order() {
        let ids: Vec<Cnpj> = ["112223330001", "456789010001", "190131470001"]
            .iter()
            .map(|b| cnpj(b))
            .collect();
        let primary = FakeProvider::new(
            "primary",
            vec![
                entity(&ids[0], RegistrationStatus::Active),
                entity(&ids[2], RegistrationStatus::Inactive),
            ],
        );
        let secondary =
            FakeProvider::new("secondary", vec![entity(&ids[1], RegistrationStatus::Active)]);
        let storage = test_storage().await;
        let resolver = Resolver::new(
            storage.clone(),
            primary,
            secondary,
            config(Duration::from_secs(5)),
        );

        let results = resolver.resolve_batch(&ids).await;
        let sources: Vec<_> = results.iter().map(|r| r.as_ref().map(|r| r.source)).collect();
        assert_eq!(
            sources,
            vec![
                Some(ResolutionSource::Primary),
                Some(ResolutionSource::Secondary),
                Some(ResolutionSource::Primary),
            ]
        );

        let stats = storage.cache_stats(Utc::now()).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.inactive, 1);

        let again = resolver.resolve_batch(&ids).await;
        assert!(again.iter().flatten().all(|r| r.source == ResolutionSource::Cache));
    }

    #[tokio::test]
    async fn concurrent_identical_batches_leave_one_row_per_identifier() {
        let ids: Vec<Cnpj> = ["112223330001", "456789010001", "190131470001", "334130000001"]
            .iter()
            .map(|b| cnpj(b))
            .collect();
        let primary = FakeProvider::new(
            "primary",
            ids.iter().map(|id| entity(id, RegistrationStatus::Active)).collect(),
        );
        let storage = test_storage().await;
        let resolver = Arc::new(Resolver::new(
            storage.clone(),
            primary,
            FakeProvider::new("secondary", vec![]),
            config(Duration::from_secs(5)),
        ));

        let (a, b) = tokio::join!(resolver.resolve_batch(&ids), resolver.resolve_batch(&ids));
        assert!(a.iter().all(Option::is_some));
        assert!(b.iter().all(Option::is_some));

        let stats = storage.cache_stats(Utc::now()).await.unwrap();
        assert_eq!(stats.total, ids.len() as u64);
    }
}
