//! End-to-end discovery run: filters → queries → search → candidates →
//! batched resolution → matches.

use std::sync::Arc;
use std::time::Instant;

use prospector_discovery::{SearchProvider, build_queries, search_candidates};
use prospector_registry::EntityResolver;
use prospector_shared::{
    FilterSet, PipelineConfig, ProgressSnapshot, ResolvedEntity, Result, RunStats,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::events::{EventSink, StreamEvent};
use crate::orchestrator::Orchestrator;

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOutcome {
    pub matches: Vec<ResolvedEntity>,
    pub stats: RunStats,
}

/// A search provider and a resolver wired together.
///
/// One pipeline serves any number of concurrent runs; the resolution cache
/// behind the resolver is the only state they share.
pub struct DiscoveryPipeline {
    search: Arc<dyn SearchProvider>,
    resolver: Arc<dyn EntityResolver>,
    config: PipelineConfig,
}

impl DiscoveryPipeline {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        resolver: Arc<dyn EntityResolver>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            search,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<dyn EntityResolver> {
        &self.resolver
    }

    /// Effective match target: the requested limit or the default, capped.
    pub fn target_for(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_limit)
            .min(self.config.max_limit)
    }

    /// Run one discovery, reporting every step to `sink`.
    ///
    /// The last event emitted is always `complete` (on success) or `error`.
    #[instrument(skip_all, fields(segment = %filters.segment, region = %filters.region))]
    pub async fn run(&self, filters: &FilterSet, sink: &dyn EventSink) -> Result<DiscoveryOutcome> {
        match self.execute(filters, sink).await {
            Ok(outcome) => {
                info!(
                    matched = outcome.stats.progress.matched,
                    processed = outcome.stats.progress.processed,
                    elapsed_ms = outcome.stats.elapsed_ms,
                    "discovery complete"
                );
                sink.emit(StreamEvent::Complete {
                    stats: outcome.stats,
                });
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "discovery failed");
                sink.emit(StreamEvent::error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn execute(&self, filters: &FilterSet, sink: &dyn EventSink) -> Result<DiscoveryOutcome> {
        filters.validate()?;
        let started = Instant::now();
        let target = filters.limit.min(self.config.max_limit);
        let mut progress = ProgressSnapshot::default();

        let finish = |progress: ProgressSnapshot,
                      total_candidates: usize,
                      matches: Vec<ResolvedEntity>| DiscoveryOutcome {
            matches,
            stats: RunStats {
                progress,
                total_candidates,
                target,
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        };

        if target == 0 {
            return Ok(finish(progress, 0, Vec::new()));
        }

        let location = match filters.city() {
            Some(city) => format!("{city}/{}", filters.region.trim().to_ascii_uppercase()),
            None => filters.region.trim().to_ascii_uppercase(),
        };
        sink.emit(StreamEvent::status(format!(
            "searching for {} in {location}",
            filters.segment.trim()
        )));

        // --- Search ---
        let queries = build_queries(filters);
        progress.total_queries = queries.len();
        let found = search_candidates(self.search.as_ref(), &queries, |done, total, found| {
            sink.emit(StreamEvent::SearchProgress {
                queries_completed: done,
                total_queries: total,
                candidates_found: found,
            });
        })
        .await?;
        progress.queries_completed = queries.len();

        let candidates = found.into_vec();
        let total_candidates = candidates.len();
        sink.emit(StreamEvent::SearchComplete { total_candidates });

        if candidates.is_empty() {
            return Ok(finish(progress, 0, Vec::new()));
        }

        // --- Resolution ---
        sink.emit(StreamEvent::status(format!(
            "checking {total_candidates} candidates against the registry"
        )));
        let matches = Orchestrator::new(self.resolver.as_ref(), self.config.batch_size)
            .run(&candidates, filters, target, &mut progress, sink)
            .await;

        Ok(finish(progress, total_candidates, matches))
    }
}
