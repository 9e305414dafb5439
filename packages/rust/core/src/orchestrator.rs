//! Batch orchestration: resolve candidates batch by batch and filter them
//! until the target number of matches is reached.

use prospector_registry::{EntityResolver, Resolution, ResolutionSource};
use prospector_shared::{
    Cnpj, FilterSet, MAX_BATCH_SIZE, MIN_BATCH_SIZE, ProgressSnapshot, ResolvedEntity,
};
use tracing::{debug, info, instrument};

use crate::events::{EventSink, StreamEvent};

/// Outcome of filtering one resolved candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unresolved,
    Inactive,
    OutOfScope,
    Matched,
}

/// Apply the filters to one resolution. Checks run in a fixed order:
/// resolution, registration status, location, size band.
pub fn classify(resolution: Option<&Resolution>, filters: &FilterSet) -> Verdict {
    let Some(resolution) = resolution else {
        return Verdict::Unresolved;
    };
    let entity = &resolution.entity;
    if !entity.status.is_active() {
        Verdict::Inactive
    } else if !filters.location_matches(&entity.municipality, &entity.region) {
        Verdict::OutOfScope
    } else if !filters.size_matches(entity.size_band) {
        Verdict::OutOfScope
    } else {
        Verdict::Matched
    }
}

/// Drives a resolver over a candidate list.
pub struct Orchestrator<'a> {
    resolver: &'a dyn EntityResolver,
    batch_size: usize,
}

impl<'a> Orchestrator<'a> {
    /// `batch_size` is clamped to the accepted range.
    pub fn new(resolver: &'a dyn EntityResolver, batch_size: usize) -> Self {
        Self {
            resolver,
            batch_size: batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
        }
    }

    /// Resolve `candidates` in batches until `target` matches are found or
    /// the candidates run out.
    ///
    /// Each batch is resolved concurrently and awaited as a whole before the
    /// next one starts. Results are then examined in candidate order; once
    /// the target is hit, the rest of the batch is left unprocessed. A
    /// `match` event is emitted per accepted entity and a `progress` event
    /// after every batch. Counters accumulate into `progress`.
    #[instrument(skip_all, fields(candidates = candidates.len(), wanted = target))]
    pub async fn run(
        &self,
        candidates: &[Cnpj],
        filters: &FilterSet,
        target: usize,
        progress: &mut ProgressSnapshot,
        sink: &dyn EventSink,
    ) -> Vec<ResolvedEntity> {
        let mut matches = Vec::new();
        if target == 0 || candidates.is_empty() {
            return matches;
        }

        for (index, batch) in candidates.chunks(self.batch_size).enumerate() {
            let results = self.resolver.resolve_batch(batch).await;

            for (cnpj, resolution) in batch.iter().zip(results) {
                progress.processed += 1;
                if resolution
                    .as_ref()
                    .is_some_and(|r| r.source == ResolutionSource::Cache)
                {
                    progress.cache_hits += 1;
                }

                match classify(resolution.as_ref(), filters) {
                    Verdict::Unresolved => progress.unresolved += 1,
                    Verdict::Inactive => progress.rejected_inactive += 1,
                    Verdict::OutOfScope => progress.rejected_out_of_scope += 1,
                    Verdict::Matched => {
                        progress.matched += 1;
                        if let Some(resolution) = resolution {
                            debug!(cnpj = %cnpj, matched = progress.matched, "match");
                            sink.emit(StreamEvent::Match {
                                entity: resolution.entity.clone(),
                                progress: *progress,
                            });
                            matches.push(resolution.entity);
                        }
                    }
                }

                if progress.matched >= target {
                    break;
                }
            }

            sink.emit(StreamEvent::Progress {
                progress: *progress,
            });
            debug!(
                batch = index + 1,
                processed = progress.processed,
                matched = progress.matched,
                "batch done"
            );

            if progress.matched >= target {
                break;
            }
        }

        info!(
            processed = progress.processed,
            matched = progress.matched,
            unresolved = progress.unresolved,
            "orchestration finished"
        );
        matches
    }
}
