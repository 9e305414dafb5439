//! Bulk import of identifiers from a delimited text file.
//!
//! A client-driven, sequential variant of the batch orchestrator: every
//! candidate is looked up one at a time with a fixed pause between calls,
//! and only active entities are kept.

use std::path::Path;
use std::time::Duration;

use prospector_discovery::IdentifierSet;
use prospector_shared::{AppConfig, Cnpj, ProspectorError, ResolvedEntity, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::transport::LookupTransport;

/// Cell delimiters accepted in imported files.
const DELIMITERS: &[char] = &[',', ';', '\t', '|'];

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Identifiers beyond this many are dropped.
    pub max_candidates: usize,
    /// Pause between two consecutive lookups.
    pub delay: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ImportOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_candidates: config.client.import_max_candidates,
            delay: Duration::from_millis(config.client.import_delay_ms),
        }
    }
}

/// Outcome of one import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    /// Active entities, in file order.
    pub imported: Vec<ResolvedEntity>,
    pub inactive: usize,
    pub not_found: usize,
    /// Lookups that failed outright (server unreachable, bad response).
    pub failed: usize,
    pub dropped_over_cap: usize,
    /// Unique valid identifiers found in the file, before the cap.
    pub total_candidates: usize,
}

/// Unique identifiers in a delimited text body, in order of first
/// appearance.
///
/// Spreadsheet exports often store identifiers as numbers and lose their
/// leading zeros, so all-digit cells of 12 or 13 digits are left-padded
/// before validation.
pub fn extract_candidates(text: &str) -> Vec<Cnpj> {
    let mut set = IdentifierSet::new();
    for cell in text.lines().flat_map(|line| line.split(DELIMITERS)) {
        let cell = cell.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
        if cell.is_empty() {
            continue;
        }
        if (12..14).contains(&cell.len()) && cell.bytes().all(|b| b.is_ascii_digit()) {
            if let Some(cnpj) = Cnpj::parse(&format!("{cell:0>14}")) {
                set.insert(cnpj);
            }
            continue;
        }
        set.extend_from_text(cell);
    }
    set.into_vec()
}

/// Look up every identifier in `text` and keep the active ones.
///
/// `on_progress(done, total)` runs after each lookup.
#[instrument(skip_all, fields(max = options.max_candidates))]
pub async fn import_identifiers<F>(
    lookup: &dyn LookupTransport,
    text: &str,
    options: &ImportOptions,
    mut on_progress: F,
) -> ImportReport
where
    F: FnMut(usize, usize) + Send,
{
    let mut candidates = extract_candidates(text);
    let mut report = ImportReport {
        total_candidates: candidates.len(),
        ..Default::default()
    };
    if candidates.len() > options.max_candidates {
        report.dropped_over_cap = candidates.len() - options.max_candidates;
        candidates.truncate(options.max_candidates);
        warn!(
            dropped = report.dropped_over_cap,
            "import capped at {} identifiers", options.max_candidates
        );
    }

    let total = candidates.len();
    for (i, cnpj) in candidates.iter().enumerate() {
        if i > 0 && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
        match lookup.lookup(cnpj).await {
            Ok(Some(resolution)) if resolution.entity.status.is_active() => {
                debug!(cnpj = %cnpj.as_str(), source = %resolution.provider, "imported");
                report.imported.push(resolution.entity);
            }
            Ok(Some(_)) => report.inactive += 1,
            Ok(None) => report.not_found += 1,
            Err(e) => {
                warn!(cnpj = %cnpj.as_str(), error = %e, "lookup failed");
                report.failed += 1;
            }
        }
        on_progress(i + 1, total);
    }

    info!(
        imported = report.imported.len(),
        inactive = report.inactive,
        not_found = report.not_found,
        failed = report.failed,
        "import finished"
    );
    report
}

/// Read `path` and import its identifiers. Non-UTF-8 bytes (Latin-1
/// spreadsheet exports) are replaced rather than rejected.
pub async fn import_file<F>(
    path: &Path,
    lookup: &dyn LookupTransport,
    options: &ImportOptions,
    on_progress: F,
) -> Result<ImportReport>
where
    F: FnMut(usize, usize) + Send,
{
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ProspectorError::io(path, e))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(import_identifiers(lookup, &text, options, on_progress).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;
    use prospector_registry::{Resolution, ResolutionSource};
    use prospector_shared::{Contacts, RegistrationStatus, SizeBand};
    use uuid::Uuid;

    /// Serves canned resolutions; anything unknown is not found, and
    /// identifiers listed in `broken` fail.
    #[derive(Default)]
    struct FakeLookup {
        known: HashMap<String, RegistrationStatus>,
        broken: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LookupTransport for FakeLookup {
        async fn lookup(&self, cnpj: &Cnpj) -> Result<Option<Resolution>> {
            self.calls.lock().unwrap().push(cnpj.as_str().to_string());
            if self.broken.iter().any(|b| b == cnpj.as_str()) {
                return Err(ProspectorError::Network("connection refused".into()));
            }
            Ok(self.known.get(cnpj.as_str()).map(|&status| Resolution {
                entity: ResolvedEntity {
                    cnpj: cnpj.clone(),
                    legal_name: "PADARIA PAO QUENTE LTDA".into(),
                    trade_name: None,
                    size_band: SizeBand::Small,
                    size_label: "EMPRESA DE PEQUENO PORTE".into(),
                    status,
                    status_label: status.as_str().into(),
                    municipality: "SAO PAULO".into(),
                    region: "SP".into(),
                    primary_activity: None,
                    contacts: Contacts::default(),
                },
                source: ResolutionSource::Primary,
                provider: "fake".into(),
            }))
        }
    }

    fn no_delay() -> ImportOptions {
        ImportOptions {
            max_candidates: 100,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn extracts_from_every_delimiter_and_dedups() {
        let text = "cnpj;nome\n\
                    \"11.222.333/0001-81\";Cantina\n\
                    45678901000175\t|00000000000191,ok\n\
                    11222333000181;duplicada\n\
                    12345;lixo\n";
        let ids: Vec<_> = extract_candidates(text)
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["11222333000181", "45678901000175", "00000000000191"]);
    }

    #[test]
    fn restores_leading_zeros_lost_by_spreadsheets() {
        let ids = extract_candidates("191\n000191\n0000000000191\n");
        let ids: Vec<_> = ids.iter().map(|c| c.as_str()).collect();
        assert_eq!(ids, vec!["00000000000191"]);
    }

    #[tokio::test]
    async fn keeps_active_entities_and_counts_the_rest() {
        let lookup = FakeLookup {
            known: HashMap::from([
                ("11222333000181".to_string(), RegistrationStatus::Active),
                ("45678901000175".to_string(), RegistrationStatus::Inactive),
                ("00000000000191".to_string(), RegistrationStatus::Active),
            ]),
            broken: vec!["33413000000172".into()],
            ..Default::default()
        };
        let text = "11222333000181,45678901000175,19013147000144,33413000000172,00000000000191";

        let mut progress = Vec::new();
        let report = import_identifiers(&lookup, text, &no_delay(), |done, total| {
            progress.push((done, total))
        })
        .await;

        let imported: Vec<_> = report.imported.iter().map(|e| e.cnpj.as_str()).collect();
        assert_eq!(imported, vec!["11222333000181", "00000000000191"]);
        assert_eq!(report.inactive, 1);
        assert_eq!(report.not_found, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.dropped_over_cap, 0);
        assert_eq!(report.total_candidates, 5);
        assert_eq!(progress.last(), Some(&(5, 5)));
    }

    #[tokio::test]
    async fn caps_candidates_and_looks_up_in_order() {
        let text: Vec<String> = (0..105)
            .map(|n| {
                Cnpj::from_base(&format!("{:08}0001", 20_000_000 + n))
                    .unwrap()
                    .as_str()
                    .to_string()
            })
            .collect();
        let lookup = FakeLookup::default();

        let report = import_identifiers(&lookup, &text.join("\n"), &no_delay(), |_, _| {}).await;

        assert_eq!(report.total_candidates, 105);
        assert_eq!(report.dropped_over_cap, 5);
        assert_eq!(report.not_found, 100);
        let calls = lookup.calls.lock().unwrap();
        assert_eq!(calls.len(), 100);
        assert_eq!(calls[..], text[..100]);
    }

    #[tokio::test]
    async fn waits_between_lookups() {
        let lookup = FakeLookup::default();
        let options = ImportOptions {
            max_candidates: 100,
            delay: Duration::from_millis(25),
        };
        let started = Instant::now();
        import_identifiers(
            &lookup,
            "11222333000181\n45678901000175\n00000000000191",
            &options,
            |_, _| {},
        )
        .await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn import_file_reads_from_disk() {
        let path =
            std::env::temp_dir().join(format!("prospector_import_{}.csv", Uuid::now_v7()));
        std::fs::write(&path, "cnpj\n11.222.333/0001-81\n").unwrap();

        let lookup = FakeLookup {
            known: HashMap::from([("11222333000181".to_string(), RegistrationStatus::Active)]),
            ..Default::default()
        };
        let report = import_file(&path, &lookup, &no_delay(), |_, _| {}).await.unwrap();
        assert_eq!(report.imported.len(), 1);
        let _ = std::fs::remove_file(&path);

        let err = import_file(&path, &lookup, &no_delay(), |_, _| {}).await.unwrap_err();
        assert!(matches!(err, ProspectorError::Io { .. }));
    }
}
