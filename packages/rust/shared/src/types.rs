//! Core domain types for Prospector discovery runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::cnpj::Cnpj;
use crate::error::{ProspectorError, Result};
use crate::normalize::{city_matches, fold_accents, region_matches};

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

/// Registration status after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Active,
    Inactive,
}

impl RegistrationStatus {
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// Stable storage label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

/// Company-size category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeBand {
    /// Individual micro-entrepreneur.
    Mei,
    /// Micro company (ME).
    #[serde(alias = "me")]
    Micro,
    /// Small company (EPP).
    #[serde(alias = "epp")]
    Small,
    /// Everything else ("DEMAIS").
    #[serde(alias = "demais")]
    Other,
}

impl std::fmt::Display for SizeBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Mei => "mei",
            Self::Micro => "micro",
            Self::Small => "small",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// FilterSet
// ---------------------------------------------------------------------------

/// Targeting filters for one discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    /// Industry segment, e.g. "Restaurantes".
    pub segment: String,
    /// Two-letter state code (UF).
    pub region: String,
    /// Optional municipality, matched as an accent-insensitive substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Accepted size bands. Empty accepts every band.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub size_bands: Vec<SizeBand>,
    /// Target number of matches.
    pub limit: usize,
}

impl FilterSet {
    /// Reject filter sets missing a required field. Runs before any network call.
    pub fn validate(&self) -> Result<()> {
        if self.segment.trim().is_empty() {
            return Err(ProspectorError::validation("segment is required"));
        }
        let region = self.region.trim();
        if region.is_empty() {
            return Err(ProspectorError::validation("region is required"));
        }
        if region.len() != 2 || !region.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ProspectorError::validation(format!(
                "region must be a two-letter state code, got {region:?}"
            )));
        }
        Ok(())
    }

    /// City filter, `None` when absent or blank.
    pub fn city(&self) -> Option<&str> {
        self.city.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    /// Whether an entity located at `municipality`/`region` is in scope.
    pub fn location_matches(&self, municipality: &str, region: &str) -> bool {
        region_matches(region, &self.region)
            && self.city().is_none_or(|city| city_matches(municipality, city))
    }

    /// Whether `band` is one of the requested size bands.
    pub fn size_matches(&self, band: SizeBand) -> bool {
        self.size_bands.is_empty() || self.size_bands.contains(&band)
    }

    /// Stable key identifying equivalent filter sets (case, accents, band
    /// order and whitespace are ignored).
    pub fn cache_key(&self) -> String {
        let mut bands: Vec<String> = self.size_bands.iter().map(ToString::to_string).collect();
        bands.sort();
        bands.dedup();
        let canonical = format!(
            "{}|{}|{}|{}|{}",
            fold_accents(&self.segment),
            self.region.trim().to_ascii_uppercase(),
            self.city().map(fold_accents).unwrap_or_default(),
            bands.join(","),
            self.limit,
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// ResolvedEntity
// ---------------------------------------------------------------------------

/// Optional contact details published by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Canonical registry record for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub cnpj: Cnpj,
    /// Registered legal name (razão social).
    pub legal_name: String,
    /// Trade name (nome fantasia), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_name: Option<String>,
    pub size_band: SizeBand,
    /// Size label as the provider returned it.
    pub size_label: String,
    pub status: RegistrationStatus,
    /// Status label as the provider returned it.
    pub status_label: String,
    pub municipality: String,
    /// State code (UF).
    pub region: String,
    /// Description of the primary economic activity (CNAE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_activity: Option<String>,
    #[serde(default)]
    pub contacts: Contacts,
}

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

/// A stored resolution result, keyed by identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cnpj: Cnpj,
    pub entity: ResolvedEntity,
    pub status: RegistrationStatus,
    /// Id of the provider that produced the payload.
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Whether the entry can still be served at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Counters for one run, recomputed after every unit of work.
///
/// `matched + rejected_inactive + rejected_out_of_scope + unresolved`
/// always equals `processed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub matched: usize,
    pub rejected_inactive: usize,
    pub rejected_out_of_scope: usize,
    /// Candidates neither provider could resolve.
    pub unresolved: usize,
    pub cache_hits: usize,
    pub queries_completed: usize,
    pub total_queries: usize,
}

/// Final statistics carried by the terminal `complete` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub progress: ProgressSnapshot,
    /// Unique candidates discovered by the search phase.
    pub total_candidates: usize,
    /// Requested number of matches.
    pub target: usize,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> FilterSet {
        FilterSet {
            segment: "Restaurantes".into(),
            region: "SP".into(),
            city: Some("Campinas".into()),
            size_bands: vec![SizeBand::Small, SizeBand::Micro],
            limit: 10,
        }
    }

    #[test]
    fn validation_requires_segment_and_region() {
        assert!(filters().validate().is_ok());

        let mut missing_segment = filters();
        missing_segment.segment = "   ".into();
        let err = missing_segment.validate().unwrap_err();
        assert!(err.to_string().contains("segment"));

        let mut missing_region = filters();
        missing_region.region = String::new();
        assert!(missing_region.validate().unwrap_err().is_validation());

        let mut bad_region = filters();
        bad_region.region = "Sao Paulo".into();
        assert!(bad_region.validate().is_err());
    }

    #[test]
    fn cache_key_ignores_cosmetic_differences() {
        let a = filters();
        let mut b = filters();
        b.segment = "  restaurantes ".into();
        b.region = "sp".into();
        b.city = Some("CAMPINAS".into());
        b.size_bands = vec![SizeBand::Micro, SizeBand::Small];
        assert_eq!(a.cache_key(), b.cache_key());

        let mut c = filters();
        c.limit = 11;
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn location_and_size_matching() {
        let f = filters();
        assert!(f.location_matches("CAMPINAS", "SP"));
        assert!(!f.location_matches("CAMPINAS", "MG"));
        assert!(!f.location_matches("SANTOS", "SP"));
        assert!(f.size_matches(SizeBand::Micro));
        assert!(!f.size_matches(SizeBand::Other));

        let mut any = filters();
        any.size_bands.clear();
        any.city = Some(" ".into());
        assert!(any.size_matches(SizeBand::Other));
        assert!(any.location_matches("SANTOS", "sp"));
    }

    #[test]
    fn size_band_accepts_aliases() {
        let bands: Vec<SizeBand> = serde_json::from_str(r#"["me", "epp", "mei", "demais"]"#)
            .expect("aliases deserialize");
        assert_eq!(
            bands,
            vec![SizeBand::Micro, SizeBand::Small, SizeBand::Mei, SizeBand::Other]
        );
    }

    #[test]
    fn progress_serialization() {
        let snapshot = ProgressSnapshot {
            processed: 3,
            matched: 1,
            rejected_inactive: 1,
            unresolved: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["processed"], 3);
        assert_eq!(json["rejected_out_of_scope"], 0);
    }
}
