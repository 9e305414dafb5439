//! Normalization of the loose vocabulary registry providers return.
//!
//! Providers spell registration status and company size in several ways
//! (full words, abbreviations, numeric codes). Every comparison in the
//! pipeline goes through the functions here.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::types::{RegistrationStatus, SizeBand};

/// Lowercase, strip diacritics and collapse whitespace.
///
/// `"  São   José dos Campos "` becomes `"sao jose dos campos"`.
pub fn fold_accents(s: &str) -> String {
    let stripped: String = s
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl RegistrationStatus {
    /// Map any provider status label onto active/inactive.
    ///
    /// Active: `ATIVA`, `ATIVO`, `ACTIVE`, code `2`/`02`, or any label
    /// containing `ATIV` that is not a form of `INATIV`. Everything else,
    /// including an empty label, is inactive.
    pub fn from_label(label: &str) -> Self {
        let folded = fold_accents(label);
        match folded.as_str() {
            "" => Self::Inactive,
            "ativa" | "ativo" | "active" | "2" | "02" => Self::Active,
            s if s.contains("inativ") || s.contains("inactiv") => Self::Inactive,
            s if s.contains("ativ") => Self::Active,
            _ => Self::Inactive,
        }
    }
}

impl SizeBand {
    /// Map a provider size label onto a band. Unknown labels are `Other`.
    pub fn from_label(label: &str) -> Self {
        Self::parse_label(label).unwrap_or(Self::Other)
    }

    /// Band for a user-supplied or provider band name, `None` when the
    /// name is not in the table.
    pub fn parse_label(label: &str) -> Option<Self> {
        let folded = fold_accents(label);
        let band = match folded.as_str() {
            "mei" | "microempreendedor individual" => Self::Mei,
            "me" | "micro" | "micro empresa" | "microempresa" | "1" | "01" => Self::Micro,
            "epp" | "small" | "pequeno porte" | "empresa de pequeno porte" | "3" | "03" => {
                Self::Small
            }
            "other" | "demais" | "5" | "05" => Self::Other,
            s if s.contains("pequeno porte") => Self::Small,
            s if s.contains("microempreendedor") => Self::Mei,
            _ => return None,
        };
        Some(band)
    }
}

/// Exact region (UF) comparison, case-insensitive.
pub fn region_matches(entity_region: &str, wanted: &str) -> bool {
    entity_region.trim().eq_ignore_ascii_case(wanted.trim())
}

/// Accent-insensitive substring match of the wanted city within the
/// entity's municipality. An empty wanted city always matches.
pub fn city_matches(municipality: &str, wanted: &str) -> bool {
    let wanted = fold_accents(wanted);
    if wanted.is_empty() {
        return true;
    }
    fold_accents(municipality).contains(&wanted)
}
