//! CNPJ extraction from scraped text.
//!
//! Search snippets, page titles and URLs carry identifiers in many shapes
//! (`12.345.678/0001-95`, `12345678000195`, `12 345 678 0001 95`). Anything
//! that does not normalize to a valid CNPJ is scraping noise and is dropped
//! without error.

use std::collections::HashSet;
use std::sync::LazyLock;

use prospector_shared::Cnpj;
use regex::Regex;

/// Punctuation-tolerant CNPJ shape. Word boundaries keep longer digit runs
/// (phone numbers, order ids) from yielding a 14-digit slice.
static CNPJ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{2}[. ]?\d{3}[. ]?\d{3}[/ ]?\d{4}[- ]?\d{2}\b").expect("CNPJ regex")
});

/// Extract the valid identifiers in `text`, in order of first appearance.
pub fn extract_identifiers(text: &str) -> Vec<Cnpj> {
    let mut set = IdentifierSet::new();
    set.extend_from_text(text);
    set.into_vec()
}

/// Batch-wide dedup set of extracted identifiers.
///
/// One set is shared across every search result of a run, so the same CNPJ
/// found by several queries is only resolved once.
#[derive(Debug, Default, Clone)]
pub struct IdentifierSet {
    seen: HashSet<Cnpj>,
    order: Vec<Cnpj>,
}

impl IdentifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every identifier found in `text`. Returns how many were new.
    pub fn extend_from_text(&mut self, text: &str) -> usize {
        let before = self.order.len();
        for m in CNPJ_RE.find_iter(text) {
            if let Some(cnpj) = Cnpj::parse(m.as_str()) {
                self.insert(cnpj);
            }
        }
        self.order.len() - before
    }

    /// Add one identifier. Returns `false` if it was already present.
    pub fn insert(&mut self, cnpj: Cnpj) -> bool {
        if self.seen.insert(cnpj.clone()) {
            self.order.push(cnpj);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cnpj> {
        self.order.iter()
    }

    /// Consume the set, keeping first-seen order.
    pub fn into_vec(self) -> Vec<Cnpj> {
        self.order
    }
}
