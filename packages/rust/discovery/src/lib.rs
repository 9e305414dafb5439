//! Candidate discovery: turn a filter set into CNPJ candidates.
//!
//! A discovery run fans the filters out into several search queries
//! ([`build_queries`]), sends them to a [`SearchProvider`] one at a time, and
//! scrapes every result for identifiers ([`IdentifierSet`]). Nothing here
//! talks to the business registry; candidates are unverified until resolved.

mod extractor;
mod queries;
mod search;

pub use extractor::{IdentifierSet, extract_identifiers};
pub use queries::{MAX_QUERIES, MIN_QUERIES, build_queries, synonyms_for};
pub use search::{
    HtmlSearch, SearchHit, SearchProvider, SerperSearch, UnavailableSearch, search_candidates,
    search_provider_from_config,
};
