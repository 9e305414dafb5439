//! Query fan-out: turn one filter set into several diversified search queries.
//!
//! Different phrasings surface different aggregator pages, so each run asks
//! the search provider 4 to 6 questions instead of one.

use prospector_shared::FilterSet;
use prospector_shared::normalize::fold_accents;

/// Minimum and maximum number of queries produced per filter set.
pub const MIN_QUERIES: usize = 4;
pub const MAX_QUERIES: usize = 6;

/// Maximum synonyms mixed into one fan-out.
const MAX_SYNONYMS: usize = 2;

/// Segment → synonym table. Keys are accent-folded and lowercase.
const SEGMENT_SYNONYMS: &[(&str, &[&str])] = &[
    ("restaurantes", &["restaurante", "lanchonete", "bar e restaurante"]),
    ("academias", &["academia de ginastica", "studio fitness"]),
    ("clinicas", &["clinica medica", "consultorio medico"]),
    ("odontologia", &["clinica odontologica", "consultorio odontologico"]),
    ("advocacia", &["escritorio de advocacia", "sociedade de advogados"]),
    ("contabilidade", &["escritorio de contabilidade", "servicos contabeis"]),
    ("construcao", &["construtora", "engenharia civil"]),
    ("tecnologia", &["desenvolvimento de software", "consultoria em ti"]),
    ("padarias", &["padaria", "panificadora"]),
    ("farmacias", &["farmacia", "drogaria"]),
    ("pet shops", &["pet shop", "clinica veterinaria"]),
    ("saloes de beleza", &["salao de beleza", "cabeleireiro"]),
    ("hoteis", &["hotel", "pousada"]),
    ("imobiliarias", &["imobiliaria", "corretora de imoveis"]),
    ("oficinas", &["oficina mecanica", "centro automotivo"]),
    ("transportes", &["transportadora", "logistica"]),
];

/// UF code → state name, used for the wider-phrasing queries.
const STATE_NAMES: &[(&str, &str)] = &[
    ("AC", "Acre"),
    ("AL", "Alagoas"),
    ("AM", "Amazonas"),
    ("AP", "Amapá"),
    ("BA", "Bahia"),
    ("CE", "Ceará"),
    ("DF", "Distrito Federal"),
    ("ES", "Espírito Santo"),
    ("GO", "Goiás"),
    ("MA", "Maranhão"),
    ("MG", "Minas Gerais"),
    ("MS", "Mato Grosso do Sul"),
    ("MT", "Mato Grosso"),
    ("PA", "Pará"),
    ("PB", "Paraíba"),
    ("PE", "Pernambuco"),
    ("PI", "Piauí"),
    ("PR", "Paraná"),
    ("RJ", "Rio de Janeiro"),
    ("RN", "Rio Grande do Norte"),
    ("RO", "Rondônia"),
    ("RR", "Roraima"),
    ("RS", "Rio Grande do Sul"),
    ("SC", "Santa Catarina"),
    ("SE", "Sergipe"),
    ("SP", "São Paulo"),
    ("TO", "Tocantins"),
];

/// Up to two synonyms for `segment`, looked up accent- and case-insensitively.
///
/// A segment that is itself listed as a synonym resolves to its table row,
/// minus itself.
pub fn synonyms_for(segment: &str) -> Vec<&'static str> {
    let key = fold_accents(segment);
    SEGMENT_SYNONYMS
        .iter()
        .find(|(k, syns)| *k == key || syns.contains(&key.as_str()))
        .map(|(_, syns)| {
            syns.iter()
                .copied()
                .filter(|s| *s != key)
                .take(MAX_SYNONYMS)
                .collect()
        })
        .unwrap_or_default()
}

fn state_name(uf: &str) -> Option<&'static str> {
    STATE_NAMES
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(uf))
        .map(|(_, name)| *name)
}

/// Build the search queries for a filter set.
///
/// Deterministic: the same filters always produce the same queries in the
/// same order. No two queries are equal ignoring case.
pub fn build_queries(filters: &FilterSet) -> Vec<String> {
    let segment = filters.segment.trim();
    let uf = filters.region.trim().to_ascii_uppercase();
    let state = state_name(&uf).unwrap_or(uf.as_str());

    let (location, wide_location) = match filters.city() {
        Some(city) => (format!("{city} {uf}"), format!("{city} {state}")),
        None => (uf.clone(), state.to_string()),
    };

    let mut candidates = vec![
        format!("\"{segment}\" {location} CNPJ"),
        format!("{segment} {location} \"situação cadastral\" ativa"),
    ];
    for synonym in synonyms_for(segment) {
        candidates.push(format!("{synonym} {location} CNPJ"));
    }
    candidates.push(format!("{segment} {location} site:cnpj.biz"));
    candidates.push(format!("{segment} {wide_location} razão social CNPJ casadosdados"));

    let mut queries: Vec<String> = Vec::with_capacity(MAX_QUERIES);
    for query in candidates {
        let folded = query.to_lowercase();
        if !queries.iter().any(|q| q.to_lowercase() == folded) {
            queries.push(query);
        }
        if queries.len() == MAX_QUERIES {
            break;
        }
    }
    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(segment: &str, city: Option<&str>) -> FilterSet {
        FilterSet {
            segment: segment.into(),
            region: "sp".into(),
            city: city.map(Into::into),
            size_bands: vec![],
            limit: 10,
        }
    }

    #[test]
    fn restaurant_queries_use_synonyms_and_city() {
        let queries = build_queries(&filters("Restaurantes", Some("Campinas")));
        assert_eq!(queries.len(), MAX_QUERIES);
        assert_eq!(queries[0], "\"Restaurantes\" Campinas SP CNPJ");
        assert!(queries.iter().any(|q| q.starts_with("restaurante Campinas SP")));
        assert!(queries.iter().any(|q| q.starts_with("lanchonete Campinas SP")));
        assert!(queries.iter().any(|q| q.contains("Campinas São Paulo")));
        assert!(queries.iter().all(|q| q.contains("Campinas")));
    }

    #[test]
    fn unknown_segment_still_yields_minimum() {
        let queries = build_queries(&filters("Vidraçarias", None));
        assert!(queries.len() >= MIN_QUERIES);
        assert!(queries.len() <= MAX_QUERIES);
        assert!(queries.iter().all(|q| q.contains("SP") || q.contains("São Paulo")));
    }

    #[test]
    fn queries_are_distinct_and_deterministic() {
        let f = filters("padarias", Some("Santos"));
        let a = build_queries(&f);
        let b = build_queries(&f);
        assert_eq!(a, b);

        let mut lowered: Vec<String> = a.iter().map(|q| q.to_lowercase()).collect();
        lowered.sort();
        lowered.dedup();
        assert_eq!(lowered.len(), a.len());
    }

    #[test]
    fn synonym_lookup_is_accent_insensitive() {
        assert_eq!(synonyms_for("Farmácias"), vec!["farmacia", "drogaria"]);
        assert_eq!(synonyms_for("padaria"), vec!["panificadora"]);
        assert!(synonyms_for("astronautas").is_empty());
    }
}
