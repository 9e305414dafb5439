//! BrasilAPI client (`GET {base}/api/cnpj/v1/{cnpj}`).

use async_trait::async_trait;
use prospector_shared::{
    Cnpj, Contacts, ProspectorError, RegistrationStatus, ResolvedEntity, Result, SizeBand,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{RegistryProvider, base_url, build_client, non_empty};

/// Primary registry provider.
pub struct BrasilApi {
    client: Client,
    base_url: String,
}

impl BrasilApi {
    pub fn new(base: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url(base),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Company {
    #[serde(default)]
    razao_social: String,
    #[serde(default)]
    nome_fantasia: Option<String>,
    #[serde(default)]
    porte: Option<String>,
    #[serde(default)]
    descricao_situacao_cadastral: Option<String>,
    #[serde(default)]
    situacao_cadastral: Option<SituationCode>,
    #[serde(default)]
    municipio: Option<String>,
    #[serde(default)]
    uf: Option<String>,
    #[serde(default)]
    cnae_fiscal_descricao: Option<String>,
    #[serde(default)]
    ddd_telefone_1: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    opcao_pelo_mei: Option<bool>,
}

/// Numeric registration situation; some mirrors send it as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SituationCode {
    Number(u64),
    Text(String),
}

impl SituationCode {
    fn label(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }
}

impl Company {
    fn into_entity(self, cnpj: &Cnpj) -> Result<ResolvedEntity> {
        let legal_name = self.razao_social.trim().to_string();
        if legal_name.is_empty() {
            return Err(ProspectorError::parse(format!(
                "brasilapi: record for {cnpj} has no legal name"
            )));
        }

        let size_label = non_empty(self.porte).unwrap_or_default();
        let size_band = if self.opcao_pelo_mei == Some(true) {
            SizeBand::Mei
        } else {
            SizeBand::from_label(&size_label)
        };
        // The description wins; the numeric code ("2" = active) covers
        // records that only carry the code.
        let status_label = non_empty(self.descricao_situacao_cadastral)
            .or_else(|| self.situacao_cadastral.map(SituationCode::label))
            .unwrap_or_default();

        Ok(ResolvedEntity {
            cnpj: cnpj.clone(),
            legal_name,
            trade_name: non_empty(self.nome_fantasia),
            size_band,
            size_label,
            status: RegistrationStatus::from_label(&status_label),
            status_label,
            municipality: non_empty(self.municipio).unwrap_or_default(),
            region: non_empty(self.uf).unwrap_or_default().to_ascii_uppercase(),
            primary_activity: non_empty(self.cnae_fiscal_descricao),
            contacts: Contacts {
                phone: non_empty(self.ddd_telefone_1),
                email: non_empty(self.email).map(|e| e.to_lowercase()),
            },
        })
    }
}

#[async_trait]
impl RegistryProvider for BrasilApi {
    fn id(&self) -> &'static str {
        "brasilapi"
    }

    async fn fetch(&self, cnpj: &Cnpj) -> Result<ResolvedEntity> {
        let url = format!("{}/api/cnpj/v1/{}", self.base_url, cnpj.as_str());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProspectorError::Network(format!("{url}: {e}")))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(ProspectorError::Network(format!("brasilapi: {cnpj} not found")));
            }
            s => {
                return Err(ProspectorError::Network(format!("{url}: HTTP {s}")));
            }
        }

        let company: Company = response
            .json()
            .await
            .map_err(|e| ProspectorError::parse(format!("brasilapi response: {e}")))?;
        debug!(cnpj = %cnpj, "brasilapi record fetched");
        company.into_entity(cnpj)
    }
}
