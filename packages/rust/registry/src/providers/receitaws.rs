//! ReceitaWS client (`GET {base}/v1/cnpj/{cnpj}`).
//!
//! ReceitaWS answers 200 even for failures and flags them with
//! `"status": "ERROR"` plus a `message`.

use async_trait::async_trait;
use prospector_shared::{
    Cnpj, Contacts, ProspectorError, RegistrationStatus, ResolvedEntity, Result, SizeBand,
};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{RegistryProvider, base_url, build_client, non_empty};

/// Secondary registry provider.
pub struct ReceitaWs {
    client: Client,
    base_url: String,
}

impl ReceitaWs {
    pub fn new(base: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url(base),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Activity {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Company {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    nome: String,
    #[serde(default)]
    fantasia: Option<String>,
    #[serde(default)]
    porte: Option<String>,
    #[serde(default)]
    situacao: Option<String>,
    #[serde(default)]
    municipio: Option<String>,
    #[serde(default)]
    uf: Option<String>,
    #[serde(default)]
    atividade_principal: Vec<Activity>,
    #[serde(default)]
    telefone: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl Company {
    fn into_entity(self, cnpj: &Cnpj) -> Result<ResolvedEntity> {
        if self.status.eq_ignore_ascii_case("ERROR") {
            return Err(ProspectorError::Network(format!(
                "receitaws: {}",
                self.message.as_deref().unwrap_or("unknown error")
            )));
        }
        let legal_name = self.nome.trim().to_string();
        if legal_name.is_empty() {
            return Err(ProspectorError::parse(format!(
                "receitaws: record for {cnpj} has no legal name"
            )));
        }

        let size_label = non_empty(self.porte).unwrap_or_default();
        let status_label = non_empty(self.situacao).unwrap_or_default();
        // Multiple numbers come back slash-separated; the first is enough.
        let phone = non_empty(self.telefone)
            .and_then(|t| non_empty(t.split('/').next().map(str::to_string)));

        Ok(ResolvedEntity {
            cnpj: cnpj.clone(),
            legal_name,
            trade_name: non_empty(self.fantasia),
            size_band: SizeBand::from_label(&size_label),
            size_label,
            status: RegistrationStatus::from_label(&status_label),
            status_label,
            municipality: non_empty(self.municipio).unwrap_or_default(),
            region: non_empty(self.uf).unwrap_or_default().to_ascii_uppercase(),
            primary_activity: self
                .atividade_principal
                .into_iter()
                .find_map(|a| non_empty(Some(a.text))),
            contacts: Contacts {
                phone,
                email: non_empty(self.email).map(|e| e.to_lowercase()),
            },
        })
    }
}

#[async_trait]
impl RegistryProvider for ReceitaWs {
    fn id(&self) -> &'static str {
        "receitaws"
    }

    async fn fetch(&self, cnpj: &Cnpj) -> Result<ResolvedEntity> {
        let url = format!("{}/v1/cnpj/{}", self.base_url, cnpj.as_str());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProspectorError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProspectorError::Network(format!("{url}: HTTP {status}")));
        }

        let company: Company = response
            .json()
            .await
            .map_err(|e| ProspectorError::parse(format!("receitaws response: {e}")))?;
        debug!(cnpj = %cnpj, "receitaws record fetched");
        company.into_entity(cnpj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cnpj() -> Cnpj {
        Cnpj::parse("45678901000175").unwrap()
    }

    #[tokio::test]
    async fn normalizes_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/cnpj/45678901000175"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "nome": "PADARIA PAO QUENTE LTDA",
                "fantasia": "PAO QUENTE",
                "porte": "EMPRESA DE PEQUENO PORTE",
                "situacao": "ATIVA",
                "municipio": "SÃO JOSÉ DOS CAMPOS",
                "uf": "SP",
                "atividade_principal": [{"code": "10.91-1-02", "text": "Padaria e confeitaria"}],
                "telefone": "(12) 3940-1122 / (12) 99123-4567",
                "email": ""
            })))
            .mount(&server)
            .await;

        let entity = ReceitaWs::new(&server.uri()).unwrap().fetch(&cnpj()).await.unwrap();
        assert_eq!(entity.trade_name.as_deref(), Some("PAO QUENTE"));
        assert_eq!(entity.size_band, SizeBand::Small);
        assert!(entity.status.is_active());
        assert_eq!(entity.primary_activity.as_deref(), Some("Padaria e confeitaria"));
        assert_eq!(entity.contacts.phone.as_deref(), Some("(12) 3940-1122"));
        assert_eq!(entity.contacts.email, None);
    }

    #[tokio::test]
    async fn error_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ERROR",
                "message": "CNPJ inválido"
            })))
            .mount(&server)
            .await;

        let err = ReceitaWs::new(&server.uri()).unwrap().fetch(&cnpj()).await.unwrap_err();
        assert!(err.to_string().contains("CNPJ inválido"));
    }

    #[tokio::test]
    async fn rate_limit_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = ReceitaWs::new(&server.uri()).unwrap().fetch(&cnpj()).await.unwrap_err();
        assert!(matches!(err, ProspectorError::Network(_)));
    }
}
