use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::provider::{DrawSource, FetchedDraw};
use crate::bolao::dezena;
use crate::db::models::Draw;

/// Mega-Sena results API.
///
/// Serves the latest draw at `{base}/latest` and a given concurso at
/// `{base}/{number}`. Both the community mirror field names (`concurso`,
/// `dezenas`, `data`) and the official Caixa portal ones (`numero`,
/// `listaDezenas`, `dataApuracao`) are understood.
#[derive(Clone)]
pub struct MegaSenaApi {
    http: Client,
    /// Always ends with '/', so relative joins append a segment
    base_url: Url,
}

impl MegaSenaApi {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .with_context(|| format!("Invalid lottery API URL '{}'", base_url))?;
        Ok(MegaSenaApi { http, base_url })
    }

    async fn get(&self, path: &str) -> Result<FetchedDraw> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Invalid lottery API path '{}'", path))?;
        debug!("Fetching draw from {}", url);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("Lottery API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Lottery API error {}: {}", status, body);
        }

        let raw: serde_json::Value = resp
            .json()
            .await
            .context("Failed to parse lottery API response")?;

        parse_draw_response(raw)
    }
}

#[async_trait]
impl DrawSource for MegaSenaApi {
    fn name(&self) -> &str {
        "MegaSenaApi"
    }

    async fn fetch_latest(&self) -> Result<FetchedDraw> {
        self.get("latest").await
    }

    async fn fetch_draw(&self, number: i64) -> Result<FetchedDraw> {
        self.get(&number.to_string()).await
    }
}

// ── Parsing helpers ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiDraw {
    #[serde(alias = "numero")]
    concurso: i64,
    #[serde(alias = "listaDezenas")]
    dezenas: Vec<serde_json::Value>,
    #[serde(alias = "dataApuracao")]
    data: String,
    #[serde(rename = "proximoConcurso", alias = "numeroConcursoProximo")]
    proximo_concurso: i64,
    #[serde(rename = "dataProximoConcurso")]
    data_proximo_concurso: String,
}

/// Turn an API payload into a validated draw. Missing fields, a wrong
/// number of dezenas or out-of-range values are all errors.
fn parse_draw_response(raw: serde_json::Value) -> Result<FetchedDraw> {
    let api: ApiDraw =
        serde_json::from_value(raw).context("Lottery API response is missing required fields")?;

    if api.concurso <= 0 {
        anyhow::bail!("Lottery API returned invalid concurso {}", api.concurso);
    }

    // Dezenas arrive as "04" strings from most mirrors, as integers from some
    let values = api
        .dezenas
        .iter()
        .map(|v| match v {
            serde_json::Value::String(s) => Ok(s.clone()),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => Err(anyhow::anyhow!("Unexpected dezena value {}", other)),
        })
        .collect::<Result<Vec<String>>>()?;
    let numbers = dezena::parse_draw(&values)
        .with_context(|| format!("Invalid dezenas for concurso {}", api.concurso))?;

    Ok(FetchedDraw {
        draw: Draw {
            number: api.concurso,
            numbers,
            date: api.data,
            updated_at: Utc::now(),
        },
        next_draw: api.proximo_concurso,
        next_draw_date: api.data_proximo_concurso,
    })
}
