use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use std::collections::HashMap;
use std::time::Duration;

use crate::parser::extract_hidden_inputs;

/// Search box of the RNC/Cédula form.
pub const SEARCH_FIELD: &str = "ctl00$cphMain$txtRNCCedula";
/// Submit button; ASP.NET dispatches the postback on its name/value.
pub const SEARCH_BUTTON_FIELD: &str = "ctl00$cphMain$btnBuscarPorRNC";
pub const SEARCH_BUTTON_VALUE: &str = "BUSCAR";

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const ACCEPT_LANGUAGE_VALUE: &str = "es-ES,es;q=0.9";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection failure, timeout or non-2xx status.
    #[error("DGII request failed: {0}")]
    Network(String),
    /// The form page no longer carries hidden state fields.
    #[error("DGII form page has no hidden state fields: {0}")]
    MalformedPage(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// Anything that can turn a sanitized identifier into a raw DGII result page.
#[async_trait]
pub trait TaxpayerSource: Send + Sync {
    async fn fetch_result_page(&self, identifier: &str) -> Result<String, FetchError>;
}

/// Client for the DGII RNC/Cédula lookup webform.
///
/// Every lookup runs in its own [`FormSession`] so cookies never leak
/// between identifiers.
#[derive(Debug, Clone)]
pub struct FormClient {
    url: String,
    timeout: Duration,
}

impl FormClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    /// Opens a fresh cookie-carrying session.
    pub fn open_session(&self) -> Result<FormSession, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE));

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create DGII client: {}", e)))?;

        Ok(FormSession {
            client,
            url: self.url.clone(),
        })
    }
}

#[async_trait]
impl TaxpayerSource for FormClient {
    async fn fetch_result_page(&self, identifier: &str) -> Result<String, FetchError> {
        let session = self.open_session()?;
        let state = session.fetch_form_state().await?;
        session.submit_query(&state, identifier).await
    }
}

/// One GET + POST exchange sharing a cookie jar.
pub struct FormSession {
    client: reqwest::Client,
    url: String,
}

impl FormSession {
    /// GETs the form page and returns its hidden state fields.
    pub async fn fetch_form_state(&self) -> Result<HashMap<String, String>, FetchError> {
        tracing::debug!("Fetching DGII form state from {}", self.url);

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "form page returned status {}",
                status
            )));
        }

        let html = response.text().await?;
        let state = extract_hidden_inputs(&html);
        if state.is_empty() {
            tracing::error!("DGII form page layout changed: no hidden inputs found");
            return Err(FetchError::MalformedPage(self.url.clone()));
        }

        tracing::debug!("Extracted {} hidden form fields", state.len());
        Ok(state)
    }

    /// POSTs the search and returns the raw result HTML, whatever it says.
    pub async fn submit_query(
        &self,
        form_state: &HashMap<String, String>,
        identifier: &str,
    ) -> Result<String, FetchError> {
        let mut payload: Vec<(&str, &str)> = form_state
            .iter()
            .filter(|(name, _)| name.as_str() != SEARCH_FIELD && name.as_str() != SEARCH_BUTTON_FIELD)
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        payload.push((SEARCH_FIELD, identifier));
        payload.push((SEARCH_BUTTON_FIELD, SEARCH_BUTTON_VALUE));

        tracing::info!("Submitting DGII lookup for {}", identifier);

        let response = self.client.post(&self.url).form(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "lookup postback returned status {}",
                status
            )));
        }

        Ok(response.text().await?)
    }
}
