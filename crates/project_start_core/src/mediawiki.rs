use std::env;
use std::str::FromStr;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::WikiSection;

/// The slice of the MediaWiki Action API a run needs.
pub trait WikiApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    /// Current wikitext, or `None` if the page does not exist.
    fn page_text(&mut self, title: &str) -> Result<Option<String>>;
    fn edit_page(&mut self, title: &str, content: &str, summary: &str) -> Result<()>;
    fn request_count(&self) -> usize;

    fn page_exists(&mut self, title: &str) -> Result<bool> {
        Ok(self.page_text(title)?.is_some())
    }
}

/// Connection settings. Timing knobs come from `WIKI_HTTP_*` / `WIKI_RATE_LIMIT_*`.
#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub read_interval: Duration,
    pub write_interval: Duration,
    pub read_retries: usize,
    pub write_retries: usize,
    pub retry_base: Duration,
}

impl MediaWikiClientConfig {
    pub fn from_config(wiki: &WikiSection) -> Result<Self> {
        let api_url = wiki
            .api_url_owned()
            .context("wiki.api_url is not configured (or set WIKI_API_URL)")?;
        Ok(Self {
            api_url,
            user_agent: wiki.user_agent(),
            timeout: Duration::from_millis(env_parse("WIKI_HTTP_TIMEOUT_MS", 30_000)),
            read_interval: Duration::from_millis(env_parse("WIKI_RATE_LIMIT_READ", 300)),
            write_interval: Duration::from_millis(env_parse("WIKI_RATE_LIMIT_WRITE", 1_000)),
            read_retries: env_parse("WIKI_HTTP_RETRIES", 2),
            write_retries: env_parse("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_base: Duration::from_millis(env_parse("WIKI_HTTP_RETRY_DELAY_MS", 500)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

pub struct MediaWikiClient {
    http: Client,
    settings: MediaWikiClientConfig,
    endpoint: Url,
    previous_request: Option<Instant>,
    requests: usize,
    csrf: Option<String>,
}

impl MediaWikiClient {
    pub fn new(settings: MediaWikiClientConfig) -> Result<Self> {
        let endpoint = Url::parse(&settings.api_url)
            .with_context(|| format!("invalid wiki API URL: {}", settings.api_url))?;
        let http = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .cookie_store(true)
            .build()
            .context("failed to build wiki HTTP client")?;
        Ok(Self {
            http,
            settings,
            endpoint,
            previous_request: None,
            requests: 0,
            csrf: None,
        })
    }

    fn call(&mut self, access: Access, params: &[(&str, &str)]) -> Result<ApiReply> {
        let form = request_form(params);
        let retries = match access {
            Access::Read => self.settings.read_retries,
            Access::Write => self.settings.write_retries,
        };

        let mut attempt = 0;
        let response = loop {
            self.throttle(access);
            let request: RequestBuilder = match access {
                Access::Read => self.http.get(self.endpoint.clone()).query(&form),
                Access::Write => self.http.post(self.endpoint.clone()).form(&form),
            };
            let outcome = request.send();
            let transient = match &outcome {
                Ok(response) => is_retryable_status(response.status()),
                Err(error) => error.is_timeout() || error.is_connect(),
            };
            if transient && attempt < retries {
                let delay = backoff(self.settings.retry_base, attempt, access);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying wiki request");
                sleep(delay);
                attempt += 1;
                continue;
            }
            break outcome.context("wiki API request failed")?;
        };

        let status = response.status();
        if !status.is_success() {
            bail!("wiki API answered HTTP {status}");
        }
        let payload: Value = response.json().context("wiki API response is not JSON")?;
        if let Some(message) = api_error(&payload) {
            bail!("{message}");
        }
        serde_json::from_value(payload).context("unexpected wiki API response shape")
    }

    fn throttle(&mut self, access: Access) {
        let interval = match access {
            Access::Read => self.settings.read_interval,
            Access::Write => self.settings.write_interval,
        };
        if let Some(wait) = self
            .previous_request
            .and_then(|previous| interval.checked_sub(previous.elapsed()))
        {
            sleep(wait);
        }
        self.previous_request = Some(Instant::now());
        self.requests += 1;
    }

    fn fetch_token(&mut self, kind: &str) -> Result<String> {
        let reply = self.call(
            Access::Read,
            &[("action", "query"), ("meta", "tokens"), ("type", kind)],
        )?;
        let tokens = reply
            .query
            .and_then(|query| query.tokens)
            .unwrap_or_default();
        let token = if kind == "login" {
            tokens.logintoken
        } else {
            tokens.csrftoken
        };
        token.with_context(|| format!("wiki returned no {kind} token"))
    }

    fn csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf {
            return Ok(token.clone());
        }
        let token = self.fetch_token("csrf")?;
        self.csrf = Some(token.clone());
        Ok(token)
    }
}

impl WikiApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token = self.fetch_token("login")?;
        let reply = self.call(
            Access::Write,
            &[
                ("action", "login"),
                ("lgname", username),
                ("lgpassword", password),
                ("lgtoken", token.as_str()),
            ],
        )?;
        let outcome = reply.login.unwrap_or_default();
        if outcome.result.as_deref() != Some("Success") {
            bail!(
                "wiki login failed: {}",
                outcome
                    .reason
                    .or(outcome.result)
                    .unwrap_or_else(|| "no reason given".to_string())
            );
        }
        // Tokens are bound to the session.
        self.csrf = None;
        Ok(())
    }

    fn page_text(&mut self, title: &str) -> Result<Option<String>> {
        let reply = self.call(
            Access::Read,
            &[
                ("action", "query"),
                ("titles", title),
                ("prop", "revisions"),
                ("rvprop", "content"),
                ("rvslots", "main"),
            ],
        )?;
        reply
            .page_text()
            .with_context(|| format!("failed to read page '{title}'"))
    }

    fn edit_page(&mut self, title: &str, content: &str, summary: &str) -> Result<()> {
        let token = self.csrf_token()?;
        let reply = self.call(
            Access::Write,
            &[
                ("action", "edit"),
                ("title", title),
                ("text", content),
                ("summary", summary),
                ("bot", "1"),
                ("token", token.as_str()),
            ],
        )?;
        match reply.edit.and_then(|edit| edit.result) {
            Some(result) if result == "Success" => Ok(()),
            Some(result) => bail!("edit of '{title}' was not saved: {result}"),
            None => bail!("edit of '{title}' returned no result"),
        }
    }

    fn request_count(&self) -> usize {
        self.requests
    }
}

fn api_error(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    let field = |name: &str| {
        error
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string()
    };
    Some(format!("wiki API error [{}]: {}", field("code"), field("info")))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Exponential backoff; writes wait twice as long.
fn backoff(base: Duration, attempt: usize, access: Access) -> Duration {
    let delay = base.saturating_mul(1u32 << attempt.min(10));
    match access {
        Access::Read => delay,
        Access::Write => delay.saturating_mul(2),
    }
}

// An empty edit summary is left out; every other parameter is sent as given.
fn request_form<'p>(params: &[(&'p str, &'p str)]) -> Vec<(&'p str, &'p str)> {
    let mut form = vec![("format", "json"), ("formatversion", "2")];
    form.extend(
        params
            .iter()
            .filter(|(key, value)| !(*key == "summary" && value.is_empty())),
    );
    form
}

/// Every reply shape the client reads, each section optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiReply {
    query: Option<QuerySection>,
    login: Option<LoginSection>,
    edit: Option<EditSection>,
}

impl ApiReply {
    fn page_text(self) -> Result<Option<String>> {
        let Some(page) = self.query.and_then(|query| query.pages.into_iter().next()) else {
            bail!("query reply has no page");
        };
        if page.missing || page.invalid {
            return Ok(None);
        }
        Ok(Some(
            page.revisions
                .into_iter()
                .next()
                .and_then(|revision| revision.slots.main)
                .map(|slot| slot.content)
                .unwrap_or_default(),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuerySection {
    pages: Vec<PageEntry>,
    tokens: Option<Tokens>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageEntry {
    missing: bool,
    invalid: bool,
    revisions: Vec<Revision>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Revision {
    slots: Slots,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Slots {
    main: Option<Slot>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Slot {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Tokens {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginSection {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EditSection {
    result: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::tests::sample_config;

    fn reply(value: Value) -> ApiReply {
        serde_json::from_value(value).expect("reply")
    }

    #[test]
    fn page_text_reads_main_slot_content() {
        let reply = reply(json!({
            "batchcomplete": true,
            "query": {"pages": [{
                "pageid": 1, "ns": 0, "title": "Projekt 2019",
                "revisions": [{"slots": {"main": {"contentmodel": "wikitext", "content": "{{Projektår}}"}}}]
            }]}
        }));
        assert_eq!(reply.page_text().expect("text"), Some("{{Projektår}}".to_string()));
    }

    #[test]
    fn page_text_is_none_for_missing_page() {
        let reply = reply(json!({
            "query": {"pages": [{"ns": 0, "title": "Saknas", "missing": true}]}
        }));
        assert_eq!(reply.page_text().expect("text"), None);
    }

    #[test]
    fn page_text_requires_a_page_entry() {
        let error = reply(json!({"query": {"pages": []}}))
            .page_text()
            .expect_err("must fail");
        assert!(error.to_string().contains("no page"));
    }

    #[test]
    fn token_and_edit_sections_deserialize() {
        let tokens = reply(json!({"query": {"tokens": {"csrftoken": "abc+\\"}}}));
        assert_eq!(
            tokens
                .query
                .and_then(|query| query.tokens)
                .and_then(|tokens| tokens.csrftoken),
            Some("abc+\\".to_string())
        );
        let edit = reply(json!({"edit": {"result": "Success", "pageid": 3}}));
        assert_eq!(
            edit.edit.and_then(|edit| edit.result).as_deref(),
            Some("Success")
        );
    }

    #[test]
    fn api_error_formats_code_and_info() {
        let payload = json!({"error": {"code": "protectedpage", "info": "This page is protected"}});
        assert_eq!(
            api_error(&payload).as_deref(),
            Some("wiki API error [protectedpage]: This page is protected")
        );
        assert_eq!(api_error(&json!({"query": {}})), None);
    }

    #[test]
    fn retryable_statuses_are_transient_only() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn request_form_keeps_empty_page_text() {
        let form = request_form(&[("action", "edit"), ("text", ""), ("summary", "")]);
        assert_eq!(
            form,
            vec![
                ("format", "json"),
                ("formatversion", "2"),
                ("action", "edit"),
                ("text", "")
            ]
        );
    }

    #[test]
    fn backoff_doubles_per_attempt_and_for_writes() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff(base, 0, Access::Read), Duration::from_millis(500));
        assert_eq!(backoff(base, 2, Access::Read), Duration::from_millis(2_000));
        assert_eq!(backoff(base, 1, Access::Write), Duration::from_millis(2_000));
    }

    #[test]
    fn client_config_takes_api_url_from_config() {
        let config = sample_config();
        let settings = MediaWikiClientConfig::from_config(&config.wiki).expect("settings");
        assert!(!settings.api_url.is_empty());
        assert!(MediaWikiClient::new(settings).is_ok());
    }

    #[test]
    fn client_rejects_invalid_api_url() {
        let config = sample_config();
        let mut settings = MediaWikiClientConfig::from_config(&config.wiki).expect("settings");
        settings.api_url = "not a url".to_string();
        assert!(MediaWikiClient::new(settings).is_err());
    }
}
