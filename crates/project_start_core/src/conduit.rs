use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::PhabSection;
use crate::pages::tracker_project_name;

const TOKEN_PARAMETER: &str = "api.token";
const MASKED_TOKEN: &str = "api-...";
const DRY_RUN_PROJECT_ID: i64 = 1;

pub trait TrackerApi {
    /// Call a Conduit method and return its `result` payload.
    fn call(&mut self, method: &str, params: &Value) -> Result<Value>;
}

pub struct ConduitClient {
    client: Client,
    api_url: String,
    api_token: String,
    request_delay: Duration,
    last_request_at: Option<Instant>,
}

impl ConduitClient {
    pub fn new(config: &PhabSection) -> Result<Self> {
        let Some(api_token) = config.api_token_owned() else {
            bail!("phab.api_token is not configured (or set PHAB_API_TOKEN)");
        };
        let request_delay = Duration::try_from_secs_f64(config.request_delay)
            .with_context(|| format!("invalid phab.request_delay: {}", config.request_delay))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Conduit HTTP client")?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_token,
            request_delay,
            last_request_at: None,
        })
    }

    fn apply_rate_limit(&mut self) {
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < self.request_delay {
                let wait = self.request_delay - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "waiting before next Conduit request");
                sleep(wait);
            }
        }
        self.last_request_at = Some(Instant::now());
    }
}

impl TrackerApi for ConduitClient {
    fn call(&mut self, method: &str, params: &Value) -> Result<Value> {
        self.apply_rate_limit();
        let mut form = flatten_parameters(params);
        let url = format!("{}/{method}", self.api_url);
        debug!(
            "POST to Phabricator API on {url}: {:?}",
            masked(&form, MASKED_TOKEN)
        );
        form.push((TOKEN_PARAMETER.to_string(), self.api_token.clone()));

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .with_context(|| format!("failed to call Conduit method {method}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("Conduit method {method} failed with HTTP {status}");
        }
        let payload: Value = response
            .json()
            .with_context(|| format!("failed to decode Conduit response for {method}"))?;
        debug!("Response: {payload}");
        conduit_result(payload)
    }
}

/// A project on the tracker, either found or newly created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerProject {
    pub id: i64,
    pub name: String,
    pub created: bool,
}

/// Create the tracker project for `name` under the configured parent.
///
/// An existing project with the same tracker name is returned as is. In
/// dry-run mode nothing is written and the id is a placeholder.
pub fn add_project(
    api: &mut dyn TrackerApi,
    config: &PhabSection,
    name: &str,
    description: &str,
    dry_run: bool,
) -> Result<TrackerProject> {
    let (parent_phid, parent_name) = parent_project(api, config.parent_project_id)?;
    let tracker_name = tracker_project_name(&parent_name, name);

    if let Some(id) = find_project_id(api, &tracker_name)? {
        warn!("Project '{tracker_name}' already exists. It will not be created.");
        return Ok(TrackerProject {
            id,
            name: tracker_name,
            created: false,
        });
    }

    if dry_run {
        info!("Would create tracker project '{tracker_name}'");
        return Ok(TrackerProject {
            id: DRY_RUN_PROJECT_ID,
            name: tracker_name,
            created: true,
        });
    }

    let params = json!({
        "transactions": [
            {"type": "name", "value": tracker_name},
            {"type": "description", "value": description},
            {"type": "parent", "value": parent_phid},
        ]
    });
    let result = api.call("project.edit", &params)?;
    let id = result
        .pointer("/object/id")
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow::anyhow!("project.edit response has no object id"))?;
    info!("Created tracker project '{tracker_name}' with id {id}");
    Ok(TrackerProject {
        id,
        name: tracker_name,
        created: true,
    })
}

fn parent_project(api: &mut dyn TrackerApi, id: i64) -> Result<(String, String)> {
    let result = api.call("project.search", &json!({"constraints": {"ids": [id]}}))?;
    let Some(parent) = result.pointer("/data/0") else {
        bail!("parent tracker project {id} not found");
    };
    let phid = parent
        .get("phid")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("parent tracker project {id} has no phid"))?;
    let name = parent
        .pointer("/fields/name")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("parent tracker project {id} has no name"))?;
    Ok((phid.to_string(), name.to_string()))
}

// `query` is a fulltext search, so only an exact name counts as a match.
fn find_project_id(api: &mut dyn TrackerApi, name: &str) -> Result<Option<i64>> {
    let result = api.call("project.search", &json!({"constraints": {"query": name}}))?;
    let data = result
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    Ok(data
        .iter()
        .find(|project| project.pointer("/fields/name").and_then(Value::as_str) == Some(name))
        .and_then(|project| project.get("id"))
        .and_then(Value::as_i64))
}

/// Flatten nested parameters into Conduit's bracketed form names:
/// `{"transactions": [{"type": "name"}]}` becomes `transactions[0][type]=name`.
pub fn flatten_parameters(params: &Value) -> Vec<(String, String)> {
    let mut output = Vec::new();
    flatten_into("", params, &mut output);
    output
}

fn flatten_into(prefix: &str, value: &Value, output: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, item) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}[{key}]")
                };
                flatten_into(&name, item, output);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_into(&format!("{prefix}[{index}]"), item, output);
            }
        }
        Value::Null => {}
        Value::String(text) => output.push((prefix.to_string(), text.clone())),
        other => output.push((prefix.to_string(), other.to_string())),
    }
}

fn masked(form: &[(String, String)], placeholder: &str) -> Vec<(String, String)> {
    let mut logged = form.to_vec();
    logged.push((TOKEN_PARAMETER.to_string(), placeholder.to_string()));
    logged
}

fn conduit_result(mut payload: Value) -> Result<Value> {
    if let Some(info) = payload.get("error_info").filter(|info| !info.is_null()) {
        let code = payload
            .get("error_code")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        bail!("Error from Phabricator API [{code}]: {}", info.as_str().unwrap_or_default());
    }
    Ok(payload
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}
