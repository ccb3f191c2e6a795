use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_yaml::{Mapping, Value};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_USER_AGENT: &str = "project-start/0.2";
pub const DEFAULT_LAYOUT_TEMPLATE: &str = "Aktuella projekt/layout";
pub const YEAR_PLACEHOLDER: &str = "<YEAR>";

/// Column labels every projects file must map to a header.
pub const REQUIRED_PROJECT_LABELS: [&str; 7] = [
    "project_id",
    "swedish_name",
    "english_name",
    "area",
    "about_english",
    "super_project",
    "skip",
];

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    pub project_columns: ProjectColumns,
    pub goals: GoalLayout,
    pub wiki: WikiSection,
    pub phab: PhabSection,
}

/// Canonical label -> header text in the projects file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectColumns {
    columns: Vec<(String, String)>,
}

impl<'de> Deserialize<'de> for ProjectColumns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ordered(deserializer).map(Self::new)
    }
}

impl ProjectColumns {
    pub fn new(columns: Vec<(String, String)>) -> Self {
        Self { columns }
    }

    pub fn header(&self, label: &str) -> Result<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, header)| header.as_str())
            .ok_or_else(|| anyhow::anyhow!("project_columns has no entry for label `{label}`"))
    }

    pub fn validate(&self) -> Result<()> {
        for label in REQUIRED_PROJECT_LABELS {
            self.header(label)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GoalLayout {
    pub project_row: usize,
    pub first_project_column: usize,
    #[serde(default)]
    pub last_row: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub edit_summary: String,
    pub project_namespace: String,
    pub project_template: String,
    #[serde(default, deserialize_with = "ordered")]
    pub project_parameters: Vec<(String, String)>,
    #[serde(default)]
    pub subpages: Vec<SubpageConfig>,
    pub year_pages: YearPages,
    pub project_name_template: String,
    pub project_number_template: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SubpageConfig {
    pub title: String,
    pub template_name: String,
    /// Template parameter -> project column label.
    #[serde(default, deserialize_with = "ordered")]
    pub parameters: Vec<(String, String)>,
    /// Template parameter -> goals template name. Only the first entry is used.
    #[serde(default, deserialize_with = "ordered")]
    pub add_goals_parameters: Vec<(String, String)>,
}

impl SubpageConfig {
    pub fn goals_parameter(&self) -> Option<(&str, &str)> {
        self.add_goals_parameters
            .first()
            .map(|(key, template)| (key.as_str(), template.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct YearPages {
    pub operational_plan: String,
    /// Page title -> template substituted with the year as only parameter.
    #[serde(default, deserialize_with = "ordered")]
    pub simple: Vec<(String, String)>,
    pub projects: TitledTemplate,
    pub program_overview: ProgramOverviewConfig,
    pub categories: YearCategories,
    pub current_projects_template: CurrentProjectsConfig,
    pub volunteer_tasks: TitledTemplate,
}

impl YearPages {
    /// Every page title the year run touches, with the placeholder left in.
    pub fn titles(&self) -> Vec<String> {
        let mut titles = vec![self.operational_plan.clone()];
        titles.extend(self.simple.iter().map(|(title, _)| title.clone()));
        titles.push(self.projects.title.clone());
        titles.push(self.program_overview.title.clone());
        titles.push(self.current_projects_template.title.clone());
        titles.push(self.volunteer_tasks.title.clone());
        titles
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TitledTemplate {
    pub title: String,
    pub template: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProgramOverviewConfig {
    pub title: String,
    pub templates: OverviewTemplates,
    #[serde(default)]
    pub colours: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OverviewTemplates {
    pub page: String,
    pub program: String,
    pub strategy: String,
    pub goal: String,
    pub project: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct YearCategories {
    pub general: String,
    #[serde(default, deserialize_with = "ordered")]
    pub pages: Vec<(String, Option<OneOrMany>)>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value.clone()],
            Self::Many(values) => values.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CurrentProjectsConfig {
    pub title: String,
    #[serde(default = "default_layout_template")]
    pub layout_template: String,
    /// Template parameter -> program name as written in the operational plan.
    #[serde(default, deserialize_with = "ordered")]
    pub parameters: Vec<(String, String)>,
}

fn default_layout_template() -> String {
    DEFAULT_LAYOUT_TEMPLATE.to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PhabSection {
    pub api_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    pub parent_project_id: i64,
    #[serde(default = "default_request_delay")]
    pub request_delay: f64,
}

fn default_request_delay() -> f64 {
    0.5
}

impl WikiSection {
    /// Resolve the wiki API URL: env WIKI_API_URL > config.
    pub fn api_url_owned(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.api_url.clone())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn project_title(&self, name: &str) -> String {
        format!("{}:{name}", self.project_namespace)
    }
}

impl PhabSection {
    /// Resolve the Conduit token: env PHAB_API_TOKEN > config.
    pub fn api_token_owned(&self) -> Option<String> {
        env_override("PHAB_API_TOKEN").or_else(|| {
            self.api_token
                .as_ref()
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty())
        })
    }
}

/// Load and parse the YAML config. Unlike optional settings files, this one is required.
pub fn load_config(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        bail!("config file not found: {}", config_path.display());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    parse_config(&content).with_context(|| format!("failed to parse {}", config_path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    let parsed: Config = serde_yaml::from_str(content)?;
    parsed.project_columns.validate()?;
    Ok(parsed)
}

pub fn replace_year(raw: &str, year: i32) -> String {
    raw.replace(YEAR_PLACEHOLDER, &year.to_string())
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

// serde_yaml mappings keep document order; a BTreeMap would not.
fn ordered<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: DeserializeOwned,
{
    let mapping = Option::<Mapping>::deserialize(deserializer)?.unwrap_or_default();
    let mut output = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let key = match key {
            Value::String(text) => text,
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "unsupported mapping key: {other:?}"
                )));
            }
        };
        let value = serde_yaml::from_value(value).map_err(serde::de::Error::custom)?;
        output.push((key, value));
    }
    Ok(output)
}
