use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::conduit::{TrackerApi, TrackerProject, add_project};
use crate::config::Config;
use crate::goals::{GoalTable, read_goals};
use crate::mediawiki::WikiApi;
use crate::pages::{manual_update_notice, ticket_description};
use crate::project::{Project, ProjectName, ProjectRegistry, parse_projects};
use crate::publish::{Component, PublishOptions, StdinConfirm, WikiPublisher};
use crate::tsv::{read_records, read_rows};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub year: i32,
    pub dry_run: bool,
    pub overwrite: bool,
    pub prompt: bool,
    /// Only start this project and skip the year pages.
    pub project: Option<String>,
    /// Project pages to write; empty means all of them.
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    pub projects: Vec<Project>,
    pub goals: GoalTable,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub tracker_projects: Vec<TrackerProject>,
    pub started_projects: Vec<String>,
    pub touched_pages: Vec<String>,
    pub skipped: Vec<String>,
    pub unmatched_projects: Vec<String>,
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn record(&mut self, error: anyhow::Error) {
        error!("{error:#}");
        self.errors.push(format!("{error:#}"));
    }
}

pub fn load_inputs(config: &Config, project_file: &Path, goal_file: &Path) -> Result<RunInputs> {
    let records = read_records(project_file)?;
    let projects = parse_projects(&records, &config.project_columns)
        .with_context(|| format!("failed to read projects from {}", project_file.display()))?;
    let goals = read_goals(&read_rows(goal_file)?, &config.goals);
    info!(
        "Read {} projects and goals for {} projects.",
        projects.len(),
        goals.projects.len()
    );
    Ok(RunInputs { projects, goals })
}

/// Start every eligible project, then build the year pages.
///
/// Failures for one project or page are logged and collected in the report;
/// the run carries on with the rest.
pub fn run(
    config: &Config,
    options: &RunOptions,
    inputs: &RunInputs,
    wiki: &mut dyn WikiApi,
    tracker: &mut dyn TrackerApi,
) -> RunReport {
    let mut report = RunReport::default();
    let mut registry = ProjectRegistry::new();
    let mut seen_goals = BTreeSet::new();

    let mut publisher = WikiPublisher::new(
        wiki,
        &config.wiki,
        PublishOptions {
            dry_run: options.dry_run,
            overwrite: options.overwrite,
            year: options.year,
            components: options.components.clone(),
        },
    );
    if options.prompt {
        publisher = publisher.with_confirm(Box::new(StdinConfirm));
    }

    for component in &options.components {
        if let Component::Subpage(title) = component
            && !config.wiki.subpages.iter().any(|subpage| subpage.title == *title)
        {
            report.record(anyhow::anyhow!(
                "unknown component '{title}', expected main, categories or a subpage title"
            ));
        }
    }

    if let Some(number) = &options.project
        && !inputs.projects.iter().any(|project| project.number == *number)
    {
        report.record(anyhow::anyhow!("project {number} is not in the projects file"));
    }

    for project in &inputs.projects {
        if let Some(number) = &options.project
            && project.number != *number
        {
            continue;
        }
        if project.is_inactive() {
            info!("Skipping '{}', marked as inactive.", project.english_name);
            report.skipped.push(project.number.clone());
            continue;
        }
        if project.is_subproject() {
            debug!("Skipping subproject '{}'.", project.english_name);
            report.skipped.push(project.number.clone());
            continue;
        }
        if project.number.is_empty() {
            report.record(anyhow::anyhow!(
                "project '{}' has no project number. It will not be created.",
                project.english_name
            ));
            continue;
        }
        if inputs.goals.for_project(&project.english_name).is_none() {
            warn!(
                "Project name '{}' found in projects file, but not in goals file. It will not be created.",
                project.english_name
            );
            report.skipped.push(project.number.clone());
            continue;
        }
        seen_goals.insert(project.english_name.as_str());

        info!("Processing project '{}'.", project.swedish_name);
        let tracker_project = match add_project(
            tracker,
            &config.phab,
            &project.english_name,
            &ticket_description(project),
            options.dry_run,
        ) {
            Ok(tracker_project) => tracker_project,
            Err(error) => {
                report.record(error.context(format!(
                    "failed to add tracker project for '{}'",
                    project.english_name
                )));
                continue;
            }
        };

        for error in publisher.add_project_pages(project, &inputs.goals, &tracker_project) {
            report.record(error);
        }
        registry.insert(
            project.number.clone(),
            ProjectName {
                number: project.number.clone(),
                swedish: project.swedish_name.clone(),
                english: project.english_name.clone(),
            },
        );
        report.started_projects.push(project.number.clone());
        report.tracker_projects.push(tracker_project);
    }

    match &options.project {
        Some(number) => {
            if let Some(name) = registry.get(number) {
                warn!(
                    "{}",
                    manual_update_notice(&config.wiki, number, &name.swedish, options.year)
                );
            }
        }
        None => {
            for goals in &inputs.goals.projects {
                if !seen_goals.contains(goals.english_name.as_str()) {
                    warn!(
                        "Project name '{}' found in goals file, but not in projects file. It will not be created.",
                        goals.english_name
                    );
                }
            }

            // A missing plan is reported by the year pages that need it.
            if let Ok(programs) = publisher.programs(&registry) {
                report.unmatched_projects = programs.unmatched_projects.clone();
            }
            for number in report.unmatched_projects.clone() {
                report.record(anyhow::anyhow!(
                    "project {number} matches no strategy in the operational plan"
                ));
            }
            for error in publisher.add_year_pages(&registry) {
                report.record(error);
            }
        }
    }

    for error in publisher.update_name_templates(&registry) {
        report.record(error);
    }

    publisher.log_report();
    report.touched_pages = publisher.touched_pages().to_vec();
    report
}
