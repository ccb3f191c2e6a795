use std::fmt;
use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::{WikiSection, replace_year};
use crate::conduit::TrackerProject;
use crate::goals::GoalTable;
use crate::mediawiki::WikiApi;
use crate::pages::{
    PageDraft, RowInsert, current_projects_template, insert_row_before_default,
    name_template_row, number_template_row, program_overview_page, project_category_page,
    project_main_page, project_subpage, projects_year_page, simple_year_page,
    volunteer_tasks_page, year_category_pages,
};
use crate::programs::ProgramTable;
use crate::project::{Project, ProjectRegistry};

/// Asks the operator whether a page should be written.
pub trait Confirm {
    fn confirm(&mut self, title: &str) -> Result<bool>;
}

pub struct AlwaysYes;

impl Confirm for AlwaysYes {
    fn confirm(&mut self, _title: &str) -> Result<bool> {
        Ok(true)
    }
}

pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, title: &str) -> Result<bool> {
        print!("Add page \"{title}\"? (y/N) ");
        io::stdout().flush().context("failed to flush prompt")?;
        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("failed to read answer from stdin")?;
        Ok(answer.trim().eq_ignore_ascii_case("y"))
    }
}

/// A page the year pages are built from does not exist on the wiki.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMissing {
    pub title: String,
}

impl fmt::Display for PageMissing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Page '{}' doesn't exist and is required to create this page.",
            self.title
        )
    }
}

impl std::error::Error for PageMissing {}

/// A part of a project's pages that can be written on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    MainPage,
    Categories,
    Subpage(String),
}

impl Component {
    /// `main` and `categories` are keywords, anything else names a subpage.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "main" => Self::MainPage,
            "categories" => Self::Categories,
            title => Self::Subpage(title.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub dry_run: bool,
    pub overwrite: bool,
    pub year: i32,
    /// Project pages to write; empty means all of them.
    pub components: Vec<Component>,
}

impl PublishOptions {
    fn includes(&self, component: &Component) -> bool {
        self.components.is_empty() || self.components.contains(component)
    }
}

const CATEGORIES_PROMPT: &str = "categories";

type ProgramPageBuilder =
    fn(&WikiSection, &ProgramTable, &ProjectRegistry, i32) -> Result<PageDraft>;

fn overview_page(
    wiki: &WikiSection,
    programs: &ProgramTable,
    _projects: &ProjectRegistry,
    year: i32,
) -> Result<PageDraft> {
    program_overview_page(wiki, programs, year)
}

/// Writes drafts to the wiki, skipping pages that exist unless overwriting.
pub struct WikiPublisher<'a> {
    wiki: &'a mut dyn WikiApi,
    config: &'a WikiSection,
    options: PublishOptions,
    confirm: Box<dyn Confirm + 'a>,
    programs: Option<ProgramTable>,
    touched_pages: Vec<String>,
}

impl<'a> WikiPublisher<'a> {
    pub fn new(wiki: &'a mut dyn WikiApi, config: &'a WikiSection, options: PublishOptions) -> Self {
        Self {
            wiki,
            config,
            options,
            confirm: Box::new(AlwaysYes),
            programs: None,
            touched_pages: Vec::new(),
        }
    }

    pub fn with_confirm(mut self, confirm: Box<dyn Confirm + 'a>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn touched_pages(&self) -> &[String] {
        &self.touched_pages
    }

    /// Write `draft` unless the page exists. Returns whether it was written.
    pub fn write_if_absent(&mut self, draft: &PageDraft) -> Result<bool> {
        if !self.options.overwrite && self.wiki.page_exists(&draft.title)? {
            warn!("Page '{}' already exists. It will not be created.", draft.title);
            return Ok(false);
        }
        self.write(draft)?;
        Ok(true)
    }

    fn write(&mut self, draft: &PageDraft) -> Result<()> {
        info!("Writing to page '{}'.", draft.title);
        debug!("{}", draft.content);
        if !self.options.dry_run {
            self.wiki
                .edit_page(&draft.title, &draft.content, &self.config.edit_summary)
                .with_context(|| format!("failed to write page '{}'", draft.title))?;
        }
        self.touched_pages.push(draft.title.clone());
        Ok(())
    }

    /// Main page, subpages and category page for one project, limited to the
    /// selected components.
    ///
    /// Pages are independent: a failure is returned and the remaining pages
    /// are still written.
    pub fn add_project_pages(
        &mut self,
        project: &Project,
        goals: &GoalTable,
        tracker: &TrackerProject,
    ) -> Vec<anyhow::Error> {
        let config = self.config;
        let year = self.options.year;
        let options = &self.options;
        let mut drafts = Vec::new();
        if options.includes(&Component::MainPage) {
            drafts.push(project_main_page(config, project, year, tracker.id, &tracker.name));
        }
        drafts.extend(
            config
                .subpages
                .iter()
                .filter(|subpage| options.includes(&Component::Subpage(subpage.title.clone())))
                .map(|subpage| project_subpage(config, subpage, project, goals, year)),
        );
        if options.includes(&Component::Categories) {
            drafts.push(Ok(project_category_page(project, year)));
        }

        let mut errors = Vec::new();
        for draft in drafts {
            let result = draft.and_then(|draft| self.write_if_absent(&draft));
            if let Err(error) = result {
                errors.push(error.context(format!(
                    "failed to add pages for project '{}'",
                    project.swedish_name
                )));
            }
        }
        errors
    }

    /// Parsed operational plan, fetched once per run.
    pub fn programs(&mut self, projects: &ProjectRegistry) -> Result<&ProgramTable> {
        if self.programs.is_none() {
            let title = replace_year(&self.config.year_pages.operational_plan, self.options.year);
            let Some(text) = self.wiki.page_text(&title)? else {
                return Err(PageMissing { title }.into());
            };
            let numbers = projects.keys().cloned().collect::<Vec<_>>();
            let table = ProgramTable::parse(&text, &numbers)
                .with_context(|| format!("failed to parse operational plan '{title}'"))?;
            if !table.unmatched_projects.is_empty() {
                warn!(
                    "There were projects which could not be matched to programs, these will be skipped from overview pages: '{}'",
                    table.unmatched_projects.join(", ")
                );
            }
            self.programs = Some(table);
        }
        self.programs
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("operational plan was not loaded"))
    }

    /// Pages for the new year. Each page is attempted on its own; failures are returned.
    pub fn add_year_pages(&mut self, projects: &ProjectRegistry) -> Vec<anyhow::Error> {
        let config = self.config;
        let year = self.options.year;
        let pages = &config.year_pages;
        let mut errors = Vec::new();

        for (raw_title, template) in &pages.simple {
            let draft = simple_year_page(raw_title, template, year);
            if let Err(error) = self.confirm_and_write(&draft) {
                errors.push(error);
            }
        }

        self.try_program_page(&pages.projects.title, projects, projects_year_page, &mut errors);
        self.try_program_page(&pages.program_overview.title, projects, overview_page, &mut errors);
        self.add_year_categories(&mut errors);
        self.try_program_page(
            &pages.current_projects_template.title,
            projects,
            current_projects_template,
            &mut errors,
        );
        self.try_program_page(&pages.volunteer_tasks.title, projects, volunteer_tasks_page, &mut errors);
        errors
    }

    /// Category pages are confirmed once, as a group.
    fn add_year_categories(&mut self, errors: &mut Vec<anyhow::Error>) {
        match self.confirm.confirm(CATEGORIES_PROMPT) {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                errors.push(error);
                return;
            }
        }
        for draft in year_category_pages(self.config, self.options.year) {
            if let Err(error) = self.write_if_absent(&draft) {
                errors.push(error);
            }
        }
    }

    fn confirm_and_write(&mut self, draft: &PageDraft) -> Result<()> {
        if self.confirm.confirm(&draft.title)? {
            self.write_if_absent(draft)?;
        }
        Ok(())
    }

    fn try_program_page(
        &mut self,
        raw_title: &str,
        projects: &ProjectRegistry,
        build: ProgramPageBuilder,
        errors: &mut Vec<anyhow::Error>,
    ) {
        let title = replace_year(raw_title, self.options.year);
        if let Err(error) = self.add_program_page(&title, projects, build) {
            errors.push(error.context(format!("Error when processing '{title}'.")));
        }
    }

    fn add_program_page(
        &mut self,
        title: &str,
        projects: &ProjectRegistry,
        build: ProgramPageBuilder,
    ) -> Result<()> {
        if !self.confirm.confirm(title)? {
            return Ok(());
        }
        // Check first so an existing page does not need the operational plan.
        if !self.options.overwrite && self.wiki.page_exists(title)? {
            warn!("Page '{title}' already exists. It will not be created.");
            return Ok(());
        }
        let config = self.config;
        let year = self.options.year;
        let draft = {
            let programs = self.programs(projects)?;
            build(config, programs, projects, year)?
        };
        self.write(&draft)
    }

    /// Add rows for new projects to the project name and number switch templates.
    pub fn update_name_templates(&mut self, projects: &ProjectRegistry) -> Vec<anyhow::Error> {
        let config = self.config;
        let name_rows = projects
            .values()
            .map(|name| {
                let row = name_template_row(&name.number, &name.english, &name.swedish);
                (name.number.clone(), row)
            })
            .collect::<Vec<_>>();
        let number_rows = projects
            .values()
            .map(|name| (name.number.clone(), number_template_row(&name.number, &name.swedish)))
            .collect::<Vec<_>>();

        let mut errors = Vec::new();
        for (title, rows) in [
            (config.project_name_template.as_str(), name_rows.as_slice()),
            (config.project_number_template.as_str(), number_rows.as_slice()),
        ] {
            if let Err(error) = self.update_switch_template(title, rows) {
                errors.push(error.context(format!("failed to update template '{title}'")));
            }
        }
        errors
    }

    fn update_switch_template(&mut self, title: &str, rows: &[(String, String)]) -> Result<()> {
        let Some(mut text) = self.wiki.page_text(title)? else {
            return Err(PageMissing {
                title: title.to_string(),
            }
            .into());
        };
        let mut changed = false;
        for (number, row) in rows {
            match insert_row_before_default(&text, row, number) {
                RowInsert::Inserted(updated) => {
                    text = updated;
                    changed = true;
                }
                RowInsert::AlreadyPresent => {
                    debug!("Skipping adding existing project to template {title}: {number}.");
                }
                RowInsert::NoDefaultRow => {
                    warn!("No default row in template {title}.");
                    return Ok(());
                }
            }
        }
        if changed && self.confirm.confirm(title)? {
            self.write(&PageDraft::new(title, text))?;
        }
        Ok(())
    }

    pub fn log_report(&self) {
        info!("These pages were modified:");
        for title in &self.touched_pages {
            info!("{title}");
        }
    }
}
