use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::config::{SubpageConfig, WikiSection, replace_year};
use crate::goals::GoalTable;
use crate::programs::ProgramTable;
use crate::project::{Project, ProjectRegistry};
use crate::template::Template;

pub const CATEGORY_NAMESPACE: &str = "Kategori";
pub const COMMENT_TEMPLATE: &str = "Utkommenterat";
pub const FULFILLMENT_PARAMETER: &str = "måluppfyllnad";
pub const YEAR_PARAMETER: &str = "år";
const PROJECT_SEPARATOR: &str = "''' · '''";
const DEFAULT_ROW_MARKER: &str = "| #default";

/// A rendered page, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDraft {
    pub title: String,
    pub content: String,
}

impl PageDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

pub fn project_main_page(
    wiki: &WikiSection,
    project: &Project,
    year: i32,
    tracker_id: i64,
    tracker_name: &str,
) -> Result<PageDraft> {
    let mut template = Template::subst(&wiki.project_template);
    for (parameter, label) in &wiki.project_parameters {
        template.add_parameter(parameter, project.value(label)?);
    }
    template.add_parameter("year", year);
    template.add_parameter("phabricatorId", tracker_id);
    template.add_parameter("phabricatorName", tracker_name);
    template.add_parameter("bot", "ja");
    Ok(PageDraft::new(
        wiki.project_title(&project.swedish_name),
        template.multiline(),
    ))
}

pub fn project_subpage(
    wiki: &WikiSection,
    subpage: &SubpageConfig,
    project: &Project,
    goals: &GoalTable,
    year: i32,
) -> Result<PageDraft> {
    let mut template = Template::subst(&subpage.template_name).param(YEAR_PARAMETER, year);
    for (parameter, label) in &subpage.parameters {
        template.add_parameter(parameter, project.value(label)?);
    }
    if let Some((parameter, goals_template)) = subpage.goals_parameter() {
        let Some(project_goals) = goals.for_project(&project.english_name) else {
            bail!(
                "no goals for '{}', page '{}' needs them",
                project.english_name,
                subpage.title
            );
        };
        let mut goals_call = Template::new(replace_year(goals_template, year));
        for (goal, planned) in &project_goals.planned {
            goals_call.add_parameter(goal, planned);
        }
        template.add_parameter(parameter, goals_call);
        template.add_parameter(FULFILLMENT_PARAMETER, goals.fulfillment_list(project_goals)?);
    }
    let title = wiki.project_title(&format!("{}/{}", project.swedish_name, subpage.title));
    Ok(PageDraft::new(title, template.multiline()))
}

/// Category page for a project, placed in the year category and its area.
pub fn project_category_page(project: &Project, year: i32) -> PageDraft {
    let mut categories = vec![format!("Projekt {year}")];
    if !project.area.is_empty() {
        categories.push(project.area.clone());
    }
    category_page(&project.swedish_name, &categories)
}

pub fn category_page(name: &str, categories: &[String]) -> PageDraft {
    let content = categories
        .iter()
        .filter(|category| category.as_str() != name)
        .map(|category| format!("[[{CATEGORY_NAMESPACE}:{category}]]\n"))
        .collect::<String>();
    PageDraft::new(format!("{CATEGORY_NAMESPACE}:{name}"), content)
}

pub fn simple_year_page(raw_title: &str, template_name: &str, year: i32) -> PageDraft {
    PageDraft::new(
        replace_year(raw_title, year),
        Template::subst(template_name).positional(year).multiline(),
    )
}

pub fn projects_year_page(
    wiki: &WikiSection,
    programs: &ProgramTable,
    projects: &ProjectRegistry,
    year: i32,
) -> Result<PageDraft> {
    let config = &wiki.year_pages.projects;
    let mut content = String::new();
    for program in &programs.programs {
        content.push_str(&format!("== {} {} ==\n", program.number, program.name));
        for strategy in &program.strategies {
            content.push_str(&format!(
                "=== {} {} ===\n",
                strategy.number, strategy.short_description
            ));
            for number in &strategy.projects {
                let name = swedish_name(projects, number)?;
                let data = Template::new(format!(
                    ":{}/Projektdata",
                    wiki.project_title(name)
                ));
                let comment = Template::subst(COMMENT_TEMPLATE).positional(number);
                content.push_str(&format!("{data}{comment}\n"));
            }
        }
    }
    let page = Template::subst(&config.template)
        .param(YEAR_PARAMETER, year)
        .param("projekt", content);
    Ok(PageDraft::new(
        replace_year(&config.title, year),
        page.multiline(),
    ))
}

pub fn program_overview_page(
    wiki: &WikiSection,
    programs: &ProgramTable,
    year: i32,
) -> Result<PageDraft> {
    let config = &wiki.year_pages.program_overview;
    let templates = &config.templates;
    let mut content = String::new();
    for (index, program) in programs.programs.iter().enumerate() {
        let Some(colour) = config.colours.get(index) else {
            bail!(
                "program_overview.colours has no colour for program '{}' (number {})",
                program.name,
                index + 1
            );
        };
        let row = Template::subst(&templates.program)
            .param("program", &program.name)
            .param("färg", colour);
        content.push_str(&row.multiline());
        content.push('\n');
        for strategy in &program.strategies {
            content.push_str(
                &Template::subst(&templates.strategy)
                    .positional(&strategy.description)
                    .multiline(),
            );
            content.push('\n');
            for goal in &strategy.goals {
                content.push_str(&Template::subst(&templates.goal).positional(goal).multiline());
                content.push('\n');
            }
            for project in &strategy.projects {
                content.push_str(
                    &Template::subst(&templates.project)
                        .positional(project)
                        .multiline(),
                );
                content.push('\n');
            }
        }
    }
    let page = Template::subst(&templates.page)
        .param(YEAR_PARAMETER, year)
        .param("tabellinnehåll", content);
    Ok(PageDraft::new(
        replace_year(&config.title, year),
        page.multiline(),
    ))
}

pub fn year_category_pages(wiki: &WikiSection, year: i32) -> Vec<PageDraft> {
    let config = &wiki.year_pages.categories;
    let general = replace_year(&config.general, year);
    config
        .pages
        .iter()
        .map(|(raw_title, extra)| {
            let mut categories = vec![general.clone()];
            if let Some(extra) = extra {
                categories.extend(extra.to_vec());
            }
            category_page(&replace_year(raw_title, year), &categories)
        })
        .collect()
}

pub fn current_projects_template(
    wiki: &WikiSection,
    programs: &ProgramTable,
    projects: &ProjectRegistry,
    year: i32,
) -> Result<PageDraft> {
    let config = &wiki.year_pages.current_projects_template;
    let mut by_program = BTreeMap::new();
    for program in &programs.programs {
        let links = program
            .project_numbers()
            .into_iter()
            .map(|number| -> Result<String> {
                let name = swedish_name(projects, number)?;
                Ok(format!("[[{}|{name}]]", wiki.project_title(name)))
            })
            .collect::<Result<Vec<_>>>()?;
        by_program.insert(program.name.as_str(), links.join(PROJECT_SEPARATOR));
    }

    let mut template = Template::new(&config.layout_template).param(YEAR_PARAMETER, year);
    for (parameter, program_name) in &config.parameters {
        let Some(links) = by_program.remove(program_name.as_str()) else {
            bail!(
                "current projects template expects program '{program_name}', which is not in the operational plan"
            );
        };
        template.add_parameter(parameter, links);
    }
    if let Some(program_name) = by_program.keys().next() {
        bail!(
            "program '{program_name}' has no parameter in the current projects template config"
        );
    }

    Ok(PageDraft::new(
        replace_year(&config.title, year),
        format!(
            "{}\n<noinclude>{{{{Dokumentation}}}}</noinclude>",
            template.multiline()
        ),
    ))
}

pub fn volunteer_tasks_page(
    wiki: &WikiSection,
    programs: &ProgramTable,
    projects: &ProjectRegistry,
    year: i32,
) -> Result<PageDraft> {
    let config = &wiki.year_pages.volunteer_tasks;
    let mut list = String::new();
    for program in &programs.programs {
        list.push_str(&format!("== {} ==\n", program.name));
        for strategy in &program.strategies {
            for number in &strategy.projects {
                let name = swedish_name(projects, number)?;
                list.push_str(&format!(
                    "{}\n",
                    Template::new(format!(":{}/Frivillig", wiki.project_title(name)))
                ));
            }
        }
        let placeholder = Template::subst(COMMENT_TEMPLATE).positional("Platshållare");
        list.push_str(&format!("{placeholder}&nbsp;\n\n"));
    }
    let page = Template::subst(&config.template)
        .param("frivilliguppdrag", list)
        .param(YEAR_PARAMETER, year);
    Ok(PageDraft::new(
        replace_year(&config.title, year),
        page.multiline(),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowInsert {
    Inserted(String),
    AlreadyPresent,
    NoDefaultRow,
}

/// Add `row` to a `#switch` template just above its `| #default` row.
pub fn insert_row_before_default(text: &str, row: &str, number: &str) -> RowInsert {
    if text.contains(number) {
        return RowInsert::AlreadyPresent;
    }
    let Some(position) = text.find(DEFAULT_ROW_MARKER) else {
        return RowInsert::NoDefaultRow;
    };
    let mut output = String::with_capacity(text.len() + row.len() + 1);
    output.push_str(&text[..position]);
    output.push_str(row);
    output.push('\n');
    output.push_str(&text[position..]);
    RowInsert::Inserted(output)
}

pub fn name_template_row(number: &str, english: &str, swedish: &str) -> String {
    format!("| {number} = {{{{#if: {{{{{{en|}}}}}}| {english} | {swedish} }}}}")
}

pub fn number_template_row(number: &str, swedish: &str) -> String {
    format!("| {swedish} = {number}")
}

/// Tracker naming convention: parent name, dash, project name with dashes for spaces.
pub fn tracker_project_name(parent_name: &str, name: &str) -> String {
    format!("{parent_name}-{}", name.replace(' ', "-"))
}

pub fn ticket_description(project: &Project) -> String {
    let about = project.about_english.trim();
    if about.is_empty() {
        format!("{} ({})", project.english_name, project.number)
    } else {
        about.to_string()
    }
}

/// Operator notice for a project started after the year pages were made.
pub fn manual_update_notice(wiki: &WikiSection, number: &str, swedish: &str, year: i32) -> String {
    let pages = wiki
        .year_pages
        .titles()
        .iter()
        .chain([&wiki.project_name_template, &wiki.project_number_template])
        .map(|title| replace_year(title, year))
        .collect::<Vec<_>>()
        .join("\n* ");
    format!("Don't forget to manually add '{number} - {swedish}' to the following pages:\n* {pages}")
}

fn swedish_name<'a>(projects: &'a ProjectRegistry, number: &str) -> Result<&'a str> {
    projects
        .get(number)
        .map(|name| name.swedish.as_str())
        .ok_or_else(|| anyhow::anyhow!("project {number} is in the operational plan but was not created in this run"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::goals::tests::sample_goals;
    use crate::programs::tests::sample_programs;
    use crate::project::ProjectName;
    use crate::project::tests::sample_projects;

    pub(crate) fn registry() -> ProjectRegistry {
        [
            ("193103", "Wikipedia i skolan", "Wikipedia in Education"),
            ("193201", "Kulturarvsdata", "Cultural Heritage Data"),
            ("194101", "Lärarstöd", "Teacher Support"),
        ]
        .into_iter()
        .map(|(number, swedish, english)| {
            (
                number.to_string(),
                ProjectName {
                    number: number.to_string(),
                    swedish: swedish.to_string(),
                    english: english.to_string(),
                },
            )
        })
        .collect()
    }

    #[test]
    fn project_main_page_uses_configured_parameters() {
        let config = sample_config();
        let project = &sample_projects()[0];
        let page = project_main_page(&config.wiki, project, 2019, 42, "WMSE-Wikipedia-in-Education")
            .expect("page");
        assert_eq!(page.title, "Projekt:Wikipedia i skolan");
        assert_eq!(
            page.content,
            "{{subst:Projekt\n\
| projektnamn = Wikipedia i skolan\n\
| projektnummer = 193103\n\
| ansvarig = Eva\n\
| year = 2019\n\
| phabricatorId = 42\n\
| phabricatorName = WMSE-Wikipedia-in-Education\n\
| bot = ja\n\
}}"
        );
    }

    #[test]
    fn plain_subpage_gets_only_the_year() {
        let config = sample_config();
        let project = &sample_projects()[0];
        let page = project_subpage(&config.wiki, &config.wiki.subpages[0], project, &sample_goals(), 2019)
            .expect("page");
        assert_eq!(page.title, "Projekt:Wikipedia i skolan/Volontärer");
        assert_eq!(page.content, "{{subst:Frivillig\n| år = 2019\n}}");
    }

    #[test]
    fn goals_subpage_nests_goal_template_and_fulfillments() {
        let config = sample_config();
        let project = &sample_projects()[0];
        let page = project_subpage(&config.wiki, &config.wiki.subpages[1], project, &sample_goals(), 2019)
            .expect("page");
        assert_eq!(page.title, "Projekt:Wikipedia i skolan/Mål");
        assert!(page.content.contains("| ansvarig = Eva"));
        assert!(page.content.contains("| mål = {{Mål 2019|T.1.1=25|A.1.2=40}}"));
        assert!(
            page.content
                .contains("| måluppfyllnad = \n* Resurser har tillförts\n* Bidragsgivare har rekryterats")
        );
    }

    #[test]
    fn goals_subpage_fails_without_goals_for_project() {
        let config = sample_config();
        let projects = sample_projects();
        let dormant = &projects[3];
        let error = project_subpage(&config.wiki, &config.wiki.subpages[1], dormant, &sample_goals(), 2019)
            .expect_err("must fail");
        assert!(error.to_string().contains("Dormant"));
    }

    #[test]
    fn category_pages_skip_self_reference() {
        let project = &sample_projects()[0];
        let page = project_category_page(project, 2019);
        assert_eq!(page.title, "Kategori:Wikipedia i skolan");
        assert_eq!(page.content, "[[Kategori:Projekt 2019]]\n[[Kategori:Utbildning]]\n");

        let page = category_page("Projekt 2019", &["Projekt 2019".to_string(), "År 2019".to_string()]);
        assert_eq!(page.content, "[[Kategori:År 2019]]\n");
    }

    #[test]
    fn project_without_area_gets_only_year_category() {
        let project = &sample_projects()[1];
        let page = project_category_page(project, 2019);
        assert_eq!(page.content, "[[Kategori:Projekt 2019]]\n");
    }

    #[test]
    fn simple_year_page_passes_year_positionally() {
        let page = simple_year_page("Budget <YEAR>", "Budget", 2019);
        assert_eq!(page.title, "Budget 2019");
        assert_eq!(page.content, "{{subst:Budget\n| 2019\n}}");
    }

    #[test]
    fn projects_year_page_lists_projects_by_strategy() {
        let config = sample_config();
        let page = projects_year_page(&config.wiki, &sample_programs(), &registry(), 2019)
            .expect("page");
        assert_eq!(page.title, "Projekt 2019");
        assert!(page.content.contains("== 1 Tillgång ==\n=== 3100 Kulturarv ===\n"));
        assert!(page.content.contains(
            "{{:Projekt:Wikipedia i skolan/Projektdata}}{{subst:Utkommenterat|193103}}\n"
        ));
        assert!(page.content.contains("=== 4100 Skola ===\n{{:Projekt:Lärarstöd/Projektdata}}"));
    }

    #[test]
    fn projects_year_page_fails_for_unknown_project() {
        let config = sample_config();
        let mut projects = registry();
        projects.remove("193201");
        let error = projects_year_page(&config.wiki, &sample_programs(), &projects, 2019)
            .expect_err("must fail");
        assert!(error.to_string().contains("193201"));
    }

    #[test]
    fn program_overview_has_rows_for_every_level() {
        let config = sample_config();
        let page = program_overview_page(&config.wiki, &sample_programs(), 2019).expect("page");
        assert_eq!(page.title, "Programöversikt 2019");
        assert!(page.content.starts_with("{{subst:Programöversikt\n| år = 2019\n| tabellinnehåll = "));
        assert!(page.content.contains("{{subst:Programöversikt/program\n| program = Tillgång\n| färg = #f00\n}}\n"));
        assert!(page.content.contains("{{subst:Programöversikt/strategi\n| Förbättra data\n}}\n"));
        assert!(page.content.contains("{{subst:Programöversikt/mål\n| Fler lärare\n}}\n"));
        assert!(page.content.contains("{{subst:Programöversikt/projekt\n| 194101\n}}\n"));
    }

    #[test]
    fn program_overview_fails_when_colours_run_out() {
        let mut config = sample_config();
        config.wiki.year_pages.program_overview.colours.truncate(1);
        let error = program_overview_page(&config.wiki, &sample_programs(), 2019).expect_err("must fail");
        assert!(error.to_string().contains("Användning"));
    }

    #[test]
    fn year_category_pages_add_general_and_extra_categories() {
        let config = sample_config();
        let pages = year_category_pages(&config.wiki, 2019);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].title, "Kategori:Projekt 2019");
        assert_eq!(pages[0].content, "[[Kategori:År 2019]]\n[[Kategori:Projekt]]\n");
        assert_eq!(pages[1].content, "[[Kategori:År 2019]]\n");
        assert_eq!(
            pages[2].content,
            "[[Kategori:År 2019]]\n[[Kategori:Ekonomi]]\n[[Kategori:Styrelsen]]\n"
        );
    }

    #[test]
    fn current_projects_template_links_projects_per_program() {
        let config = sample_config();
        let page = current_projects_template(&config.wiki, &sample_programs(), &registry(), 2019)
            .expect("page");
        assert_eq!(page.title, "Mall:Aktuella projekt 2019");
        assert!(page.content.starts_with("{{Aktuella projekt/layout\n| år = 2019\n"));
        assert!(page.content.contains(
            "| access = [[Projekt:Wikipedia i skolan|Wikipedia i skolan]]''' · '''[[Projekt:Kulturarvsdata|Kulturarvsdata]]\n"
        ));
        assert!(page.content.contains("| use = [[Projekt:Lärarstöd|Lärarstöd]]\n"));
        assert!(page.content.ends_with("}}\n<noinclude>{{Dokumentation}}</noinclude>"));
    }

    #[test]
    fn current_projects_template_fails_for_unknown_program() {
        let mut config = sample_config();
        config
            .wiki
            .year_pages
            .current_projects_template
            .parameters
            .push(("community".to_string(), "Gemenskapen".to_string()));
        let error = current_projects_template(&config.wiki, &sample_programs(), &registry(), 2019)
            .expect_err("must fail");
        assert!(error.to_string().contains("Gemenskapen"));
    }

    #[test]
    fn current_projects_template_fails_for_unmapped_program() {
        let mut config = sample_config();
        config.wiki.year_pages.current_projects_template.parameters.pop();
        let error = current_projects_template(&config.wiki, &sample_programs(), &registry(), 2019)
            .expect_err("must fail");
        assert!(error.to_string().contains("Användning"));
    }

    #[test]
    fn volunteer_tasks_page_includes_project_volunteer_subpages() {
        let config = sample_config();
        let page = volunteer_tasks_page(&config.wiki, &sample_programs(), &registry(), 2019)
            .expect("page");
        assert_eq!(page.title, "Frivilliguppdrag 2019");
        assert!(page.content.contains(
            "== Tillgång ==\n{{:Projekt:Wikipedia i skolan/Frivillig}}\n{{:Projekt:Kulturarvsdata/Frivillig}}\n{{subst:Utkommenterat|Platshållare}}&nbsp;\n\n"
        ));
    }

    #[test]
    fn insert_row_before_default_places_row_above_default() {
        let text = "{{#switch: {{{1}}}\n| 183102 = Gammalt\n| #default = Okänt\n}}";
        let row = number_template_row("193103", "Wikipedia i skolan");
        assert_eq!(
            insert_row_before_default(text, &row, "193103"),
            RowInsert::Inserted(
                "{{#switch: {{{1}}}\n| 183102 = Gammalt\n| Wikipedia i skolan = 193103\n| #default = Okänt\n}}"
                    .to_string()
            )
        );
    }

    #[test]
    fn insert_row_before_default_skips_existing_and_missing_default() {
        let text = "| 193103 = Finns\n| #default = x";
        assert_eq!(
            insert_row_before_default(text, "| 193103 = Ny", "193103"),
            RowInsert::AlreadyPresent
        );
        assert_eq!(
            insert_row_before_default("| 1 = a", "| 2 = b", "2"),
            RowInsert::NoDefaultRow
        );
    }

    #[test]
    fn name_template_row_switches_on_language() {
        assert_eq!(
            name_template_row("193103", "Wikipedia in Education", "Wikipedia i skolan"),
            "| 193103 = {{#if: {{{en|}}}| Wikipedia in Education | Wikipedia i skolan }}"
        );
    }

    #[test]
    fn tracker_name_and_description() {
        assert_eq!(
            tracker_project_name("WMSE", "Wikipedia in Education"),
            "WMSE-Wikipedia-in-Education"
        );
        let projects = sample_projects();
        assert_eq!(ticket_description(&projects[0]), "Teaching with Wikipedia.");
        let mut silent = projects[0].clone();
        silent.about_english = String::new();
        assert_eq!(ticket_description(&silent), "Wikipedia in Education (193103)");
    }

    #[test]
    fn manual_update_notice_lists_year_pages_and_switch_templates() {
        let config = sample_config();
        let notice = manual_update_notice(&config.wiki, "193103", "Wikipedia i skolan", 2019);
        assert!(notice.starts_with("Don't forget to manually add '193103 - Wikipedia i skolan'"));
        assert!(notice.contains("\n* Projekt 2019"));
        assert!(notice.contains("\n* Mall:Projektnummer"));
    }
}
