use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;

static MARKUP_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<ref[^>]*/>|<ref.*?>.*?</ref>|\[\[[^\]|]*\||\[\[|\]\]")
        .expect("valid markup regex")
});
static CELL_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\||\|\|").expect("valid cell regex"));
static PROGRAM_CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(.*?)\s*<!--\s*(.*?)\s*-->").expect("valid program regex")
});
static STRATEGY_CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(.*?)\s*<!--\s*(\d+)\s*(.*?)\s*-->").expect("valid strategy regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub number: String,
    pub name: String,
    pub strategies: Vec<Strategy>,
}

impl Program {
    pub fn project_numbers(&self) -> Vec<&str> {
        let mut numbers = self
            .strategies
            .iter()
            .flat_map(|strategy| strategy.projects.iter().map(String::as_str))
            .collect::<Vec<_>>();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub number: String,
    pub description: String,
    pub short_description: String,
    pub projects: Vec<String>,
    pub goals: Vec<String>,
}

/// Programs, strategies and goals scraped from the operational plan page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramTable {
    pub programs: Vec<Program>,
    pub unmatched_projects: Vec<String>,
}

/// Digits 3-4 of a project number name its strategy: `193103` is in `3100`.
pub fn strategy_contains(strategy_number: &str, project_number: &str) -> bool {
    match (project_number.get(2..4), strategy_number.get(0..2)) {
        (Some(project), Some(strategy)) => project == strategy,
        _ => false,
    }
}

impl ProgramTable {
    /// Parse the first table on `page_text` and attach `project_numbers` to strategies.
    ///
    /// Each data row has one to three cells: a program cell (only on the first
    /// row of a program), a strategy cell (first row of a strategy) and a goal
    /// cell. Program and strategy cells carry their numbers in HTML comments:
    /// `Tillgång <!-- 1 -->`, `Öka tillgången <!-- 3100 Tillgång -->`.
    pub fn parse(page_text: &str, project_numbers: &[String]) -> Result<Self> {
        let table = first_table(page_text)
            .ok_or_else(|| anyhow::anyhow!("operational plan page has no table"))?;
        let table = MARKUP_NOISE.replace_all(table, "");

        let mut programs: Vec<Program> = Vec::new();
        let mut remaining = project_numbers.to_vec();

        for (index, row) in table.split("|-").enumerate().skip(1) {
            let row = row.trim_end();
            let row = row.strip_suffix("|}").unwrap_or(row);
            let cells = split_cells(row);
            if cells.is_empty() {
                continue;
            }

            if cells.len() == 3 {
                programs.push(parse_program(&cells[0]).with_context(|| format!("table row {index}"))?);
            }
            if cells.len() >= 2 {
                let program = programs
                    .last_mut()
                    .ok_or_else(|| anyhow::anyhow!("table row {index} has a strategy before any program"))?;
                let mut strategy = parse_strategy(&cells[cells.len() - 2])
                    .with_context(|| format!("table row {index}"))?;
                remaining.retain(|number| {
                    if strategy_contains(&strategy.number, number) {
                        strategy.projects.push(number.clone());
                        false
                    } else {
                        true
                    }
                });
                program.strategies.push(strategy);
            }

            let strategy = programs
                .last_mut()
                .and_then(|program| program.strategies.last_mut())
                .ok_or_else(|| anyhow::anyhow!("table row {index} has a goal before any strategy"))?;
            if let Some(goal) = cells.last() {
                strategy.goals.push(goal.clone());
            }
        }

        if programs.is_empty() {
            bail!("operational plan table has no program rows");
        }

        Ok(Self {
            programs,
            unmatched_projects: remaining,
        })
    }

    pub fn program(&self, name: &str) -> Result<&Program> {
        self.programs
            .iter()
            .find(|program| program.name == name)
            .ok_or_else(|| anyhow::anyhow!("no program named '{name}' in the operational plan"))
    }

    pub fn strategy_for_project(&self, project_number: &str) -> Result<&Strategy> {
        self.programs
            .iter()
            .flat_map(|program| program.strategies.iter())
            .find(|strategy| strategy.projects.iter().any(|number| number == project_number))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no strategy in the operational plan matches project {project_number}"
                )
            })
    }
}

fn first_table(text: &str) -> Option<&str> {
    let start = text.find("{|")?;
    let mut offset = start;
    let mut depth = 0usize;
    for line in text[start..].split_inclusive('\n') {
        offset += line.len();
        let line = line.trim_start();
        if line.starts_with("{|") {
            depth += 1;
        } else if line.starts_with("|}") {
            depth -= 1;
            if depth == 0 {
                return Some(&text[start..offset]);
            }
        }
    }
    None
}

fn split_cells(row: &str) -> Vec<String> {
    // The rest of the `|-` line holds row attributes, not cells.
    let Some((_, body)) = row.split_once('\n') else {
        return Vec::new();
    };
    let body = body.strip_prefix('|').unwrap_or(body);
    CELL_SEPARATOR
        .split(body)
        .filter_map(|cell| {
            // Drop `rowspan="2" |` style attributes.
            let content = cell.rsplit('|').next().unwrap_or(cell).trim();
            (!content.is_empty()).then(|| content.to_string())
        })
        .collect()
}

fn parse_program(cell: &str) -> Result<Program> {
    let captures = PROGRAM_CELL
        .captures(cell)
        .ok_or_else(|| anyhow::anyhow!("program cell `{cell}` has no `<!-- number -->` comment"))?;
    Ok(Program {
        number: captures[2].trim().to_string(),
        name: captures[1].trim().to_string(),
        strategies: Vec::new(),
    })
}

fn parse_strategy(cell: &str) -> Result<Strategy> {
    let captures = STRATEGY_CELL.captures(cell).ok_or_else(|| {
        anyhow::anyhow!("strategy cell `{cell}` has no `<!-- number short -->` comment")
    })?;
    Ok(Strategy {
        number: captures[2].to_string(),
        description: captures[1].trim().to_string(),
        short_description: captures[3].trim().to_string(),
        projects: Vec::new(),
        goals: Vec::new(),
    })
}
