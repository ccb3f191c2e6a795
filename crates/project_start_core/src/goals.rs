use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::config::GoalLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    /// Short name such as `T.1.1`.
    pub name: String,
    pub description: String,
    pub fulfillment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectGoals {
    pub english_name: String,
    /// Goal name -> planned value, in goals file order.
    pub planned: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalTable {
    pub goals: Vec<Goal>,
    pub projects: Vec<ProjectGoals>,
}

impl GoalTable {
    pub fn for_project(&self, english_name: &str) -> Option<&ProjectGoals> {
        self.projects
            .iter()
            .find(|project| project.english_name == english_name)
    }

    pub fn fulfillment(&self, goal_name: &str) -> Option<&str> {
        self.goals
            .iter()
            .find(|goal| goal.name == goal_name)
            .and_then(|goal| goal.fulfillment.as_deref())
    }

    /// Wikitext list with one fulfillment line per planned goal.
    pub fn fulfillment_list(&self, project: &ProjectGoals) -> Result<String> {
        let mut output = String::new();
        for (goal_name, _) in &project.planned {
            let Some(text) = self.fulfillment(goal_name) else {
                bail!(
                    "goal `{goal_name}` planned for '{}' has no fulfillment text in the goals file",
                    project.english_name
                );
            };
            output.push_str("\n* ");
            output.push_str(text);
        }
        Ok(output)
    }
}

/// `"T.1.1 - Berika projekten med 25 nya resurser"` -> `"T.1.1"`.
pub fn goal_name(description: &str) -> &str {
    description
        .split(" - ")
        .next()
        .unwrap_or(description)
        .trim()
}

pub fn read_goals(rows: &[Vec<String>], layout: &GoalLayout) -> GoalTable {
    // Column index -> project name; empty header cells stay as None so indices line up.
    let mut columns: Vec<Option<String>> = Vec::new();
    let mut planned: BTreeMap<usize, Vec<(String, String)>> = BTreeMap::new();
    let mut goals = Vec::new();

    for (row_index, row) in rows.iter().enumerate() {
        if layout.last_row == Some(row_index) {
            break;
        }
        let project_cells = row.iter().enumerate().skip(layout.first_project_column);

        if row_index == layout.project_row {
            columns = project_cells
                .map(|(_, cell)| {
                    let name = cell.trim();
                    (!name.is_empty()).then(|| name.to_string())
                })
                .collect();
            continue;
        }

        let description = row.first().map(|cell| cell.trim()).unwrap_or_default();
        if description.is_empty() {
            continue;
        }
        let name = goal_name(description).to_string();
        let fulfillment = row
            .get(1)
            .map(|cell| cell.trim().to_string())
            .filter(|cell| !cell.is_empty());
        goals.push(Goal {
            name: name.clone(),
            description: description.to_string(),
            fulfillment,
        });

        if row_index < layout.project_row {
            continue;
        }
        for (column_index, cell) in project_cells {
            let value = cell.trim();
            if value.is_empty() {
                continue;
            }
            let offset = column_index - layout.first_project_column;
            if columns.get(offset).is_some_and(Option::is_some) {
                planned
                    .entry(offset)
                    .or_default()
                    .push((name.clone(), value.to_string()));
            }
        }
    }

    let projects = columns
        .into_iter()
        .enumerate()
        .filter_map(|(offset, name)| {
            let name = name?;
            let values = planned.remove(&offset)?;
            Some(ProjectGoals {
                english_name: name,
                planned: values,
            })
        })
        .collect();

    GoalTable { goals, projects }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tsv::parse_rows;

    pub(crate) const GOALS_TSV: &str = "Mål\tMåluppfyllnad\tWikipedia in Education\t\tCultural Heritage Data\tOrphan Project\n\
T.1.1 - Berika projekten med 25 nya resurser\tResurser har tillförts\t25\t\t\t\n\
\t\t\t\t\t\n\
A.1.2 - 100 nya bidragsgivare\tBidragsgivare har rekryterats\t40\t7\t60\t\n\
E.3 - Nöjda medlemmar\t\t\t\t\t\n\
Summa\t\t999\t\t999\t999\n";

    pub(crate) fn layout() -> GoalLayout {
        GoalLayout {
            project_row: 0,
            first_project_column: 2,
            last_row: Some(5),
        }
    }

    pub(crate) fn sample_goals() -> GoalTable {
        read_goals(&parse_rows(GOALS_TSV), &layout())
    }

    #[test]
    fn goal_name_takes_prefix_before_dash() {
        assert_eq!(goal_name("T.1.1 - Berika projekten med 25 nya resurser"), "T.1.1");
        assert_eq!(goal_name("Utan namn"), "Utan namn");
    }

    #[test]
    fn read_goals_maps_planned_values_per_project_in_order() {
        let table = sample_goals();
        let education = table.for_project("Wikipedia in Education").expect("education");
        assert_eq!(
            education.planned,
            vec![
                ("T.1.1".to_string(), "25".to_string()),
                ("A.1.2".to_string(), "40".to_string()),
            ]
        );
        let heritage = table.for_project("Cultural Heritage Data").expect("heritage");
        assert_eq!(heritage.planned, vec![("A.1.2".to_string(), "60".to_string())]);
    }

    #[test]
    fn read_goals_drops_unnamed_columns_and_projects_without_values() {
        let table = sample_goals();
        assert_eq!(table.projects.len(), 2);
        assert!(table.for_project("Orphan Project").is_none());
    }

    #[test]
    fn read_goals_stops_at_last_row() {
        let table = sample_goals();
        assert!(table.goals.iter().all(|goal| goal.name != "Summa"));
    }

    #[test]
    fn read_goals_collects_fulfillments() {
        let table = sample_goals();
        assert_eq!(table.fulfillment("T.1.1"), Some("Resurser har tillförts"));
        assert_eq!(table.fulfillment("E.3"), None);
        assert_eq!(table.goals.len(), 3);
    }

    #[test]
    fn fulfillment_list_renders_wikitext_list() {
        let table = sample_goals();
        let education = table.for_project("Wikipedia in Education").expect("education");
        assert_eq!(
            table.fulfillment_list(education).expect("list"),
            "\n* Resurser har tillförts\n* Bidragsgivare har rekryterats"
        );
    }

    #[test]
    fn fulfillment_list_fails_for_unknown_goal() {
        let table = sample_goals();
        let project = ProjectGoals {
            english_name: "X".to_string(),
            planned: vec![("E.3".to_string(), "1".to_string())],
        };
        let error = table.fulfillment_list(&project).expect_err("must fail");
        assert!(error.to_string().contains("E.3"));
    }
}
