//! Ballot CSV template: `project_id,name,allocation,impact`.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use shared::{
    domain::{clamp_allocation, round_allocation, ImpactScore, ProjectId},
    protocol::ProjectAllocation,
};

use crate::reconciler::format_allocation;

pub const CSV_COLUMNS: [&str; 4] = ["project_id", "name", "allocation", "impact"];

#[derive(Debug, Clone, PartialEq)]
pub struct BallotCsvRow {
    pub project_id: ProjectId,
    pub name: String,
    pub allocation: Option<f64>,
    pub impact: Option<ImpactScore>,
}

/// Rows split into those naming a known project and warnings for the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportPlan {
    pub rows: Vec<BallotCsvRow>,
    pub warnings: Vec<String>,
}

/// Every known project, with name. Template mode zeroes allocation and impact.
pub fn export_csv(projects: &[ProjectAllocation], template: bool) -> String {
    let mut out = CSV_COLUMNS.join(",");
    out.push('\n');
    for project in projects {
        let (allocation, impact) = if template {
            ("0".to_string(), "0".to_string())
        } else {
            (
                format_allocation(project.allocation),
                project
                    .impact
                    .filter(|impact| impact.is_persisted())
                    .map(|impact| impact.value().to_string())
                    .unwrap_or_default(),
            )
        };
        let fields = [
            escape(project.project_id.as_str()),
            escape(&project.name),
            allocation,
            impact,
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

pub fn parse_csv(text: &str) -> Result<Vec<BallotCsvRow>> {
    let mut records = split_records(text).into_iter();
    let header: Vec<String> = records
        .next()
        .ok_or_else(|| anyhow!("ballot csv is empty"))?
        .into_iter()
        .map(|column| column.trim().to_ascii_lowercase())
        .collect();
    let column = |name: &str| header.iter().position(|column| column == name);
    let project_column =
        column("project_id").ok_or_else(|| anyhow!("ballot csv has no project_id column"))?;
    let name_column = column("name");
    let allocation_column = column("allocation");
    let impact_column = column("impact");

    let mut rows = Vec::new();
    for fields in records {
        let field = |index: Option<usize>| {
            index
                .and_then(|index| fields.get(index))
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };
        let Some(project_id) = field(Some(project_column)) else {
            continue;
        };
        rows.push(BallotCsvRow {
            project_id: ProjectId::new(project_id),
            name: field(name_column).unwrap_or_default().to_string(),
            allocation: field(allocation_column).map(|value| {
                round_allocation(clamp_allocation(value.parse::<f64>().unwrap_or(0.0)))
            }),
            impact: field(impact_column)
                .and_then(|value| value.parse::<u16>().ok())
                .and_then(|value| ImpactScore::try_from(value).ok())
                .filter(|impact| impact.is_persisted()),
        });
    }
    Ok(rows)
}

/// Keeps rows whose project is known; every dropped row yields a warning.
pub fn plan_import(rows: Vec<BallotCsvRow>, known: &HashSet<ProjectId>) -> ImportPlan {
    let mut plan = ImportPlan::default();
    for row in rows {
        if known.contains(&row.project_id) {
            plan.rows.push(row);
        } else {
            plan.warnings.push(format!(
                "project {} ({}) is not part of this ballot and was skipped",
                row.project_id,
                if row.name.is_empty() { "unnamed" } else { &row.name }
            ));
        }
    }
    plan
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Splits the whole text into records. Quoted fields may hold commas, quotes
/// and line breaks; blank lines are dropped.
fn split_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            '\r' if !quoted => {}
            '\n' if !quoted => {
                fields.push(std::mem::take(&mut current));
                push_record(&mut records, std::mem::take(&mut fields));
            }
            other => current.push(other),
        }
    }
    fields.push(current);
    push_record(&mut records, fields);
    records
}

fn push_record(records: &mut Vec<Vec<String>>, fields: Vec<String>) {
    if fields.iter().any(|field| !field.trim().is_empty()) {
        records.push(fields);
    }
}

#[cfg(test)]
#[path = "tests/csv_template_tests.rs"]
mod tests;
