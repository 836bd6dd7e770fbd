use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use common::{JobRow, JobState, JobView};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct NodeHealth {
    pub node: String,
    pub usage: String,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub jobs: Vec<JobRow>,
    pub nodes: Vec<NodeHealth>,
}

fn stamp(at: Option<DateTime<Utc>>, tz: Tz) -> String {
    at.map(|at| common::time::display(at, tz)).unwrap_or_default()
}

fn node_cell(row: &JobRow) -> String {
    match (&row.node, row.state) {
        (Some(node), _) => node.clone(),
        (None, JobState::Completed) => "Unknown".to_string(),
        (None, _) => "-".to_string(),
    }
}

pub fn job_table(rows: &[JobRow], tz: Tz) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Job ID", "Status", "Processing Node", "Start Time", "End Time"]);

    for row in rows {
        let color = match row.state {
            JobState::Queued => Color::Reset,
            JobState::Running => Color::Yellow,
            JobState::Completed => Color::Green,
        };
        table.add_row(vec![
            Cell::new(&row.job_id),
            Cell::new(row.state).fg(color),
            Cell::new(node_cell(row)),
            Cell::new(stamp(row.started_at, tz)),
            Cell::new(stamp(row.completed_at, tz)),
        ]);
    }
    table
}

pub fn dashboard_text(dashboard: &Dashboard, tz: Tz) -> String {
    let mut out = String::from("Job Status Overview\n");
    if dashboard.jobs.is_empty() {
        out.push_str("No jobs found.\n");
    } else {
        out.push_str(&job_table(&dashboard.jobs, tz).to_string());
        out.push('\n');
    }

    if !dashboard.nodes.is_empty() {
        out.push_str("\nComputing Nodes CPU / Memory Usage\n");
        for health in &dashboard.nodes {
            out.push_str(&format!("\n== {} ==\n{}\n", health.node, health.usage));
        }
    }
    out
}

pub fn jobs_csv(rows: &[JobRow], tz: Tz) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["job_id", "status", "node", "start", "end"])?;
    for row in rows {
        writer.write_record([
            row.job_id.to_string(),
            row.state.to_string(),
            row.node.clone().unwrap_or_default(),
            stamp(row.started_at, tz),
            stamp(row.completed_at, tz),
        ])?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

pub fn job_view_text(view: &JobView, tz: Tz) -> String {
    let mut out = format!("Job ID:    {}\n", view.job_id);
    if let Some(at) = view.started_at {
        out.push_str(&format!("Started:   {}\n", common::time::display(at, tz)));
    }
    match &view.completion {
        Some(done) => {
            if let Some(at) = done.completed_at {
                out.push_str(&format!("Completed: {}\n", common::time::display(at, tz)));
            }
            if let Some(node) = &done.node {
                out.push_str(&format!("Node:      {}\n", node));
            }
            let heading = if done.is_error() { "Translation failed:" } else { "Translation completed:" };
            out.push_str(&format!("\n{}\n{}\n", heading, done.result));
        }
        None => out.push_str("\nTranslation in progress...\n"),
    }
    out
}
