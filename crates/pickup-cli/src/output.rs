//! Plain-text table rendering for terminal output.

use pickup_core::models::{Agent, Child, Entity, Page, Parent, Recuperator, ScanEvent};
use pickup_core::presence::{ChildActivity, CohortStats};
use pickup_core::utils::truncate;

/// Widest a single cell may grow before it is truncated.
const MAX_CELL_WIDTH: usize = 32;

/// A record that renders as one table row.
pub trait Row {
    fn headers() -> &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

fn status_cell(entity: &impl Entity) -> String {
    if entity.is_deleted() {
        "deleted".to_string()
    } else if entity.is_active() {
        "active".to_string()
    } else {
        "inactive".to_string()
    }
}

impl Row for Parent {
    fn headers() -> &'static [&'static str] {
        &["CODE", "NAME", "PHONE", "CHILDREN", "STATUS"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.code.clone(),
            self.display_name(),
            self.phone().unwrap_or_else(|| "-".to_string()),
            self.current_child_codes().count().to_string(),
            status_cell(self),
        ]
    }
}

impl Row for Child {
    fn headers() -> &'static [&'static str] {
        &["CODE", "NAME", "AGE", "CLASS", "PARENT", "STATUS"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.code.clone(),
            self.display_name(),
            self.age_str(),
            self.class_str(),
            self.parent_code.clone(),
            status_cell(self),
        ]
    }
}

impl Row for Recuperator {
    fn headers() -> &'static [&'static str] {
        &["CODE", "NAME", "RELATION", "PARENT", "AUTHORIZED", "STATUS"]
    }

    fn cells(&self) -> Vec<String> {
        let authorized = if self.authorized_children.is_empty() {
            "-".to_string()
        } else {
            self.authorized_children.join(" ")
        };
        vec![
            self.code.clone(),
            self.display_name(),
            self.relation.to_string(),
            self.parent_code.clone(),
            authorized,
            status_cell(self),
        ]
    }
}

impl Row for Agent {
    fn headers() -> &'static [&'static str] {
        &["CODE", "NAME", "PHONE", "STATUS"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.code.clone(),
            self.full_name(),
            self.phone.clone().unwrap_or_else(|| "-".to_string()),
            status_cell(self),
        ]
    }
}

impl Row for ScanEvent {
    fn headers() -> &'static [&'static str] {
        &["ID", "TIME", "TYPE", "RECUPERATOR", "AGENT"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.formatted_time(),
            self.scan_type.to_string(),
            self.recuperator_code.clone().unwrap_or_else(|| "-".to_string()),
            self.agent_code.clone(),
        ]
    }
}

impl Row for ChildActivity {
    fn headers() -> &'static [&'static str] {
        &["CHILD", "STATE", "ENTRIES", "EXITS", "LAST SCAN"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.child_code.clone(),
            self.state.to_string(),
            self.counts.entries.to_string(),
            self.counts.exits.to_string(),
            self.last_event
                .as_ref()
                .map(|e| e.formatted_time())
                .unwrap_or_else(|| "-".to_string()),
        ]
    }
}

/// Render rows under their headers with padded columns.
pub fn table<'a, R: Row + 'a>(rows: impl IntoIterator<Item = &'a R>) -> String {
    let headers = R::headers();
    let rows: Vec<Vec<String>> = rows
        .into_iter()
        .map(|r| r.cells().iter().map(|c| truncate(c, MAX_CELL_WIDTH)).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![render(headers.to_vec())];
    for row in &rows {
        lines.push(render(row.iter().map(String::as_str).collect()));
    }
    lines.join("\n")
}

pub fn page_footer<T>(page: &Page<T>) -> String {
    let mut footer = format!(
        "page {}/{} - {} total ({} active, {} inactive, {} deleted)",
        page.page,
        page.last_page.max(1),
        page.total,
        page.counts.active,
        page.counts.inactive,
        page.counts.deleted
    );
    let mut hints = Vec::new();
    if page.has_prev() {
        hints.push(format!("prev: --page {}", page.page - 1));
    }
    if page.has_next() {
        hints.push(format!("next: --page {}", page.page + 1));
    }
    if !hints.is_empty() {
        footer.push_str(" | ");
        footer.push_str(&hints.join(", "));
    }
    footer
}

pub fn stats_summary(stats: &CohortStats) -> String {
    format!(
        "{} children: {} present, {} picked up, {} no activity ({} entries, {} exits)",
        stats.children(),
        stats.present,
        stats.exited,
        stats.no_activity,
        stats.total_entries,
        stats.total_exits
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickup_core::models::PageCounts;

    #[test]
    fn test_table_pads_columns() {
        let agents = vec![Agent::new("AGT-001", "Samir", "Khelifi"), Agent::new("AGT-2", "Li", "Wu")];
        let out = table(&agents);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("CODE     NAME"));
        assert!(lines[2].starts_with("AGT-2    Li Wu"));
    }

    #[test]
    fn test_page_footer_navigation_hints() {
        let agents: Vec<Agent> = (1..=5).map(|i| Agent::new(format!("AGT-{:03}", i), "A", "B")).collect();
        let counts = PageCounts { active: 5, inactive: 0, deleted: 0 };

        let first = Page::paginate(agents.clone(), 1, 2, counts);
        assert_eq!(page_footer(&first), "page 1/3 - 5 total (5 active, 0 inactive, 0 deleted) | next: --page 2");

        let middle = Page::paginate(agents.clone(), 2, 2, counts);
        assert!(page_footer(&middle).ends_with("| prev: --page 1, next: --page 3"));

        let only = Page::paginate(agents, 1, 10, counts);
        assert!(!page_footer(&only).contains('|'));
    }

    #[test]
    fn test_stats_summary() {
        let stats = CohortStats {
            present: 2,
            exited: 1,
            no_activity: 1,
            total_entries: 3,
            total_exits: 1,
        };
        assert_eq!(
            stats_summary(&stats),
            "4 children: 2 present, 1 picked up, 1 no activity (3 entries, 1 exits)"
        );
    }
}
