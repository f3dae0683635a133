//! Report placement and the navigation index.

use crate::config::DeployConfig;
use crate::deploy::path::PathType;
use crate::deploy::traits::{HtmlGenerator, ReportEntry};
use crate::error::{CovpagesError, Result};
use std::fmt::{self, Write as _};
use std::path::Path;

/// Writes report bytes verbatim and a static `index.html` listing every
/// published report.
#[derive(Debug, Default, Clone)]
pub struct StaticIndexGenerator {
    title: Option<String>,
}

impl StaticIndexGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn discover_under(&self, dir: &Path, kind: PathType, root: &str) -> Result<Vec<ReportEntry>> {
        let base = dir.join(root);
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let read = std::fs::read_dir(&base).map_err(|e| CovpagesError::io_with_path(e, &base))?;
        for entry in read {
            let entry = entry.map_err(|e| CovpagesError::io_with_path(e, &base))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().join(DeployConfig::REPORT_FILE).is_file() {
                entries.push(ReportEntry {
                    kind,
                    rel_path: format!("{}/{}/{}", root, name, DeployConfig::REPORT_FILE),
                    name,
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl HtmlGenerator for StaticIndexGenerator {
    fn generate_report_html(&self, dir: &Path, rel_path: &Path, content: &[u8]) -> Result<()> {
        let path = dir.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CovpagesError::io_with_path(e, parent))?;
        }
        std::fs::write(&path, content).map_err(|e| CovpagesError::io_with_path(e, &path))
    }

    fn discover_reports(&self, dir: &Path) -> Result<Vec<ReportEntry>> {
        let mut reports = Vec::new();
        if dir.join(DeployConfig::REPORT_FILE).is_file() {
            reports.push(ReportEntry {
                kind: PathType::Root,
                name: "latest".to_string(),
                rel_path: DeployConfig::REPORT_FILE.to_string(),
            });
        }
        reports.extend(self.discover_under(dir, PathType::Branch, DeployConfig::BRANCH_ROOT)?);
        reports.extend(self.discover_under(dir, PathType::Pr, DeployConfig::PR_ROOT)?);
        Ok(reports)
    }

    fn generate_index_html(&self, dir: &Path, reports: &[ReportEntry]) -> Result<()> {
        let title = self.title.as_deref().unwrap_or("Coverage Reports");
        let html = render_index(title, reports)
            .map_err(|e| CovpagesError::Other(format!("failed to render index: {}", e)))?;

        let path = dir.join(DeployConfig::INDEX_FILE);
        std::fs::write(&path, html).map_err(|e| CovpagesError::io_with_path(e, &path))
    }
}

fn render_index(title: &str, reports: &[ReportEntry]) -> std::result::Result<String, fmt::Error> {
    let title = escape(title);
    let mut html = String::new();
    writeln!(html, "<!DOCTYPE html>")?;
    writeln!(html, "<html lang=\"en\">")?;
    writeln!(html, "<head>")?;
    writeln!(html, "<meta charset=\"utf-8\">")?;
    writeln!(html, "<title>{}</title>", title)?;
    writeln!(html, "</head>")?;
    writeln!(html, "<body>")?;
    writeln!(html, "<h1>{}</h1>", title)?;

    for (kind, heading) in [
        (PathType::Root, "Latest"),
        (PathType::Branch, "Branches"),
        (PathType::Pr, "Pull Requests"),
    ] {
        let section: Vec<_> = reports.iter().filter(|r| r.kind == kind).collect();
        if section.is_empty() {
            continue;
        }
        writeln!(html, "<h2>{}</h2>", heading)?;
        writeln!(html, "<ul>")?;
        for report in section {
            let label = match kind {
                PathType::Pr => format!("#{}", report.name),
                _ => report.name.clone(),
            };
            writeln!(
                html,
                "<li><a href=\"{}\">{}</a></li>",
                escape(&report.rel_path),
                escape(&label)
            )?;
        }
        writeln!(html, "</ul>")?;
    }
    if reports.is_empty() {
        writeln!(html, "<p>No reports published yet.</p>")?;
    }
    writeln!(html, "</body>")?;
    writeln!(html, "</html>")?;
    Ok(html)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
