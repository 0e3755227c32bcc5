//! Human and JSON renderings of service status.

use camino::Utf8Path;
use serde::Serialize;
use strum::{Display, EnumString};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use standup_config::ServiceKind;

use crate::record::{ProcessHandle, ServiceState};
use crate::supervisor::ServiceStatus;

/// Output format for status reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReportFormat {
    /// Aligned columns for terminals.
    #[default]
    Human,
    /// A single JSON document.
    Json,
}

/// Rendered report plus the exit code it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Text to print on stdout.
    pub text: String,
    /// `0` when every probe succeeded, `1` otherwise.
    pub exit_code: u8,
    /// First service, in declaration order, whose probe failed.
    pub first_failure: Option<String>,
}

/// Errors raised while rendering a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// JSON encoding failed.
    #[error("failed to encode status report: {source}")]
    Encode {
        /// Underlying encoder error.
        #[source]
        source: serde_json::Error,
    },
}

/// Renders `statuses` in `format`, preserving their order.
pub fn render(statuses: &[ServiceStatus], format: ReportFormat) -> Result<Report, ReportError> {
    let first_failure = statuses
        .iter()
        .find(|status| !status.probe.success)
        .map(|status| status.service.clone());
    let text = match format {
        ReportFormat::Human => render_human(statuses),
        ReportFormat::Json => render_json(statuses)?,
    };
    Ok(Report {
        text,
        exit_code: u8::from(first_failure.is_some()),
        first_failure,
    })
}

fn render_human(statuses: &[ServiceStatus]) -> String {
    const HEADERS: [&str; 6] = ["SERVICE", "STATE", "HANDLE", "STARTED", "READY", "DETAIL"];
    let rows: Vec<[String; 6]> = statuses
        .iter()
        .map(|status| {
            [
                status.service.clone(),
                status.state.to_string(),
                status
                    .handle
                    .as_ref()
                    .map_or_else(|| String::from("-"), ToString::to_string),
                status
                    .started_at
                    .and_then(format_millis)
                    .unwrap_or_else(|| String::from("-")),
                String::from(if status.probe.success { "yes" } else { "no" }),
                status.probe.detail.clone(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format_row(&HEADERS.map(String::from), &widths));
    lines.extend(rows.iter().map(|row| format_row(row, &widths)));
    let ready = statuses.iter().filter(|status| status.probe.success).count();
    lines.push(format!("{ready}/{} services ready", statuses.len()));
    lines.join("\n")
}

fn format_row(cells: &[String; 6], widths: &[usize; 6]) -> String {
    let mut line = String::new();
    let last = cells.len() - 1;
    for (index, (cell, width)) in cells.iter().zip(widths.iter().copied()).enumerate() {
        if index == last {
            line.push_str(cell);
        } else {
            line.push_str(&format!("{cell:<width$}  "));
        }
    }
    line.trim_end().to_owned()
}

fn format_millis(millis: u64) -> Option<String> {
    let nanos = i128::from(millis).checked_mul(1_000_000)?;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

#[derive(Serialize)]
struct JsonReport<'a> {
    healthy: bool,
    services: Vec<JsonService<'a>>,
}

#[derive(Serialize)]
struct JsonService<'a> {
    service: &'a str,
    kind: ServiceKind,
    state: ServiceState,
    handle: Option<&'a ProcessHandle>,
    alive: Option<bool>,
    target: &'a str,
    started_at: Option<u64>,
    log_path: &'a Utf8Path,
    ready: bool,
    detail: &'a str,
    probe_elapsed_ms: u128,
    observed_at: u64,
}

fn render_json(statuses: &[ServiceStatus]) -> Result<String, ReportError> {
    let report = JsonReport {
        healthy: statuses.iter().all(|status| status.probe.success),
        services: statuses
            .iter()
            .map(|status| JsonService {
                service: &status.service,
                kind: status.kind,
                state: status.state,
                handle: status.handle.as_ref(),
                alive: status.alive,
                target: &status.target,
                started_at: status.started_at,
                log_path: &status.log_path,
                ready: status.probe.success,
                detail: &status.probe.detail,
                probe_elapsed_ms: status.probe.elapsed.as_millis(),
                observed_at: status.probe.observed_at,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report).map_err(|source| ReportError::Encode { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ReadinessResult;
    use rstest::rstest;
    use std::time::Duration;

    fn status(name: &str, kind: ServiceKind, ready: bool) -> ServiceStatus {
        ServiceStatus {
            service: name.into(),
            kind,
            state: if ready {
                ServiceState::Ready
            } else {
                ServiceState::Failed
            },
            handle: Some(ProcessHandle::Pid { pid: 4321, start_time: None }),
            alive: Some(true),
            target: "tcp://127.0.0.1:1".into(),
            started_at: Some(1_700_000_000_000),
            log_path: format!("logs/{name}-dev.log").into(),
            probe: ReadinessResult::new(
                name,
                1,
                ready,
                if ready { "HTTP 200" } else { "HTTP 503 (expected 2xx)" },
                Duration::from_millis(12),
            ),
        }
    }

    fn stack(backend_ready: bool, frontend_ready: bool) -> Vec<ServiceStatus> {
        vec![
            status("database", ServiceKind::Database, true),
            status("backend", ServiceKind::Backend, backend_ready),
            status("frontend", ServiceKind::Frontend, frontend_ready),
        ]
    }

    #[rstest]
    #[case::all_ready(true, true, 0, None)]
    #[case::backend_down(false, true, 1, Some("backend"))]
    #[case::first_of_two(false, false, 1, Some("backend"))]
    #[case::frontend_down(true, false, 1, Some("frontend"))]
    fn exit_code_and_first_failure(
        #[case] backend_ready: bool,
        #[case] frontend_ready: bool,
        #[case] exit_code: u8,
        #[case] first_failure: Option<&str>,
    ) {
        let report =
            render(&stack(backend_ready, frontend_ready), ReportFormat::Human).expect("render");
        assert_eq!(report.exit_code, exit_code);
        assert_eq!(report.first_failure.as_deref(), first_failure);
    }

    #[test]
    fn human_report_keeps_declaration_order_and_aligns_columns() {
        let report = render(&stack(false, true), ReportFormat::Human).expect("render");
        let lines: Vec<_> = report.text.lines().collect();
        assert!(lines[0].starts_with("SERVICE"));
        assert!(lines[1].starts_with("database"));
        assert!(lines[2].starts_with("backend "));
        assert!(lines[3].starts_with("frontend"));
        assert_eq!(lines[4], "2/3 services ready");
        let column = lines[0].find("STATE").expect("state column");
        assert_eq!(lines[2].find("failed"), Some(column));
        assert!(lines[1].contains("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn json_report_is_machine_readable() {
        let report = render(&stack(true, false), ReportFormat::Json).expect("render");
        let value: serde_json::Value = serde_json::from_str(&report.text).expect("valid json");
        assert_eq!(value["healthy"], false);
        assert_eq!(value["services"][0]["service"], "database");
        assert_eq!(value["services"][2]["ready"], false);
        assert_eq!(value["services"][1]["handle"]["kind"], "pid");
        assert_eq!(value["services"][1]["state"], "ready");
    }
}
