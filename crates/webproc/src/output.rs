use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// What the host saw of one child run.
#[derive(Debug, Serialize)]
pub struct HostReport {
    pub child_pid: u32,
    pub protocol_version: u16,
    pub capabilities: Vec<String>,
    pub pings_sent: u32,
    pub pongs_received: u32,
    pub mean_rtt_us: Option<u64>,
    pub child_exit_code: Option<i32>,
    pub child_exit: &'static str,
}

pub fn print_report(report: &HostReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (field, value) in rows(report) {
                table.add_row(vec![field.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (field, value) in rows(report) {
                println!("{field}: {value}");
            }
        }
    }
}

fn rows(report: &HostReport) -> Vec<(&'static str, String)> {
    vec![
        ("child pid", report.child_pid.to_string()),
        ("protocol version", report.protocol_version.to_string()),
        ("capabilities", report.capabilities.join(",")),
        (
            "pings",
            format!("{}/{}", report.pongs_received, report.pings_sent),
        ),
        (
            "mean rtt",
            report
                .mean_rtt_us
                .map(|us| format!("{us}us"))
                .unwrap_or_else(|| "-".to_string()),
        ),
        (
            "child exit",
            match report.child_exit_code {
                Some(code) => format!("{code} ({})", report.child_exit),
                None => report.child_exit.to_string(),
            },
        ),
    ]
}
