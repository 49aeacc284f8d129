use std::io::{self, Write};

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::orchestrator::{CrashReport, ImportSummary, OrchestratorState};
use crate::rule::{ActRules, TargetApp};

/// Machine-readable counterpart of the terminal display.
///
/// In text mode every `emit_*` call is a no-op except `emit_message`; the
/// caller renders through `Display` instead.
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    pub fn emit_targets(&self, apps: &[TargetApp], crash: Option<&CrashReport>) {
        if self.is_json() {
            self.write_json(&TargetListOutput { apps, crash });
        }
    }

    pub fn emit_app(&self, package: &str, rules: &ActRules) {
        if self.is_json() {
            self.write_json(&AppRulesOutput {
                package,
                activity_count: rules.len(),
                rule_count: rules.rule_count(),
                activities: rules,
            });
        }
    }

    pub fn emit_import(
        &self,
        source: &str,
        result: std::result::Result<&ImportSummary, String>,
        state: OrchestratorState,
    ) {
        if !self.is_json() {
            return;
        }
        let output = match result {
            Ok(summary) => ImportOutput {
                success: true,
                source,
                state,
                summary: Some(summary),
                error: None,
            },
            Err(error) => ImportOutput {
                success: false,
                source,
                state,
                summary: None,
                error: Some(error),
            },
        };
        self.write_json(&output);
    }

    pub fn emit_value<T: Serialize>(&self, value: &T) {
        if self.is_json() {
            self.write_json(value);
        }
    }

    pub fn emit_message(&self, message: &str) {
        match self.format {
            OutputFormat::Text => println!("{}", message),
            OutputFormat::Json => self.write_json(&MessageOutput { message }),
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, value: &T) {
        if let Ok(json) = serde_json::to_string(value) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", json);
            let _ = stdout.flush();
        }
    }
}

#[derive(Serialize)]
struct TargetListOutput<'a> {
    apps: &'a [TargetApp],
    #[serde(skip_serializing_if = "Option::is_none")]
    crash: Option<&'a CrashReport>,
}

#[derive(Serialize)]
struct AppRulesOutput<'a> {
    package: &'a str,
    activity_count: usize,
    rule_count: usize,
    activities: &'a ActRules,
}

#[derive(Serialize)]
struct ImportOutput<'a> {
    success: bool,
    source: &'a str,
    state: OrchestratorState,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a ImportSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    message: &'a str,
}
