use console::{Style, style};
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::GodModeError;
use crate::orchestrator::{CrashReport, OrchestratorState};
use crate::rule::{ActRules, IconRef, TargetApp};

pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", style(text).bold().cyan());
        println!("{}", style("═".repeat(60)).dim());
        println!();
    }

    pub fn print_targets_table(&self, apps: &[TargetApp]) {
        if apps.is_empty() {
            println!("{}", style("No target apps recorded.").dim());
            return;
        }

        let rules: usize = apps.iter().map(|a| a.rule_count).sum();
        println!(
            "Apps: {}  Rules: {}",
            style(apps.len()).cyan(),
            style(rules).green()
        );
        println!();

        println!(
            "{:<40} {:<24} {:>10} {:>6}",
            style("Package").bold(),
            style("Label").bold(),
            style("Activities").bold(),
            style("Rules").bold()
        );
        println!("{}", style("─".repeat(83)).dim());

        for app in apps {
            let label = match &app.icon {
                IconRef::Default => style(app.label.as_str()).dim().to_string(),
                IconRef::Resource(_) => app.label.clone(),
            };
            println!(
                "{:<40} {:<24} {:>10} {:>6}",
                app.package_name, label, app.activity_count, app.rule_count
            );
        }
    }

    pub fn print_app_rules(&self, package: &str, rules: &ActRules) {
        self.print_header(&format!("App: {}", package));

        if rules.is_empty() {
            println!("{}", style("Discovered, no rules recorded yet.").dim());
            return;
        }

        for (activity, view_rules) in rules.iter() {
            println!(
                "{} {}",
                style(activity).bold(),
                style(format!("({})", view_rules.len())).dim()
            );
            for (index, rule) in view_rules.iter().enumerate() {
                let marker = if rule.is_hidden() {
                    style("hidden").red()
                } else {
                    style("shown").green()
                };
                let name = rule
                    .alias
                    .as_deref()
                    .or(rule.description.as_deref())
                    .unwrap_or_else(|| rule.view_class.as_deref().unwrap_or("?"));
                println!(
                    "  #{:<3} {:<8} {}  {}",
                    index,
                    marker,
                    name,
                    style(rule.view_key()).dim()
                );
            }
            println!();
        }
    }

    pub fn print_crash_report(&self, report: &CrashReport) {
        self.print_warning(&report.summary());
        if let Some(trace) = &report.trace {
            for line in trace.lines().take(5) {
                println!("    {}", style(line).dim());
            }
        }
    }

    pub fn print_state(&self, state: OrchestratorState, last_error: Option<&str>) {
        let line = self.state_style(state).apply_to(state.to_string());
        match last_error {
            Some(err) => println!("State: {} ({})", line, style(err).red()),
            None => println!("State: {}", line),
        }
    }

    pub fn print_success(&self, message: &str) {
        println!("{} {}", style("✓").green().bold(), message);
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red().bold(), message);
    }

    /// Prints a command failure. Errors outside the user's control also get
    /// a note that the stored rules were left alone.
    pub fn print_failure(&self, error: &GodModeError) {
        self.print_error(&error.to_string());
        if !error.is_user_facing() {
            eprintln!(
                "  {}",
                style("Stored rules were not changed. Run with --verbose for details.").dim()
            );
        }
    }

    pub fn print_warning(&self, message: &str) {
        println!("{} {}", style("!").yellow().bold(), message);
    }

    pub fn print_info(&self, message: &str) {
        println!("{} {}", style("→").cyan(), message);
    }

    pub fn create_spinner(&self, message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("static template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        pb
    }

    fn state_style(&self, state: OrchestratorState) -> Style {
        match state {
            OrchestratorState::Idle => Style::new().dim(),
            OrchestratorState::Loading | OrchestratorState::Importing => Style::new().yellow(),
            OrchestratorState::Updating => Style::new().cyan(),
            OrchestratorState::Ready => Style::new().green(),
            OrchestratorState::Failed => Style::new().red().bold(),
        }
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}
