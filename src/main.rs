use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use godmode::bridge::EditModeState;
use godmode::cli::{Cli, Commands, ConfigAction, Display, IconAction, OutputFormat, ToggleAction};
use godmode::config::{DataPaths, GodModeConfig, Preferences};
use godmode::error::{GodModeError, Result};
use godmode::orchestrator::RuleOrchestrator;
use godmode::output::OutputWriter;
use godmode::rule::{FileSource, PackageNameResolver};

const DEFAULT_DATA_DIR: &str = ".godmode";

/// Context for command output handling.
struct OutputContext<'a> {
    display: &'a Display,
    writer: &'a OutputWriter,
}

impl OutputContext<'_> {
    fn is_text(&self) -> bool {
        self.writer.format() == OutputFormat::Text
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            Display::new().print_failure(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("godmode=debug")
    } else {
        EnvFilter::new("godmode=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let display = Display::new();
    let writer = OutputWriter::new(cli.output);
    let out = OutputContext {
        display: &display,
        writer: &writer,
    };
    let data_dir = resolve_data_dir(cli.data_dir)?;

    match cli.command {
        Commands::Init => cmd_init(&out, &data_dir).await,
        Commands::List => cmd_list(&out, &data_dir).await,
        Commands::Show { package } => cmd_show(&out, &data_dir, &package).await,
        Commands::Import { file } => cmd_import(&out, &data_dir, file).await,
        Commands::Remove {
            package,
            activity,
            index,
        } => cmd_remove(&out, &data_dir, &package, activity.zip(index)).await,
        Commands::Reset { yes } => cmd_reset(&out, &data_dir, yes).await,
        Commands::EditMode { action, app } => cmd_edit_mode(&out, &data_dir, action, app).await,
        Commands::Icon { action } => cmd_icon(&out, &data_dir, action).await,
        Commands::Config { action } => cmd_config(&out, &data_dir, action).await,
    }
}

fn resolve_data_dir(data_dir: Option<PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(dir) => Ok(dir),
        None => Ok(std::env::current_dir()?.join(DEFAULT_DATA_DIR)),
    }
}

async fn open(data_dir: &Path) -> Result<(GodModeConfig, DataPaths)> {
    if !data_dir.exists() {
        return Err(GodModeError::Other(format!(
            "{} is not initialized. Run 'godmode init' first.",
            data_dir.display()
        )));
    }
    let config = GodModeConfig::load(data_dir).await?;
    let paths = DataPaths::new(data_dir.to_path_buf(), &config);
    Ok((config, paths))
}

/// Opens the orchestrator and waits for the initial load.
async fn open_orchestrator(
    out: &OutputContext<'_>,
    data_dir: &Path,
) -> Result<RuleOrchestrator> {
    let (config, paths) = open(data_dir).await?;
    let orchestrator = RuleOrchestrator::new(&config, &paths).await?;

    let mut observer = orchestrator.subscribe();
    observer.settled().await;

    if let Some(report) = orchestrator.crash_report()
        && out.is_text()
    {
        out.display.print_crash_report(&report);
    }
    if let Some(err) = orchestrator.last_error()
        && out.is_text()
    {
        out.display
            .print_warning(&format!("Stored rules could not be read: {}", err));
    }
    if !orchestrator.bridge().is_available() && out.is_text() {
        out.display
            .print_warning(&GodModeError::BridgeUnavailable.to_string());
    }

    let upgraded_from = record_version(&paths).await.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to record version");
        None
    });
    if let Some(previous) = upgraded_from
        && out.is_text()
    {
        print_upgrade(out, &previous);
    }

    Ok(orchestrator)
}

/// Stores the running version. Returns the previously seen version when it
/// differs.
async fn record_version(paths: &DataPaths) -> Result<Option<String>> {
    let mut prefs = Preferences::load(&paths.prefs_file).await;
    let previous = prefs.last_seen_version.clone();
    if !prefs.record_version(env!("CARGO_PKG_VERSION")) {
        return Ok(None);
    }
    prefs.save(&paths.prefs_file).await?;
    Ok(previous)
}

fn print_upgrade(out: &OutputContext<'_>, previous: &str) {
    out.display.print_info(&format!(
        "Upgraded from {} to {}",
        previous,
        env!("CARGO_PKG_VERSION")
    ));
}

async fn cmd_init(out: &OutputContext<'_>, data_dir: &Path) -> Result<()> {
    let config_path = data_dir.join(godmode::config::CONFIG_FILE);
    let already = config_path.exists();

    let config = if already {
        GodModeConfig::load(data_dir).await?
    } else {
        GodModeConfig::default()
    };
    let paths = DataPaths::new(data_dir.to_path_buf(), &config);
    paths.ensure_dirs().await?;
    if !already {
        config.save(data_dir).await?;
    }

    let upgraded_from = record_version(&paths).await?;

    if !out.is_text() {
        out.writer.emit_message(&format!("Initialized {}", data_dir.display()));
        return Ok(());
    }

    if already {
        out.display
            .print_warning("godmode is already initialized in this directory.");
    } else {
        out.display.print_success("Initialized godmode.");
        out.display
            .print_info(&format!("Configuration: {}", config_path.display()));
        out.display
            .print_info(&format!("Rules: {}", paths.rules_file.display()));
    }
    if let Some(previous) = upgraded_from {
        print_upgrade(out, &previous);
    }

    Ok(())
}

async fn cmd_list(out: &OutputContext<'_>, data_dir: &Path) -> Result<()> {
    let orchestrator = open_orchestrator(out, data_dir).await?;
    let apps = orchestrator.target_apps(&PackageNameResolver);

    match out.writer.format() {
        OutputFormat::Text => {
            out.display.print_header("Target Apps");
            out.display.print_targets_table(&apps);
        }
        OutputFormat::Json => out
            .writer
            .emit_targets(&apps, orchestrator.crash_report().as_ref()),
    }

    orchestrator.shutdown().await
}

async fn cmd_show(out: &OutputContext<'_>, data_dir: &Path, package: &str) -> Result<()> {
    let orchestrator = open_orchestrator(out, data_dir).await?;
    let snapshot = orchestrator.snapshot();
    let rules = snapshot
        .get(package)
        .ok_or_else(|| GodModeError::AppNotFound(package.to_string()))?;

    match out.writer.format() {
        OutputFormat::Text => out.display.print_app_rules(package, rules),
        OutputFormat::Json => out.writer.emit_app(package, rules),
    }

    orchestrator.shutdown().await
}

async fn cmd_import(out: &OutputContext<'_>, data_dir: &Path, file: PathBuf) -> Result<()> {
    let orchestrator = open_orchestrator(out, data_dir).await?;
    let source_name = file.display().to_string();

    let spinner = out
        .is_text()
        .then(|| out.display.create_spinner("Importing rules..."));

    let result = match orchestrator.import_rules(FileSource::new(file)) {
        Ok(handle) => handle.wait().await,
        Err(e) => Err(e),
    };

    if let Some(s) = spinner {
        s.finish_and_clear();
    }

    out.writer.emit_import(
        &source_name,
        result.as_ref().map_err(ToString::to_string),
        orchestrator.state(),
    );

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            orchestrator.shutdown().await?;
            return Err(e);
        }
    };

    if out.is_text() {
        out.display.print_success(&format!(
            "Imported rules from {}. Apps: {} Rules: {}",
            source_name, summary.apps, summary.rules
        ));
        let report = summary.report;
        if report.is_empty() {
            out.display.print_info("Nothing new in the imported file.");
        } else {
            out.display.print_info(&format!(
                "{} new apps, {} activities added, {} activities replaced",
                report.apps_added, report.activities_added, report.activities_replaced
            ));
        }
    }

    orchestrator.shutdown().await
}

async fn cmd_remove(
    out: &OutputContext<'_>,
    data_dir: &Path,
    package: &str,
    rule: Option<(String, usize)>,
) -> Result<()> {
    let orchestrator = open_orchestrator(out, data_dir).await?;

    let message = match rule {
        Some((activity, index)) => {
            let removed = orchestrator.delete_rule(package, &activity, index).await?;
            format!(
                "Removed rule {} from {}/{}",
                removed.view_key(),
                package,
                activity
            )
        }
        None => {
            orchestrator.delete_app_rules(package).await?;
            format!("Removed all rules for {}", package)
        }
    };

    match out.writer.format() {
        OutputFormat::Text => out.display.print_success(&message),
        OutputFormat::Json => out.writer.emit_message(&message),
    }

    orchestrator.shutdown().await
}

async fn cmd_reset(out: &OutputContext<'_>, data_dir: &Path, yes: bool) -> Result<()> {
    if !yes {
        return Err(GodModeError::Other(
            "Refusing to delete all rules without --yes".into(),
        ));
    }

    let orchestrator = open_orchestrator(out, data_dir).await?;
    orchestrator.reset_rules().await?;

    match out.writer.format() {
        OutputFormat::Text => out.display.print_success("All rules deleted."),
        OutputFormat::Json => out.writer.emit_message("All rules deleted"),
    }

    orchestrator.shutdown().await
}

#[derive(Serialize)]
struct EditModeOutput {
    available: bool,
    #[serde(flatten)]
    state: EditModeState,
}

async fn cmd_edit_mode(
    out: &OutputContext<'_>,
    data_dir: &Path,
    action: ToggleAction,
    app: Option<String>,
) -> Result<()> {
    let (config, paths) = open(data_dir).await?;
    let orchestrator = RuleOrchestrator::new(&config, &paths).await?;

    let editing = match action {
        ToggleAction::On => Some(true),
        ToggleAction::Off => Some(false),
        ToggleAction::Inherit => None,
        ToggleAction::Status => {
            let bridge = orchestrator.bridge();
            let status = EditModeOutput {
                available: bridge.is_available(),
                state: bridge.state(),
            };
            match out.writer.format() {
                OutputFormat::Text => {
                    if !status.available {
                        out.display.print_warning(
                            &GodModeError::BridgeUnavailable.to_string(),
                        );
                    }
                    let label = match &app {
                        Some(package) => format!(
                            "Edit mode for {}: {}",
                            package,
                            on_off(status.state.is_editing_for(package))
                        ),
                        None => format!("Edit mode: {}", on_off(status.state.editing)),
                    };
                    out.display.print_info(&label);
                    for (package, editing) in &status.state.app_overrides {
                        println!("    {} {}", package, on_off(*editing));
                    }
                }
                OutputFormat::Json => out.writer.emit_value(&status),
            }
            return orchestrator.shutdown().await;
        }
    };

    let result = match (&app, editing) {
        (Some(package), editing) => orchestrator.set_app_editing(package, editing).await,
        (None, Some(editing)) => orchestrator.set_editing(editing).await,
        (None, None) => Err(GodModeError::Other(
            "'inherit' only applies to a single app (use --app)".into(),
        )),
    };
    orchestrator.shutdown().await?;
    result?;

    let message = match (&app, editing) {
        (Some(package), Some(editing)) => {
            format!("Edit mode for {} turned {}", package, on_off(editing))
        }
        (Some(package), None) => format!("{} follows the global edit mode", package),
        (None, editing) => format!("Edit mode turned {}", on_off(editing.unwrap_or(false))),
    };
    match out.writer.format() {
        OutputFormat::Text => out.display.print_success(&message),
        OutputFormat::Json => out.writer.emit_message(&message),
    }
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

#[derive(Serialize)]
struct IconOutput {
    icon_hidden: bool,
}

async fn cmd_icon(out: &OutputContext<'_>, data_dir: &Path, action: IconAction) -> Result<()> {
    let (_, paths) = open(data_dir).await?;
    let mut prefs = Preferences::load(&paths.prefs_file).await;

    let changed = match action {
        IconAction::Hide => !std::mem::replace(&mut prefs.icon_hidden, true),
        IconAction::Show => std::mem::replace(&mut prefs.icon_hidden, false),
        IconAction::Toggle => {
            prefs.toggle_icon();
            true
        }
        IconAction::Status => false,
    };
    if changed {
        prefs.save(&paths.prefs_file).await?;
    }

    match out.writer.format() {
        OutputFormat::Text => {
            let state = if prefs.icon_hidden { "hidden" } else { "visible" };
            if changed {
                out.display
                    .print_success(&format!("Launcher icon is now {}", state));
            } else {
                out.display.print_info(&format!("Launcher icon is {}", state));
            }
        }
        OutputFormat::Json => out.writer.emit_value(&IconOutput {
            icon_hidden: prefs.icon_hidden,
        }),
    }

    Ok(())
}

async fn cmd_config(out: &OutputContext<'_>, data_dir: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let (config, _) = open(data_dir).await?;
            match out.writer.format() {
                OutputFormat::Text => {
                    let text = toml::to_string_pretty(&config)
                        .map_err(|e| GodModeError::Config(e.to_string()))?;
                    println!("{}", text);
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&config)?;
                    println!("{}", json);
                }
            }
        }
        ConfigAction::Reset => {
            if !data_dir.exists() {
                tokio::fs::create_dir_all(data_dir).await?;
            }
            let config = GodModeConfig::default();
            config.save(data_dir).await?;
            match out.writer.format() {
                OutputFormat::Text => out
                    .display
                    .print_success("Configuration reset to defaults."),
                OutputFormat::Json => out.writer.emit_message("Configuration reset to defaults"),
            }
        }
    }

    Ok(())
}
