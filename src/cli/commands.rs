use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::cli::args::{
    ConfigAction, ConfigArgs, HandoffAction, HandoffArgs, HandoffPutArgs, InitArgs,
    OutputFormat, RunArgs, WatchArgs,
};
use crate::config::loader::get_config_path;
use crate::config::types::{PlayletConfig, RuntimeSource};
use crate::display::{HtmlFileSurfaceFactory, OutputSink};
use crate::error::{PlayletError, Result};
use crate::handoff::{Handoff, HandoffStore, PLAYGROUND_SLOT};
use crate::sandbox::{Dispatcher, ExecutionResult, GuestLanguage, LanguageKind};
use crate::session::Playground;

// ============================================================================
// Execution Commands
// ============================================================================

/// Run a snippet once
pub async fn run(args: RunArgs, mut config: PlayletConfig, format: OutputFormat) -> Result<()> {
    if let Some(timeout) = args.timeout {
        config.execution.timeout_seconds = timeout;
    }

    let (code, language) = if args.handoff {
        let handoff = HandoffStore::new().take(PLAYGROUND_SLOT).await?;
        let language = args.language.unwrap_or(handoff.language);
        (handoff.code, language)
    } else if let Some(code) = args.code {
        (code, args.language.unwrap_or_default())
    } else if let Some(file) = &args.file {
        let code = tokio::fs::read_to_string(file).await?;
        let language = args
            .language
            .or_else(|| GuestLanguage::from_path(file))
            .unwrap_or_default();
        (code, language)
    } else {
        (read_stdin().await?, args.language.unwrap_or_default())
    };

    info!(language = %language, bytes = code.len(), "Running snippet");

    let surfaces = Arc::new(HtmlFileSurfaceFactory::from_config(&config.surface));
    let playground = Playground::with_surfaces(&config, surfaces.clone());

    let outcome = playground.execute(&code, &language).await;
    let result = match outcome {
        Ok(result) => result,
        // The sink holds the timeout message and the output read before it.
        Err(PlayletError::Timeout { .. }) => playground
            .snapshot()
            .result
            .unwrap_or_default(),
        Err(e) => return Err(e),
    };

    if args.pop {
        playground.open_secondary_surface().await?;
        eprintln!("Popout: {}", surfaces.path().display());
    }

    let kind = playground.dispatcher().classify(&language);
    if kind == LanguageKind::Markup {
        output_markup(&playground.output_text(), &language, format);
    } else {
        output_execution_result(&result, &language, kind, format);
    }

    Ok(())
}

/// Re-run a file on every change while the popout stays open
pub async fn watch(args: WatchArgs, config: PlayletConfig, format: OutputFormat) -> Result<()> {
    let language = args
        .language
        .or_else(|| GuestLanguage::from_path(&args.file))
        .unwrap_or_default();

    let surfaces = Arc::new(HtmlFileSurfaceFactory::from_config(&config.surface));
    let playground = Playground::with_surfaces(&config, surfaces.clone());
    playground.open_secondary_surface().await?;

    println!("Watching {} ({})", args.file.display(), language.label());
    println!("Popout: {}", surfaces.path().display());
    println!("Close the popout or press Ctrl+C to stop");

    let poll_interval = Duration::from_millis(config.surface.poll_interval_ms.max(1));
    let mut tick = tokio::time::interval(poll_interval);
    let mut last_modified: Option<SystemTime> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                playground.close_secondary_surface().await;
                break;
            }
            _ = playground.secondary_surface_closed() => {
                info!("Popout closed");
                break;
            }
            _ = tick.tick() => {
                let Some(modified) = modified_time(&args.file).await else {
                    continue;
                };
                if last_modified == Some(modified) {
                    continue;
                }
                last_modified = Some(modified);

                let code = tokio::fs::read_to_string(&args.file).await?;
                playground.set_source(&code, &language);
                let outcome = tokio::select! {
                    outcome = playground.execute_while_open(&code, &language) => outcome,
                    _ = tokio::signal::ctrl_c() => {
                        playground.close_secondary_surface().await;
                        break;
                    }
                };
                let Some(outcome) = outcome else {
                    info!("Popout closed");
                    break;
                };
                match outcome {
                    Ok(result) => {
                        let kind = playground.dispatcher().classify(&language);
                        if kind != LanguageKind::Markup {
                            output_execution_result(&result, &language, kind, format);
                        }
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(error = %e, "Run did not complete");
                    }
                    Err(e) if e.is_infrastructure() => {
                        eprintln!("{}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Handoff Commands
// ============================================================================

pub async fn handoff(args: HandoffArgs, format: OutputFormat) -> Result<()> {
    let store = HandoffStore::new();

    match args.action {
        HandoffAction::Put(HandoffPutArgs { file, language }) => {
            let code = match &file {
                Some(path) => tokio::fs::read_to_string(path).await?,
                None => read_stdin().await?,
            };
            let language = language
                .or_else(|| file.as_deref().and_then(GuestLanguage::from_path))
                .unwrap_or_default();

            let handoff = Handoff::new(&code, language.id());
            let path = store.put(PLAYGROUND_SLOT, &handoff).await?;

            match format {
                OutputFormat::Text => println!(
                    "Handed off {} code to the playground",
                    handoff.language.label()
                ),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "slot": PLAYGROUND_SLOT,
                        "language": handoff.language,
                        "path": path.display().to_string(),
                    })
                ),
            }
        }
        HandoffAction::Take => {
            let handoff = store.take(PLAYGROUND_SLOT).await?;
            match format {
                OutputFormat::Text => println!("{}", handoff.code),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&handoff)?),
            }
        }
    }

    Ok(())
}

// ============================================================================
// Info Commands
// ============================================================================

/// List languages and the way each one runs
pub async fn languages(config: PlayletConfig, format: OutputFormat) -> Result<()> {
    let dispatcher = Dispatcher::from_config(&config, OutputSink::new());

    let mut languages: Vec<GuestLanguage> = GuestLanguage::all().collect();
    for id in config.runtimes.keys() {
        let language = GuestLanguage::parse(id);
        if !languages.contains(&language) {
            languages.push(language);
        }
    }

    let rows: Vec<_> = languages
        .iter()
        .map(|language| {
            let kind = dispatcher.classify(language);
            let runtime = (kind == LanguageKind::ExternalInterpreted)
                .then(|| config.runtimes.get(language.id()))
                .flatten()
                .map(|runtime| match runtime.source {
                    RuntimeSource::Host => {
                        let found = which::which(&runtime.program).is_ok();
                        format!(
                            "{}{}",
                            runtime.program,
                            if found { "" } else { " (not found)" }
                        )
                    }
                    RuntimeSource::Wasmer => {
                        format!("wasmer:{}", runtime.package.as_deref().unwrap_or("-"))
                    }
                });
            (language, kind, runtime)
        })
        .collect();

    match format {
        OutputFormat::Text => {
            println!("{:<12} {:<14} {:<12} RUNTIME", "ID", "LABEL", "KIND");
            println!("{}", "-".repeat(56));
            for (language, kind, runtime) in &rows {
                println!(
                    "{:<12} {:<14} {:<12} {}",
                    language.id(),
                    language.label(),
                    kind.to_string(),
                    runtime.as_deref().unwrap_or("-")
                );
            }
        }
        OutputFormat::Json => {
            let json: Vec<_> = rows
                .iter()
                .map(|(language, kind, runtime)| {
                    serde_json::json!({
                        "id": language.id(),
                        "label": language.label(),
                        "kind": kind,
                        "runtime": runtime,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let default_config = PlayletConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| PlayletError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Evaluate JavaScript in an isolated worker");
    println!("  playlet run -e \"console.log('hi'); 6 * 7\"");
    println!();
    println!("  # Run a Python file and pop the output out");
    println!("  playlet run script.py --pop");
    println!();
    println!("  # Keep an HTML page re-rendering while you edit it");
    println!("  playlet watch page.html");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: PlayletConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| PlayletError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn read_stdin() -> Result<String> {
    let mut code = String::new();
    tokio::io::stdin().read_to_string(&mut code).await?;
    Ok(code)
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

fn output_execution_result(
    result: &ExecutionResult,
    language: &GuestLanguage,
    kind: LanguageKind,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Text => {
            for line in &result.logs {
                println!("{}", line);
            }
            if let Some(value) = &result.result {
                println!("{}", value);
            }
            if let Some(error) = &result.error {
                eprintln!("Error: {}", error);
                std::process::exit(1);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "language": language,
                    "kind": kind,
                    "result": result.result,
                    "error": result.error,
                    "logs": result.logs,
                })
            );
        }
    }
}

fn output_markup(document: &str, language: &GuestLanguage, format: OutputFormat) {
    match format {
        OutputFormat::Text => print!("{}", document),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "language": language,
                    "kind": LanguageKind::Markup,
                    "document": document,
                })
            );
        }
    }
}
