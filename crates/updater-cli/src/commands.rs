use std::io::{BufRead, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use updater_api::{build_app, AppState};
use updater_config::Settings;
use updater_db::{resolve_credentials, BackupManager, PgTool};
use updater_docker::{discover_core, inspect_runtime, ContainerDriver, DockerCli};
use updater_domain::{
    EventStatus, EventType, HistoryEvent, JobState, UpgradeMode,
};
use updater_orchestrator::{
    autoupdate, render_playbook, Orchestrator, PlanRequest, PlaybookContext, Runner,
};
use updater_store::{EventFilter, FsStore, StateStore};

use crate::output;

/// Wait this long for an in-flight job during graceful shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(600);

struct Stack {
    settings: Settings,
    runner: Arc<Runner>,
}

fn build_stack(config: Option<PathBuf>) -> Result<Stack> {
    let settings = Settings::load(config.as_deref()).context("loading settings")?;
    let driver: Arc<dyn ContainerDriver> = Arc::new(DockerCli::new());
    let store = Arc::new(FsStore::new(&settings.state_dir));
    let tool = Arc::new(PgTool::new(driver.clone()));
    let orchestrator = Arc::new(Orchestrator::new(settings.clone(), driver, store, tool));
    Ok(Stack { settings, runner: Runner::new(orchestrator) })
}

fn backup_manager(stack: &Stack) -> BackupManager {
    let orchestrator = stack.runner.orchestrator();
    BackupManager::new(
        orchestrator.tool.clone(),
        &stack.settings.backup_dir,
        stack.settings.backup_timeout(),
    )
}

/// Interactive yes/no gate. Declining is a clean exit (code 0); refusing to
/// prompt without a terminal exits with code 2.
fn confirm_or_exit(prompt: &str, yes: bool) {
    if yes {
        return;
    }
    if !std::io::stdin().is_terminal() {
        eprintln!("{} requires confirmation; re-run with --yes", prompt);
        std::process::exit(2);
    }

    print!("{} [y/N] ", prompt);
    std::io::stdout().flush().ok();
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer).ok();
    if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
        println!("aborted");
        std::process::exit(0);
    }
}

// ── serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(config: Option<PathBuf>) -> Result<()> {
    let stack = build_stack(config)?;
    let state = AppState::new(stack.runner.clone());

    // Allow the Core container to call the control plane from its own IP.
    let orchestrator = stack.runner.orchestrator();
    match discover_core(orchestrator.driver.as_ref(), &stack.settings.image_pattern).await {
        Ok(container) => {
            if let Ok(runtime) =
                inspect_runtime(orchestrator.driver.as_ref(), &container.id).await
            {
                for network in &runtime.networks {
                    if let Ok(ip) = network.ip_address.parse() {
                        state.allow_ip(ip);
                        info!(ip = %network.ip_address, "allowlisted Core container address");
                    }
                }
            }
        }
        Err(e) => warn!(reason = %e.message, "no Core container found at startup"),
    }
    // An optional second bind on a private bridge interface, so the Core
    // container can reach the control plane without host networking.
    let bridge_bind = match &stack.settings.bridge_addr {
        Some(bridge) => {
            let addr = bridge
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid bridge_addr '{}'", bridge))?;
            state.allow_ip(addr.ip());
            Some(addr)
        }
        None => None,
    };

    if stack.settings.auto_update_enabled {
        let interval = Duration::from_secs(stack.settings.auto_update_interval_seconds);
        tokio::spawn(autoupdate::auto_update_loop(stack.runner.clone(), interval));
    }

    let app = build_app(state).into_make_service_with_connect_info::<SocketAddr>();
    if let Some(addr) = bridge_bind {
        let bridge_listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding bridge address {}", addr))?;
        info!(addr = %addr, "control-plane API listening on bridge interface");
        let bridge_app = app.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(bridge_listener, bridge_app).await {
                warn!(error = %e, "bridge listener exited");
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&stack.settings.listen_addr)
        .await
        .with_context(|| format!("binding {}", stack.settings.listen_addr))?;
    info!(addr = %stack.settings.listen_addr, "control-plane API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving control-plane API")?;

    // Graceful drain: the in-flight job finishes, no new jobs are accepted.
    info!("shutting down, waiting for any in-flight job");
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, stack.runner.wait_for_idle()).await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// ── plan / run ────────────────────────────────────────────────────────────────

pub async fn plan(config: Option<PathBuf>, target: String, mode: UpgradeMode) -> Result<()> {
    let stack = build_stack(config)?;
    let outcome = stack
        .runner
        .orchestrator()
        .plan(&PlanRequest { mode, requested_target: target })
        .await;
    output::print_plan(&outcome);
    if outcome.state == JobState::Failed {
        std::process::exit(1);
    }
    Ok(())
}

pub async fn run(
    config: Option<PathBuf>,
    target: String,
    mode: UpgradeMode,
    yes: bool,
) -> Result<()> {
    let stack = build_stack(config)?;
    confirm_or_exit(
        &format!("Upgrade the PayRam container to '{}'?", target),
        yes,
    );

    let job = match stack.runner.run_to_completion(mode, &target).await {
        Ok(job) => job,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    output::print_job(&job);
    if job.state == JobState::Failed {
        if let Some(code) = job.failure_code {
            println!();
            println!("Recovery playbook:");
            println!("{}", render_playbook(code, &playbook_context(&stack, &job)));
        }
        std::process::exit(1);
    }
    Ok(())
}

fn playbook_context(stack: &Stack, job: &updater_domain::UpgradeJob) -> PlaybookContext {
    PlaybookContext {
        backup_path: (!job.backup_path.is_empty()).then(|| job.backup_path.clone()),
        container_name: stack.settings.container_name.clone(),
        image_repo: Some(stack.settings.image_pattern.trim_end_matches(':').to_string()),
        base_url: None,
        http_port: None,
    }
}

// ── status / logs / playbook / history ────────────────────────────────────────

pub async fn status(config: Option<PathBuf>) -> Result<()> {
    let stack = build_stack(config)?;
    match stack.runner.orchestrator().store.load_job().await? {
        Some(job) => output::print_job(&job),
        None => println!("no upgrade job has run yet"),
    }
    Ok(())
}

pub async fn logs(config: Option<PathBuf>) -> Result<()> {
    let stack = build_stack(config)?;
    print!("{}", stack.runner.orchestrator().store.read_log().await?);
    Ok(())
}

pub async fn playbook(config: Option<PathBuf>) -> Result<()> {
    let stack = build_stack(config)?;
    let job = stack.runner.orchestrator().store.load_job().await?;
    match job {
        Some(job) if job.state == JobState::Failed => {
            let code = job.failure_code.expect("failed job carries a code");
            println!("{}: {}", code, job.message);
            println!();
            println!("{}", render_playbook(code, &playbook_context(&stack, &job)));
        }
        Some(_) => println!("the latest job did not fail; nothing to recover"),
        None => println!("no upgrade job has run yet"),
    }
    Ok(())
}

pub async fn history(
    config: Option<PathBuf>,
    event_type: Option<String>,
    status: Option<String>,
    limit: u32,
) -> Result<()> {
    let stack = build_stack(config)?;

    let event_type = match event_type.as_deref() {
        None => None,
        Some("upgrade") => Some(EventType::Upgrade),
        Some("backup") => Some(EventType::Backup),
        Some("restore") => Some(EventType::Restore),
        Some(other) => anyhow::bail!("unknown event type '{}'", other),
    };
    let status = match status.as_deref() {
        None => None,
        Some("started") => Some(EventStatus::Started),
        Some("succeeded") => Some(EventStatus::Succeeded),
        Some("failed") => Some(EventStatus::Failed),
        Some("validated") => Some(EventStatus::Validated),
        Some(other) => anyhow::bail!("unknown event status '{}'", other),
    };

    let events = stack
        .runner
        .orchestrator()
        .store
        .list_events(EventFilter { event_type, status }, limit)
        .await?;
    output::print_events(&events);
    Ok(())
}

// ── backup ────────────────────────────────────────────────────────────────────

pub async fn backup_list(config: Option<PathBuf>) -> Result<()> {
    let stack = build_stack(config)?;
    let backups = backup_manager(&stack).list().await?;
    output::print_backups(&backups);
    Ok(())
}

pub async fn backup_create(config: Option<PathBuf>) -> Result<()> {
    let stack = build_stack(config)?;
    let orchestrator = stack.runner.orchestrator();

    let (db_config, source) = resolve_credentials(
        orchestrator.driver.as_ref(),
        &stack.settings.image_pattern,
        &stack.settings.backup_dir,
    )
    .await
    .map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("using credentials from {}", source);

    let container = if db_config.is_local() {
        let found = discover_core(orchestrator.driver.as_ref(), &stack.settings.image_pattern)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        Some(found)
    } else {
        None
    };
    let from_version = container
        .as_ref()
        .map(|c| updater_docker::split_image_tag(&c.image).1)
        .unwrap_or_default();

    let store = &orchestrator.store;
    store
        .append_event(&HistoryEvent::new(
            EventType::Backup,
            EventStatus::Started,
            "operator-initiated backup",
            Utc::now(),
        ))
        .await?;

    let manager = backup_manager(&stack);
    match manager
        .create(
            &db_config,
            container.as_ref().map(|c| c.name.as_str()),
            &from_version,
            &from_version,
        )
        .await
    {
        Ok(created) => {
            store
                .append_event(
                    &HistoryEvent::new(
                        EventType::Backup,
                        EventStatus::Succeeded,
                        format!("backup {} created", created.backup.file_name),
                        Utc::now(),
                    )
                    .with_data("file", &created.backup.file_name)
                    .with_data("sha256", &created.sha256),
                )
                .await?;
            println!("created {} ({} bytes)", created.path.display(), created.backup.size_bytes);
            println!("sha256 {}", created.sha256);
            Ok(())
        }
        Err(e) => {
            store
                .append_event(&HistoryEvent::new(
                    EventType::Backup,
                    EventStatus::Failed,
                    e.to_string(),
                    Utc::now(),
                ))
                .await?;
            eprintln!("backup failed: {}", e);
            std::process::exit(1);
        }
    }
}

pub async fn backup_prune(config: Option<PathBuf>, retention: Option<u32>) -> Result<()> {
    let stack = build_stack(config)?;
    let retention = retention.unwrap_or(stack.settings.retention);
    let deleted = backup_manager(&stack).prune(retention).await?;
    if deleted.is_empty() {
        println!("nothing to prune (retention {})", retention);
    } else {
        for name in &deleted {
            println!("deleted {}", name);
        }
    }
    Ok(())
}

pub async fn backup_restore(config: Option<PathBuf>, path: PathBuf, yes: bool) -> Result<()> {
    let stack = build_stack(config)?;
    confirm_or_exit(
        &format!("Restore '{}' over the current database?", path.display()),
        yes,
    );

    let orchestrator = stack.runner.orchestrator();
    let (db_config, source) = resolve_credentials(
        orchestrator.driver.as_ref(),
        &stack.settings.image_pattern,
        &stack.settings.backup_dir,
    )
    .await
    .map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("using credentials from {}", source);

    let container = if db_config.is_local() {
        let found = discover_core(orchestrator.driver.as_ref(), &stack.settings.image_pattern)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        Some(found.name)
    } else {
        None
    };

    let store = &orchestrator.store;
    store
        .append_event(&HistoryEvent::new(
            EventType::Restore,
            EventStatus::Started,
            format!("restore from {}", path.display()),
            Utc::now(),
        ))
        .await?;

    let manager = backup_manager(&stack);
    match manager
        .restore(&path, &db_config, container.as_deref(), true)
        .await
    {
        Ok(result) => {
            store
                .append_event(
                    &HistoryEvent::new(
                        EventType::Restore,
                        EventStatus::Succeeded,
                        format!("restored {}", path.display()),
                        Utc::now(),
                    )
                    .with_data("fromVersion", &result.from_version)
                    .with_data("toVersion", &result.to_version),
                )
                .await?;
            println!(
                "database restored (backup taken on version {}, for upgrade to {})",
                result.from_version, result.to_version
            );
            if result.needs_recovery {
                println!(
                    "note: run the matching container version ({}) and restart it before use",
                    result.from_version
                );
            }
            Ok(())
        }
        Err(e) => {
            store
                .append_event(&HistoryEvent::new(
                    EventType::Restore,
                    EventStatus::Failed,
                    e.to_string(),
                    Utc::now(),
                ))
                .await?;
            eprintln!("restore failed: {}", e);
            std::process::exit(1);
        }
    }
}
