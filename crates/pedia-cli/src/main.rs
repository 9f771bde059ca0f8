//! Pedia CLI: a pediatric clinical assistant for the terminal.

use anyhow::{Context, Result};
use clap::Parser;
use pedia_api::{HttpChatClient, RetryConfig};
use pedia_config::{CliOverrides, PediaConfig, Preferences, UnitSystem, UserProfile, UserStore};
use pedia_core::{ChatService, SendOptions, SendOutcome, ServiceConfig};
use pedia_guard::{
    ActivityKind, DEFAULT_GRACE_MINUTES, DEFAULT_TIMEOUT_MINUTES, GuardConfig, GuardSignal,
};
use pedia_queue::QueueItemKind;
use pedia_storage::{FileStorage, Storage};
use pedia_types::{EvidenceLevel, ResponseStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pedia", version, about = "A pediatric clinical assistant for the terminal")]
struct Cli {
    /// Send a single question and print the answer (non-interactive)
    #[arg(short, long)]
    print: Option<String>,

    /// API key (overrides PEDIA_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Chat service base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Directory for persisted state
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Settings file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start offline; questions are queued until /online
    #[arg(long)]
    offline: bool,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = PediaConfig::load(CliOverrides {
        config_file: cli.config,
        api_key: cli.api_key,
        base_url: cli.base_url,
        data_dir: cli.data_dir,
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let (service, user) = build_service(&config, cli.offline).await?;

    if let Some(question) = cli.print {
        return print_mode(service, &question).await;
    }

    repl(service, user).await
}

async fn build_service(config: &PediaConfig, offline: bool) -> Result<(ChatService, UserStore)> {
    let storage: Arc<dyn Storage> = Arc::new(
        FileStorage::new(config.data_dir.clone())
            .await
            .context("Failed to open data directory")?,
    );

    let mut client = HttpChatClient::new(&config.api_base_url, config.api_key.clone())
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .with_timeout(Duration::from_secs(config.request_timeout_secs));
    if let Some(max_retries) = config.api_max_retries {
        client = client.with_retry_config(RetryConfig {
            max_retries,
            ..RetryConfig::default()
        });
    }

    let guard = match (config.guard_timeout_minutes, config.guard_grace_minutes) {
        (None, None) => None,
        (timeout, grace) => Some(GuardConfig::from_minutes(
            timeout.map(|m| m as u64).unwrap_or(DEFAULT_TIMEOUT_MINUTES),
            grace.map(|m| m as u64).unwrap_or(DEFAULT_GRACE_MINUTES),
        )),
    };

    let mut service = ChatService::load(
        storage.clone(),
        Arc::new(client),
        ServiceConfig {
            message_cap: config.message_cap,
            queue_max_retries: config.queue_max_retries,
            guard,
            audit_capacity: config.audit_capacity,
        },
    )
    .await;
    if offline {
        service.set_online(false).await;
    }

    let user = UserStore::load(storage).await;
    service.set_send_options(send_options(user.preferences()));

    Ok((service, user))
}

fn send_options(prefs: &Preferences) -> SendOptions {
    SendOptions {
        include_evidence: Some(prefs.include_evidence),
        response_style: Some(prefs.response_style),
    }
}

/// Print mode: single question, answer to stdout, exit.
async fn print_mode(mut service: ChatService, question: &str) -> Result<()> {
    send_and_render(&mut service, question).await;
    Ok(())
}

async fn repl(mut service: ChatService, mut user: UserStore) -> Result<()> {
    let stdin = io::stdin();

    let count = service.store().sessions().len();
    eprintln!(
        "pedia v{} ({count} conversation{}, {})",
        env!("CARGO_PKG_VERSION"),
        if count == 1 { "" } else { "s" },
        if service.is_online() { "online" } else { "offline" },
    );
    eprintln!("Ask about pediatric care. Type /help for commands, Ctrl+D to exit.\n");

    loop {
        eprint!("> ");
        io::stderr().flush()?;

        let mut input = String::new();
        let bytes_read = stdin.lock().read_line(&mut input)?;
        if bytes_read == 0 {
            eprintln!();
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        // Every line of input counts as activity; the idle clock may have
        // crossed a threshold since the last one.
        match service.note_activity(ActivityKind::Key).await {
            Some(GuardSignal::TimeoutWarning) => {
                eprintln!("You have been idle for a while; the session will lock soon.");
            }
            Some(GuardSignal::ForcedLogout) => {
                eprintln!("Session locked after inactivity.");
            }
            None => {}
        }
        if service.guard().is_expired() && !matches!(input, "/unlock" | "/quit" | "/exit") {
            eprintln!("Session is locked. Type /unlock to continue or /quit to exit.");
            continue;
        }

        // Handle slash commands
        if let Some(handled) = handle_slash_command(input, &mut service, &mut user).await {
            match handled {
                SlashResult::Continue => continue,
                SlashResult::Break => break,
                SlashResult::Unknown => {
                    eprintln!("Unknown command: {input}. Type /help for available commands.");
                    continue;
                }
            }
        }

        send_and_render(&mut service, input).await;
        println!();
    }

    // Final save
    service.sync_now().await;
    if !service.queue().is_empty() {
        eprintln!(
            "{} queued action(s) will be delivered next time you are online.",
            service.queue().len()
        );
    }
    Ok(())
}

/// Send one question, cancellable with Ctrl+C, and render the outcome.
async fn send_and_render(service: &mut ChatService, question: &str) {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let result = service.send_message(question, &cancel).await;
    ctrl_c.abort();

    match result {
        Ok(outcome) => render_outcome(&outcome),
        Err(e) => eprintln!("\n{e}"),
    }
}

fn render_outcome(outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Delivered(reply) => {
            if let Some(text) = reply.message.first_text() {
                println!("{text}");
            }
            for citation in &reply.message.citations {
                eprintln!("  [{}] {}", citation.source, citation.title);
            }
            if let Some(level) = reply.message.evidence_level {
                eprintln!("  evidence: {}", evidence_label(level));
            }
            for unit in &reply.medical_units {
                eprintln!("  {}: {} {}", unit.name, unit.value, unit.unit);
            }
            if !reply.suggestions.is_empty() {
                eprintln!("  follow-ups:");
                for suggestion in &reply.suggestions {
                    eprintln!("    {suggestion}");
                }
            }
        }
        SendOutcome::QueuedOffline => {
            eprintln!("Offline: your question was queued and will be sent when you reconnect.");
        }
        SendOutcome::Failed { error } => {
            eprintln!("The assistant could not answer: {error}");
        }
    }
}

enum SlashResult {
    Continue,
    Break,
    Unknown,
}

async fn handle_slash_command(
    input: &str,
    service: &mut ChatService,
    user: &mut UserStore,
) -> Option<SlashResult> {
    if !input.starts_with('/') {
        return None;
    }

    let (cmd, args) = match input.split_once(' ') {
        Some((c, a)) => (c, Some(a.trim())),
        None => (input, None),
    };

    match cmd {
        "/quit" | "/exit" => Some(SlashResult::Break),
        "/help" => {
            print_help();
            Some(SlashResult::Continue)
        }
        "/new" => {
            let id = service.create_session(args.map(str::to_string), None).await;
            eprintln!("New conversation {}.", short(id));
            Some(SlashResult::Continue)
        }
        "/sessions" => {
            handle_sessions_list(service);
            Some(SlashResult::Continue)
        }
        "/switch" => {
            match args {
                Some(prefix) => handle_switch(service, prefix).await,
                None => eprintln!("Usage: /switch <conversation-id-prefix>"),
            }
            Some(SlashResult::Continue)
        }
        "/search" => {
            match args {
                Some(query) => handle_search(service, query),
                None => eprintln!("Usage: /search <text>"),
            }
            Some(SlashResult::Continue)
        }
        "/rename" => {
            match args {
                Some(title) => handle_rename(service, title).await,
                None => eprintln!("Usage: /rename <new title>"),
            }
            Some(SlashResult::Continue)
        }
        "/pin" => {
            handle_pin(service, args, true).await;
            Some(SlashResult::Continue)
        }
        "/unpin" => {
            handle_pin(service, args, false).await;
            Some(SlashResult::Continue)
        }
        "/tag" => {
            match args {
                Some(tag) => handle_tag(service, tag, true).await,
                None => eprintln!("Usage: /tag <tag>"),
            }
            Some(SlashResult::Continue)
        }
        "/untag" => {
            match args {
                Some(tag) => handle_tag(service, tag, false).await,
                None => eprintln!("Usage: /untag <tag>"),
            }
            Some(SlashResult::Continue)
        }
        "/export" => {
            handle_export(service, args).await;
            Some(SlashResult::Continue)
        }
        "/import" => {
            match args {
                Some(path) => handle_import(service, path).await,
                None => eprintln!("Usage: /import <file>"),
            }
            Some(SlashResult::Continue)
        }
        "/delete" => {
            match args {
                Some(prefix) => handle_delete(service, prefix).await,
                None => eprintln!("Usage: /delete <conversation-id-prefix>"),
            }
            Some(SlashResult::Continue)
        }
        "/clear" => {
            service.clear_sessions().await;
            eprintln!("Deleted all conversations.");
            Some(SlashResult::Continue)
        }
        "/queue" => {
            handle_queue(service);
            Some(SlashResult::Continue)
        }
        "/audit" => {
            handle_audit(service);
            Some(SlashResult::Continue)
        }
        "/sync" => {
            service.sync_now().await;
            eprintln!("Saved.");
            Some(SlashResult::Continue)
        }
        "/online" => {
            match service.set_online(true).await {
                Some(report) if report.attempted() > 0 => eprintln!(
                    "Back online. Delivered {}, requeued {}, dropped {}.",
                    report.delivered, report.requeued, report.dropped
                ),
                Some(_) => eprintln!("Back online."),
                None => eprintln!("Already online."),
            }
            Some(SlashResult::Continue)
        }
        "/offline" => {
            service.set_online(false).await;
            eprintln!("Offline mode: questions will be queued.");
            Some(SlashResult::Continue)
        }
        "/prefs" => {
            handle_prefs(service, user, args).await;
            Some(SlashResult::Continue)
        }
        "/profile" => {
            handle_profile(user, args).await;
            Some(SlashResult::Continue)
        }
        "/unlock" => {
            service.reset_guard();
            eprintln!("Session unlocked.");
            Some(SlashResult::Continue)
        }
        _ => Some(SlashResult::Unknown),
    }
}

fn handle_sessions_list(service: &ChatService) {
    let summaries = service.summaries();
    if summaries.is_empty() {
        eprintln!("No conversations yet.");
        return;
    }
    let current = service.store().current_session_id();
    eprintln!("Conversations:");
    for s in &summaries {
        eprintln!(
            "  {}{} {:>3} msgs  {}  {}{}",
            s.short_id(),
            if Some(s.id) == current { "*" } else { " " },
            s.message_count,
            s.updated_at.format("%Y-%m-%d %H:%M"),
            if s.is_pinned { "[pinned] " } else { "" },
            s.title
        );
    }
}

async fn handle_switch(service: &mut ChatService, prefix: &str) {
    let Some(id) = resolve_session(service, prefix) else {
        return;
    };
    match service.select_session(id).await {
        Ok(()) => {
            let title = service
                .store()
                .session(id)
                .map(|s| s.title.clone())
                .unwrap_or_default();
            eprintln!("Switched to {} ({title}).", short(id));
        }
        Err(e) => eprintln!("Failed to switch: {e}"),
    }
}

fn handle_search(service: &ChatService, query: &str) {
    let hits = service.search(query);
    if hits.is_empty() {
        eprintln!("No matches.");
        return;
    }
    eprintln!("{} match(es), newest first:", hits.len());
    for hit in &hits {
        let text = hit.message.first_text().unwrap_or("(no text)");
        let snippet: String = text.chars().take(60).collect();
        eprintln!(
            "  [{}] {}: {snippet}",
            short(hit.session_id),
            hit.session_title
        );
    }
}

async fn handle_rename(service: &mut ChatService, title: &str) {
    let Some(id) = current_session(service) else {
        return;
    };
    match service.rename_session(id, title).await {
        Ok(()) => eprintln!("Renamed."),
        Err(e) => eprintln!("Rename failed: {e}"),
    }
}

async fn handle_pin(service: &mut ChatService, args: Option<&str>, pinned: bool) {
    let id = match args {
        Some(prefix) => resolve_session(service, prefix),
        None => current_session(service),
    };
    let Some(id) = id else {
        return;
    };
    match service.pin_session(id, pinned).await {
        Ok(()) => eprintln!("{}.", if pinned { "Pinned" } else { "Unpinned" }),
        Err(e) => eprintln!("Failed: {e}"),
    }
}

async fn handle_tag(service: &mut ChatService, tag: &str, add: bool) {
    let Some(id) = current_session(service) else {
        return;
    };
    let result = if add {
        service.add_tag(id, tag).await
    } else {
        service.remove_tag(id, tag).await
    };
    match result {
        Ok(()) => eprintln!("{}.", if add { "Tagged" } else { "Untagged" }),
        Err(e) => eprintln!("Failed: {e}"),
    }
}

async fn handle_export(service: &mut ChatService, path: Option<&str>) {
    let Some(id) = current_session(service) else {
        return;
    };
    let payload = match service.export_session(id).await {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("Export failed: {e}");
            return;
        }
    };
    match path {
        Some(path) => match tokio::fs::write(path, &payload).await {
            Ok(()) => eprintln!("Exported to {path}."),
            Err(e) => eprintln!("Failed to write {path}: {e}"),
        },
        None => println!("{payload}"),
    }
}

async fn handle_import(service: &mut ChatService, path: &str) {
    let payload = match tokio::fs::read_to_string(path).await {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("Failed to read {path}: {e}");
            return;
        }
    };
    match service.import_session(&payload).await {
        Ok(id) => {
            let title = service
                .store()
                .session(id)
                .map(|s| s.title.clone())
                .unwrap_or_default();
            eprintln!("Imported as {} ({title}).", short(id));
        }
        Err(e) => eprintln!("Import failed: {e}"),
    }
}

async fn handle_delete(service: &mut ChatService, prefix: &str) {
    let Some(id) = resolve_session(service, prefix) else {
        return;
    };
    service.delete_session(id).await;
    eprintln!("Deleted {}.", short(id));
}

fn handle_queue(service: &ChatService) {
    if service.queue().is_empty() {
        eprintln!("Offline queue is empty.");
        return;
    }
    eprintln!("Queued actions:");
    for item in service.queue().items() {
        eprintln!(
            "  {} {:<11} retries {}/{}",
            item.enqueued_at.format("%H:%M:%S"),
            kind_label(item.kind),
            item.retry_count,
            item.max_retries
        );
    }
}

fn handle_audit(service: &ChatService) {
    let entries: Vec<_> = service.audit_log().entries().collect();
    if entries.is_empty() {
        eprintln!("Audit log is empty.");
        return;
    }
    eprintln!("Audit log ({} entries, newest last):", entries.len());
    let start = entries.len().saturating_sub(10);
    for entry in &entries[start..] {
        let scope = entry
            .session_id
            .map(|id| format!(" [{}]", short(id)))
            .unwrap_or_default();
        eprintln!(
            "  {} {}{scope}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action
        );
    }
}

async fn handle_prefs(service: &mut ChatService, user: &mut UserStore, args: Option<&str>) {
    let Some(args) = args else {
        let prefs = user.preferences();
        eprintln!("Preferences:");
        eprintln!("  style:    {}", style_label(prefs.response_style));
        eprintln!(
            "  evidence: {}",
            if prefs.include_evidence { "on" } else { "off" }
        );
        eprintln!(
            "  units:    {}",
            match prefs.unit_system {
                UnitSystem::Metric => "metric",
                UnitSystem::Imperial => "imperial",
            }
        );
        return;
    };

    let mut prefs = user.preferences().clone();
    let applied = match args.split_once(' ') {
        Some(("style", value)) => match value.trim() {
            "concise" => {
                prefs.response_style = ResponseStyle::Concise;
                true
            }
            "detailed" => {
                prefs.response_style = ResponseStyle::Detailed;
                true
            }
            "evidence-heavy" => {
                prefs.response_style = ResponseStyle::EvidenceHeavy;
                true
            }
            other => {
                eprintln!("Unknown style: {other} (concise, detailed, evidence-heavy)");
                false
            }
        },
        Some(("evidence", value)) => match value.trim() {
            "on" => {
                prefs.include_evidence = true;
                true
            }
            "off" => {
                prefs.include_evidence = false;
                true
            }
            other => {
                eprintln!("Unknown value: {other} (on, off)");
                false
            }
        },
        Some(("units", value)) => match value.trim() {
            "metric" => {
                prefs.unit_system = UnitSystem::Metric;
                true
            }
            "imperial" => {
                prefs.unit_system = UnitSystem::Imperial;
                true
            }
            other => {
                eprintln!("Unknown unit system: {other} (metric, imperial)");
                false
            }
        },
        _ => {
            eprintln!("Usage: /prefs [style|evidence|units <value>]");
            false
        }
    };

    if applied {
        user.set_preferences(prefs).await;
        service.set_send_options(send_options(user.preferences()));
        eprintln!("Preferences updated.");
    }
}

async fn handle_profile(user: &mut UserStore, args: Option<&str>) {
    match args {
        None => match user.user() {
            Some(profile) => match &profile.email {
                Some(email) => eprintln!("Profile: {} <{email}>", profile.name),
                None => eprintln!("Profile: {}", profile.name),
            },
            None => eprintln!("No profile set. Usage: /profile <name> [email] or /profile clear"),
        },
        Some("clear") => {
            user.set_user(None).await;
            eprintln!("Profile cleared.");
        }
        Some(rest) => {
            let (name, email) = match rest.rsplit_once(' ') {
                Some((name, candidate)) if candidate.contains('@') => {
                    (name.to_string(), Some(candidate.to_string()))
                }
                _ => (rest.to_string(), None),
            };
            user.set_user(Some(UserProfile { name, email })).await;
            eprintln!("Profile saved.");
        }
    }
}

/// Resolve a conversation by ID prefix, reporting failures to the user.
fn resolve_session(service: &ChatService, prefix: &str) -> Option<Uuid> {
    let matches: Vec<Uuid> = service
        .store()
        .sessions()
        .iter()
        .filter(|s| s.id.to_string().starts_with(prefix))
        .map(|s| s.id)
        .collect();
    match matches.as_slice() {
        [id] => Some(*id),
        [] => {
            eprintln!("No conversation matches '{prefix}'.");
            None
        }
        _ => {
            eprintln!("'{prefix}' is ambiguous ({} matches).", matches.len());
            None
        }
    }
}

fn current_session(service: &ChatService) -> Option<Uuid> {
    let id = service.store().current_session_id();
    if id.is_none() {
        eprintln!("No current conversation. Use /new or /switch first.");
    }
    id
}

fn short(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn evidence_label(level: EvidenceLevel) -> &'static str {
    match level {
        EvidenceLevel::High => "high",
        EvidenceLevel::Moderate => "moderate",
        EvidenceLevel::Low => "low",
        EvidenceLevel::ExpertOpinion => "expert opinion",
    }
}

fn style_label(style: ResponseStyle) -> &'static str {
    match style {
        ResponseStyle::Concise => "concise",
        ResponseStyle::Detailed => "detailed",
        ResponseStyle::EvidenceHeavy => "evidence-heavy",
    }
}

fn kind_label(kind: QueueItemKind) -> &'static str {
    match kind {
        QueueItemKind::Chat => "chat",
        QueueItemKind::Calculation => "calculation",
        QueueItemKind::Sync => "sync",
    }
}

fn print_help() {
    eprintln!("Available commands:");
    eprintln!("  /help              Show this help");
    eprintln!("  /new [title]       Start a new conversation");
    eprintln!("  /sessions          List conversations (pinned first)");
    eprintln!("  /switch <id>       Switch to a conversation by ID prefix");
    eprintln!("  /search <text>     Search messages and citations");
    eprintln!("  /rename <title>    Rename the current conversation");
    eprintln!("  /pin [id]          Pin the current (or named) conversation");
    eprintln!("  /unpin [id]        Unpin it again");
    eprintln!("  /tag <tag>         Tag the current conversation");
    eprintln!("  /untag <tag>       Remove a tag");
    eprintln!("  /export [file]     Export the current conversation as JSON");
    eprintln!("  /import <file>     Import a previously exported conversation");
    eprintln!("  /delete <id>       Delete a conversation by ID prefix");
    eprintln!("  /clear             Delete all conversations");
    eprintln!("  /queue             Show actions queued for delivery");
    eprintln!("  /audit             Show recent audit log entries");
    eprintln!("  /sync              Save everything now");
    eprintln!("  /online            Go online and deliver queued actions");
    eprintln!("  /offline           Go offline; questions are queued");
    eprintln!("  /prefs             Show or change preferences");
    eprintln!("  /profile           Show or change the user profile");
    eprintln!("  /unlock            Unlock after an inactivity logout");
    eprintln!("  /quit              Exit");
}
