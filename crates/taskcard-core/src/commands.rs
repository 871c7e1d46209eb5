use std::io::{self, Write};

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::card::{Card, ClickOutcome, RenderSurface};
use crate::cli::Command;
use crate::command::{CommandChannel, ServiceCall, WriteOutcome};
use crate::config::CardConfig;
use crate::hoststore::{HostChannel, HostStore, StoreTaskApi};
use crate::overlay::BoundedLog;
use crate::render::TextSurface;
use crate::sensor::{ProjectSensor, handle_close_event};
use crate::snapshot::Snapshot;

#[instrument(skip(store, cfg))]
pub fn dispatch(store: &HostStore, cfg: &CardConfig, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Render { json } => cmd_render(store, cfg, json),
        Command::Close { task_id } => cmd_close(store, cfg, &task_id),
        Command::Sweep => cmd_sweep(store, cfg),
        Command::Log => cmd_log(store, cfg),
    }
}

#[instrument(skip(store, cfg))]
fn cmd_render(store: &HostStore, cfg: &CardConfig, json: bool) -> anyhow::Result<()> {
    let snapshot = store.load()?;
    let mut card = Card::new(cfg.clone());

    if json {
        let plan = card.apply_snapshot(&snapshot)?;
        let mut out = io::stdout().lock();
        writeln!(out, "{}", serde_json::to_string_pretty(&plan)?)?;
        return Ok(());
    }

    card.refresh(&snapshot, &mut TextSurface::new(cfg))?;
    Ok(())
}

#[instrument(skip(store, cfg))]
fn cmd_close(store: &HostStore, cfg: &CardConfig, task_id: &str) -> anyhow::Result<()> {
    let snapshot = store.load()?;
    let mut card = Card::new(cfg.clone());
    card.apply_snapshot(&snapshot)?;

    let mut next = snapshot.clone();
    let outcome = {
        let mut channel = HostChannel::new(&mut next);
        card.click(task_id, &mut channel)
    };

    match &outcome {
        ClickOutcome::Ignored => {
            warn!(task_id, "not an open entry on this card");
            eprintln!("task {task_id} is not an open entry on this card");
        }
        ClickOutcome::Rejected(err) => {
            return Err::<(), _>(err.clone()).context("cannot mark task closed");
        }
        ClickOutcome::Closed { evicted, outcomes, .. } => {
            store.save(&next)?;
            info!(task_id, evicted = evicted.len(), "saved close");
            for (call, result) in outcomes {
                if let WriteOutcome::Failed(reason) = result {
                    eprintln!(
                        "write to {} failed: {reason}",
                        call.entity_id().unwrap_or("<unknown>")
                    );
                }
            }
            for id in evicted {
                eprintln!("evicted {id} from the completion log");
            }
        }
    }

    TextSurface::new(cfg).replace(&card.current_plan())
}

/// One sensor polling cycle against the host state: consume a pending close
/// event, then refetch every source project and publish it again.
#[instrument(skip(store, cfg))]
fn cmd_sweep(store: &HostStore, cfg: &CardConfig) -> anyhow::Result<()> {
    let mut snapshot = store.load()?;
    let log = BoundedLog::decode(snapshot.field_state(&cfg.entity_id), cfg.capacity);
    let mut api = StoreTaskApi::from_snapshot(&snapshot);
    debug!(token = cfg.api_token.is_some(), projects = cfg.projects.len(), "task service ready");

    if let Some(event_entity) = cfg.event_entity_id.as_deref() {
        consume_close_event(&mut snapshot, event_entity, &mut api);
    }

    let mut removed = 0usize;
    for entity_id in cfg.source_entities() {
        let Some(entity) = snapshot.entity_mut(&entity_id) else {
            warn!(entity_id = %entity_id, "sweep skipping missing sensor");
            continue;
        };

        let previous = std::mem::take(&mut entity.attributes);
        let project_id = previous.project_id.clone().unwrap_or_else(|| entity_id.clone());
        let display_name = cfg
            .project(&project_id)
            .and_then(|project| project.display_name.clone());
        let mut sensor = ProjectSensor::new(project_id, display_name);

        let mut refreshed = sensor.update(&mut api, &log);
        removed += previous.tasks.len().saturating_sub(refreshed.attributes.tasks.len());
        for (key, value) in previous.extra {
            refreshed.attributes.extra.entry(key).or_insert(value);
        }
        *entity = refreshed;
    }

    store.save(&snapshot)?;
    info!(removed, closes = api.closed.len(), "sweep finished");
    println!("removed {removed} closed task(s)");
    Ok(())
}

/// Handle the close event once and blank the field so later sweeps do not
/// close the same task again.
fn consume_close_event(snapshot: &mut Snapshot, event_entity: &str, api: &mut StoreTaskApi) {
    let Some(raw) = snapshot
        .field_state(event_entity)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(str::to_string)
    else {
        return;
    };

    let mut channel = HostChannel::new(snapshot);
    if let Some(refresh) = handle_close_event(Some(raw.as_str()), api) {
        let outcome = channel.call_service(&refresh);
        info!(?outcome, "requested sensor refresh");
    }
    if let WriteOutcome::Failed(reason) = channel.call_service(&ServiceCall::set_value(event_entity, "")) {
        warn!(event_entity, reason = %reason, "could not clear close event");
    }
}

#[instrument(skip(store, cfg))]
fn cmd_log(store: &HostStore, cfg: &CardConfig) -> anyhow::Result<()> {
    let snapshot = store.load()?;
    let log = BoundedLog::decode(snapshot.field_state(&cfg.entity_id), cfg.capacity);

    let mut out = io::stdout().lock();
    for id in log.ids() {
        writeln!(out, "{id}")?;
    }
    writeln!(
        out,
        "{} closed, {}/{} chars",
        log.len(),
        log.serialized_len(),
        log.capacity()
    )?;
    Ok(())
}
