//! File-backed stand-in for the host platform, used by the CLI.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::command::{CommandChannel, ServiceCall, WriteOutcome};
use crate::sensor::{Project, TaskApi};
use crate::snapshot::{Snapshot, Task};

#[derive(Debug)]
pub struct HostStore {
    pub path: PathBuf,
}

impl HostStore {
    #[tracing::instrument]
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let store = Self {
            path: path.to_path_buf(),
        };
        if !path.exists() {
            store.save(&Snapshot::default())?;
            info!(state = %path.display(), "initialized empty host state");
        }

        info!(state = %path.display(), "opened host state");
        Ok(store)
    }

    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> anyhow::Result<Snapshot> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Snapshot::default());
        }
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", self.path.display()))?;
        debug!(entities = snapshot.states.len(), "loaded host state");
        Ok(snapshot)
    }

    #[tracing::instrument(skip(self, snapshot))]
    pub fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        debug!(file = %self.path.display(), entities = snapshot.states.len(), "saving host state atomically");

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
        let mut temp = NamedTempFile::new_in(dir)?;
        let serialized = serde_json::to_string_pretty(snapshot)?;
        writeln!(temp, "{serialized}")?;
        temp.flush()?;

        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.path.display(), err))?;
        Ok(())
    }
}

/// Applies service calls directly to an in-memory snapshot, the way the host
/// would before publishing its next state.
#[derive(Debug)]
pub struct HostChannel<'a> {
    snapshot: &'a mut Snapshot,
}

impl<'a> HostChannel<'a> {
    pub fn new(snapshot: &'a mut Snapshot) -> Self {
        Self { snapshot }
    }

    fn set_value(&mut self, call: &ServiceCall) -> WriteOutcome {
        let (Some(entity_id), Some(value)) = (call.entity_id(), call.value()) else {
            return WriteOutcome::Failed("set_value needs entity_id and value".to_string());
        };
        let Some(entity) = self.snapshot.entity_mut(entity_id) else {
            return WriteOutcome::Failed(format!("entity {entity_id} not found"));
        };

        if let Some(max) = entity.attributes.extra.get("max").and_then(|max| max.as_u64())
            && value.chars().count() as u64 > max
        {
            warn!(entity_id, max, "value longer than field allows");
            return WriteOutcome::Failed(format!("value exceeds max length {max}"));
        }

        entity.state = value.to_string();
        debug!(entity_id, "field updated");
        WriteOutcome::Ok
    }
}

impl CommandChannel for HostChannel<'_> {
    fn call_service(&mut self, call: &ServiceCall) -> WriteOutcome {
        match (call.domain.as_str(), call.service.as_str()) {
            ("input_text", "set_value") => self.set_value(call),
            ("homeassistant", "update_entity") => WriteOutcome::Ok,
            (domain, service) => WriteOutcome::Failed(format!("unknown service {domain}.{service}")),
        }
    }
}

/// Task service backed by the sensors recorded in the state file: each
/// sensor entity stands for one upstream project and its open tasks.
#[derive(Debug, Default)]
pub struct StoreTaskApi {
    projects: BTreeMap<String, (Project, Vec<Task>)>,
    pub closed: Vec<String>,
}

impl StoreTaskApi {
    /// Projects are keyed by their `project_id` attribute, or by entity id
    /// when a sensor carries none. `input_text` fields are not projects.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let projects = snapshot
            .states
            .iter()
            .filter(|(entity_id, _)| !entity_id.starts_with("input_text."))
            .map(|(entity_id, entity)| {
                let attributes = &entity.attributes;
                let project = Project {
                    name: attributes.friendly_name.clone().unwrap_or_default(),
                    url: attributes.project_url.clone().unwrap_or_default(),
                };
                let key = attributes.project_id.clone().unwrap_or_else(|| entity_id.clone());
                (key, (project, attributes.tasks.clone()))
            })
            .collect();
        Self {
            projects,
            closed: Vec::new(),
        }
    }

    fn project_entry(&self, project_id: &str) -> anyhow::Result<&(Project, Vec<Task>)> {
        self.projects
            .get(project_id)
            .ok_or_else(|| anyhow!("project {project_id} not found"))
    }
}

impl TaskApi for StoreTaskApi {
    fn get_project(&mut self, project_id: &str) -> anyhow::Result<Project> {
        Ok(self.project_entry(project_id)?.0.clone())
    }

    fn get_tasks(&mut self, project_id: &str) -> anyhow::Result<Vec<Task>> {
        Ok(self.project_entry(project_id)?.1.clone())
    }

    fn close_task(&mut self, task_id: &str) -> anyhow::Result<()> {
        let removed = self.projects.values_mut().any(|(_, tasks)| {
            let before = tasks.len();
            tasks.retain(|task| task.id != task_id);
            tasks.len() < before
        });
        if !removed {
            return Err(anyhow!("task {task_id} not found"));
        }
        self.closed.push(task_id.to_string());
        Ok(())
    }
}
