use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::CardConfig;
use crate::due::{format_due_label, resolve_timezone};
use crate::error::CardError;
use crate::snapshot::{EntityState, Snapshot};

/// One row of the card, rebuilt on every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewEntry {
    pub id: String,
    pub content: String,
    pub due_label: Option<String>,
    pub closed: bool,
}

/// Rows sourced from one configured entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectView {
    pub entity_id: String,
    pub title: Option<String>,
    pub project_id: Option<String>,
    pub project_url: Option<String>,
    pub entries: Vec<ViewEntry>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    sources: Vec<String>,
    max_entries: usize,
    show_project_name: bool,
    show_tasks: bool,
    timezone: Tz,
}

impl Normalizer {
    pub fn new(cfg: &CardConfig) -> Self {
        Self {
            sources: cfg.source_entities(),
            max_entries: cfg.effective_max_entries(),
            show_project_name: cfg.show_project_name,
            show_tasks: cfg.show_tasks,
            timezone: resolve_timezone(cfg.timezone.as_deref()),
        }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Build the view model in configured source order. Every source must be
    /// present; a single missing entity aborts before any entry is built.
    #[instrument(skip_all, fields(sources = self.sources.len()))]
    pub fn normalize(&self, snapshot: &Snapshot) -> Result<Vec<ProjectView>, CardError> {
        if self.sources.is_empty() {
            return Err(CardError::NoEntities);
        }

        let mut entities = Vec::with_capacity(self.sources.len());
        for entity_id in &self.sources {
            let Some(entity) = snapshot.entity(entity_id) else {
                warn!(entity_id = %entity_id, "source entity missing from snapshot");
                return Err(CardError::EntityUnavailable(entity_id.clone()));
            };
            entities.push((entity_id, entity));
        }

        Ok(entities
            .into_iter()
            .map(|(entity_id, entity)| self.project_view(entity_id, entity))
            .collect())
    }

    fn project_view(&self, entity_id: &str, entity: &EntityState) -> ProjectView {
        let attributes = &entity.attributes;
        let title = self.show_project_name.then(|| {
            attributes
                .friendly_name
                .clone()
                .unwrap_or_else(|| entity_id.to_string())
        });

        let entries = if self.show_tasks {
            attributes
                .tasks
                .iter()
                .take(self.max_entries)
                .map(|task| ViewEntry {
                    id: task.id.clone(),
                    content: task.content.clone(),
                    due_label: format_due_label(task.due.as_ref(), &self.timezone),
                    closed: false,
                })
                .collect()
        } else {
            Vec::new()
        };

        debug!(
            entity_id,
            upstream = attributes.tasks.len(),
            shown = entries.len(),
            "normalized project"
        );

        ProjectView {
            entity_id: entity_id.to_string(),
            title,
            project_id: attributes.project_id.clone(),
            project_url: attributes.project_url.clone().filter(|url| !url.is_empty()),
            entries,
        }
    }
}
