use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::command::{CommandChannel, ServiceCall, WriteOutcome};
use crate::config::CardConfig;
use crate::error::{CardError, OverlayError};
use crate::normalize::{Normalizer, ProjectView};
use crate::overlay::{CloseContext, OverlayStore};
use crate::snapshot::Snapshot;

/// Everything a surface needs to draw the card once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderPlan {
    pub title: Option<String>,
    pub projects: Vec<ProjectView>,
    pub show_input_area: bool,
}

impl RenderPlan {
    pub fn entry_count(&self) -> usize {
        self.projects.iter().map(|project| project.entries.len()).sum()
    }

    pub fn is_closed(&self, task_id: &str) -> Option<bool> {
        self.projects
            .iter()
            .flat_map(|project| project.entries.iter())
            .find(|entry| entry.id == task_id)
            .map(|entry| entry.closed)
    }
}

/// Drawing side effect, kept apart from reconciliation.
pub trait RenderSurface {
    fn replace(&mut self, plan: &RenderPlan) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// Unknown or already closed entry; nothing was written.
    Ignored,
    /// Marked closed locally; every write was dispatched exactly once.
    Closed {
        task_id: String,
        evicted: Vec<String>,
        outcomes: Vec<(ServiceCall, WriteOutcome)>,
    },
    Rejected(OverlayError),
}

impl ClickOutcome {
    /// True when at least one dispatched write failed. The optimistic close
    /// stays in place until the next snapshot says otherwise.
    pub fn has_failed_writes(&self) -> bool {
        match self {
            ClickOutcome::Closed { outcomes, .. } => {
                outcomes.iter().any(|(_, outcome)| !outcome.is_ok())
            }
            _ => false,
        }
    }
}

/// One card instance: normalizer and overlay configured for its own fields.
#[derive(Debug, Clone)]
pub struct Card {
    config: CardConfig,
    normalizer: Normalizer,
    overlay: OverlayStore,
    views: Vec<ProjectView>,
}

impl Card {
    pub fn new(config: CardConfig) -> Self {
        let normalizer = Normalizer::new(&config);
        let overlay = OverlayStore::new(config.overlay_config());
        Self {
            config,
            normalizer,
            overlay,
            views: Vec::new(),
        }
    }

    pub fn config(&self) -> &CardConfig {
        &self.config
    }

    pub fn overlay(&self) -> &OverlayStore {
        &self.overlay
    }

    /// Reconcile against a new snapshot. On error the card keeps its previous
    /// state untouched.
    #[instrument(skip_all)]
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<RenderPlan, CardError> {
        let views = self.normalizer.normalize(snapshot)?;
        self.overlay = OverlayStore::from_snapshot(&self.config.overlay_config(), snapshot);
        self.views = views;

        let plan = self.current_plan();
        debug!(entries = plan.entry_count(), "applied snapshot");
        Ok(plan)
    }

    /// Plan from the last snapshot plus any optimistic closes since.
    pub fn current_plan(&self) -> RenderPlan {
        RenderPlan {
            title: self.config.title.clone(),
            projects: self.overlay.annotate(self.views.clone()),
            show_input_area: self.config.show_input_area,
        }
    }

    /// Apply `snapshot` and redraw `surface`. A failed normalization leaves
    /// the surface as it was.
    pub fn refresh(
        &mut self,
        snapshot: &Snapshot,
        surface: &mut dyn RenderSurface,
    ) -> anyhow::Result<RenderPlan> {
        let plan = self.apply_snapshot(snapshot)?;
        surface.replace(&plan)?;
        Ok(plan)
    }

    /// Handle a click on a displayed entry: close it locally, then send the
    /// writes without retrying. A failed write surfaces in the outcome and
    /// is reconciled by the next snapshot.
    #[instrument(skip(self, channel))]
    pub fn click(&mut self, task_id: &str, channel: &mut dyn CommandChannel) -> ClickOutcome {
        let Some(view) = self
            .views
            .iter()
            .find(|view| view.entries.iter().any(|entry| entry.id == task_id))
        else {
            debug!("click on unknown entry ignored");
            return ClickOutcome::Ignored;
        };

        if self.overlay.is_closed(task_id) {
            debug!("click on closed entry ignored");
            return ClickOutcome::Ignored;
        }

        let context = CloseContext {
            sensor_id: view.entity_id.clone(),
            project_id: view.project_id.clone(),
        };

        let command = match self.overlay.mark_closed(task_id, &context) {
            Ok(Some(command)) => command,
            Ok(None) => return ClickOutcome::Ignored,
            Err(err) => {
                warn!(error = %err, "cannot record close");
                return ClickOutcome::Rejected(err);
            }
        };

        let outcomes: Vec<(ServiceCall, WriteOutcome)> = command
            .calls
            .into_iter()
            .map(|call| {
                let outcome = channel.call_service(&call);
                if let WriteOutcome::Failed(reason) = &outcome {
                    warn!(
                        domain = %call.domain,
                        service = %call.service,
                        reason = %reason,
                        "write failed; next refresh will reconcile"
                    );
                }
                (call, outcome)
            })
            .collect();

        info!(evicted = command.evicted.len(), "task marked closed");
        ClickOutcome::Closed {
            task_id: command.task_id,
            evicted: command.evicted,
            outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Card, ClickOutcome, RenderPlan, RenderSurface};
    use crate::command::RecordingChannel;
    use crate::config::CardConfig;
    use crate::error::OverlayError;
    use crate::snapshot::{EntityAttributes, EntityState, Snapshot, Task};

    #[derive(Default)]
    struct CountingSurface {
        plans: Vec<RenderPlan>,
    }

    impl RenderSurface for CountingSurface {
        fn replace(&mut self, plan: &RenderPlan) -> anyhow::Result<()> {
            self.plans.push(plan.clone());
            Ok(())
        }
    }

    fn snapshot(log: &str) -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.insert(
            "sensor.home",
            EntityState {
                state: "2".to_string(),
                attributes: EntityAttributes {
                    friendly_name: Some("Home".to_string()),
                    project_id: Some("42".to_string()),
                    tasks: vec![Task::new("1", "water plants"), Task::new("2", "pay rent")],
                    ..EntityAttributes::default()
                },
            },
        );
        snapshot.insert("input_text.closed", EntityState::scalar(log));
        snapshot
    }

    fn card() -> Card {
        Card::new(CardConfig {
            entity: Some("sensor.home".to_string()),
            entity_id: "input_text.closed".to_string(),
            title: Some("Chores".to_string()),
            ..CardConfig::default()
        })
    }

    #[test]
    fn click_closes_optimistically_and_writes_once() {
        let mut card = card();
        let plan = card.apply_snapshot(&snapshot("")).expect("apply");
        assert_eq!(plan.is_closed("1"), Some(false));

        let mut channel = RecordingChannel::new();
        let outcome = card.click("1", &mut channel);
        assert!(matches!(outcome, ClickOutcome::Closed { .. }));
        assert!(!outcome.has_failed_writes());
        assert_eq!(card.current_plan().is_closed("1"), Some(true));
        assert_eq!(channel.last_value("input_text.closed"), Some("[\"1\"]"));

        assert_eq!(card.click("1", &mut channel), ClickOutcome::Ignored);
        assert_eq!(card.click("nope", &mut channel), ClickOutcome::Ignored);
        assert_eq!(channel.calls.len(), 1);
    }

    #[test]
    fn failed_write_reverts_on_next_refresh() {
        let mut card = card();
        card.apply_snapshot(&snapshot("")).expect("apply");

        let mut channel = RecordingChannel::new().failing_for("input_text.closed");
        let outcome = card.click("2", &mut channel);
        assert!(outcome.has_failed_writes());
        assert_eq!(card.current_plan().is_closed("2"), Some(true));

        let plan = card.apply_snapshot(&snapshot("")).expect("apply");
        assert_eq!(plan.is_closed("2"), Some(false));
    }

    #[test]
    fn refresh_leaves_surface_alone_on_missing_entity() {
        let mut card = card();
        let mut surface = CountingSurface::default();
        card.refresh(&snapshot("[\"2\"]"), &mut surface).expect("refresh");
        assert_eq!(surface.plans.len(), 1);

        let err = card
            .refresh(&Snapshot::default(), &mut surface)
            .expect_err("entity missing");
        assert!(err.to_string().contains("sensor.home"));
        assert_eq!(surface.plans.len(), 1);
        assert_eq!(card.current_plan().is_closed("2"), Some(true));
    }

    #[test]
    fn zero_capacity_card_renders_open_and_rejects_clicks() {
        let mut card = Card::new(CardConfig {
            entity: Some("sensor.home".to_string()),
            entity_id: "input_text.closed".to_string(),
            capacity: 0,
            ..CardConfig::default()
        });
        let plan = card.apply_snapshot(&snapshot("[\"1\"]")).expect("apply");
        assert_eq!(plan.is_closed("1"), Some(false));

        let mut channel = RecordingChannel::new();
        assert!(matches!(
            card.click("2", &mut channel),
            ClickOutcome::Rejected(OverlayError::IdTooLong { .. })
        ));
        assert!(channel.calls.is_empty());
    }

    #[test]
    fn plan_carries_title_and_input_flag() {
        let mut card = card();
        let plan = card.apply_snapshot(&snapshot("")).expect("apply");
        assert_eq!(plan.title.as_deref(), Some("Chores"));
        assert!(plan.show_input_area);
        assert_eq!(plan.entry_count(), 2);
    }
}
