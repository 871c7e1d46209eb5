//! Upstream side of the overlay: the project sensor that publishes tasks and
//! pushes user closes back to the task service.

use std::collections::BTreeMap;

use tracing::{debug, error, info, instrument, warn};

use crate::command::ServiceCall;
use crate::overlay::{BoundedLog, CloseEvent};
use crate::snapshot::{EntityAttributes, EntityState, Task};

pub const DEFAULT_ICON: &str = "mdi:format-list-checkbox";

/// Project metadata as reported by the task service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub url: String,
}

/// Remote task service the sensor reads from and closes tasks through.
pub trait TaskApi {
    fn get_project(&mut self, project_id: &str) -> anyhow::Result<Project>;

    fn get_tasks(&mut self, project_id: &str) -> anyhow::Result<Vec<Task>>;

    fn close_task(&mut self, task_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSensor {
    pub project_id: String,
    pub display_name: Option<String>,
}

impl ProjectSensor {
    pub fn new(project_id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            project_id: project_id.into(),
            display_name: display_name.filter(|name| !name.is_empty()),
        }
    }

    pub fn name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| format!("Project ID: {}", self.project_id))
    }

    pub fn unique_id(&self) -> String {
        format!("todoist_project_{}", self.project_id)
    }

    /// One polling cycle: load project metadata and open tasks, close the
    /// ones already in the completion log, and build the published entity.
    ///
    /// A failed project lookup publishes an empty URL and keeps the current
    /// name; a failed task fetch publishes no tasks. The display name is
    /// taken from the service only while none is configured.
    #[instrument(skip(self, api, log), fields(project_id = %self.project_id))]
    pub fn update(&mut self, api: &mut dyn TaskApi, log: &BoundedLog) -> EntityState {
        let project = match api.get_project(&self.project_id) {
            Ok(project) => project,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "could not load project");
                Project::default()
            }
        };

        if self.display_name.is_none() && !project.name.is_empty() {
            debug!(name = %project.name, "using project name from service");
            self.display_name = Some(project.name.clone());
        }

        let tasks = match api.get_tasks(&self.project_id) {
            Ok(tasks) => sweep_closed(tasks, log, api),
            Err(err) => {
                error!(error = %format!("{err:#}"), "could not load tasks");
                Vec::new()
            }
        };

        self.entity_state(Some(project.url), tasks)
    }

    /// Entity as published to the host after a fetch.
    pub fn entity_state(&self, project_url: Option<String>, tasks: Vec<Task>) -> EntityState {
        let mut extra = BTreeMap::new();
        extra.insert("icon".to_string(), serde_json::json!(DEFAULT_ICON));
        EntityState {
            state: tasks.len().to_string(),
            attributes: EntityAttributes {
                friendly_name: Some(self.name()),
                project_id: Some(self.project_id.clone()),
                project_url: Some(project_url.unwrap_or_default()),
                tasks,
                extra,
            },
        }
    }
}

/// Close every fetched task already in the completion log and drop it from
/// the list. Tasks whose close fails stay listed and are retried next fetch.
#[instrument(skip_all, fields(fetched = tasks.len(), logged = log.len()))]
pub fn sweep_closed(tasks: Vec<Task>, log: &BoundedLog, api: &mut dyn TaskApi) -> Vec<Task> {
    tasks
        .into_iter()
        .filter(|task| {
            if !log.contains(&task.id) {
                return true;
            }
            match api.close_task(&task.id) {
                Ok(()) => {
                    info!(task_id = %task.id, "closed logged task upstream");
                    false
                }
                Err(err) => {
                    error!(task_id = %task.id, error = %format!("{err:#}"), "could not close task");
                    true
                }
            }
        })
        .collect()
}

/// React to a change of the close-event field: close the task upstream and
/// ask the host to refresh the sensor that published it.
#[instrument(skip(api))]
pub fn handle_close_event(raw: Option<&str>, api: &mut dyn TaskApi) -> Option<ServiceCall> {
    let raw = raw.map(str::trim).filter(|raw| !raw.is_empty())?;
    let event: CloseEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(err) => {
            debug!(error = %err, "ignoring unreadable close event");
            return None;
        }
    };

    if let Err(err) = api.close_task(&event.task_id) {
        error!(task_id = %event.task_id, error = %format!("{err:#}"), "could not close task");
        return None;
    }

    info!(task_id = %event.task_id, sensor_id = %event.sensor_id, "closed task from event");
    Some(ServiceCall::update_entity(&event.sensor_id))
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::{Project, ProjectSensor, TaskApi, handle_close_event, sweep_closed};
    use crate::overlay::BoundedLog;
    use crate::snapshot::Task;

    #[derive(Default)]
    struct FakeApi {
        project: Option<Project>,
        tasks: Option<Vec<Task>>,
        closed: Vec<String>,
        broken: Vec<String>,
    }

    impl TaskApi for FakeApi {
        fn get_project(&mut self, project_id: &str) -> anyhow::Result<Project> {
            self.project
                .clone()
                .ok_or_else(|| anyhow!("project {project_id} not found"))
        }

        fn get_tasks(&mut self, project_id: &str) -> anyhow::Result<Vec<Task>> {
            self.tasks
                .clone()
                .ok_or_else(|| anyhow!("tasks for {project_id} unavailable"))
        }

        fn close_task(&mut self, task_id: &str) -> anyhow::Result<()> {
            if self.broken.iter().any(|id| id == task_id) {
                return Err(anyhow!("503 from upstream"));
            }
            self.closed.push(task_id.to_string());
            Ok(())
        }
    }

    #[test]
    fn sensor_naming() {
        let named = ProjectSensor::new("42", Some("Home".to_string()));
        assert_eq!(named.name(), "Home");
        assert_eq!(named.unique_id(), "todoist_project_42");

        let unnamed = ProjectSensor::new("42", Some(String::new()));
        assert_eq!(unnamed.name(), "Project ID: 42");

        let state = unnamed.entity_state(None, vec![Task::new("1", "a")]);
        assert_eq!(state.state, "1");
        assert_eq!(state.attributes.project_url.as_deref(), Some(""));
        assert_eq!(state.attributes.friendly_name.as_deref(), Some("Project ID: 42"));
    }

    fn inbox() -> Project {
        Project {
            name: "Inbox".to_string(),
            url: "https://todoist.com/showProject?id=42".to_string(),
        }
    }

    #[test]
    fn update_fills_name_and_url_and_sweeps_logged_tasks() {
        let log = BoundedLog::decode(Some("[\"2\"]"), 255);
        let mut api = FakeApi {
            project: Some(inbox()),
            tasks: Some(vec![Task::new("1", "a"), Task::new("2", "b")]),
            ..FakeApi::default()
        };
        let mut sensor = ProjectSensor::new("42", None);

        let state = sensor.update(&mut api, &log);
        assert_eq!(sensor.name(), "Inbox");
        assert_eq!(state.attributes.friendly_name.as_deref(), Some("Inbox"));
        assert_eq!(
            state.attributes.project_url.as_deref(),
            Some("https://todoist.com/showProject?id=42")
        );
        let ids: Vec<&str> = state.attributes.tasks.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
        assert_eq!(api.closed, vec!["2".to_string()]);
    }

    #[test]
    fn update_keeps_configured_name() {
        let mut api = FakeApi {
            project: Some(inbox()),
            tasks: Some(vec![]),
            ..FakeApi::default()
        };
        let mut sensor = ProjectSensor::new("42", Some("Chores".to_string()));
        let state = sensor.update(&mut api, &BoundedLog::new(255));
        assert_eq!(state.attributes.friendly_name.as_deref(), Some("Chores"));
    }

    #[test]
    fn update_survives_failed_project_lookup() {
        let mut api = FakeApi {
            tasks: Some(vec![Task::new("1", "a")]),
            ..FakeApi::default()
        };
        let mut sensor = ProjectSensor::new("42", None);
        let state = sensor.update(&mut api, &BoundedLog::new(255));
        assert_eq!(state.attributes.friendly_name.as_deref(), Some("Project ID: 42"));
        assert_eq!(state.attributes.project_url.as_deref(), Some(""));
        assert_eq!(state.attributes.tasks.len(), 1);
    }

    #[test]
    fn update_publishes_no_tasks_when_fetch_fails() {
        let log = BoundedLog::decode(Some("[\"1\"]"), 255);
        let mut api = FakeApi {
            project: Some(inbox()),
            ..FakeApi::default()
        };
        let mut sensor = ProjectSensor::new("42", None);
        let state = sensor.update(&mut api, &log);
        assert!(state.attributes.tasks.is_empty());
        assert_eq!(state.state, "0");
        assert!(api.closed.is_empty());
    }

    #[test]
    fn sweep_drops_closed_tasks_and_keeps_failures() {
        let log = BoundedLog::decode(Some("[\"1\",\"3\"]"), 255);
        let mut api = FakeApi {
            broken: vec!["3".to_string()],
            ..FakeApi::default()
        };
        let tasks = vec![Task::new("1", "a"), Task::new("2", "b"), Task::new("3", "c")];

        let kept = sweep_closed(tasks, &log, &mut api);
        let ids: Vec<&str> = kept.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert_eq!(api.closed, vec!["1".to_string()]);
    }

    #[test]
    fn close_event_requests_sensor_refresh() {
        let mut api = FakeApi::default();
        let raw = r#"{"sensor_id":"sensor.home","task_id":"7","project_id":"42"}"#;
        let call = handle_close_event(Some(raw), &mut api).expect("refresh call");
        assert_eq!(call.domain, "homeassistant");
        assert_eq!(call.service, "update_entity");
        assert_eq!(call.entity_id(), Some("sensor.home"));
        assert_eq!(api.closed, vec!["7".to_string()]);
    }

    #[test]
    fn close_event_ignores_empty_malformed_and_failed() {
        let mut api = FakeApi {
            broken: vec!["9".to_string()],
            ..FakeApi::default()
        };
        assert_eq!(handle_close_event(None, &mut api), None);
        assert_eq!(handle_close_event(Some("  "), &mut api), None);
        assert_eq!(handle_close_event(Some("not json"), &mut api), None);
        let raw = r#"{"sensor_id":"sensor.home","task_id":"9"}"#;
        assert_eq!(handle_close_event(Some(raw), &mut api), None);
        assert!(api.closed.is_empty());
    }
}
