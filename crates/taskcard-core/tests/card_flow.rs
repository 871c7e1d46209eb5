use taskcard_core::card::{Card, ClickOutcome, RenderPlan, RenderSurface};
use taskcard_core::command::RecordingChannel;
use taskcard_core::config::CardConfig;
use taskcard_core::error::CardError;
use taskcard_core::hoststore::{HostChannel, HostStore, StoreTaskApi};
use taskcard_core::overlay::BoundedLog;
use taskcard_core::sensor::{ProjectSensor, sweep_closed};
use taskcard_core::snapshot::{EntityState, Snapshot, Task};
use tempfile::tempdir;

const LOG_FIELD: &str = "input_text.todoist_closed_tasks";

fn snapshot_with(tasks: Vec<Task>, log: &str) -> Snapshot {
    let sensor = ProjectSensor::new("2203306141", Some("Inbox".to_string()));
    let mut snapshot = Snapshot::default();
    snapshot.insert("sensor.inbox", sensor.entity_state(None, tasks));
    snapshot.insert(LOG_FIELD, EntityState::scalar(log));
    snapshot
}

fn new_card(capacity: usize) -> Card {
    Card::new(
        CardConfig::from_toml_str(&format!(
            "entity = \"sensor.inbox\"\ncapacity = {capacity}\ntitle = \"Todo\"\n"
        ))
        .expect("parse config"),
    )
}

#[derive(Default)]
struct RecordingSurface {
    plans: Vec<RenderPlan>,
}

impl RenderSurface for RecordingSurface {
    fn replace(&mut self, plan: &RenderPlan) -> anyhow::Result<()> {
        self.plans.push(plan.clone());
        Ok(())
    }
}

#[test]
fn close_persists_across_refreshes_through_the_host_state() {
    let temp = tempdir().expect("tempdir");
    let store = HostStore::open(&temp.path().join("state.json")).expect("open host state");
    store
        .save(&snapshot_with(
            vec![
                Task::new("1", "buy milk").with_due(Some("2024-03-05"), None),
                Task::new("2", "call mom").with_due(Some("2024-03-05"), Some("2024-03-05T09:05:00")),
            ],
            "",
        ))
        .expect("seed state");

    let mut card = new_card(255);
    let snapshot = store.load().expect("load");
    let plan = card.apply_snapshot(&snapshot).expect("apply");
    assert_eq!(plan.is_closed("2"), Some(false));
    assert_eq!(
        plan.projects[0].entries[1].due_label.as_deref(),
        Some("5 Mar 9:05")
    );

    let mut next = snapshot.clone();
    let outcome = card.click("2", &mut HostChannel::new(&mut next));
    assert!(matches!(outcome, ClickOutcome::Closed { .. }));
    store.save(&next).expect("save");

    // A fresh instance sees the close purely from the persisted field.
    let mut other = new_card(255);
    let plan = other.apply_snapshot(&store.load().expect("reload")).expect("apply");
    assert_eq!(plan.is_closed("2"), Some(true));
    assert_eq!(plan.is_closed("1"), Some(false));
}

#[test]
fn missing_source_entity_aborts_without_touching_surface() {
    let mut cfg = CardConfig::default();
    cfg.entity = Some("sensor.ghost".to_string());
    let mut card = Card::new(cfg);
    let mut surface = RecordingSurface::default();

    let err = card
        .refresh(&snapshot_with(vec![Task::new("1", "a")], ""), &mut surface)
        .expect_err("ghost entity");
    assert_eq!(
        err.downcast_ref::<CardError>(),
        Some(&CardError::EntityUnavailable("sensor.ghost".to_string()))
    );
    assert!(surface.plans.is_empty());
}

#[test]
fn applying_the_same_snapshot_twice_is_identical() {
    let tasks = (0..15).map(|n| Task::new(format!("t{n}"), format!("task {n}"))).collect();
    let snapshot = snapshot_with(tasks, "[\"t3\",\"t12\"]");

    let mut card = new_card(255);
    let first = card.apply_snapshot(&snapshot).expect("apply");
    let second = card.apply_snapshot(&snapshot).expect("apply again");
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).expect("json"),
        serde_json::to_string(&second).expect("json")
    );

    assert_eq!(first.entry_count(), 10);
    assert_eq!(first.is_closed("t3"), Some(true));
    // t12 is past the truncation point, so it is not displayed at all.
    assert_eq!(first.is_closed("t12"), None);
}

#[test]
fn eviction_reopens_the_oldest_close() {
    let tasks = (1..=6).map(|n| Task::new(format!("{n}0"), format!("task {n}"))).collect();
    let mut snapshot = snapshot_with(tasks, "");
    // Room for three 2-digit ids: 2 + 3*4 + 2 = 16.
    let mut card = new_card(16);
    card.apply_snapshot(&snapshot).expect("apply");

    let mut channel = RecordingChannel::new();
    for id in ["10", "20", "30", "40"] {
        card.click(id, &mut channel);
        let value = channel.last_value(LOG_FIELD).expect("log written");
        assert!(value.chars().count() <= 16, "{value} over capacity");
    }
    assert_eq!(channel.last_value(LOG_FIELD), Some("[\"20\",\"30\",\"40\"]"));

    snapshot.insert(LOG_FIELD, EntityState::scalar(channel.last_value(LOG_FIELD).unwrap_or_default()));
    let plan = card.apply_snapshot(&snapshot).expect("apply");
    assert_eq!(plan.is_closed("10"), Some(false));
    assert_eq!(plan.is_closed("40"), Some(true));
}

#[test]
fn sweep_removes_logged_tasks_from_the_sensor() {
    let snapshot = snapshot_with(vec![Task::new("1", "a"), Task::new("2", "b")], "[\"2\"]");
    let log = BoundedLog::decode(snapshot.field_state(LOG_FIELD), 255);
    let tasks = snapshot
        .entity("sensor.inbox")
        .expect("sensor")
        .attributes
        .tasks
        .clone();

    let mut api = StoreTaskApi::from_snapshot(&snapshot);
    let kept = sweep_closed(tasks, &log, &mut api);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id, "1");
    assert_eq!(api.closed, vec!["2".to_string()]);
}
