use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  info,
  warn
};

use crate::overlay::OverlayConfig;

pub const CONFIG_ENV_VAR: &str =
  "TASKCARD_CONFIG";
pub const DEFAULT_LOG_ENTITY: &str =
  "input_text.todoist_closed_tasks";
pub const DEFAULT_FIELD_CAPACITY:
  usize = 255;
pub const DEFAULT_MAX_ENTRIES: usize =
  10;

/// One upstream project published as
/// a sensor.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct ProjectConfig {
  #[serde(
    with = "crate::snapshot::id_serde"
  )]
  pub project_id:   String,
  #[serde(default)]
  pub display_name: Option<String>
}

/// Static card configuration,
/// supplied once per instance.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
#[serde(default)]
pub struct CardConfig {
  pub entity:            Option<String>,
  pub entities:          Vec<String>,
  /// `input_text` field holding the
  /// completion log.
  pub entity_id:         String,
  /// Optional `input_text` field that
  /// receives the last close event.
  pub event_entity_id:   Option<String>,
  pub capacity:          usize,
  pub max_entries:       usize,
  pub show_project_name: bool,
  pub show_input_area:   bool,
  pub show_tasks:        bool,
  pub title:             Option<String>,
  pub timezone:          Option<String>,
  pub color:             bool,
  /// Token for the upstream task
  /// service.
  pub api_token:         Option<String>,
  pub projects:          Vec<ProjectConfig>,

  #[serde(skip)]
  pub loaded_from: Option<PathBuf>
}

impl Default for CardConfig {
  fn default() -> Self {
    Self {
      entity:            None,
      entities:          vec![],
      entity_id:         DEFAULT_LOG_ENTITY
        .to_string(),
      event_entity_id:   None,
      capacity:
        DEFAULT_FIELD_CAPACITY,
      max_entries:       DEFAULT_MAX_ENTRIES,
      show_project_name: true,
      show_input_area:   true,
      show_tasks:        true,
      title:             None,
      timezone:          None,
      color:             true,
      api_token:         None,
      projects:          vec![],
      loaded_from:       None
    }
  }
}

impl CardConfig {
  #[tracing::instrument(skip(
    config_override
  ))]
  pub fn load(
    config_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let path = resolve_config_path(
      config_override
    )?;
    let Some(path) = path else {
      warn!(
        "no card config found; using \
         defaults"
      );
      return Ok(Self::default());
    };

    info!(config = %path.display(), "loading card config");
    Self::load_file(&path)
  }

  #[tracing::instrument]
  pub fn load_file(
    path: &Path
  ) -> anyhow::Result<Self> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    let mut cfg =
      Self::from_toml_str(&text)
        .with_context(|| {
          format!(
            "invalid card config {}",
            path.display()
          )
        })?;
    cfg.loaded_from = Some(path);
    Ok(cfg)
  }

  pub fn from_toml_str(
    text: &str
  ) -> anyhow::Result<Self> {
    let cfg: Self = toml::from_str(text)
      .context(
        "failed to parse card config"
      )?;
    cfg.validate()?;
    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) -> anyhow::Result<()>
  where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      let value = v.trim().to_string();
      debug!(key = %key, value = %value, "applying override");

      match key.as_str() {
        | "entity" => {
          self.entity =
            non_empty(value)
        }
        | "entities" => {
          self.entities = value
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        }
        | "entity_id" => {
          self.entity_id = value
        }
        | "event_entity_id" => {
          self.event_entity_id =
            non_empty(value)
        }
        | "capacity" => {
          self.capacity =
            parse_usize(&key, &value)?
        }
        | "max_entries" => {
          self.max_entries =
            parse_usize(&key, &value)?
        }
        | "show_project_name" => {
          self.show_project_name =
            parse_bool(&value)
        }
        | "show_input_area" => {
          self.show_input_area =
            parse_bool(&value)
        }
        | "show_tasks" => {
          self.show_tasks =
            parse_bool(&value)
        }
        | "title" => {
          self.title = non_empty(value)
        }
        | "timezone" => {
          self.timezone =
            non_empty(value)
        }
        | "color" => {
          self.color = parse_bool(&value)
        }
        | "api_token" => {
          self.api_token =
            non_empty(value)
        }
        | other => {
          warn!(key = %other, "unknown config override; ignoring");
        }
      }
    }

    self.validate()
  }

  /// Source entities in configured
  /// order; `entity` wins over
  /// `entities`.
  pub fn source_entities(
    &self
  ) -> Vec<String> {
    match &self.entity {
      | Some(entity) => {
        vec![entity.clone()]
      }
      | None => self.entities.clone()
    }
  }

  /// Configured project entry, if any.
  pub fn project(
    &self,
    project_id: &str
  ) -> Option<&ProjectConfig> {
    self
      .projects
      .iter()
      .find(|project| {
        project.project_id == project_id
      })
  }

  /// Zero means "unset" and falls back
  /// to the default of ten.
  pub fn effective_max_entries(
    &self
  ) -> usize {
    if self.max_entries == 0 {
      DEFAULT_MAX_ENTRIES
    } else {
      self.max_entries
    }
  }

  pub fn overlay_config(
    &self
  ) -> OverlayConfig {
    OverlayConfig {
      log_entity:   self
        .entity_id
        .clone(),
      event_entity: self
        .event_entity_id
        .clone(),
      capacity:     self.capacity
    }
  }

  fn validate(
    &self
  ) -> anyhow::Result<()> {
    // "[]" is the smallest encoding.
    if self.capacity < 2 {
      return Err(anyhow!(
        "capacity must be at least 2, \
         got {}",
        self.capacity
      ));
    }
    if self.entity_id.trim().is_empty()
    {
      return Err(anyhow!(
        "entity_id cannot be empty"
      ));
    }
    if self.projects.iter().any(|p| {
      p.project_id.trim().is_empty()
    }) {
      return Err(anyhow!(
        "project_id cannot be empty"
      ));
    }
    Ok(())
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_config_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(env_path) =
    std::env::var(CONFIG_ENV_VAR)
  {
    if env_path == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      env_path
    )));
  }

  let Some(config_dir) =
    dirs::config_dir()
  else {
    debug!(
      "no platform config directory"
    );
    return Ok(None);
  };
  let candidate = config_dir
    .join("taskcard")
    .join("card.toml");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

/// Host state file backing the CLI;
/// its parent directory is created on
/// demand.
#[tracing::instrument]
pub fn resolve_state_path(
  override_path: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let path = if let Some(path) =
    override_path
  {
    expand_tilde(path)
  } else {
    default_data_dir()?
      .join("state.json")
  };

  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
    && !parent.exists()
  {
    info!(dir = %parent.display(), "creating state directory");
    fs::create_dir_all(parent)
      .with_context(|| {
        format!(
          "failed to create {}",
          parent.display()
        )
      })?;
  }

  Ok(path)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let base = dirs::data_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine data \
         directory"
      )
    })?;
  Ok(base.join("taskcard"))
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn non_empty(
  value: String
) -> Option<String> {
  if value.is_empty() {
    None
  } else {
    Some(value)
  }
}

fn parse_usize(
  key: &str,
  value: &str
) -> anyhow::Result<usize> {
  value.parse::<usize>().with_context(
    || {
      format!(
        "{key} expects a non-negative \
         integer, got {value:?}"
      )
    }
  )
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
