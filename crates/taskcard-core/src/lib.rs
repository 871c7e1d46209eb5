pub mod card;
pub mod cli;
pub mod command;
pub mod commands;
pub mod config;
pub mod due;
pub mod error;
pub mod hoststore;
pub mod normalize;
pub mod overlay;
pub mod render;
pub mod sensor;
pub mod snapshot;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting taskcard"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::CardConfig::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  )?;

  let state_path =
    config::resolve_state_path(
      cli.state.as_deref()
    )
    .context(
      "failed to resolve host state \
       file"
    )?;

  let store =
    hoststore::HostStore::open(
      &state_path
    )
    .with_context(|| {
      format!(
        "failed to open host state at \
         {}",
        state_path.display()
      )
    })?;

  let command = cli.command.unwrap_or(
    cli::Command::Render {
      json: false
    }
  );

  commands::dispatch(
    &store, &cfg, command
  )?;

  info!("done");
  Ok(())
}
