//! Implementation of the `kiln create` command.
//!
//! Locks the install directory, builds the requested target and prints what
//! was loaded, generated and written.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kiln_lib::asset::BuildContext;
use kiln_lib::assets::{AssetKind, InstallInputs, Target, catalog};
use kiln_lib::engine::{BuildConfig, BuildError, BuildOutput, Builder, ResolvedAsset, WriteReport};
use kiln_lib::install_lock::InstallLock;

use crate::output::{
  format_bytes, format_duration, print_error, print_file, print_json, print_stat, print_success, print_warning,
  symbols,
};

#[derive(Serialize)]
struct CreateSummary<'a> {
  target: Target,
  install_dir: &'a Path,
  resolved: &'a [ResolvedAsset<AssetKind>],
  files: &'a WriteReport,
  duration_ms: u128,
}

#[derive(Serialize)]
struct CreateFailure<'a> {
  target: Target,
  error: String,
  chain: Vec<&'a str>,
  cancelled: bool,
}

/// Build `target` into `dir`.
///
/// Ctrl-C cancels the build; files of assets finished before the interrupt are
/// still written.
pub fn cmd_create(
  target: Target,
  dir: &Path,
  inputs: InstallInputs,
  parallelism: Option<usize>,
  json: bool,
) -> Result<()> {
  let _lock = InstallLock::acquire(dir, &format!("kiln create {target}")).context("Failed to lock install directory")?;

  let mut config = BuildConfig::new(dir);
  if let Some(n) = parallelism {
    config = config.with_parallelism(n);
  }
  let builder = Builder::new(catalog(inputs), config);

  let token = CancellationToken::new();
  let ctx = BuildContext::with_token(token.clone());

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let result = rt.block_on(async {
    let signal = token.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, cancelling build");
        signal.cancel();
      }
    });
    builder.build(&ctx, target.kind()).await
  });
  let elapsed = started.elapsed();

  match result {
    Ok(output) => {
      info!(build_target = %target, elapsed_ms = elapsed.as_millis() as u64, "build finished");
      if json {
        print_json(&CreateSummary {
          target,
          install_dir: dir,
          resolved: &output.resolved,
          files: &output.report,
          duration_ms: elapsed.as_millis(),
        })
      } else {
        print_summary(target, dir, &output, elapsed);
        Ok(())
      }
    }
    Err(err) => {
      report_failure(target, &err, json)?;
      Err(anyhow!("{err}")).with_context(|| format!("Failed to create {target}"))
    }
  }
}

fn print_summary(target: Target, dir: &Path, output: &BuildOutput<AssetKind>, elapsed: std::time::Duration) {
  print_success(&format!("Created {target} in {}", dir.display()));
  print_stat("Generated", &output.generated().count().to_string());
  print_stat("Loaded", &output.loaded().count().to_string());

  let written_bytes: u64 = output
    .files()
    .iter()
    .filter(|f| output.report.written.contains(&f.filename))
    .map(|f| f.data.len() as u64)
    .sum();
  print_stat(
    "Written",
    &format!("{} file(s), {}", output.report.written.len(), format_bytes(written_bytes)),
  );
  for filename in &output.report.written {
    print_file(symbols::ADD, filename);
  }
  print_stat("Unchanged", &format!("{} file(s)", output.report.unchanged.len()));
  for filename in &output.report.unchanged {
    print_file(symbols::UNCHANGED, filename);
  }
  print_stat("Duration", &format_duration(elapsed));
}

fn report_failure(target: Target, err: &BuildError, json: bool) -> Result<()> {
  if json {
    return print_json(&CreateFailure {
      target,
      error: err.to_string(),
      chain: err.chain(),
      cancelled: err.is_cancelled(),
    });
  }

  if err.is_cancelled() {
    print_warning("Build cancelled; completed assets were written");
  }
  let chain = err.chain();
  if chain.len() > 1 {
    print_error(&format!("Failed at: {}", chain.join(&format!(" {} ", symbols::ARROW))));
  }
  Ok(())
}
