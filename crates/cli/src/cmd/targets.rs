//! Implementation of the `kiln targets` command.

use anyhow::{Context, Result};
use serde::Serialize;

use kiln_lib::assets::{InstallInputs, Target, catalog};
use kiln_lib::engine::AssetGraph;

use crate::output::{print_info, print_json, print_stat};

#[derive(Serialize)]
struct TargetInfo {
  name: Target,
  description: &'static str,
  assets: Vec<String>,
}

/// List every target with the assets its build resolves, dependencies first.
pub fn cmd_targets(json: bool) -> Result<()> {
  let catalog = catalog(InstallInputs::default());

  let mut infos = Vec::with_capacity(Target::ALL.len());
  for target in Target::ALL {
    let graph = AssetGraph::for_target(&catalog, target.kind())
      .with_context(|| format!("Failed to build asset graph for {target}"))?;
    let assets = graph
      .topological()?
      .into_iter()
      .map(|kind| catalog.name(kind))
      .collect();
    infos.push(TargetInfo {
      name: target,
      description: target.description(),
      assets,
    });
  }

  if json {
    return print_json(&infos);
  }

  for info in &infos {
    print_info(&format!("{}: {}", info.name, info.description));
    print_stat("Assets", &info.assets.len().to_string());
  }
  Ok(())
}
