//! Implementation of the `kiln graph` command.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

use kiln_lib::assets::{AssetKind, InstallInputs, Target, catalog};
use kiln_lib::engine::AssetGraph;

use crate::output::print_json;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum GraphFormat {
  /// Graphviz DOT
  #[default]
  Dot,
  /// Kinds grouped into waves that can resolve in parallel
  Text,
}

#[derive(Serialize)]
struct GraphSummary {
  target: Target,
  assets: usize,
  waves: Vec<Vec<String>>,
}

pub fn cmd_graph(target: Target, format: GraphFormat, json: bool) -> Result<()> {
  let catalog = catalog(InstallInputs::default());
  let graph = AssetGraph::for_target(&catalog, target.kind()).context("Failed to build asset graph")?;
  let waves = named_waves(&graph);

  if json {
    return print_json(&GraphSummary {
      target,
      assets: graph.len(),
      waves,
    });
  }

  match format {
    GraphFormat::Dot => print!("{}", graph.to_dot()),
    GraphFormat::Text => {
      for (i, wave) in waves.iter().enumerate() {
        println!("Wave {}: {}", i + 1, wave.join(", "));
      }
    }
  }
  Ok(())
}

fn named_waves(graph: &AssetGraph<AssetKind>) -> Vec<Vec<String>> {
  graph
    .waves()
    .into_iter()
    .map(|wave| {
      wave
        .into_iter()
        .map(|kind| graph.name(kind).unwrap_or(kind.as_str()).to_string())
        .collect()
    })
    .collect()
}
