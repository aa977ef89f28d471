//! Dependency graph over a target's transitive closure.
//!
//! The builder checks this graph before walking so that a cycle is reported
//! instead of leaving concurrent branches waiting on each other. The same graph
//! backs `kiln graph`: a topological order, parallel waves and DOT output.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::asset::{AssetKey, Catalog};

use super::types::BuildError;

/// A DAG of asset kinds, with edges from dependency to dependent.
#[derive(Debug)]
pub struct AssetGraph<K: AssetKey> {
  graph: DiGraph<K, ()>,
  nodes: BTreeMap<K, NodeIndex>,
  names: BTreeMap<K, String>,
  target: K,
}

impl<K: AssetKey> AssetGraph<K> {
  /// Build the graph of everything `target` transitively depends on.
  ///
  /// # Errors
  ///
  /// `UnknownAsset` if a reachable kind has no registered asset, `Cycle` if the
  /// closure is not acyclic.
  pub fn for_target(catalog: &Catalog<K>, target: K) -> Result<Self, BuildError> {
    let mut graph = DiGraph::new();
    let mut nodes = BTreeMap::new();
    let mut names = BTreeMap::new();
    let mut edges = Vec::new();

    let mut queue = VecDeque::from([(target, None::<K>)]);
    while let Some((kind, required_by)) = queue.pop_front() {
      if nodes.contains_key(&kind) {
        continue;
      }

      let asset = catalog.get(kind).ok_or_else(|| BuildError::UnknownAsset {
        kind: kind.to_string(),
        required_by: required_by.map(|r| catalog.name(r)),
      })?;

      nodes.insert(kind, graph.add_node(kind));
      names.insert(kind, asset.name().to_string());

      for dep in asset.dependencies() {
        edges.push((dep, kind));
        queue.push_back((dep, Some(kind)));
      }
    }

    for (dep, dependent) in edges {
      graph.add_edge(nodes[&dep], nodes[&dependent], ());
    }

    let dag = Self {
      graph,
      nodes,
      names,
      target,
    };
    dag.verify_acyclic()?;
    Ok(dag)
  }

  fn verify_acyclic(&self) -> Result<(), BuildError> {
    match toposort(&self.graph, None) {
      Ok(_) => Ok(()),
      Err(cycle) => Err(BuildError::Cycle {
        path: self.cycle_through(cycle.node_id()),
      }),
    }
  }

  /// Names along one cycle through `start`, following dependency edges.
  fn cycle_through(&self, start: NodeIndex) -> Vec<String> {
    let mut path = vec![start];
    let mut visited = HashSet::from([start]);
    if self.find_cycle(start, start, &mut path, &mut visited) {
      path.push(start);
    }
    path.into_iter().map(|idx| self.names[&self.graph[idx]].clone()).collect()
  }

  fn find_cycle(&self, start: NodeIndex, at: NodeIndex, path: &mut Vec<NodeIndex>, seen: &mut HashSet<NodeIndex>) -> bool {
    for dep in self.graph.neighbors_directed(at, Direction::Incoming) {
      if dep == start {
        return true;
      }
      if seen.insert(dep) {
        path.push(dep);
        if self.find_cycle(start, dep, path, seen) {
          return true;
        }
        path.pop();
      }
    }
    false
  }

  pub fn target(&self) -> K {
    self.target
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, kind: K) -> bool {
    self.nodes.contains_key(&kind)
  }

  pub fn name(&self, kind: K) -> Option<&str> {
    self.names.get(&kind).map(String::as_str)
  }

  /// Kinds in an order where dependencies come before dependents.
  pub fn topological(&self) -> Result<Vec<K>, BuildError> {
    let sorted = toposort(&self.graph, None).map_err(|cycle| BuildError::Cycle {
      path: self.cycle_through(cycle.node_id()),
    })?;
    Ok(sorted.into_iter().map(|idx| self.graph[idx]).collect())
  }

  /// Kinds grouped into waves; every dependency of a kind lives in an earlier
  /// wave. Kinds inside a wave are sorted.
  pub fn waves(&self) -> Vec<Vec<K>> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut remaining: BTreeSet<K> = self.nodes.keys().copied().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let ready: Vec<K> = remaining
        .iter()
        .copied()
        .filter(|k| in_degree[&self.nodes[k]] == 0)
        .collect();
      if ready.is_empty() {
        break;
      }

      for kind in &ready {
        remaining.remove(kind);
        for dependent in self.graph.neighbors_directed(self.nodes[kind], Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&dependent) {
            *deg = deg.saturating_sub(1);
          }
        }
      }
      waves.push(ready);
    }

    waves
  }

  /// Direct dependencies of `kind`, sorted.
  pub fn dependencies(&self, kind: K) -> Vec<K> {
    let Some(&idx) = self.nodes.get(&kind) else {
      return Vec::new();
    };
    let set: BTreeSet<K> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|n| self.graph[n])
      .collect();
    set.into_iter().collect()
  }

  /// Render the graph in Graphviz DOT, edges pointing from dependent to
  /// dependency.
  pub fn to_dot(&self) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph {:?} {{", self.names[&self.target]);
    for name in self.names.values() {
      let _ = writeln!(out, "  {:?};", name);
    }
    for (&kind, name) in &self.names {
      for dep in self.dependencies(kind) {
        let _ = writeln!(out, "  {:?} -> {:?};", name, self.names[&dep]);
      }
    }
    out.push_str("}\n");
    out
  }
}
