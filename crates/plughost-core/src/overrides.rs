//! Override table: which plugin supersedes which.
//!
//! A plugin whose name appears in another plugin's `overrides` list is not
//! loaded. Declarations must be acyclic; a cycle fails the whole pass.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PluginError, Result};

/// Split an `overrides` field on spaces and commas.
pub fn parse_override_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|name| !name.is_empty())
}

/// Overridden plugin name to the plugin overriding it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideTable {
    overridden_by: BTreeMap<String, String>,
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(plugin name, overrides field)` pairs.
    ///
    /// When two plugins override the same name, the first by name keeps it.
    pub fn build<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut graph: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (name, list) in entries {
            graph
                .entry(name)
                .or_default()
                .extend(parse_override_list(list));
        }

        if let Some(cycle) = find_cycle(&graph) {
            return Err(PluginError::OverrideCycle { cycle });
        }

        let mut overridden_by: BTreeMap<String, String> = BTreeMap::new();
        for (overrider, targets) in &graph {
            for target in targets {
                match overridden_by.get(*target) {
                    Some(first) => tracing::warn!(
                        "Plugin {} also overrides {}, already overridden by {}",
                        overrider,
                        target,
                        first
                    ),
                    None => {
                        overridden_by.insert(target.to_string(), overrider.to_string());
                    }
                }
            }
        }
        Ok(Self { overridden_by })
    }

    /// The plugin overriding `name`, if any.
    pub fn overridden_by(&self, name: &str) -> Option<&str> {
        self.overridden_by.get(name).map(String::as_str)
    }

    pub fn is_overridden(&self, name: &str) -> bool {
        self.overridden_by.contains_key(name)
    }

    /// `(overridden, overrider)` pairs in name order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.overridden_by
            .iter()
            .map(|(target, by)| (target.as_str(), by.as_str()))
    }

    pub fn len(&self) -> usize {
        self.overridden_by.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overridden_by.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// First cycle found, as a path whose last element repeats the first.
fn find_cycle(graph: &BTreeMap<&str, BTreeSet<&str>>) -> Option<Vec<String>> {
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        graph: &BTreeMap<&'a str, BTreeSet<&'a str>>,
        marks: &mut BTreeMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        stack.push(node);
        if let Some(targets) = graph.get(node) {
            for target in targets {
                if let Some(cycle) = visit(*target, graph, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    graph
        .keys()
        .find_map(|node| visit(*node, graph, &mut marks, &mut stack))
}
