/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Plugin dependency resolution
//!
//! Provides automatic dependency resolution for plugins using topological sorting.
//! This ensures plugins are initialized in the correct order, even if they are
//! declared in any order in the configuration file.

use crate::config::PluginConfig;
use crate::core::error::{DnsError, Result};
use std::collections::{HashMap, VecDeque};

/// Resolve plugin dependencies and return plugins in initialization order
///
/// Uses Kahn's algorithm for topological sorting to detect the correct
/// initialization order and detect circular dependencies.
pub fn resolve_dependencies(
    configs: Vec<PluginConfig>,
    get_deps: &dyn Fn(&PluginConfig) -> Vec<String>,
) -> Result<Vec<PluginConfig>> {
    // Build dependency graph (tag -> list of tags that depend on it)
    let mut reverse_graph: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<String, usize> = HashMap::new();

    for config in &configs {
        in_degree.insert(config.tag.clone(), 0);
        reverse_graph.entry(config.tag.clone()).or_default();
    }

    // Build the reverse dependency graph and calculate in-degrees
    for config in &configs {
        let deps = get_deps(config);

        *in_degree.get_mut(&config.tag).unwrap() = deps.len();

        for dep in deps {
            reverse_graph.entry(dep).or_default().push(config.tag.clone());
        }
    }

    // Kahn's algorithm: start with nodes that have no dependencies
    let mut queue: VecDeque<String> = in_degree
        .iter()
        .filter(|&(_, deg)| *deg == 0)
        .map(|(tag, _)| tag.clone())
        .collect();

    let mut sorted = Vec::new();
    let config_map: HashMap<_, _> = configs.into_iter().map(|c| (c.tag.clone(), c)).collect();

    while let Some(tag) = queue.pop_front() {
        if let Some(config) = config_map.get(&tag) {
            sorted.push(config.clone());
        }

        // For each plugin that depends on this one, decrease its in-degree
        if let Some(dependents) = reverse_graph.get(&tag) {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }
    }

    // Check for circular dependencies
    if sorted.len() != config_map.len() {
        return Err(DnsError::dependency(
            "Circular dependency detected in plugin configuration",
        ));
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(tag: &str, plugin_type: &str) -> PluginConfig {
        PluginConfig {
            tag: tag.to_string(),
            plugin_type: plugin_type.to_string(),
            args: None,
        }
    }

    // Mock dependency extraction function for tests
    fn mock_get_deps(config: &PluginConfig) -> Vec<String> {
        match config.tag.as_str() {
            "server" => vec!["main".to_string()],
            "main" => vec!["arbiter".to_string(), "upstream".to_string()],
            _ => vec![],
        }
    }

    #[test]
    fn resolve_chain_of_dependencies() {
        let configs = vec![
            plugin("server", "udp_server"),
            plugin("main", "sequence"),
            plugin("arbiter", "arbiter"),
            plugin("upstream", "forward"),
        ];

        let sorted = resolve_dependencies(configs, &mock_get_deps).unwrap();
        let order: Vec<&str> = sorted.iter().map(|c| c.tag.as_str()).collect();

        let pos = |tag: &str| order.iter().position(|t| *t == tag).unwrap();
        assert!(pos("arbiter") < pos("main"));
        assert!(pos("upstream") < pos("main"));
        assert!(pos("main") < pos("server"));
    }

    #[test]
    fn no_dependencies_keeps_everything() {
        let configs = vec![plugin("upstream", "forward")];
        let sorted = resolve_dependencies(configs, &mock_get_deps).unwrap();
        assert_eq!(sorted.len(), 1);
        assert_eq!(sorted[0].tag, "upstream");
    }

    #[test]
    fn circular_dependency_is_an_error() {
        let configs = vec![plugin("a", "sequence"), plugin("b", "sequence")];
        let cyclic = |config: &PluginConfig| -> Vec<String> {
            match config.tag.as_str() {
                "a" => vec!["b".to_string()],
                "b" => vec!["a".to_string()],
                _ => vec![],
            }
        };

        assert!(resolve_dependencies(configs, &cyclic).is_err());
    }
}
