//! Join path discovery over declared foreign keys.
//!
//! Breadth-first search gives the shortest path; among equally short paths the
//! one with the highest summed relationship usage wins, then neighbor name
//! order keeps the choice deterministic.

use crate::metadata::Relationship;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStep {
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

impl JoinStep {
    pub fn condition(&self) -> String {
        format!(
            "{}.{} = {}.{}",
            self.left_table, self.left_column, self.right_table, self.right_column
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPath {
    pub from_table: String,
    pub to_table: String,
    pub steps: Vec<JoinStep>,
    pub total_usage: u64,
}

impl JoinPath {
    /// Tables strictly between the endpoints.
    pub fn intermediate_tables(&self) -> Vec<&str> {
        self.steps
            .iter()
            .skip(1)
            .map(|s| s.left_table.as_str())
            .collect()
    }

    pub fn describe(&self) -> String {
        self.steps
            .iter()
            .map(JoinStep::condition)
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

#[derive(Debug, Clone)]
struct Edge {
    to: String,
    from_column: String,
    to_column: String,
    usage: u64,
}

/// Undirected foreign-key graph keyed by lowercase table name.
pub struct JoinGraph {
    edges: HashMap<String, Vec<Edge>>,
    names: HashMap<String, String>,
}

impl JoinGraph {
    pub fn new(relationships: &[Relationship]) -> Self {
        let mut edges: HashMap<String, Vec<Edge>> = HashMap::new();
        let mut names = HashMap::new();

        for rel in relationships {
            let from = rel.from_table.to_lowercase();
            let to = rel.to_table.to_lowercase();
            names.insert(from.clone(), rel.from_table.clone());
            names.insert(to.clone(), rel.to_table.clone());

            edges.entry(from.clone()).or_default().push(Edge {
                to: to.clone(),
                from_column: rel.from_column.clone(),
                to_column: rel.to_column.clone(),
                usage: rel.usage_count,
            });
            edges.entry(to).or_default().push(Edge {
                to: from,
                from_column: rel.to_column.clone(),
                to_column: rel.from_column.clone(),
                usage: rel.usage_count,
            });
        }

        for list in edges.values_mut() {
            list.sort_by(|a, b| b.usage.cmp(&a.usage).then_with(|| a.to.cmp(&b.to)));
        }

        Self { edges, names }
    }

    fn display_name(&self, key: &str) -> String {
        self.names.get(key).cloned().unwrap_or_else(|| key.to_string())
    }

    /// Shortest, then most-used, path of at most `max_depth` joins.
    pub fn shortest_path(&self, from: &str, to: &str, max_depth: usize) -> Option<JoinPath> {
        let start = from.to_lowercase();
        let goal = to.to_lowercase();
        if start == goal || !self.edges.contains_key(&start) || !self.edges.contains_key(&goal) {
            return None;
        }

        // node -> (depth, cumulative usage, parent node, edge index in parent's list)
        let mut visited: HashMap<String, (usize, u64, Option<(String, usize)>)> = HashMap::new();
        visited.insert(start.clone(), (0, 0, None));
        let mut queue = VecDeque::from([start.clone()]);

        while let Some(node) = queue.pop_front() {
            let (depth, usage, _) = visited[&node].clone();
            if depth >= max_depth {
                continue;
            }
            let Some(neighbors) = self.edges.get(&node) else { continue };
            for (idx, edge) in neighbors.iter().enumerate() {
                let candidate_usage = usage + edge.usage;
                let (is_new, improves) = match visited.get(&edge.to) {
                    None => (true, true),
                    Some(entry) => (false, entry.0 == depth + 1 && candidate_usage > entry.1),
                };
                if improves {
                    visited.insert(
                        edge.to.clone(),
                        (depth + 1, candidate_usage, Some((node.clone(), idx))),
                    );
                }
                if is_new {
                    queue.push_back(edge.to.clone());
                }
            }
        }

        let (_, total_usage, _) = visited.get(&goal)?.clone();

        let mut steps = Vec::new();
        let mut current = goal.clone();
        while let Some((_, _, Some((parent, idx)))) = visited.get(&current).cloned() {
            let edge = &self.edges[&parent][idx];
            steps.push(JoinStep {
                left_table: self.display_name(&parent),
                left_column: edge.from_column.clone(),
                right_table: self.display_name(&edge.to),
                right_column: edge.to_column.clone(),
            });
            current = parent;
        }
        steps.reverse();

        Some(JoinPath {
            from_table: self.display_name(&start),
            to_table: self.display_name(&goal),
            steps,
            total_usage,
        })
    }

    /// Paths connecting every table to the first one (or to any table already
    /// connected), plus the bridge tables those paths pass through.
    pub fn connect(&self, tables: &[String], max_depth: usize) -> (Vec<JoinPath>, BTreeSet<String>) {
        let mut paths = Vec::new();
        let mut bridges = BTreeSet::new();
        let Some(root) = tables.first() else {
            return (paths, bridges);
        };

        let mut connected: Vec<String> = vec![root.clone()];
        for target in tables.iter().skip(1) {
            let best = connected
                .iter()
                .filter_map(|c| self.shortest_path(c, target, max_depth))
                .min_by(|a, b| {
                    a.steps
                        .len()
                        .cmp(&b.steps.len())
                        .then_with(|| b.total_usage.cmp(&a.total_usage))
                });
            if let Some(path) = best {
                for table in path.intermediate_tables() {
                    if !tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                        bridges.insert(table.to_string());
                    }
                }
                paths.push(path);
            }
            connected.push(target.clone());
        }

        (paths, bridges)
    }
}
