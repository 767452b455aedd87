//! Graph Engine (C9): lazy entity co-occurrence graphs built from a source
//! frame's text column, BFS queries, and connected-component summaries.
//!
//! Entity extraction is naive CapitalCase regex (`[A-Z][a-zA-Z0-9_]+`, §9
//! Open Question), deduped in first-seen order and capped at
//! `max_entities_per_doc` per row. Each row's entities are chained as
//! consecutive `related_to` edges.

use flow_store::FrameStore;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub edges: IndexSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: IndexMap<String, GraphNode>,
}

impl Graph {
    fn add_edge(&mut self, a_label: &str, b_label: &str) {
        let a_id = a_label.to_lowercase();
        let b_id = b_label.to_lowercase();
        self.nodes.entry(a_id.clone()).or_insert_with(|| GraphNode { id: a_id.clone(), label: a_label.to_string(), edges: IndexSet::new() });
        self.nodes.entry(b_id.clone()).or_insert_with(|| GraphNode { id: b_id.clone(), label: b_label.to_string(), edges: IndexSet::new() });
        self.nodes.get_mut(&a_id).unwrap().edges.insert(b_id.clone());
        self.nodes.get_mut(&b_id).unwrap().edges.insert(a_id);
    }

    fn ensure_node(&mut self, label: &str) {
        let id = label.to_lowercase();
        self.nodes.entry(id.clone()).or_insert_with(|| GraphNode { id, label: label.to_string(), edges: IndexSet::new() });
    }
}

/// Dedup-preserving-order CapitalCase token extraction, capped at
/// `max_entities_per_doc`.
pub fn extract_entities(text: &str, max_entities_per_doc: usize) -> Vec<String> {
    let re = Regex::new(r"[A-Z][a-zA-Z0-9_]+").expect("static regex");
    let mut seen = IndexSet::new();
    for m in re.find_iter(text) {
        if seen.len() >= max_entities_per_doc {
            break;
        }
        seen.insert(m.as_str().to_string());
    }
    seen.into_iter().collect()
}

#[derive(Default)]
pub struct GraphEngine {
    graphs: RwLock<IndexMap<String, Graph>>,
}

impl GraphEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds `name`'s graph from `frame`'s `text_field` the first time it
    /// is requested; subsequent calls are a no-op.
    pub fn ensure_built(
        &self,
        name: &str,
        store: &dyn FrameStore,
        frame: &str,
        text_field: &str,
        max_entities_per_doc: usize,
    ) -> crate::error::Result<()> {
        if self.graphs.read().contains_key(name) {
            return Ok(());
        }
        let rows = store.all(frame)?;
        let mut graph = Graph::default();
        for row in rows {
            let Some(text) = row.get(text_field).and_then(|v| v.as_str()) else { continue };
            let entities = extract_entities(text, max_entities_per_doc);
            if entities.is_empty() {
                continue;
            }
            if entities.len() == 1 {
                graph.ensure_node(&entities[0]);
            }
            for pair in entities.windows(2) {
                graph.add_edge(&pair[0], &pair[1]);
            }
        }
        self.graphs.write().insert(name.to_string(), graph);
        Ok(())
    }

    /// BFS from `seeds` (already lowercased node ids) up to `max_hops`,
    /// returning at most `max_nodes` nodes including the seeds themselves.
    pub fn bfs(&self, name: &str, seeds: &[String], max_hops: usize, max_nodes: usize) -> Vec<GraphNode> {
        let graphs = self.graphs.read();
        let Some(graph) = graphs.get(name) else { return Vec::new() };
        let mut visited: IndexSet<String> = IndexSet::new();
        let mut frontier: Vec<String> = seeds.iter().filter(|s| graph.nodes.contains_key(s.as_str())).cloned().collect();
        visited.extend(frontier.iter().cloned());

        for _ in 0..max_hops {
            if visited.len() >= max_nodes {
                break;
            }
            let mut next = Vec::new();
            for id in &frontier {
                let Some(node) = graph.nodes.get(id) else { continue };
                for edge in &node.edges {
                    if visited.insert(edge.clone()) {
                        next.push(edge.clone());
                        if visited.len() >= max_nodes {
                            break;
                        }
                    }
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }

        visited.into_iter().take(max_nodes).filter_map(|id| graph.nodes.get(&id).cloned()).collect()
    }

    /// Connected components, each summarized as its member labels.
    pub fn connected_components(&self, name: &str) -> Vec<Vec<String>> {
        let graphs = self.graphs.read();
        let Some(graph) = graphs.get(name) else { return Vec::new() };
        let mut seen: IndexSet<String> = IndexSet::new();
        let mut components = Vec::new();
        for start in graph.nodes.keys() {
            if seen.contains(start) {
                continue;
            }
            let mut stack = vec![start.clone()];
            let mut component = Vec::new();
            while let Some(id) = stack.pop() {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(node) = graph.nodes.get(&id) {
                    component.push(node.label.clone());
                    for edge in &node.edges {
                        if !seen.contains(edge) {
                            stack.push(edge.clone());
                        }
                    }
                }
            }
            components.push(component);
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::Value;
    use flow_store::InMemoryFrameStore;

    #[test]
    fn extraction_dedups_and_caps() {
        let entities = extract_entities("Alice met Bob, then Alice met Carol and Dave", 3);
        assert_eq!(entities, vec!["Alice", "Bob", "Carol"]);
    }

    #[test]
    fn bfs_finds_neighbors_within_hop_limit() {
        let store = InMemoryFrameStore::new();
        store.ensure_frame("docs");
        store
            .insert("docs", [("text".to_string(), Value::Str("Alice met Bob who knows Carol".into()))].into_iter().collect())
            .unwrap();
        let engine = GraphEngine::new();
        engine.ensure_built("g1", &store, "docs", "text", 10).unwrap();
        let found = engine.bfs("g1", &["alice".to_string()], 1, 10);
        let labels: Vec<_> = found.iter().map(|n| n.label.clone()).collect();
        assert!(labels.contains(&"Bob".to_string()));
        assert!(!labels.contains(&"Carol".to_string()), "carol is two hops away");
    }

    #[test]
    fn connected_components_group_linked_entities() {
        let store = InMemoryFrameStore::new();
        store.ensure_frame("docs");
        store.insert("docs", [("text".to_string(), Value::Str("Alice met Bob".into()))].into_iter().collect()).unwrap();
        store.insert("docs", [("text".to_string(), Value::Str("Carol met Dave".into()))].into_iter().collect()).unwrap();
        let engine = GraphEngine::new();
        engine.ensure_built("g1", &store, "docs", "text", 10).unwrap();
        let components = engine.connected_components("g1");
        assert_eq!(components.len(), 2);
    }
}
