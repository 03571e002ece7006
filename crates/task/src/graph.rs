//! Explicit build graph
//!
//! Nodes are artifacts keyed by environment and stage, plus one report node.
//! An edge points from a node to something it depends on, so the outgoing
//! neighbours of a node are its dependencies.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::{algo, Direction};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use testbench_core::{EnvironmentName, Error, Result};

/// What a node produces for its environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// A realized image
    Image,
    /// A claimed cluster
    Lease,
    /// An extracted result stream
    Execute,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Image => "image",
            Stage::Lease => "lease",
            Stage::Execute => "execute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Artifact {
        environment: EnvironmentName,
        stage: Stage,
    },
    /// The aggregate report over every executed environment
    Report,
}

impl Node {
    pub fn artifact(environment: &EnvironmentName, stage: Stage) -> Self {
        Node::Artifact {
            environment: environment.clone(),
            stage,
        }
    }

    pub fn environment(&self) -> Option<&EnvironmentName> {
        match self {
            Node::Artifact { environment, .. } => Some(environment),
            Node::Report => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Artifact { environment, stage } => write!(f, "{environment}:{}", stage.as_str()),
            Node::Report => f.write_str("report"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    graph: DiGraph<Node, ()>,
    index: HashMap<Node, NodeIndex>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The graph of a full run: image, lease and execution per environment,
    /// and a report over all of them
    pub fn for_run<'a>(environments: impl IntoIterator<Item = &'a EnvironmentName>) -> Result<Self> {
        let mut graph = Self::new();
        let report = graph.add_node(Node::Report);
        let mut executes = Vec::new();
        for environment in environments {
            let image = graph.add_node(Node::artifact(environment, Stage::Image));
            let lease = graph.add_node(Node::artifact(environment, Stage::Lease));
            let execute = graph.add_node(Node::artifact(environment, Stage::Execute));
            graph.link(lease, image)?;
            graph.link(execute, lease)?;
            executes.push(execute);
        }
        for execute in executes {
            graph.link(report, execute)?;
        }
        Ok(graph)
    }

    /// The graph of `prepare`: independent image nodes only
    pub fn for_prepare<'a>(environments: impl IntoIterator<Item = &'a EnvironmentName>) -> Self {
        let mut graph = Self::new();
        for environment in environments {
            graph.add_node(Node::artifact(environment, Stage::Image));
        }
        graph
    }

    /// Add a node, returning the existing index if it is already present
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        if let Some(&index) = self.index.get(&node) {
            return index;
        }
        let index = self.graph.add_node(node.clone());
        self.index.insert(node, index);
        index
    }

    /// Declare that `dependent` needs `dependency`.
    ///
    /// Both nodes must already exist. An edge that would close a cycle is
    /// rejected and the graph is left unchanged.
    pub fn add_dependency(&mut self, dependent: &Node, dependency: &Node) -> Result<()> {
        let from = self.lookup(dependent)?;
        let to = self.lookup(dependency)?;
        self.link(from, to)
    }

    fn link(&mut self, from: NodeIndex, to: NodeIndex) -> Result<()> {
        if from == to || algo::has_path_connecting(&self.graph, to, from, None) {
            return Err(Error::graph(format!(
                "dependency of '{}' on '{}' would create a cycle",
                self.graph[from], self.graph[to]
            )));
        }
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    fn lookup(&self, node: &Node) -> Result<NodeIndex> {
        self.index
            .get(node)
            .copied()
            .ok_or_else(|| Error::graph(format!("unknown node '{node}'")))
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.index.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_indices().map(|index| &self.graph[index])
    }

    fn neighbors(&self, node: &Node, direction: Direction) -> Result<Vec<&Node>> {
        let index = self.lookup(node)?;
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(index, direction).collect();
        found.sort();
        Ok(found.into_iter().map(|i| &self.graph[i]).collect())
    }

    /// What `node` needs before it can run, in insertion order
    pub fn dependencies(&self, node: &Node) -> Result<Vec<&Node>> {
        self.neighbors(node, Direction::Outgoing)
    }

    /// What waits on `node`, in insertion order
    pub fn dependents(&self, node: &Node) -> Result<Vec<&Node>> {
        self.neighbors(node, Direction::Incoming)
    }

    /// Every node after all of its dependencies.
    ///
    /// Among nodes that are ready at the same time, the one added first comes
    /// first, so the order is stable for a given graph.
    pub fn topological_order(&self) -> Result<Vec<&Node>> {
        let mut pending: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|i| (i, self.graph.neighbors_directed(i, Direction::Outgoing).count()))
            .collect();
        let mut ready: BTreeSet<NodeIndex> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(index) = ready.pop_first() {
            order.push(&self.graph[index]);
            for dependent in self.graph.neighbors_directed(index, Direction::Incoming) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(Error::graph("circular dependency detected in build graph"));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> Vec<EnvironmentName> {
        raw.iter().map(|n| EnvironmentName::new(*n).unwrap()).collect()
    }

    fn labels(nodes: &[&Node]) -> Vec<String> {
        nodes.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_run_graph_edges() {
        let envs = names(&["alpha", "beta"]);
        let graph = BuildGraph::for_run(&envs).unwrap();
        assert_eq!(graph.len(), 7);

        let execute = Node::artifact(&envs[0], Stage::Execute);
        assert_eq!(labels(&graph.dependencies(&execute).unwrap()), ["alpha:lease"]);
        let lease = Node::artifact(&envs[0], Stage::Lease);
        assert_eq!(labels(&graph.dependencies(&lease).unwrap()), ["alpha:image"]);
        assert_eq!(labels(&graph.dependents(&lease).unwrap()), ["alpha:execute"]);
        assert_eq!(
            labels(&graph.dependencies(&Node::Report).unwrap()),
            ["alpha:execute", "beta:execute"]
        );
    }

    #[test]
    fn test_topological_order_is_stable() {
        let envs = names(&["alpha", "beta"]);
        let graph = BuildGraph::for_run(&envs).unwrap();
        assert_eq!(
            labels(&graph.topological_order().unwrap()),
            [
                "alpha:image",
                "alpha:lease",
                "alpha:execute",
                "beta:image",
                "beta:lease",
                "beta:execute",
                "report"
            ]
        );
    }

    #[test]
    fn test_prepare_graph_has_images_only() {
        let envs = names(&["alpha", "beta"]);
        let graph = BuildGraph::for_prepare(&envs);
        assert_eq!(labels(&graph.nodes().collect::<Vec<_>>()), ["alpha:image", "beta:image"]);
        assert!(!graph.contains(&Node::Report));
    }

    #[test]
    fn test_cycles_rejected() {
        let envs = names(&["alpha"]);
        let mut graph = BuildGraph::for_run(&envs).unwrap();
        let image = Node::artifact(&envs[0], Stage::Image);
        let execute = Node::artifact(&envs[0], Stage::Execute);

        let err = graph.add_dependency(&image, &execute).unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert!(graph.add_dependency(&image, &image).is_err());
        assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn test_unknown_nodes() {
        let envs = names(&["alpha", "beta"]);
        let mut graph = BuildGraph::for_prepare(&envs[..1]);
        let missing = Node::artifact(&envs[1], Stage::Image);
        assert!(graph.dependencies(&missing).is_err());
        assert!(graph
            .add_dependency(&missing, &Node::artifact(&envs[0], Stage::Image))
            .is_err());
    }
}
