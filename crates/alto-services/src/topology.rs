//! Topology store — the weighted network graph used to estimate transfer cost.
//!
//! Nodes come from the bootstrap snapshot (switches, hosts) or are created
//! when a peer registers under a key the snapshot does not know. A node
//! carries an `attached` flag that mirrors registry membership: the
//! directory attaches on register and detaches on unregister.
//!
//! The edge set is fixed once the snapshot is loaded. Detaching a snapshot
//! node therefore keeps the node and its links; detaching a dynamic node
//! removes it.
//!
//! The store has no lock of its own. The directory owns it together with
//! the peer registry behind a single reader/writer lock.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use petgraph::visit::EdgeRef;

use alto_core::snapshot::TopologySnapshot;

/// Per-link metrics. Both are required for every link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeMetrics {
    /// Link capacity. Always finite and > 0.
    pub bandwidth: f64,
    /// Link latency. Always finite and >= 0.
    pub delay: f64,
}

/// Where a node came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOrigin {
    /// Loaded from the topology snapshot. Survives detach.
    Snapshot,
    /// Created for a peer the snapshot did not know. Removed on detach.
    Dynamic,
}

#[derive(Debug, Clone)]
pub struct TopologyNode {
    pub id: String,
    pub origin: NodeOrigin,
    /// A registered peer currently sits on this node.
    pub attached: bool,
}

/// Metrics of one concrete path between two nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathMetrics {
    /// Number of links on the path.
    pub hops: u32,
    /// Smallest link bandwidth on the path. Infinite for a zero-hop path.
    pub bottleneck_bandwidth: f64,
    /// Sum of link delays.
    pub total_delay: f64,
    /// Sum of the edge weights the path was chosen by.
    pub weight: f64,
}

impl PathMetrics {
    fn origin() -> Self {
        Self {
            hops: 0,
            bottleneck_bandwidth: f64::INFINITY,
            total_delay: 0.0,
            weight: 0.0,
        }
    }

    fn extend(&self, link: &EdgeMetrics, weight: f64) -> Self {
        Self {
            hops: self.hops + 1,
            bottleneck_bandwidth: self.bottleneck_bandwidth.min(link.bandwidth),
            total_delay: self.total_delay + link.delay,
            weight: self.weight + weight,
        }
    }

    /// Path preference: lower weight, then fewer hops.
    fn rank(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then(self.hops.cmp(&other.hops))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TopologyError {
    #[error("malformed topology: {0}")]
    Parse(String),
    #[error("duplicate node {0}")]
    DuplicateNode(String),
    #[error("duplicate edge {0} - {1}")]
    DuplicateEdge(String, String),
    #[error("node {0} already exists")]
    AlreadyExists(String),
    #[error("node {0} not found")]
    NotFound(String),
    #[error("unknown node {0}")]
    UnknownNode(String),
    #[error("no edge between {0} and {1}")]
    NoSuchEdge(String, String),
    #[error("edge weight {0} is negative or not finite")]
    InvalidWeight(f64),
}

/// The network graph.
#[derive(Debug, Default)]
pub struct TopologyStore {
    graph: StableUnGraph<TopologyNode, EdgeMetrics>,
    index: HashMap<String, NodeIndex>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot. All-or-nothing.
    pub fn from_snapshot(snapshot: &TopologySnapshot) -> Result<Self, TopologyError> {
        let mut store = Self::new();

        for node in &snapshot.nodes {
            if node.id.is_empty() {
                return Err(TopologyError::Parse("node with empty id".into()));
            }
            if store.index.contains_key(&node.id) {
                return Err(TopologyError::DuplicateNode(node.id.clone()));
            }
            store.insert(node.id.clone(), NodeOrigin::Snapshot, false);
        }

        for link in &snapshot.links {
            let a = store.lookup(&link.source)?;
            let b = store.lookup(&link.target)?;
            if a == b {
                return Err(TopologyError::Parse(format!(
                    "self-loop on {}",
                    link.source
                )));
            }
            if !link.bandwidth.is_finite() || link.bandwidth <= 0.0 {
                return Err(TopologyError::Parse(format!(
                    "link {} - {}: bandwidth {} must be positive",
                    link.source, link.target, link.bandwidth
                )));
            }
            if !link.delay.is_finite() || link.delay < 0.0 {
                return Err(TopologyError::Parse(format!(
                    "link {} - {}: delay {} must be non-negative",
                    link.source, link.target, link.delay
                )));
            }
            if store.graph.find_edge(a, b).is_some() {
                return Err(TopologyError::DuplicateEdge(
                    link.source.clone(),
                    link.target.clone(),
                ));
            }
            store.graph.add_edge(
                a,
                b,
                EdgeMetrics {
                    bandwidth: link.bandwidth,
                    delay: link.delay,
                },
            );
        }

        Ok(store)
    }

    /// Replace the whole graph. On error the current graph is kept.
    ///
    /// Attachment flags are not carried over; callers load before any
    /// peer is registered.
    pub fn load(&mut self, snapshot: &TopologySnapshot) -> Result<(), TopologyError> {
        *self = Self::from_snapshot(snapshot)?;
        Ok(())
    }

    /// Insert an isolated node.
    pub fn add_node(&mut self, id: &str) -> Result<(), TopologyError> {
        if self.index.contains_key(id) {
            return Err(TopologyError::AlreadyExists(id.to_string()));
        }
        self.insert(id.to_string(), NodeOrigin::Dynamic, false);
        Ok(())
    }

    /// Remove a node and every link touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<(), TopologyError> {
        let idx = self
            .index
            .remove(id)
            .ok_or_else(|| TopologyError::NotFound(id.to_string()))?;
        self.graph.remove_node(idx);
        Ok(())
    }

    /// Mark `id` as carrying a registered peer, creating a dynamic node if
    /// the snapshot does not know it.
    pub fn attach_peer(&mut self, id: &str) -> Result<(), TopologyError> {
        match self.index.get(id) {
            Some(&idx) => {
                let node = &mut self.graph[idx];
                if node.attached {
                    return Err(TopologyError::AlreadyExists(id.to_string()));
                }
                node.attached = true;
            }
            None => {
                self.insert(id.to_string(), NodeOrigin::Dynamic, true);
            }
        }
        Ok(())
    }

    /// Undo `attach_peer`.
    pub fn detach_peer(&mut self, id: &str) -> Result<(), TopologyError> {
        let idx = match self.index.get(id) {
            Some(&idx) if self.graph[idx].attached => idx,
            _ => return Err(TopologyError::NotFound(id.to_string())),
        };
        match self.graph[idx].origin {
            NodeOrigin::Snapshot => self.graph[idx].attached = false,
            NodeOrigin::Dynamic => self.remove_node(id)?,
        }
        Ok(())
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn is_attached(&self, id: &str) -> bool {
        self.index
            .get(id)
            .map(|&idx| self.graph[idx].attached)
            .unwrap_or(false)
    }

    /// Ids of every node carrying a peer, sorted.
    pub fn attached_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .graph
            .node_indices()
            .map(|i| &self.graph[i])
            .filter(|n| n.attached)
            .map(|n| n.id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn node(&self, id: &str) -> Option<&TopologyNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Neighbour ids of `id`, sorted.
    pub fn neighbors(&self, id: &str) -> Result<Vec<&str>, TopologyError> {
        let idx = self.lookup(id)?;
        let mut out: Vec<&str> = self
            .graph
            .neighbors(idx)
            .map(|n| self.graph[n].id.as_str())
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    pub fn edge_metrics(&self, a: &str, b: &str) -> Result<EdgeMetrics, TopologyError> {
        let ia = self.lookup(a)?;
        let ib = self.lookup(b)?;
        self.graph
            .find_edge(ia, ib)
            .map(|e| self.graph[e])
            .ok_or_else(|| TopologyError::NoSuchEdge(a.to_string(), b.to_string()))
    }

    /// Dijkstra from `from` to `to` using `weight_fn` as the link weight.
    ///
    /// Returns `Ok(None)` when no path exists. Among paths of equal weight
    /// the one with fewer hops wins, then the one reached through the
    /// lexicographically smaller predecessor, so the result only depends on
    /// the graph and never on insertion order.
    pub fn shortest_path<F>(
        &self,
        from: &str,
        to: &str,
        weight_fn: F,
    ) -> Result<Option<PathMetrics>, TopologyError>
    where
        F: Fn(&EdgeMetrics) -> f64,
    {
        let source = self.lookup(from)?;
        let target = self.lookup(to)?;
        if source == target {
            return Ok(Some(PathMetrics::origin()));
        }

        let mut best: HashMap<NodeIndex, (PathMetrics, Option<NodeIndex>)> = HashMap::new();
        let mut settled: HashSet<NodeIndex> = HashSet::new();
        let mut heap = BinaryHeap::new();

        best.insert(source, (PathMetrics::origin(), None));
        heap.push(Frontier {
            metrics: PathMetrics::origin(),
            node: source,
        });

        while let Some(Frontier { metrics, node }) = heap.pop() {
            let stale = best.get(&node).map(|(m, _)| *m != metrics).unwrap_or(false);
            if stale || !settled.insert(node) {
                continue;
            }
            if node == target {
                return Ok(Some(metrics));
            }

            for edge in self.graph.edges(node) {
                let next = if edge.source() == node {
                    edge.target()
                } else {
                    edge.source()
                };
                if settled.contains(&next) {
                    continue;
                }

                let w = weight_fn(edge.weight());
                if !w.is_finite() || w < 0.0 {
                    return Err(TopologyError::InvalidWeight(w));
                }
                let candidate = metrics.extend(edge.weight(), w);

                let improves = match best.get(&next) {
                    None => true,
                    Some((current, pred)) => match candidate.rank(current) {
                        Ordering::Less => true,
                        Ordering::Greater => false,
                        Ordering::Equal => pred
                            .map(|p| self.graph[node].id < self.graph[p].id)
                            .unwrap_or(false),
                    },
                };
                if improves {
                    best.insert(next, (candidate, Some(node)));
                    heap.push(Frontier {
                        metrics: candidate,
                        node: next,
                    });
                }
            }
        }

        Ok(None)
    }

    fn insert(&mut self, id: String, origin: NodeOrigin, attached: bool) -> NodeIndex {
        let idx = self.graph.add_node(TopologyNode {
            id: id.clone(),
            origin,
            attached,
        });
        self.index.insert(id, idx);
        idx
    }

    fn lookup(&self, id: &str) -> Result<NodeIndex, TopologyError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| TopologyError::UnknownNode(id.to_string()))
    }
}

/// Heap entry for Dijkstra. Ordered so the max-heap pops the cheapest path.
#[derive(Debug)]
struct Frontier {
    metrics: PathMetrics,
    node: NodeIndex,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .metrics
            .rank(&self.metrics)
            .then_with(|| other.node.cmp(&self.node))
    }
}
