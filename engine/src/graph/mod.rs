pub mod node;

pub use node::{GraphNode, InputFeed};

use crate::connections::PortConnection;
use crate::routing;
use crate::unit::{UnitCell, UnitKind, UnitUid};
use arc_swap::{ArcSwap, ArcSwapOption, Guard};
use crossbeam_queue::ArrayQueue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Owned input of a graph build, taken from the topology on the control
/// thread so the build can run anywhere.
#[derive(Debug, Clone, Default)]
pub struct GraphSetup {
    pub units: Vec<Arc<UnitCell>>,
    /// Enabled connections only.
    pub connections: Vec<PortConnection>,
    pub drop_unconnected_hw: bool,
}

/// An immutable, fully linked scheduling graph. Only the per-cycle counters
/// and the trigger queue change after construction.
#[derive(Debug)]
pub struct NodeSet {
    nodes: Vec<GraphNode>,
    init_trigger_list: Vec<usize>,
    terminal_nodes: Vec<usize>,
    terminal_refcnt: AtomicUsize,
    queue: ArrayQueue<usize>,
    max_route_latency: usize,
}

impl Default for NodeSet {
    fn default() -> Self {
        Self::from_nodes(Vec::new())
    }
}

impl NodeSet {
    pub fn build(setup: &GraphSetup) -> Self {
        let mut candidates: Vec<&Arc<UnitCell>> = Vec::with_capacity(setup.units.len());
        for unit in &setup.units {
            if unit.ports().is_empty() {
                warn!("Unit {} ({}) has no ports, leaving it out of the graph", unit.uid(), unit.name());
                continue;
            }
            candidates.push(unit);
        }

        if setup.drop_unconnected_hw {
            let present: HashSet<UnitUid> = candidates.iter().map(|u| u.uid()).collect();
            let connected: HashSet<UnitUid> = setup
                .connections
                .iter()
                .filter(|c| present.contains(&c.src.unit) && present.contains(&c.dest.unit))
                .flat_map(|c| [c.src.unit, c.dest.unit])
                .collect();
            candidates.retain(|u| {
                let keep = u.kind() != UnitKind::HardwareIo || connected.contains(&u.uid());
                if !keep {
                    debug!("Pruning unconnected hardware unit {} ({})", u.uid(), u.name());
                }
                keep
            });
        }

        let mut nodes: Vec<GraphNode> = candidates
            .iter()
            .enumerate()
            .map(|(index, unit)| GraphNode::new(index, (*unit).clone()))
            .collect();
        let by_uid: HashMap<UnitUid, usize> = nodes
            .iter()
            .map(|n| (n.unit.uid(), n.index))
            .collect();

        let mut edges = HashSet::new();
        for conn in &setup.connections {
            let (Some(&from), Some(&to)) = (by_uid.get(&conn.src.unit), by_uid.get(&conn.dest.unit))
            else {
                debug!("Skipping dangling connection {} -> {}", conn.src, conn.dest);
                continue;
            };
            let Some(source) = nodes[from].unit.port(conn.src.index).cloned() else {
                debug!("Skipping connection from missing port {}", conn.src);
                continue;
            };
            if nodes[to].unit.port(conn.dest.index).is_none() {
                debug!("Skipping connection to missing port {}", conn.dest);
                continue;
            }
            nodes[to].feeds.push(InputFeed {
                source,
                input: conn.dest.index as usize,
                multiplier: conn.multiplier,
            });
            if edges.insert((from, to)) {
                nodes[from].outgoing.push(to);
                nodes[to].incoming.push(from);
            }
        }

        Self::from_nodes(nodes)
    }

    fn from_nodes(mut nodes: Vec<GraphNode>) -> Self {
        for node in &mut nodes {
            node.init_refcount = node.incoming.len();
            node.reset();
        }

        let outgoing: Vec<Vec<usize>> = nodes.iter().map(|n| n.outgoing.clone()).collect();
        let order = routing::topological_order(&outgoing);
        if order.len() != nodes.len() {
            warn!(
                "Graph contains a cycle; {} node(s) will never run",
                nodes.len() - order.len()
            );
        }
        for &index in order.iter().rev() {
            let downstream = nodes[index]
                .outgoing
                .iter()
                .map(|&child| nodes[child].route_playback_latency)
                .max()
                .unwrap_or(0);
            nodes[index].route_playback_latency = nodes[index].playback_latency + downstream;
        }

        let init_trigger_list: Vec<usize> =
            nodes.iter().filter(|n| n.is_initial()).map(|n| n.index).collect();
        let terminal_nodes: Vec<usize> =
            nodes.iter().filter(|n| n.is_terminal()).map(|n| n.index).collect();
        let max_route_latency = init_trigger_list
            .iter()
            .map(|&i| nodes[i].route_playback_latency)
            .max()
            .unwrap_or(0);
        let queue = ArrayQueue::new(nodes.len().max(1));

        Self {
            terminal_refcnt: AtomicUsize::new(terminal_nodes.len()),
            nodes,
            init_trigger_list,
            terminal_nodes,
            queue,
            max_route_latency,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&GraphNode> {
        self.nodes.get(index)
    }

    pub fn node_for(&self, uid: UnitUid) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.unit.uid() == uid)
    }

    pub fn init_trigger_list(&self) -> &[usize] {
        &self.init_trigger_list
    }

    pub fn terminal_nodes(&self) -> &[usize] {
        &self.terminal_nodes
    }

    pub fn max_route_latency(&self) -> usize {
        self.max_route_latency
    }

    /// Re-arms every counter for a new cycle. Coordinator only.
    pub(crate) fn reset(&self) {
        for node in &self.nodes {
            node.reset();
        }
        self.terminal_refcnt
            .store(self.terminal_nodes.len(), Ordering::Release);
    }

    pub(crate) fn push(&self, index: usize) -> bool {
        self.queue.push(index).is_ok()
    }

    pub(crate) fn pop(&self) -> Option<usize> {
        self.queue.pop()
    }

    /// True for the terminal node that completed the cycle.
    pub(crate) fn terminal_done(&self) -> bool {
        self.terminal_refcnt.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn terminal_refcnt(&self) -> usize {
        self.terminal_refcnt.load(Ordering::Acquire)
    }
}

/// The live node set plus the next one waiting to be swapped in.
#[derive(Debug)]
pub struct Graph {
    live: ArcSwap<NodeSet>,
    pending: ArcSwapOption<NodeSet>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            live: ArcSwap::from_pointee(NodeSet::default()),
            pending: ArcSwapOption::empty(),
        }
    }

    pub fn live(&self) -> Guard<Arc<NodeSet>> {
        self.live.load()
    }

    pub fn live_full(&self) -> Arc<NodeSet> {
        self.live.load_full()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.load().is_some()
    }

    /// Replaces any earlier pending set that was never swapped in.
    pub fn set_pending(&self, set: Arc<NodeSet>) -> Option<Arc<NodeSet>> {
        self.pending.swap(Some(set))
    }

    /// Direct install, for when no cycle can be running.
    pub fn install(&self, set: Arc<NodeSet>) -> Arc<NodeSet> {
        self.pending.store(None);
        self.live.swap(set)
    }

    /// Swaps the pending set in, returning the superseded one. Called by the
    /// coordinator between cycles.
    pub fn rechain(&self) -> Option<Arc<NodeSet>> {
        let next = self.pending.swap(None)?;
        Some(self.live.swap(next))
    }
}
