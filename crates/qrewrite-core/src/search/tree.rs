//! Arena-backed search tree. Nodes refer to their parent by index and are
//! never removed; pruning only changes a node's state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// The root: the original query, no candidate of its own.
    Open,
    /// Candidate generated, reward not final yet.
    Pending,
    Evaluated,
    /// Failed validation or measurement; never expanded again.
    Dead,
    /// Evaluation abandoned by cancellation.
    TerminatedIncomplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub transformation: Option<String>,
    pub depth: usize,
    pub visits: u32,
    pub cumulative_reward: f64,
    pub candidate_id: Option<String>,
    pub sql: String,
    pub state: NodeState,
    pub tried: BTreeSet<String>,
    pub children: Vec<NodeId>,
    /// No expandable descendant remains below this node.
    #[serde(default)]
    pub exhausted: bool,
}

impl SearchNode {
    /// Mean reward, only once the node's own reward is final.
    pub fn mean_reward(&self) -> Option<f64> {
        match self.state {
            NodeState::Open | NodeState::Evaluated | NodeState::Dead if self.visits > 0 => {
                Some(self.cumulative_reward / self.visits as f64)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTree {
    nodes: Vec<SearchNode>,
    transformations: Vec<String>,
    max_depth: usize,
}

impl SearchTree {
    pub fn new(root_sql: &str, transformations: Vec<String>, max_depth: usize) -> Self {
        let root = SearchNode {
            id: 0,
            parent: None,
            transformation: None,
            depth: 0,
            visits: 0,
            cumulative_reward: 0.0,
            candidate_id: None,
            sql: root_sql.to_string(),
            state: NodeState::Open,
            tried: BTreeSet::new(),
            children: Vec::new(),
            exhausted: false,
        };
        Self {
            nodes: vec![root],
            transformations,
            max_depth,
        }
    }

    pub const ROOT: NodeId = 0;

    pub fn node(&self, id: NodeId) -> &SearchNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[SearchNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Transformations root → `id`.
    pub fn path(&self, id: NodeId) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = Some(id);
        while let Some(i) = cur {
            let n = &self.nodes[i];
            if let Some(t) = &n.transformation {
                out.push(t.clone());
            }
            cur = n.parent;
        }
        out.reverse();
        out
    }

    /// Transformations still available at `id`, in configured order. A
    /// transformation already on the path is not applied twice.
    pub fn untried(&self, id: NodeId) -> Vec<String> {
        let n = &self.nodes[id];
        if !matches!(n.state, NodeState::Open | NodeState::Evaluated) || n.depth >= self.max_depth
        {
            return Vec::new();
        }
        let path: BTreeSet<String> = self.path(id).into_iter().collect();
        self.transformations
            .iter()
            .filter(|t| !n.tried.contains(*t) && !path.contains(*t))
            .cloned()
            .collect()
    }

    pub fn mark_tried(&mut self, id: NodeId, transformation: &str) {
        self.nodes[id].tried.insert(transformation.to_string());
    }

    pub fn add_child(
        &mut self,
        parent: NodeId,
        transformation: &str,
        candidate_id: &str,
        sql: &str,
    ) -> NodeId {
        let id = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.nodes.push(SearchNode {
            id,
            parent: Some(parent),
            transformation: Some(transformation.to_string()),
            depth,
            visits: 0,
            cumulative_reward: 0.0,
            candidate_id: Some(candidate_id.to_string()),
            sql: sql.to_string(),
            state: NodeState::Pending,
            tried: BTreeSet::new(),
            children: Vec::new(),
            exhausted: false,
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn set_state(&mut self, id: NodeId, state: NodeState) {
        self.nodes[id].state = state;
    }

    /// Adds `reward` to every node from `id` up to the root.
    pub fn backpropagate(&mut self, id: NodeId, reward: f64) {
        let mut cur = Some(id);
        while let Some(i) = cur {
            let n = &mut self.nodes[i];
            n.visits += 1;
            n.cumulative_reward += reward;
            cur = n.parent;
        }
    }

    fn ucb(&self, parent: &SearchNode, child: &SearchNode, c: f64) -> f64 {
        match child.mean_reward() {
            None => f64::INFINITY,
            Some(mean) => {
                let parent_visits = parent.visits.max(1) as f64;
                mean + c * (parent_visits.ln() / child.visits as f64).sqrt()
            }
        }
    }

    /// Walks down from the root by UCB1 and returns the first node that can
    /// still be expanded. Unvisited children win, ties go to the lower id.
    /// Returns `None` once nothing in the tree is expandable.
    pub fn select(&mut self, c: f64) -> Option<NodeId> {
        let mut cur = Self::ROOT;
        loop {
            if self.nodes[Self::ROOT].exhausted {
                return None;
            }
            if !self.untried(cur).is_empty() {
                return Some(cur);
            }
            let parent = &self.nodes[cur];
            let mut best: Option<(NodeId, f64)> = None;
            for &child_id in &parent.children {
                let child = &self.nodes[child_id];
                if child.state != NodeState::Evaluated || child.exhausted {
                    continue;
                }
                let score = self.ucb(parent, child, c);
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((child_id, score));
                }
            }
            match best {
                Some((next, _)) => cur = next,
                None => {
                    self.nodes[cur].exhausted = true;
                    cur = Self::ROOT;
                }
            }
        }
    }
}
