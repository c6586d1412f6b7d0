//! Rooted binary ultrametric trees and the per-tree quantities the inference
//! consumes: the ordered coalescence times and the external/internal
//! branch-length partition.
use thiserror::Error;

/// Index of a node within the tree arena.
pub type NodeId = usize;

/// Relative tolerance when checking that all tips sit at the same depth.
const ULTRAMETRIC_TOL: f64 = 1e-6;

/// Malformed tree input. The model assumes a strictly binary coalescent
/// topology with all tips sampled at the same time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidTreeError {
    #[error("tree needs at least two tips, got {0}")]
    TooFewTips(usize),
    #[error("expected {expected} nodes for {n_tips} tips, got {got}")]
    WrongNodeCount { n_tips: usize, expected: usize, got: usize },
    #[error("node {node} has {children} children, tree must be strictly binary")]
    NotBinary { node: NodeId, children: usize },
    #[error("expected exactly one root, found {0}")]
    RootCount(usize),
    #[error("tip {tip} has height {height}, tree must be ultrametric")]
    NotUltrametric { tip: NodeId, height: f64 },
    #[error("node {node} lies above its parent ({height} > {parent_height})")]
    NegativeBranch { node: NodeId, height: f64, parent_height: f64 },
    #[error("internal node {node} has non-positive height {height}")]
    NonPositiveBranching { node: NodeId, height: f64 },
}

/// A rooted, strictly binary, ultrametric phylogeny of one clone.
///
/// Nodes live in an arena: indices `0..n_tips` are tips, the rest are
/// internal nodes. Each node stores its height above the tips (tips are at
/// height zero, the root at the total depth `T`) and its parent. Immutable
/// once built; produced by an external simulator or loaded by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    n_tips: usize,
    heights: Vec<f64>,
    parents: Vec<Option<NodeId>>,
    root: NodeId,
}

impl Tree {
    pub fn new(
        n_tips: usize,
        heights: Vec<f64>,
        parents: Vec<Option<NodeId>>,
    ) -> Result<Self, InvalidTreeError> {
        //! Build a tree from its arena representation, rejecting anything
        //! that is not a strictly binary ultrametric phylogeny.
        if n_tips < 2 {
            return Err(InvalidTreeError::TooFewTips(n_tips));
        }
        let expected = 2 * n_tips - 1;
        if heights.len() != expected || parents.len() != expected {
            return Err(InvalidTreeError::WrongNodeCount {
                n_tips,
                expected,
                got: heights.len().max(parents.len()),
            });
        }

        let mut children = vec![0usize; expected];
        let mut roots = Vec::with_capacity(1);
        for (node, parent) in parents.iter().enumerate() {
            match parent {
                Some(p) => {
                    children[*p] += 1;
                    if heights[node] > heights[*p] {
                        return Err(InvalidTreeError::NegativeBranch {
                            node,
                            height: heights[node],
                            parent_height: heights[*p],
                        });
                    }
                }
                None => roots.push(node),
            }
        }
        if roots.len() != 1 {
            return Err(InvalidTreeError::RootCount(roots.len()));
        }
        let root = roots[0];

        for (node, &nb_children) in children.iter().enumerate() {
            let expected_children = if node < n_tips { 0 } else { 2 };
            if nb_children != expected_children {
                return Err(InvalidTreeError::NotBinary { node, children: nb_children });
            }
        }

        let depth = heights[root];
        for (node, &height) in heights.iter().enumerate() {
            if node < n_tips {
                if height.abs() > ULTRAMETRIC_TOL * depth.max(1.0) {
                    return Err(InvalidTreeError::NotUltrametric { tip: node, height });
                }
            } else if height <= 0.0 {
                return Err(InvalidTreeError::NonPositiveBranching { node, height });
            }
        }

        Ok(Tree { n_tips, heights, parents, root })
    }

    /// Number of sampled tips.
    pub fn n_tips(&self) -> usize {
        self.n_tips
    }

    /// Total depth `T`, the height of the root above the tips.
    pub fn depth(&self) -> f64 {
        self.heights[self.root]
    }

    pub fn coalescence_times(&self) -> CoalescenceTimes {
        //! Extract the branching times of all internal nodes, sorted in
        //! decreasing order with a trailing sentinel zero. The first entry is
        //! the total depth `T`.
        let mut times: Vec<f64> =
            self.heights[self.n_tips..].to_vec();
        times.sort_unstable_by(|a, b| b.partial_cmp(a).expect("branching times are finite"));
        times.push(0.0);
        CoalescenceTimes { depth: times[0], times }
    }

    pub fn branch_lengths(&self) -> BranchLengths {
        //! Partition the total branch length into the pendant (tip-adjacent)
        //! edges and the interior edges.
        let mut external = 0.0;
        let mut internal = 0.0;
        for (node, parent) in self.parents.iter().enumerate() {
            if let Some(p) = parent {
                let edge = self.heights[*p] - self.heights[node];
                if node < self.n_tips {
                    external += edge;
                } else {
                    internal += edge;
                }
            }
        }
        BranchLengths { external, internal }
    }

    pub fn diagnostic_ratio(&self) -> f64 {
        //! Ratio of total external to total internal branch length.
        //!
        //! Coalescences clustered just below the root (a star-shaped tree,
        //! the strongly supercritical regime) drive the ratio up; coalescences
        //! spread through time (the neutral regime, where constant-rate
        //! approximations break down) drive it down. A degenerate tree with no
        //! interior length reports infinity, the star-tree limit.
        self.branch_lengths().ratio()
    }
}

/// Total branch length split into pendant and interior edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchLengths {
    pub external: f64,
    pub internal: f64,
}

impl BranchLengths {
    pub fn ratio(&self) -> f64 {
        if self.internal == 0.0 {
            f64::INFINITY
        } else {
            self.external / self.internal
        }
    }
}

/// The ordered coalescence times of one tree: `n_tips - 1` branching times in
/// decreasing order followed by a sentinel zero. Read-only input of the
/// likelihood.
#[derive(Debug, Clone, PartialEq)]
pub struct CoalescenceTimes {
    times: Vec<f64>,
    depth: f64,
}

impl CoalescenceTimes {
    pub fn new(times: Vec<f64>) -> Self {
        //! Wrap an already-extracted vector: strictly positive branching
        //! times in decreasing order followed by the sentinel zero.
        assert!(times.len() >= 2, "need at least one coalescence event");
        assert!(
            times.windows(2).all(|pair| pair[0] >= pair[1]),
            "coalescence times must be sorted in decreasing order"
        );
        assert!(
            times[..times.len() - 1].iter().all(|&t| t > 0.0),
            "branching times must be strictly positive"
        );
        assert!(
            *times.last().unwrap() == 0.0,
            "the trailing sentinel must be zero"
        );
        CoalescenceTimes { depth: times[0], times }
    }

    /// The times, descending from `T` to the trailing zero.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Total depth `T`, the largest branching time.
    pub fn depth(&self) -> f64 {
        self.depth
    }

    /// Number of coalescence events (`n_tips - 1`).
    pub fn n_events(&self) -> usize {
        self.times.len() - 1
    }

    pub fn inflection_bounds(&self) -> (f64, f64) {
        //! Bounds for the inflection-time parameter of the growth curve:
        //! from `T` minus the largest branching time up to twice the depth.
        (self.depth - self.times[0], 2.0 * self.depth)
    }
}
