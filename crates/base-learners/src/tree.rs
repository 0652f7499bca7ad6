//! Binary regression trees and the depth-wise grower shared by the
//! histogram and exact boosters.

use serde::{Deserialize, Serialize};

use crate::boosting::leaf_weight;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// A regression tree over raw feature values; `x <= threshold` goes left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match &nodes[idx] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Best split found for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SplitCandidate {
    pub feature: usize,
    pub threshold: f64,
    pub gain: f64,
}

/// Strategy for proposing the split of a node from its sample indices.
pub(crate) trait SplitFinder {
    fn best_split(&self, node_rows: &[usize], grad: &[f64], hess: &[f64]) -> Option<SplitCandidate>;
}

pub(crate) struct Growth {
    pub max_depth: usize,
    pub l2: f64,
    pub learning_rate: f64,
}

/// Grow a tree depth-first. Leaf values already include the learning rate.
pub(crate) fn grow_tree<F: SplitFinder>(
    finder: &F,
    rows: &[Vec<f64>],
    node_rows: Vec<usize>,
    grad: &[f64],
    hess: &[f64],
    growth: &Growth,
) -> RegressionTree {
    let mut nodes = Vec::new();
    grow_node(finder, rows, node_rows, grad, hess, growth, 0, &mut nodes);
    RegressionTree { nodes }
}

#[allow(clippy::too_many_arguments)]
fn grow_node<F: SplitFinder>(
    finder: &F,
    rows: &[Vec<f64>],
    node_rows: Vec<usize>,
    grad: &[f64],
    hess: &[f64],
    growth: &Growth,
    depth: usize,
    nodes: &mut Vec<TreeNode>,
) -> usize {
    let slot = nodes.len();
    let g: f64 = node_rows.iter().map(|&i| grad[i]).sum();
    let h: f64 = node_rows.iter().map(|&i| hess[i]).sum();
    nodes.push(TreeNode::Leaf {
        value: leaf_weight(g, h, growth.l2) * growth.learning_rate,
    });

    if depth >= growth.max_depth || node_rows.len() < 2 {
        return slot;
    }
    let split = match finder.best_split(&node_rows, grad, hess) {
        Some(split) if split.gain > 0.0 => split,
        _ => return slot,
    };

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = node_rows
        .into_iter()
        .partition(|&i| rows[i][split.feature] <= split.threshold);
    if left_rows.is_empty() || right_rows.is_empty() {
        return slot;
    }

    let left = grow_node(finder, rows, left_rows, grad, hess, growth, depth + 1, nodes);
    let right = grow_node(finder, rows, right_rows, grad, hess, growth, depth + 1, nodes);
    nodes[slot] = TreeNode::Split {
        feature: split.feature,
        threshold: split.threshold,
        left,
        right,
    };
    slot
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Always splits feature 0 at 0.5.
    struct Fixed;

    impl SplitFinder for Fixed {
        fn best_split(&self, _: &[usize], _: &[f64], _: &[f64]) -> Option<SplitCandidate> {
            Some(SplitCandidate {
                feature: 0,
                threshold: 0.5,
                gain: 1.0,
            })
        }
    }

    #[test]
    fn test_grow_tree_routes_rows() {
        let rows = vec![vec![0.0], vec![1.0], vec![0.2], vec![0.9]];
        let grad = vec![1.0, -1.0, 1.0, -1.0];
        let hess = vec![0.25; 4];
        let growth = Growth {
            max_depth: 3,
            l2: 0.0,
            learning_rate: 1.0,
        };
        let tree = grow_tree(&Fixed, &rows, (0..4).collect(), &grad, &hess, &growth);

        // the second level cannot split again because one side would be empty
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.n_leaves(), 2);
        assert!(tree.predict(&[0.1]) < 0.0);
        assert!(tree.predict(&[0.8]) > 0.0);
    }
}
