//! # Ball Tree Index
//!
//! Exact k-nearest-neighbor search over dense feature vectors. Each node
//! bounds its points with a hypersphere (centroid + radius); whole subtrees
//! are skipped when the sphere cannot contain anything closer than the
//! current k-th neighbor.
//!
//! The tree stores indices only. Callers pass the same point slice to
//! [`BallTree::build`] and [`BallTree::query`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::features::FeatureVector;

/// A search result: index into the point slice and Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}

impl Eq for Neighbor {}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct Node {
    center: Vec<f32>,
    radius: f64,
    start: usize,
    end: usize,
    children: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct BallTree {
    nodes: Vec<Node>,
    order: Vec<usize>,
    leaf_size: usize,
}

impl BallTree {
    /// Builds the tree by recursively splitting on the widest dimension.
    pub fn build(points: &[FeatureVector], leaf_size: usize) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            order: (0..points.len()).collect(),
            leaf_size: leaf_size.max(1),
        };
        if !points.is_empty() {
            tree.build_node(points, 0, points.len());
        }
        tree
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn build_node(&mut self, points: &[FeatureVector], start: usize, end: usize) -> usize {
        let members = &self.order[start..end];
        let dim = points[members[0]].len();

        let mut center = vec![0.0_f64; dim];
        for &i in members {
            for (c, &x) in center.iter_mut().zip(points[i].as_slice()) {
                *c += x as f64;
            }
        }
        let count = members.len() as f64;
        let center: Vec<f32> = center.into_iter().map(|c| (c / count) as f32).collect();
        let radius = members
            .iter()
            .map(|&i| euclidean(&center, points[i].as_slice()))
            .fold(0.0, f64::max);

        let id = self.nodes.len();
        self.nodes.push(Node {
            center,
            radius,
            start,
            end,
            children: None,
        });

        if end - start > self.leaf_size {
            let split_dim = widest_dimension(points, &self.order[start..end], dim);
            let mid = start + (end - start) / 2;
            self.order[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
                points[a].as_slice()[split_dim].total_cmp(&points[b].as_slice()[split_dim])
            });
            let left = self.build_node(points, start, mid);
            let right = self.build_node(points, mid, end);
            self.nodes[id].children = Some((left, right));
        }
        id
    }

    /// Returns up to `k` nearest points, closest first. Equal distances are
    /// ordered by index so results do not depend on tree shape.
    pub fn query(&self, points: &[FeatureVector], target: &[f32], k: usize) -> Vec<Neighbor> {
        if self.nodes.is_empty() || k == 0 {
            return Vec::new();
        }
        let mut heap = BinaryHeap::with_capacity(k + 1);
        self.search(0, points, target, k, &mut heap);
        heap.into_sorted_vec()
    }

    fn search(
        &self,
        node_id: usize,
        points: &[FeatureVector],
        target: &[f32],
        k: usize,
        heap: &mut BinaryHeap<Neighbor>,
    ) {
        let node = &self.nodes[node_id];
        let lower_bound = (euclidean(target, &node.center) - node.radius).max(0.0);
        // Slack keeps rounding in the bound from pruning exact ties.
        let prune = |worst: &Neighbor| lower_bound > worst.distance + 1e-9 * (1.0 + worst.distance);
        if heap.len() == k && heap.peek().is_some_and(prune) {
            return;
        }

        match node.children {
            None => {
                for &index in &self.order[node.start..node.end] {
                    let candidate = Neighbor {
                        index,
                        distance: euclidean(target, points[index].as_slice()),
                    };
                    if heap.len() < k {
                        heap.push(candidate);
                    } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                        heap.pop();
                        heap.push(candidate);
                    }
                }
            }
            Some((left, right)) => {
                let dl = euclidean(target, &self.nodes[left].center);
                let dr = euclidean(target, &self.nodes[right].center);
                let (near, far) = if dl <= dr { (left, right) } else { (right, left) };
                self.search(near, points, target, k, heap);
                self.search(far, points, target, k, heap);
            }
        }
    }
}

fn widest_dimension(points: &[FeatureVector], members: &[usize], dim: usize) -> usize {
    (0..dim)
        .map(|d| {
            let (lo, hi) = members.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &i| {
                let x = points[i].as_slice()[d];
                (lo.min(x), hi.max(x))
            });
            (d, hi - lo)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(d, _)| d)
        .unwrap_or(0)
}

/// Euclidean distance accumulated in double precision.
pub fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
