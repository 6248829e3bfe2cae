//! Interbank network topologies
//!
//! Undirected graphs connecting bank agents. Three generators are
//! implemented directly so the whole simulation stays seeded by a single
//! `RngManager`:
//!
//! - Erdős–Rényi G(n, p)
//! - Barabási–Albert preferential attachment (m = 2)
//! - Watts–Strogatz small world (k = 4, β = 0.3)

use serde::{Deserialize, Serialize};

use crate::rng::RngManager;

/// Which generator builds the interbank graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkTopology {
    /// Erdős–Rényi G(n, p)
    ErdosRenyi,
    /// Barabási–Albert preferential attachment
    ScaleFree,
    /// Watts–Strogatz rewired ring lattice
    SmallWorld,
}

impl NetworkTopology {
    /// Parse the config-surface spelling (`erdos_renyi` | `scale_free` |
    /// `small_world`). Unknown strings fall back to Erdős–Rényi.
    pub fn from_name(name: &str) -> Self {
        match name {
            "scale_free" => NetworkTopology::ScaleFree,
            "small_world" => NetworkTopology::SmallWorld,
            _ => NetworkTopology::ErdosRenyi,
        }
    }
}

/// Undirected interbank graph over bank indices `0..n`.
///
/// Neighbour lists are kept sorted so iteration order is deterministic.
#[derive(Debug, Clone)]
pub struct InterbankGraph {
    n: usize,
    adj: Vec<Vec<usize>>,
}

impl InterbankGraph {
    /// Build an empty graph over `n` nodes.
    pub fn empty(n: usize) -> Self {
        Self {
            n,
            adj: vec![Vec::new(); n],
        }
    }

    /// Generate a graph for the given topology.
    ///
    /// `er_prob` is only consulted for Erdős–Rényi.
    pub fn generate(
        topology: NetworkTopology,
        n: usize,
        er_prob: f64,
        rng: &mut RngManager,
    ) -> Self {
        match topology {
            NetworkTopology::ErdosRenyi => Self::erdos_renyi(n, er_prob, rng),
            NetworkTopology::ScaleFree => Self::barabasi_albert(n, 2, rng),
            NetworkTopology::SmallWorld => Self::watts_strogatz(n, 4, 0.3, rng),
        }
    }

    /// Erdős–Rényi G(n, p): each unordered pair is an edge with probability p.
    pub fn erdos_renyi(n: usize, p: f64, rng: &mut RngManager) -> Self {
        let mut g = Self::empty(n);
        for i in 0..n {
            for j in (i + 1)..n {
                if rng.chance(p) {
                    g.add_edge(i, j);
                }
            }
        }
        g
    }

    /// Barabási–Albert preferential attachment.
    ///
    /// Starts from a complete seed of `m + 1` nodes, then attaches every new
    /// node to `m` distinct existing nodes, chosen proportionally to degree
    /// via the repeated-endpoints trick.
    pub fn barabasi_albert(n: usize, m: usize, rng: &mut RngManager) -> Self {
        let mut g = Self::empty(n);
        if n == 0 {
            return g;
        }
        let seed = (m + 1).min(n);
        for i in 0..seed {
            for j in (i + 1)..seed {
                g.add_edge(i, j);
            }
        }

        // Every edge contributes both endpoints; sampling uniformly from this
        // list is degree-proportional sampling.
        let mut endpoints: Vec<usize> = Vec::new();
        for (i, nbrs) in g.adj.iter().enumerate() {
            for _ in 0..nbrs.len() {
                endpoints.push(i);
            }
        }

        for new_node in seed..n {
            let mut targets: Vec<usize> = Vec::new();
            let mut guard = 0;
            while targets.len() < m.min(new_node) && guard < 1000 {
                let candidate = endpoints[rng.choice(endpoints.len())];
                if candidate != new_node && !targets.contains(&candidate) {
                    targets.push(candidate);
                }
                guard += 1;
            }
            for &t in &targets {
                g.add_edge(new_node, t);
                endpoints.push(new_node);
                endpoints.push(t);
            }
        }
        g
    }

    /// Watts–Strogatz: ring lattice with `k` neighbours per node (k/2 on each
    /// side), each clockwise edge rewired with probability `beta`.
    pub fn watts_strogatz(n: usize, k: usize, beta: f64, rng: &mut RngManager) -> Self {
        let mut g = Self::empty(n);
        if n < 2 {
            return g;
        }
        let half = (k / 2).max(1).min(n - 1);
        for i in 0..n {
            for j in 1..=half {
                g.add_edge(i, (i + j) % n);
            }
        }
        for i in 0..n {
            for j in 1..=half {
                if !rng.chance(beta) {
                    continue;
                }
                let old = (i + j) % n;
                // pick a replacement that is not i and not already a neighbour
                let mut guard = 0;
                loop {
                    let candidate = rng.choice(n);
                    if candidate != i && !g.contains_edge(i, candidate) {
                        g.remove_edge(i, old);
                        g.add_edge(i, candidate);
                        break;
                    }
                    guard += 1;
                    if guard > 1000 {
                        break;
                    }
                }
            }
        }
        g
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.n
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.adj.iter().map(|a| a.len()).sum::<usize>() / 2
    }

    /// Sorted neighbour indices of `i`.
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.adj[i]
    }

    /// Whether the undirected edge (i, j) exists.
    pub fn contains_edge(&self, i: usize, j: usize) -> bool {
        self.adj[i].binary_search(&j).is_ok()
    }

    /// Insert the undirected edge (i, j). Self-loops and duplicates are
    /// silently ignored.
    pub fn add_edge(&mut self, i: usize, j: usize) {
        if i == j || i >= self.n || j >= self.n || self.contains_edge(i, j) {
            return;
        }
        let pos_i = self.adj[i].binary_search(&j).unwrap_err();
        self.adj[i].insert(pos_i, j);
        let pos_j = self.adj[j].binary_search(&i).unwrap_err();
        self.adj[j].insert(pos_j, i);
    }

    fn remove_edge(&mut self, i: usize, j: usize) {
        if let Ok(pos) = self.adj[i].binary_search(&j) {
            self.adj[i].remove(pos);
        }
        if let Ok(pos) = self.adj[j].binary_search(&i) {
            self.adj[j].remove(pos);
        }
    }
}
