//! Dependency ordering of sampling units.
//!
//! Kahn's algorithm; among ready nodes the lowest index goes first so the
//! order (and therefore the RNG consumption) is stable for a given model.

use std::collections::BTreeSet;

/// Topological order of `n` nodes given `edges` as `(before, after)` pairs.
///
/// On a cycle, returns the nodes that could not be ordered.
pub fn topological_order(n: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>, Vec<usize>> {
    let mut indegree = vec![0usize; n];
    let mut successors = vec![Vec::new(); n];
    for &(before, after) in edges {
        successors[before].push(after);
        indegree[after] += 1;
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &next in &successors[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err((0..n).filter(|&i| indegree[i] > 0).collect())
    }
}
