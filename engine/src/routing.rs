use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// True when adding the edge `from -> to` would close a cycle, i.e. `from`
/// is already reachable from `to`.
pub fn would_create_cycle<Node, Neighbors, Iter>(
    from: &Node,
    to: &Node,
    mut neighbors: Neighbors,
) -> bool
where
    Node: Clone + Eq + Hash,
    Neighbors: FnMut(&Node) -> Iter,
    Iter: IntoIterator<Item = Node>,
{
    if from == to {
        return true;
    }
    has_path(to, from, &mut neighbors)
}

pub fn has_path<Node, Neighbors, Iter>(start: &Node, target: &Node, neighbors: &mut Neighbors) -> bool
where
    Node: Clone + Eq + Hash,
    Neighbors: FnMut(&Node) -> Iter,
    Iter: IntoIterator<Item = Node>,
{
    let mut visited = HashSet::new();
    let mut stack = vec![start.clone()];
    while let Some(current) = stack.pop() {
        if &current == target {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        stack.extend(neighbors(&current));
    }
    false
}

/// Kahn ordering over dense node indices. Nodes left out of the result sit
/// on a cycle.
pub fn topological_order(outgoing: &[Vec<usize>]) -> Vec<usize> {
    let mut indegree = vec![0_usize; outgoing.len()];
    for edges in outgoing {
        for &to in edges {
            indegree[to] += 1;
        }
    }
    let mut ready: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(outgoing.len());
    while let Some(node) = ready.pop_front() {
        order.push(node);
        for &to in &outgoing[node] {
            indegree[to] -= 1;
            if indegree[to] == 0 {
                ready.push_back(to);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::{topological_order, would_create_cycle};
    use std::collections::HashMap;

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    enum Unit {
        Track,
        Insert,
        Send,
        Bus,
    }

    #[test]
    fn closing_a_chain_is_a_cycle() {
        let graph = HashMap::from([("A", vec!["B"]), ("B", vec!["C"]), ("C", vec![])]);
        assert!(would_create_cycle(&"C", &"A", |node: &&str| {
            graph.get(node).cloned().unwrap_or_default()
        }));
    }

    #[test]
    fn send_back_into_its_own_track_is_a_cycle() {
        let graph = HashMap::from([
            (Unit::Track, vec![Unit::Insert]),
            (Unit::Insert, vec![Unit::Send]),
            (Unit::Send, vec![Unit::Bus]),
            (Unit::Bus, vec![]),
        ]);
        assert!(would_create_cycle(&Unit::Bus, &Unit::Insert, |node| {
            graph.get(node).cloned().unwrap_or_default()
        }));
        assert!(would_create_cycle(&Unit::Bus, &Unit::Bus, |_| Vec::new()));
    }

    #[test]
    fn parallel_route_is_not_a_cycle() {
        let graph = HashMap::from([
            (Unit::Track, vec![Unit::Insert]),
            (Unit::Insert, vec![Unit::Bus]),
            (Unit::Bus, vec![]),
        ]);
        assert!(!would_create_cycle(&Unit::Track, &Unit::Bus, |node| {
            graph.get(node).cloned().unwrap_or_default()
        }));
    }

    #[test]
    fn kahn_order_respects_edges() {
        let outgoing = vec![vec![2], vec![2], vec![3], vec![]];
        let order = topological_order(&outgoing);
        assert_eq!(order.len(), 4);
        let pos = |n: usize| order.iter().position(|x| *x == n).unwrap();
        assert!(pos(0) < pos(2) && pos(1) < pos(2) && pos(2) < pos(3));

        let cyclic = vec![vec![1], vec![0]];
        assert!(topological_order(&cyclic).is_empty());
    }
}
