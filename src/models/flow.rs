use std::collections::VecDeque;

use log::trace;

use crate::{
    problem::{Cost, Problem, Quantity},
    solution::{Flows, Pattern},
    utils::EPSILON,
};

/// Residual capacities below this are treated as saturated
const RESIDUAL_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
struct Edge {
    to: usize,
    capacity: Quantity,
    cost: Cost,
    flow: Quantity,
}

/// A directed network for min-cost flow by successive shortest paths. Every edge is stored next to its
/// reverse edge, so the reverse of edge `e` is `e ^ 1`.
#[derive(Debug, Clone)]
pub struct Network {
    edges: Vec<Edge>,
    adjacency: Vec<Vec<usize>>,
}

impl Network {
    pub fn new(nodes: usize) -> Self {
        Network {
            edges: Vec::new(),
            adjacency: vec![Vec::new(); nodes],
        }
    }

    /// Adds an edge and returns its index
    pub fn add_edge(&mut self, from: usize, to: usize, capacity: Quantity, cost: Cost) -> usize {
        let idx = self.edges.len();
        self.edges.push(Edge {
            to,
            capacity,
            cost,
            flow: 0.0,
        });
        self.edges.push(Edge {
            to: from,
            capacity: 0.0,
            cost: -cost,
            flow: 0.0,
        });
        self.adjacency[from].push(idx);
        self.adjacency[to].push(idx + 1);
        idx
    }

    pub fn flow(&self, edge: usize) -> Quantity {
        self.edges[edge].flow
    }

    fn residual(&self, edge: usize) -> Quantity {
        let e = &self.edges[edge];
        e.capacity - e.flow
    }

    /// Shortest path tree from `source` in the residual network, as the edge used to reach each node.
    /// Queue based Bellman-Ford, since reverse edges carry negative costs.
    fn shortest_paths(&self, source: usize) -> Vec<Option<usize>> {
        let n = self.adjacency.len();
        let mut dist = vec![Cost::INFINITY; n];
        let mut pred = vec![None; n];
        let mut queued = vec![false; n];
        let mut relaxations = vec![0usize; n];
        let mut queue = VecDeque::new();

        dist[source] = 0.0;
        queue.push_back(source);
        queued[source] = true;

        while let Some(u) = queue.pop_front() {
            queued[u] = false;
            for &e in &self.adjacency[u] {
                if self.residual(e) <= RESIDUAL_EPSILON {
                    continue;
                }
                let v = self.edges[e].to;
                let candidate = dist[u] + self.edges[e].cost;
                if candidate < dist[v] - 1e-12 {
                    dist[v] = candidate;
                    pred[v] = Some(e);
                    relaxations[v] += 1;
                    // Only reachable through round-off cycles; the current tree is still usable.
                    if relaxations[v] > n {
                        return pred;
                    }
                    if !queued[v] {
                        queued[v] = true;
                        queue.push_back(v);
                    }
                }
            }
        }

        pred
    }

    /// Send up to `amount` units from `source` to `sink` at minimum cost. Returns the amount sent.
    pub fn min_cost_flow(&mut self, source: usize, sink: usize, amount: Quantity) -> Quantity {
        let mut sent = 0.0;

        while amount - sent > RESIDUAL_EPSILON {
            let pred = self.shortest_paths(source);
            if pred[sink].is_none() {
                break;
            }

            // Walk back from the sink to find the bottleneck
            let mut bottleneck = amount - sent;
            let mut v = sink;
            let mut steps = 0;
            while v != source {
                let e = match pred[v] {
                    Some(e) => e,
                    None => return sent,
                };
                bottleneck = bottleneck.min(self.residual(e));
                v = self.edges[e ^ 1].to;
                steps += 1;
                if steps > self.adjacency.len() {
                    return sent;
                }
            }

            let mut v = sink;
            while v != source {
                let e = pred[v].expect("path was verified above");
                self.edges[e].flow += bottleneck;
                self.edges[e ^ 1].flow -= bottleneck;
                v = self.edges[e ^ 1].to;
            }

            trace!("augmented {} units", bottleneck);
            sent += bottleneck;
        }

        sent
    }
}

/// Routes all demand of `problem` through the open facilities of `pattern` at minimum transport cost.
/// Returns the transport cost (opening costs excluded) and the flow, or `None` if the open facilities
/// can not carry the total demand.
pub fn route(problem: &Problem, pattern: &Pattern) -> Option<(Cost, Flows)> {
    let plants = problem.plants().len();
    let depots = problem.depots().len();
    let customers = problem.customers();

    // source, plants, depot entries, depot exits, customers, sink
    let source = 0;
    let plant = |i: usize| 1 + i;
    let depot_in = |j: usize| 1 + plants + j;
    let depot_out = |j: usize| 1 + plants + depots + j;
    let customer = |k: usize| 1 + plants + 2 * depots + k;
    let sink = 1 + plants + 2 * depots + customers;

    let mut network = Network::new(sink + 1);

    for i in problem.plant_indices().filter(|&i| pattern.plant(i)) {
        network.add_edge(source, plant(*i), problem.plant(i).capacity(), 0.0);
    }
    for j in problem.depot_indices().filter(|&j| pattern.depot(j)) {
        network.add_edge(depot_in(*j), depot_out(*j), problem.depot(j).capacity(), 0.0);
    }

    let mut shipments = Vec::new();
    for i in problem.plant_indices().filter(|&i| pattern.plant(i)) {
        for j in problem.depot_indices().filter(|&j| pattern.depot(j)) {
            let cost = problem.plant_depot_cost(i, j);
            let e = network.add_edge(plant(*i), depot_in(*j), Quantity::INFINITY, cost);
            shipments.push((i, j, e));
        }
    }

    let mut deliveries = Vec::new();
    for j in problem.depot_indices().filter(|&j| pattern.depot(j)) {
        for k in problem.customer_indices().filter(|&k| problem.demand(k) > 0.0) {
            let cost = problem.depot_customer_cost(j, k);
            let e = network.add_edge(depot_out(*j), customer(*k), Quantity::INFINITY, cost);
            deliveries.push((j, k, e));
        }
    }

    for k in problem.customer_indices().filter(|&k| problem.demand(k) > 0.0) {
        network.add_edge(customer(*k), sink, problem.demand(k), 0.0);
    }

    let total = problem.total_demand();
    let sent = network.min_cost_flow(source, sink, total);
    if total - sent > EPSILON * total.max(1.0) {
        trace!("pattern can only route {} of {}", sent, total);
        return None;
    }

    let mut flows = Flows::zeros(problem);
    for (i, j, e) in shipments {
        flows.add_shipped(i, j, network.flow(e));
    }
    for (j, k, e) in deliveries {
        flows.add_delivered(j, k, network.flow(e));
    }

    Some((flows.transport_cost(problem), flows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{CustomerIndex, DepotIndex, PlantIndex};

    #[test]
    fn network_prefers_cheap_paths() {
        // 0 -> 1 -> 3 costs 2, 0 -> 2 -> 3 costs 5, each path carries at most 4
        let mut network = Network::new(4);
        let a = network.add_edge(0, 1, 4.0, 1.0);
        network.add_edge(1, 3, 4.0, 1.0);
        let b = network.add_edge(0, 2, 4.0, 2.0);
        network.add_edge(2, 3, 4.0, 3.0);

        assert_eq!(network.min_cost_flow(0, 3, 6.0), 6.0);
        assert_eq!(network.flow(a), 4.0);
        assert_eq!(network.flow(b), 2.0);
    }

    #[test]
    fn network_reroutes_through_reverse_edges() {
        // The greedy first path 0-1-2-3 has to be partially undone to send 2 units.
        let mut network = Network::new(4);
        network.add_edge(0, 1, 1.0, 1.0);
        network.add_edge(0, 2, 1.0, 5.0);
        network.add_edge(1, 2, 1.0, 1.0);
        let direct = network.add_edge(1, 3, 1.0, 5.0);
        network.add_edge(2, 3, 1.0, 1.0);

        assert_eq!(network.min_cost_flow(0, 3, 2.0), 2.0);
        assert_eq!(network.flow(direct), 1.0);
    }

    #[test]
    fn route_uses_nearest_depot_until_full() {
        let problem = Problem::from_vecs(
            vec![0.0],
            vec![100.0],
            vec![0.0, 0.0],
            vec![15.0, 100.0],
            vec![10.0, 10.0],
            vec![vec![0.0, 0.0]],
            vec![vec![1.0, 1.0], vec![2.0, 2.0]],
        )
        .unwrap();
        let pattern = Pattern::new(vec![true], vec![true, true]);
        let (cost, flows) = route(&problem, &pattern).unwrap();

        // 15 units at 1 and 5 at 2
        assert!((cost - 25.0).abs() < 1e-9);
        assert!((flows.depot_outflow(DepotIndex::from(0)) - 15.0).abs() < 1e-9);
        assert!((flows.shipped(PlantIndex::from(0), DepotIndex::from(1)) - 5.0).abs() < 1e-9);
        assert!((flows.customer_inflow(CustomerIndex::from(1)) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn route_fails_without_capacity() {
        let problem = Problem::from_vecs(
            vec![0.0, 0.0],
            vec![10.0, 10.0],
            vec![0.0],
            vec![100.0],
            vec![15.0],
            vec![vec![0.0], vec![0.0]],
            vec![vec![0.0]],
        )
        .unwrap();
        assert!(route(&problem, &Pattern::new(vec![true, false], vec![true])).is_none());
        assert!(route(&problem, &Pattern::new(vec![true, true], vec![false])).is_none());
        assert!(route(&problem, &Pattern::new(vec![true, true], vec![true])).is_some());
    }
}
