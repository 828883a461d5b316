use std::collections::BTreeMap;

use derive_more::Display;
use itertools::iproduct;
use ndarray::{Array2, Axis};
use serde::Serialize;

use crate::problem::{Cost, CustomerIndex, DepotIndex, PlantIndex, Problem, Quantity};

/// Identifies either a plant or a depot.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FacilityId {
    #[display(fmt = "plant {}", _0)]
    Plant(PlantIndex),
    #[display(fmt = "depot {}", _0)]
    Depot(DepotIndex),
}

/// Which plants and depots are open. Two solutions with the same pattern are considered identical,
/// regardless of their cost or flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Pattern {
    plants: Vec<bool>,
    depots: Vec<bool>,
}

impl Pattern {
    pub fn new(plants: Vec<bool>, depots: Vec<bool>) -> Self {
        Pattern { plants, depots }
    }

    /// Every facility of `problem` closed
    pub fn closed(problem: &Problem) -> Self {
        Pattern {
            plants: vec![false; problem.plants().len()],
            depots: vec![false; problem.depots().len()],
        }
    }

    pub fn plant(&self, i: PlantIndex) -> bool {
        self.plants[*i]
    }

    pub fn depot(&self, j: DepotIndex) -> bool {
        self.depots[*j]
    }

    pub fn is_open(&self, facility: FacilityId) -> bool {
        match facility {
            FacilityId::Plant(i) => self.plant(i),
            FacilityId::Depot(j) => self.depot(j),
        }
    }

    pub fn set(&mut self, facility: FacilityId, open: bool) {
        match facility {
            FacilityId::Plant(i) => self.plants[*i] = open,
            FacilityId::Depot(j) => self.depots[*j] = open,
        }
    }

    pub fn plants(&self) -> &[bool] {
        &self.plants
    }

    pub fn depots(&self) -> &[bool] {
        &self.depots
    }

    pub fn open_plants(&self) -> usize {
        self.plants.iter().filter(|&&x| x).count()
    }

    pub fn open_depots(&self) -> usize {
        self.depots.iter().filter(|&&x| x).count()
    }

    /// All facilities with their state, plants first.
    pub fn facilities(&self) -> impl Iterator<Item = (FacilityId, bool)> + '_ {
        let plants = self
            .plants
            .iter()
            .enumerate()
            .map(|(i, &open)| (FacilityId::Plant(i.into()), open));
        let depots = self
            .depots
            .iter()
            .enumerate()
            .map(|(j, &open)| (FacilityId::Depot(j.into()), open));
        plants.chain(depots)
    }

    /// The total opening cost of the open facilities
    pub fn opening_cost(&self, problem: &Problem) -> Cost {
        let plants: Cost = problem
            .plant_indices()
            .filter(|&i| self.plant(i))
            .map(|i| problem.plant(i).opening_cost())
            .sum();
        let depots: Cost = problem
            .depot_indices()
            .filter(|&j| self.depot(j))
            .map(|j| problem.depot(j).opening_cost())
            .sum();
        plants + depots
    }
}

/// A set of facilities whose open/closed state is forced for one oracle call. Facilities that are not
/// in the set are free.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedSet(BTreeMap<FacilityId, bool>);

impl FixedSet {
    pub fn new() -> Self {
        FixedSet(BTreeMap::new())
    }

    /// Fix every facility to its state in `pattern`
    pub fn from_pattern(pattern: &Pattern) -> Self {
        FixedSet(pattern.facilities().collect())
    }

    pub fn fix(&mut self, facility: FacilityId, open: bool) {
        self.0.insert(facility, open);
    }

    pub fn get(&self, facility: FacilityId) -> Option<bool> {
        self.0.get(&facility).copied()
    }

    pub fn is_fixed(&self, facility: FacilityId) -> bool {
        self.0.contains_key(&facility)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FacilityId, bool)> + '_ {
        self.0.iter().map(|(&f, &open)| (f, open))
    }

    pub fn plants(&self) -> impl Iterator<Item = (PlantIndex, bool)> + '_ {
        self.iter().filter_map(|(f, open)| match f {
            FacilityId::Plant(i) => Some((i, open)),
            FacilityId::Depot(_) => None,
        })
    }

    pub fn depots(&self) -> impl Iterator<Item = (DepotIndex, bool)> + '_ {
        self.iter().filter_map(|(f, open)| match f {
            FacilityId::Depot(j) => Some((j, open)),
            FacilityId::Plant(_) => None,
        })
    }

    /// The facilities of `problem` that are not fixed, plants first.
    pub fn free(&self, problem: &Problem) -> Vec<FacilityId> {
        problem
            .plant_indices()
            .map(FacilityId::Plant)
            .chain(problem.depot_indices().map(FacilityId::Depot))
            .filter(|&f| !self.is_fixed(f))
            .collect()
    }
}

impl FromIterator<(FacilityId, bool)> for FixedSet {
    fn from_iter<T: IntoIterator<Item = (FacilityId, bool)>>(iter: T) -> Self {
        FixedSet(iter.into_iter().collect())
    }
}

/// The flow of goods through the network.
#[derive(Debug, Clone, PartialEq)]
pub struct Flows {
    /// Quantity shipped from plant i to depot j, shape (plants, depots)
    shipped: Array2<Quantity>,
    /// Quantity delivered from depot j to customer k, shape (depots, customers)
    delivered: Array2<Quantity>,
}

impl Flows {
    pub fn new(shipped: Array2<Quantity>, delivered: Array2<Quantity>) -> Self {
        Flows { shipped, delivered }
    }

    pub fn zeros(problem: &Problem) -> Self {
        Flows {
            shipped: Array2::zeros((problem.plants().len(), problem.depots().len())),
            delivered: Array2::zeros((problem.depots().len(), problem.customers())),
        }
    }

    pub fn shipped(&self, i: PlantIndex, j: DepotIndex) -> Quantity {
        self.shipped[[*i, *j]]
    }

    pub fn delivered(&self, j: DepotIndex, k: CustomerIndex) -> Quantity {
        self.delivered[[*j, *k]]
    }

    pub fn add_shipped(&mut self, i: PlantIndex, j: DepotIndex, amount: Quantity) {
        self.shipped[[*i, *j]] += amount;
    }

    pub fn add_delivered(&mut self, j: DepotIndex, k: CustomerIndex, amount: Quantity) {
        self.delivered[[*j, *k]] += amount;
    }

    pub fn plant_outflow(&self, i: PlantIndex) -> Quantity {
        self.shipped.index_axis(Axis(0), *i).sum()
    }

    pub fn depot_inflow(&self, j: DepotIndex) -> Quantity {
        self.shipped.index_axis(Axis(1), *j).sum()
    }

    pub fn depot_outflow(&self, j: DepotIndex) -> Quantity {
        self.delivered.index_axis(Axis(0), *j).sum()
    }

    pub fn customer_inflow(&self, k: CustomerIndex) -> Quantity {
        self.delivered.index_axis(Axis(1), *k).sum()
    }

    pub fn transport_cost(&self, problem: &Problem) -> Cost {
        let first: Cost = iproduct!(problem.plant_indices(), problem.depot_indices())
            .map(|(i, j)| problem.plant_depot_cost(i, j) * self.shipped(i, j))
            .sum();
        let second: Cost = iproduct!(problem.depot_indices(), problem.customer_indices())
            .map(|(j, k)| problem.depot_customer_cost(j, k) * self.delivered(j, k))
            .sum();
        first + second
    }
}

/// A broken constraint, as reported by [`Solution::validate`]
#[derive(Debug, Display, Clone, PartialEq)]
pub enum Violation {
    #[display(fmt = "the solution has no flow to validate")]
    MissingFlows,
    #[display(fmt = "depot {} receives {} but sends {}", depot, inflow, outflow)]
    Conservation {
        depot: DepotIndex,
        inflow: Quantity,
        outflow: Quantity,
    },
    #[display(fmt = "customer {} receives {} but demands {}", customer, received, demand)]
    Demand {
        customer: CustomerIndex,
        received: Quantity,
        demand: Quantity,
    },
    #[display(fmt = "{} carries {} with capacity {}", facility, flow, capacity)]
    Capacity {
        facility: FacilityId,
        flow: Quantity,
        capacity: Quantity,
    },
    #[display(fmt = "{} is closed but carries {}", facility, flow)]
    ClosedFacilityUsed { facility: FacilityId, flow: Quantity },
    #[display(fmt = "reported cost {} differs from recomputed cost {}", reported, actual)]
    CostMismatch { reported: Cost, actual: Cost },
}

impl std::error::Error for Violation {}

/// A solution to the TSCFLP: a facility pattern, its total cost, and optionally the flow that attains it.
/// An infinite cost means that no feasible flow was found for the pattern.
#[derive(Debug, Clone)]
pub struct Solution {
    cost: Cost,
    pattern: Pattern,
    flows: Option<Flows>,
}

impl Solution {
    pub fn new(cost: Cost, pattern: Pattern, flows: Option<Flows>) -> Self {
        Solution {
            cost,
            pattern,
            flows,
        }
    }

    /// A solution that loses against every feasible one.
    pub fn infeasible(pattern: Pattern) -> Self {
        Solution {
            cost: Cost::INFINITY,
            pattern,
            flows: None,
        }
    }

    pub fn cost(&self) -> Cost {
        self.cost
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn flows(&self) -> Option<&Flows> {
        self.flows.as_ref()
    }

    pub fn is_feasible(&self) -> bool {
        self.cost.is_finite()
    }

    /// Whether the two solutions open and close exactly the same facilities
    pub fn same_pattern(&self, other: &Solution) -> bool {
        self.pattern == other.pattern
    }

    /// Check flow conservation, demand satisfaction, capacities and the reported cost against `problem`,
    /// with an absolute tolerance `eps` scaled by the magnitude of the compared values.
    pub fn validate(&self, problem: &Problem, eps: f64) -> Result<(), Violation> {
        let flows = self.flows.as_ref().ok_or(Violation::MissingFlows)?;
        let close = |a: f64, b: f64| (a - b).abs() <= eps * (1.0 + a.abs().max(b.abs()));

        for j in problem.depot_indices() {
            let inflow = flows.depot_inflow(j);
            let outflow = flows.depot_outflow(j);
            if !close(inflow, outflow) {
                return Err(Violation::Conservation {
                    depot: j,
                    inflow,
                    outflow,
                });
            }
        }

        for k in problem.customer_indices() {
            let received = flows.customer_inflow(k);
            let demand = problem.demand(k);
            if !close(received, demand) {
                return Err(Violation::Demand {
                    customer: k,
                    received,
                    demand,
                });
            }
        }

        let plants = problem
            .plant_indices()
            .map(|i| (FacilityId::Plant(i), flows.plant_outflow(i), problem.plant(i).capacity()));
        let depots = problem
            .depot_indices()
            .map(|j| (FacilityId::Depot(j), flows.depot_outflow(j), problem.depot(j).capacity()));

        for (facility, flow, capacity) in plants.chain(depots) {
            if !self.pattern.is_open(facility) && flow > eps {
                return Err(Violation::ClosedFacilityUsed { facility, flow });
            }
            if flow > capacity && !close(flow, capacity) {
                return Err(Violation::Capacity {
                    facility,
                    flow,
                    capacity,
                });
            }
        }

        let actual = self.pattern.opening_cost(problem) + flows.transport_cost(problem);
        if !close(self.cost, actual) {
            return Err(Violation::CostMismatch {
                reported: self.cost,
                actual,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> Problem {
        Problem::from_vecs(
            vec![10.0, 10.0],
            vec![50.0, 50.0],
            vec![5.0, 5.0],
            vec![50.0, 50.0],
            vec![20.0, 20.0],
            vec![vec![1.0, 2.0], vec![2.0, 1.0]],
            vec![vec![1.0, 3.0], vec![3.0, 1.0]],
        )
        .unwrap()
    }

    fn p(i: usize) -> PlantIndex {
        i.into()
    }

    fn d(j: usize) -> DepotIndex {
        j.into()
    }

    fn c(k: usize) -> CustomerIndex {
        k.into()
    }

    #[test]
    fn pattern_equality_ignores_cost_and_flow() {
        let pattern = Pattern::new(vec![true, false], vec![false, true]);
        let a = Solution::new(10.0, pattern.clone(), None);
        let b = Solution::new(12.0, pattern, Some(Flows::zeros(&problem())));
        let c = Solution::new(10.0, Pattern::new(vec![true, true], vec![false, true]), None);
        assert!(a.same_pattern(&b));
        assert!(!a.same_pattern(&c));
    }

    #[test]
    fn fixed_set_from_pattern_covers_everything() {
        let problem = problem();
        let pattern = Pattern::new(vec![true, false], vec![false, true]);
        let fixed = FixedSet::from_pattern(&pattern);
        assert_eq!(fixed.len(), problem.facilities());
        assert!(fixed.free(&problem).is_empty());
        assert_eq!(fixed.get(FacilityId::Plant(p(0))), Some(true));
        assert_eq!(fixed.get(FacilityId::Depot(d(0))), Some(false));
        assert_eq!(fixed.plants().count(), 2);
        assert_eq!(fixed.depots().filter(|(_, open)| *open).count(), 1);
    }

    #[test]
    fn free_facilities_are_listed_plants_first() {
        let problem = problem();
        let mut fixed = FixedSet::new();
        fixed.fix(FacilityId::Plant(p(1)), true);
        assert_eq!(
            fixed.free(&problem),
            vec![
                FacilityId::Plant(p(0)),
                FacilityId::Depot(d(0)),
                FacilityId::Depot(d(1))
            ]
        );
    }

    #[test]
    fn transport_cost_sums_both_stages() {
        let problem = problem();
        let mut flows = Flows::zeros(&problem);
        flows.add_shipped(p(0), d(1), 10.0);
        flows.add_shipped(p(1), d(1), 5.0);
        flows.add_delivered(d(1), c(0), 15.0);
        // 10 * 2 + 5 * 1 first stage, 15 * 3 second stage
        assert!((flows.transport_cost(&problem) - 70.0).abs() < 1e-9);
    }

    #[test]
    fn valid_flow_passes_validation() {
        let problem = problem();
        let pattern = Pattern::new(vec![true, false], vec![true, false]);
        let mut flows = Flows::zeros(&problem);
        flows.add_shipped(p(0), d(0), 40.0);
        flows.add_delivered(d(0), c(0), 20.0);
        flows.add_delivered(d(0), c(1), 20.0);
        // 10 + 5 opening, 40 * 1 + 20 * 1 + 20 * 3 transport
        let solution = Solution::new(135.0, pattern, Some(flows));
        assert_eq!(solution.validate(&problem, 1e-6), Ok(()));
    }

    #[test]
    fn broken_flows_are_reported() {
        let problem = problem();
        let pattern = Pattern::new(vec![true, false], vec![true, false]);

        let mut flows = Flows::zeros(&problem);
        flows.add_shipped(p(0), d(0), 30.0);
        flows.add_delivered(d(0), c(0), 20.0);
        flows.add_delivered(d(0), c(1), 20.0);
        let leaking = Solution::new(125.0, pattern.clone(), Some(flows));
        assert!(matches!(
            leaking.validate(&problem, 1e-6),
            Err(Violation::Conservation { .. })
        ));

        let mut flows = Flows::zeros(&problem);
        flows.add_shipped(p(1), d(0), 40.0);
        flows.add_delivered(d(0), c(0), 20.0);
        flows.add_delivered(d(0), c(1), 20.0);
        let closed = Solution::new(155.0, pattern.clone(), Some(flows));
        assert!(matches!(
            closed.validate(&problem, 1e-6),
            Err(Violation::ClosedFacilityUsed {
                facility: FacilityId::Plant(_),
                ..
            })
        ));

        let missing = Solution::new(15.0, pattern, None);
        assert_eq!(missing.validate(&problem, 1e-6), Err(Violation::MissingFlows));
    }
}
