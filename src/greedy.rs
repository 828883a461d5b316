use std::collections::BTreeSet;

use derive_more::Display;
use log::{debug, trace};
use rand::Rng;
use typed_index_collections::TiVec;

use crate::{
    models::{Oracle, SolveOptions},
    problem::{CustomerIndex, DepotIndex, PlantIndex, Problem, Quantity},
    solution::{FacilityId, FixedSet, Pattern, Solution},
    utils::{choose_with_rcl, mean, EPSILON},
};

/// The greedy construction ran out of facilities before all demand was placed. Signals a mis-scaled or
/// infeasible problem.
#[derive(Debug, Display, Clone, PartialEq)]
pub enum ConstructionError {
    #[display(fmt = "no plant has capacity left while {} units of demand are unmet", _0)]
    PlantCapacityExhausted(Quantity),
    #[display(fmt = "no depot has capacity left while {} units from plant {} are unrouted", _1, _0)]
    DepotCapacityExhausted(PlantIndex, Quantity),
}

impl std::error::Error for ConstructionError {}

/// Remaining capacities and demands during a single construction.
struct Residual {
    plants: TiVec<PlantIndex, Quantity>,
    depots: TiVec<DepotIndex, Quantity>,
    demands: TiVec<CustomerIndex, Quantity>,
    /// Customers whose demand is not yet covered
    unmet: BTreeSet<CustomerIndex>,
    /// Total demand that is not yet assigned a plant
    total: Quantity,
    pattern: Pattern,
}

impl Residual {
    fn new(problem: &Problem) -> Self {
        Residual {
            plants: problem.plants().iter().map(|p| p.capacity()).collect(),
            depots: problem.depots().iter().map(|d| d.capacity()).collect(),
            demands: problem.demands().iter().copied().collect(),
            unmet: problem
                .customer_indices()
                .filter(|&k| problem.demand(k) > 0.0)
                .collect(),
            total: problem.total_demand(),
            pattern: Pattern::closed(problem),
        }
    }

    fn available_depots(&self) -> impl Iterator<Item = DepotIndex> + '_ {
        (0..self.depots.len())
            .map(DepotIndex::from)
            .filter(|&j| self.depots[j] > EPSILON)
    }
}

/// Greedily build a facility pattern, then let `oracle` find the optimal flow for it.
///
/// Plants are chosen by opening cost per unit of capacity plus their mean transport cost to the depots
/// that still have capacity. Every unit a plant commits is routed through depots, chosen by transport
/// cost from the plant, opening cost per unit of capacity and mean transport cost to unserved customers.
/// Every unit a depot receives goes to the nearest customers with unmet demand. Each choice is made with
/// a restricted candidate list of size `candidate_list_size`, so `1` gives the pure greedy pattern.
///
/// The oracle is called once, with every facility fixed, and its cost is the one reported.
pub fn construct<O, R>(
    problem: &Problem,
    oracle: &O,
    candidate_list_size: usize,
    rng: &mut R,
) -> Result<Solution, ConstructionError>
where
    O: Oracle + ?Sized,
    R: Rng + ?Sized,
{
    let pattern = build_pattern(problem, candidate_list_size, rng)?;
    debug!(
        "greedy pattern opens {} plants and {} depots",
        pattern.open_plants(),
        pattern.open_depots()
    );

    let fixed = FixedSet::from_pattern(&pattern);
    Ok(oracle.solve(problem, &fixed, &SolveOptions::default()))
}

/// The facility pattern of the greedy construction, without solving for the flow.
pub fn build_pattern<R>(
    problem: &Problem,
    candidate_list_size: usize,
    rng: &mut R,
) -> Result<Pattern, ConstructionError>
where
    R: Rng + ?Sized,
{
    let mut state = Residual::new(problem);
    let mut scores = Vec::new();

    while state.total > EPSILON {
        // Select a plant
        scores.clear();
        for i in problem.plant_indices().filter(|&i| state.plants[i] > EPSILON) {
            let transport = mean(state.available_depots().map(|j| problem.plant_depot_cost(i, j)));
            scores.push((i, problem.plant(i).unit_opening_cost() + transport));
        }

        let i = choose_with_rcl(&mut scores, candidate_list_size, rng)
            .ok_or(ConstructionError::PlantCapacityExhausted(state.total))?;
        state.pattern.set(FacilityId::Plant(i), true);

        let supply = state.total.min(state.plants[i]);
        state.plants[i] -= supply;
        state.total -= supply;
        trace!("plant {} commits {}", i, supply);

        route_supply(problem, &mut state, i, supply, candidate_list_size, rng)?;
    }

    Ok(state.pattern)
}

/// Route `supply` units from plant `i` through depots to customers.
fn route_supply<R>(
    problem: &Problem,
    state: &mut Residual,
    i: PlantIndex,
    mut supply: Quantity,
    candidate_list_size: usize,
    rng: &mut R,
) -> Result<(), ConstructionError>
where
    R: Rng + ?Sized,
{
    let mut scores = Vec::new();

    while supply > EPSILON {
        scores.clear();
        for j in state.available_depots() {
            let delivery = mean(state.unmet.iter().map(|&k| problem.depot_customer_cost(j, k)));
            let score =
                problem.plant_depot_cost(i, j) + problem.depot(j).unit_opening_cost() + delivery;
            scores.push((j, score));
        }

        let j = choose_with_rcl(&mut scores, candidate_list_size, rng)
            .ok_or(ConstructionError::DepotCapacityExhausted(i, supply))?;
        state.pattern.set(FacilityId::Depot(j), true);

        let inflow = supply.min(state.depots[j]);
        state.depots[j] -= inflow;
        supply -= inflow;
        trace!("depot {} receives {} from plant {}", j, inflow, i);

        assign_customers(problem, state, j, inflow, candidate_list_size, rng);
    }

    Ok(())
}

/// Deliver `inflow` units from depot `j` to the customers with unmet demand.
fn assign_customers<R>(
    problem: &Problem,
    state: &mut Residual,
    j: DepotIndex,
    mut inflow: Quantity,
    candidate_list_size: usize,
    rng: &mut R,
) where
    R: Rng + ?Sized,
{
    let mut scores = Vec::new();

    while inflow > EPSILON {
        scores.clear();
        scores.extend(
            state
                .unmet
                .iter()
                .filter(|&&k| state.demands[k] > EPSILON)
                .map(|&k| (k, problem.depot_customer_cost(j, k))),
        );

        let k = match choose_with_rcl(&mut scores, candidate_list_size, rng) {
            Some(k) => k,
            None => break,
        };

        let amount = inflow.min(state.demands[k]);
        state.demands[k] -= amount;
        inflow -= amount;
        trace!("customer {} receives {} from depot {}", k, amount, j);

        if state.demands[k] <= EPSILON {
            state.unmet.remove(&k);
        }
    }
}
