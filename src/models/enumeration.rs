use std::time::Instant;

use log::{debug, log};

use super::{flow, Oracle, SolveOptions};
use crate::{
    problem::{Cost, Problem},
    solution::{FacilityId, FixedSet, Flows, Pattern, Solution},
    utils::{progress_level, EPSILON},
};

/// Exact oracle by depth-first branch and bound over the free facilities, with min-cost flow as the
/// transport subproblem.
///
/// The bound of a node is the opening cost of the facilities decided open plus the cheapest transport
/// when every undecided facility is available. Since opening costs are non-negative and extra facilities
/// can only make transport cheaper, this never exceeds the cost of any completion. If the relaxed flow
/// does not use any undecided facility, closing all of them is optimal for the subtree.
///
/// Intended for moderately sized free sets, such as those left by the fixed set search. Without fixings
/// the running time grows exponentially with the number of facilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowOracle;

impl FlowOracle {
    pub fn new() -> Self {
        FlowOracle
    }
}

struct BranchAndBound<'a> {
    problem: &'a Problem,
    /// The free facilities, in branching order
    free: Vec<FacilityId>,
    deadline: Option<Instant>,
    incumbent: Option<Solution>,
    nodes: usize,
    timed_out: bool,
}

impl<'a> BranchAndBound<'a> {
    fn incumbent_cost(&self) -> Cost {
        self.incumbent
            .as_ref()
            .map(|s| s.cost())
            .unwrap_or(Cost::INFINITY)
    }

    fn out_of_time(&mut self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.timed_out = true;
            }
        }
        self.timed_out
    }

    fn throughput(flows: &Flows, facility: FacilityId) -> f64 {
        match facility {
            FacilityId::Plant(i) => flows.plant_outflow(i),
            FacilityId::Depot(j) => flows.depot_outflow(j),
        }
    }

    fn improve(&mut self, cost: Cost, pattern: &Pattern, flows: Flows) {
        if cost < self.incumbent_cost() - EPSILON {
            debug!("new incumbent with cost {}", cost);
            self.incumbent = Some(Solution::new(cost, pattern.clone(), Some(flows)));
        }
    }

    /// Explore the subtree where `free[..depth]` are decided as set in `pattern`. Undecided facilities
    /// are closed in `pattern` on entry and on exit.
    fn explore(&mut self, pattern: &mut Pattern, depth: usize) {
        if self.out_of_time() {
            return;
        }
        self.nodes += 1;

        let undecided = &self.free[depth..];
        let mut relaxed = pattern.clone();
        for &f in undecided {
            relaxed.set(f, true);
        }

        let (transport, flows) = match flow::route(self.problem, &relaxed) {
            Some(routed) => routed,
            None => return,
        };

        let bound = pattern.opening_cost(self.problem) + transport;
        if bound >= self.incumbent_cost() - EPSILON {
            return;
        }

        if depth == self.free.len() {
            self.improve(bound, pattern, flows);
            return;
        }

        if undecided
            .iter()
            .all(|&f| Self::throughput(&flows, f) <= EPSILON)
        {
            // Re-route without the undecided facilities to get a flow that leaves them untouched
            if let Some((transport, flows)) = flow::route(self.problem, pattern) {
                let cost = pattern.opening_cost(self.problem) + transport;
                self.improve(cost, pattern, flows);
            }
            return;
        }

        let facility = self.free[depth];
        for open in [true, false] {
            pattern.set(facility, open);
            self.explore(pattern, depth + 1);
        }
        pattern.set(facility, false);
    }
}

impl Oracle for FlowOracle {
    fn solve(&self, problem: &Problem, fixed: &FixedSet, options: &SolveOptions) -> Solution {
        let start = Instant::now();
        // A limit too large to represent is no limit
        let deadline = options.time_limit.and_then(|limit| start.checked_add(limit));

        let mut pattern = Pattern::closed(problem);
        for (facility, open) in fixed.iter() {
            pattern.set(facility, open);
        }

        let mut search = BranchAndBound {
            problem,
            free: fixed.free(problem),
            deadline,
            incumbent: None,
            nodes: 0,
            timed_out: false,
        };

        search.explore(&mut pattern, 0);

        let message = format!(
            "branch and bound: {} free, {} nodes, cost {}, {:?}{}",
            search.free.len(),
            search.nodes,
            search.incumbent_cost(),
            start.elapsed(),
            if search.timed_out { " (time limit)" } else { "" }
        );
        log!(progress_level(options.verbose), "{}", message);

        search
            .incumbent
            .unwrap_or_else(|| Solution::infeasible(pattern))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use itertools::Itertools;

    use super::*;
    use crate::problem::{DepotIndex, PlantIndex};

    fn problem() -> Problem {
        // Plant 0 is cheap but far from depot 1, depot 1 is close to both customers.
        Problem::from_vecs(
            vec![100.0, 80.0, 60.0],
            vec![40.0, 40.0, 40.0],
            vec![30.0, 20.0, 50.0],
            vec![40.0, 50.0, 40.0],
            vec![15.0, 15.0, 20.0],
            vec![
                vec![1.0, 9.0, 4.0],
                vec![3.0, 2.0, 1.0],
                vec![6.0, 1.0, 2.0],
            ],
            vec![
                vec![2.0, 3.0, 8.0],
                vec![1.0, 1.0, 2.0],
                vec![5.0, 4.0, 1.0],
            ],
        )
        .unwrap()
    }

    /// Enumerate every pattern and route it
    fn brute_force(problem: &Problem) -> Cost {
        let n = problem.facilities();
        (0..n)
            .map(|_| [false, true])
            .multi_cartesian_product()
            .filter_map(|states| {
                let (plants, depots) = states.split_at(problem.plants().len());
                let pattern = Pattern::new(plants.to_vec(), depots.to_vec());
                flow::route(problem, &pattern)
                    .map(|(transport, _)| pattern.opening_cost(problem) + transport)
            })
            .fold(Cost::INFINITY, f64::min)
    }

    #[test]
    fn unrestricted_solve_matches_brute_force() {
        let problem = problem();
        let solution = FlowOracle.solve(&problem, &FixedSet::new(), &SolveOptions::default());
        assert!((solution.cost() - brute_force(&problem)).abs() < 1e-6);
        assert_eq!(solution.validate(&problem, 1e-6), Ok(()));
    }

    #[test]
    fn fixed_facilities_keep_their_state() {
        let problem = problem();
        let mut fixed = FixedSet::new();
        fixed.fix(FacilityId::Plant(PlantIndex::from(0)), true);
        fixed.fix(FacilityId::Depot(DepotIndex::from(1)), false);

        let solution = FlowOracle.solve(&problem, &fixed, &SolveOptions::default());
        assert!(solution.is_feasible());
        assert!(solution.pattern().plant(PlantIndex::from(0)));
        assert!(!solution.pattern().depot(DepotIndex::from(1)));
        assert_eq!(solution.validate(&problem, 1e-6), Ok(()));
    }

    #[test]
    fn fully_fixed_pattern_is_only_routed() {
        let problem = problem();
        let pattern = Pattern::new(vec![true, true, false], vec![false, true, true]);
        let solution = FlowOracle.solve(
            &problem,
            &FixedSet::from_pattern(&pattern),
            &SolveOptions::default(),
        );
        let (transport, _) = flow::route(&problem, &pattern).unwrap();
        assert_eq!(solution.pattern(), &pattern);
        assert!((solution.cost() - pattern.opening_cost(&problem) - transport).abs() < 1e-9);
    }

    #[test]
    fn infeasible_fixings_give_infinite_cost() {
        let problem = problem();
        let pattern = Pattern::new(vec![true, false, false], vec![true, true, true]);
        let solution = FlowOracle.solve(
            &problem,
            &FixedSet::from_pattern(&pattern),
            &SolveOptions::new(Some(Duration::from_secs(1)), false),
        );
        assert!(!solution.is_feasible());
        assert_eq!(solution.pattern(), &pattern);
    }

    #[test]
    fn expired_time_limit_returns_sentinel() {
        let problem = problem();
        let solution = FlowOracle.solve(
            &problem,
            &FixedSet::new(),
            &SolveOptions::new(Some(Duration::ZERO), false),
        );
        assert!(!solution.is_feasible());
        assert_eq!(solution.pattern(), &Pattern::closed(&problem));
    }

    #[test]
    fn unrepresentable_time_limit_means_no_limit() {
        let problem = problem();
        let solution = FlowOracle.solve(
            &problem,
            &FixedSet::new(),
            &SolveOptions::new(Some(Duration::MAX), false),
        );
        assert!((solution.cost() - brute_force(&problem)).abs() < 1e-6);
    }
}
