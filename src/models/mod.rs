pub mod enumeration;
pub mod flow;
#[cfg(feature = "gurobi")]
pub mod tscflp;

use std::time::Duration;

pub use enumeration::FlowOracle;
#[cfg(feature = "gurobi")]
pub use tscflp::GurobiOracle;

use crate::{
    problem::Problem,
    solution::{FixedSet, Solution},
};

/// Options for a single oracle call
#[derive(Debug, Clone, Default)]
pub struct SolveOptions {
    /// Wall clock budget of the call. `None` means no limit.
    pub time_limit: Option<Duration>,
    /// Whether the solver should log its progress. Has no effect on the returned solution.
    pub verbose: bool,
}

impl SolveOptions {
    pub fn new(time_limit: Option<Duration>, verbose: bool) -> Self {
        SolveOptions {
            time_limit,
            verbose,
        }
    }
}

/// An exact solver for the TSCFLP with some facilities forced open or closed.
pub trait Oracle {
    /// Returns the best solution found under the fixings in `fixed`. The returned pattern covers every
    /// facility, and fixed facilities keep their forced state. If no feasible solution is found (the
    /// fixings make the problem infeasible, or time ran out) the cost is infinite.
    fn solve(&self, problem: &Problem, fixed: &FixedSet, options: &SolveOptions) -> Solution;
}

impl<O> Oracle for &O
where
    O: Oracle + ?Sized,
{
    fn solve(&self, problem: &Problem, fixed: &FixedSet, options: &SolveOptions) -> Solution {
        O::solve(self, problem, fixed, options)
    }
}

impl<O> Oracle for Box<O>
where
    O: Oracle + ?Sized,
{
    fn solve(&self, problem: &Problem, fixed: &FixedSet, options: &SolveOptions) -> Solution {
        O::solve(self, problem, fixed, options)
    }
}
