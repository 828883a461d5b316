pub mod fixed_set;
pub mod population;

use std::time::Duration;

use log::{debug, info, log, trace};
use rand::{seq::SliceRandom, Rng};

pub use fixed_set::build_fixed_set;
pub use population::Population;

use crate::{
    greedy::{self, ConstructionError},
    models::{Oracle, SolveOptions},
    problem::{Cost, Problem},
    solution::Solution,
    termination::Termination,
    utils::{progress_level, EPSILON},
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of greedy constructions in the initial population
    pub population_size: usize,
    /// Number of best solutions the base and the subsample are drawn from
    pub elite_size: usize,
    /// Upper bound on the number of facilities left free in an oracle call
    pub free_size_max: usize,
    /// Oracle time limit of the first iteration
    pub initial_time_limit: Duration,
    /// When to stop iterating
    pub termination: Termination,
    /// Candidate list size of the randomized greedy constructions
    pub candidate_list_size: usize,
    /// Number of consecutive iterations without an accepted solution before the time limit is doubled
    pub stagnation_limit: usize,
    /// Log progress at info level, and let the oracle log its own
    pub verbose: bool,
}

impl Config {
    pub fn new(
        population_size: usize,
        elite_size: usize,
        free_size_max: usize,
        initial_time_limit: Duration,
        max_iterations: u64,
    ) -> Self {
        Config {
            population_size,
            elite_size,
            free_size_max,
            initial_time_limit,
            termination: Termination::Iterations(max_iterations),
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            population_size: 10,
            elite_size: 5,
            free_size_max: 10,
            initial_time_limit: Duration::from_secs(1),
            termination: Termination::Iterations(50),
            candidate_list_size: 2,
            stagnation_limit: 5,
            verbose: false,
        }
    }
}

/// Fixed set search: repeatedly freeze the facilities the elite agrees on and let the oracle optimize
/// over the rest.
pub struct FixedSetSearch<'p, O> {
    problem: &'p Problem,
    oracle: O,
    config: Config,
    population: Population,
    best: Solution,
    /// Oracle time limit of the next iteration
    time_limit: Duration,
    /// Consecutive iterations without acceptance since the time limit was last changed
    stagnation: usize,
    /// Consecutive iterations without acceptance
    since_improvement: u64,
    iterations: u64,
    /// Best cost after initialization, then after every iteration
    history: Vec<Cost>,
}

impl<'p, O> FixedSetSearch<'p, O>
where
    O: Oracle,
{
    /// Builds the initial population from randomized greedy constructions. Constructions that repeat the
    /// pattern of an earlier one are dropped.
    pub fn new<R>(
        problem: &'p Problem,
        oracle: O,
        config: Config,
        rng: &mut R,
    ) -> Result<Self, ConstructionError>
    where
        R: Rng + ?Sized,
    {
        // We need at least one solution to have a best one, and something to draw the base from
        assert!(config.population_size > 0);
        assert!(config.elite_size > 0);
        assert!(config.stagnation_limit > 0);

        trace!("Initializing population");
        let mut population = Population::new();
        for _ in 0..config.population_size {
            let solution = greedy::construct(problem, &oracle, config.candidate_list_size, rng)?;
            debug!("initial solution with cost {}", solution.cost());
            if !population.insert(solution) {
                debug!("dropped initial solution with repeated pattern");
            }
        }

        let best = population
            .best()
            .cloned()
            .expect("population holds at least one solution");

        info!(
            "initial population of {} with best cost {}",
            population.len(),
            best.cost()
        );

        Ok(FixedSetSearch {
            problem,
            oracle,
            time_limit: config.initial_time_limit,
            config,
            population,
            history: vec![best.cost()],
            best,
            stagnation: 0,
            since_improvement: 0,
            iterations: 0,
        })
    }

    /// The best solution found so far
    pub fn best(&self) -> &Solution {
        &self.best
    }

    /// Best cost of the initial population
    pub fn initial_best(&self) -> Cost {
        self.history[0]
    }

    pub fn history(&self) -> &[Cost] {
        &self.history
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn into_best(self) -> Solution {
        self.best
    }

    /// One iteration of the search. Returns whether the oracle's solution was accepted.
    pub fn iterate<R>(&mut self, rng: &mut R) -> bool
    where
        R: Rng + ?Sized,
    {
        let fixed_size = self
            .problem
            .facilities()
            .saturating_sub(self.config.free_size_max);

        self.population.sort();
        let fixed = {
            let elite = self.population.elite(self.config.elite_size);
            let base = elite.choose(rng).expect("population is never empty");
            let k = rng.gen_range(elite.len().min(2)..=elite.len());
            let sample = elite.choose_multiple(rng, k).collect::<Vec<_>>();
            build_fixed_set(base, &sample, fixed_size, rng)
        };

        trace!("calling oracle with {} fixed facilities", fixed.len());
        let options = SolveOptions::new(Some(self.time_limit), self.config.verbose);
        let candidate = self.oracle.solve(self.problem, &fixed, &options);

        let duplicate = self.population.contains(candidate.pattern());
        let improving = candidate.cost() < self.best.cost() - EPSILON;
        let accepted = !duplicate && improving;

        let message = format!(
            "iteration {}: candidate {} ({}), best {}, time limit {:?}",
            self.iterations,
            candidate.cost(),
            match (accepted, duplicate) {
                (true, _) => "accepted",
                (false, true) => "duplicate",
                (false, false) => "rejected",
            },
            if accepted { candidate.cost() } else { self.best.cost() },
            self.time_limit
        );
        log!(progress_level(self.config.verbose), "{}", message);

        if accepted {
            self.best = candidate.clone();
            self.population.insert(candidate);
            self.stagnation = 0;
            self.since_improvement = 0;
        } else {
            self.stagnation += 1;
            self.since_improvement += 1;
        }

        if self.stagnation >= self.config.stagnation_limit {
            self.time_limit = self.time_limit.checked_mul(2).unwrap_or(Duration::MAX);
            self.stagnation = 0;
            info!("no improvement, oracle time limit raised to {:?}", self.time_limit);
        }

        self.iterations += 1;
        self.history.push(self.best.cost());
        accepted
    }

    /// Iterate until the termination criterion is met, and return the best solution found.
    pub fn run<R>(&mut self, rng: &mut R) -> &Solution
    where
        R: Rng + ?Sized,
    {
        info!("running fixed set search until {}", self.config.termination);
        while !self
            .config
            .termination
            .should_terminate(self.iterations, self.since_improvement)
        {
            self.iterate(rng);
        }

        info!(
            "fixed set search finished after {} iterations: {} -> {}",
            self.iterations,
            self.initial_best(),
            self.best.cost()
        );
        &self.best
    }
}

/// Run a fixed set search on `problem` and return the best solution found
pub fn search<O, R>(
    problem: &Problem,
    oracle: &O,
    config: &Config,
    rng: &mut R,
) -> Result<Solution, ConstructionError>
where
    O: Oracle + ?Sized,
    R: Rng + ?Sized,
{
    let mut fss = FixedSetSearch::new(problem, oracle, config.clone(), rng)?;
    fss.run(rng);
    Ok(fss.into_best())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        models::FlowOracle,
        solution::{FixedSet, Pattern},
    };

    fn problem() -> Problem {
        Problem::from_vecs(
            vec![50.0, 60.0, 40.0],
            vec![60.0, 60.0, 60.0],
            vec![20.0, 25.0, 15.0],
            vec![50.0, 50.0, 50.0],
            vec![20.0, 20.0, 20.0, 20.0],
            vec![
                vec![2.0, 5.0, 7.0],
                vec![6.0, 2.0, 4.0],
                vec![8.0, 3.0, 1.0],
            ],
            vec![
                vec![1.0, 4.0, 6.0, 9.0],
                vec![5.0, 1.0, 2.0, 6.0],
                vec![9.0, 6.0, 3.0, 1.0],
            ],
        )
        .unwrap()
    }

    /// Delegates the fully fixed calls of the greedy construction, and answers everything else with a
    /// canned solution.
    struct Stub {
        answer: Solution,
        fixings: RefCell<Vec<usize>>,
    }

    impl Stub {
        fn new(answer: Solution) -> Self {
            Stub {
                answer,
                fixings: RefCell::new(Vec::new()),
            }
        }
    }

    impl Oracle for Stub {
        fn solve(&self, problem: &Problem, fixed: &FixedSet, options: &SolveOptions) -> Solution {
            if fixed.len() == problem.facilities() {
                return FlowOracle.solve(problem, fixed, options);
            }
            self.fixings.borrow_mut().push(fixed.len());
            self.answer.clone()
        }
    }

    fn config(population_size: usize, iterations: u64) -> Config {
        Config {
            candidate_list_size: 1,
            ..Config::new(population_size, 3, 2, Duration::from_millis(10), iterations)
        }
    }

    #[test]
    fn search_never_worsens() {
        let problem = problem();
        let config = Config::new(6, 4, 3, Duration::from_secs(5), 15);
        let mut rng = StdRng::seed_from_u64(11);

        let mut fss = FixedSetSearch::new(&problem, FlowOracle, config, &mut rng).unwrap();
        fss.run(&mut rng);

        let history = fss.history();
        assert_eq!(history.len(), 16);
        assert!(history.windows(2).all(|w| w[1] <= w[0]));
        assert!(fss.best().cost() <= fss.initial_best());
        assert_eq!(fss.best().cost(), fss.population().best().unwrap().cost());
        assert_eq!(fss.best().validate(&problem, 1e-6), Ok(()));
    }

    #[test]
    fn search_returns_the_best_solution() {
        let problem = problem();
        let config = Config::new(4, 2, 2, Duration::from_secs(5), 5);

        let best = search(&problem, &FlowOracle, &config, &mut StdRng::seed_from_u64(1)).unwrap();
        let optimum = FlowOracle.solve(&problem, &FixedSet::new(), &SolveOptions::default());

        assert!(best.cost().is_finite());
        assert!(best.cost() >= optimum.cost() - 1e-6);
        assert_eq!(best.validate(&problem, 1e-6), Ok(()));
    }

    #[test]
    fn oracle_receives_exactly_the_fixed_size() {
        let problem = problem();
        let stub = Stub::new(Solution::infeasible(Pattern::closed(&problem)));
        let mut rng = StdRng::seed_from_u64(2);

        let mut fss = FixedSetSearch::new(&problem, &stub, config(4, 8), &mut rng).unwrap();
        fss.run(&mut rng);

        assert_eq!(*stub.fixings.borrow(), vec![problem.facilities() - 2; 8]);
    }

    #[test]
    fn duplicate_patterns_are_never_appended() {
        let problem = problem();
        let greedy = greedy::build_pattern(&problem, 1, &mut StdRng::seed_from_u64(0)).unwrap();
        let stub = Stub::new(Solution::new(0.0, greedy, None));
        let mut rng = StdRng::seed_from_u64(3);

        let mut fss = FixedSetSearch::new(&problem, &stub, config(1, 10), &mut rng).unwrap();
        let initial = fss.best().cost();
        fss.run(&mut rng);

        assert_eq!(fss.population().len(), 1);
        assert_eq!(fss.best().cost(), initial);
    }

    #[test]
    fn improving_new_pattern_is_accepted_once() {
        let problem = problem();
        let open = Pattern::new(vec![true; 3], vec![true; 3]);
        let stub = Stub::new(Solution::new(0.0, open.clone(), None));
        let mut rng = StdRng::seed_from_u64(4);

        let mut fss = FixedSetSearch::new(&problem, &stub, config(1, 6), &mut rng).unwrap();
        assert!(fss.iterate(&mut rng));
        assert!(!fss.iterate(&mut rng));
        fss.run(&mut rng);

        assert_eq!(fss.population().len(), 2);
        assert_eq!(fss.best().pattern(), &open);
        assert_eq!(fss.best().cost(), 0.0);
    }

    #[test]
    fn infeasible_answers_double_the_time_limit() {
        let problem = problem();
        let stub = Stub::new(Solution::infeasible(Pattern::new(vec![true; 3], vec![true; 3])));
        let mut rng = StdRng::seed_from_u64(5);

        let mut fss = FixedSetSearch::new(&problem, &stub, config(3, 12), &mut rng).unwrap();
        let initial = fss.best().cost();
        let population = fss.population().len();
        fss.run(&mut rng);

        assert_eq!(fss.time_limit(), Duration::from_millis(40));
        assert_eq!(fss.population().len(), population);
        assert!(fss.history().iter().all(|&c| c == initial));
    }

    #[test]
    fn long_stagnating_search_keeps_a_usable_time_limit() {
        // zero transport costs, so the optimum is found early and the time limit keeps doubling
        let problem = Problem::from_vecs(
            vec![10.0, 10.0],
            vec![50.0, 50.0],
            vec![5.0, 5.0],
            vec![50.0, 50.0],
            vec![20.0, 20.0, 20.0],
            vec![vec![0.0; 2]; 2],
            vec![vec![0.0; 3]; 2],
        )
        .unwrap();
        let config = Config::new(3, 2, 2, Duration::from_secs(1), 400);
        let mut rng = StdRng::seed_from_u64(0);

        let mut fss = FixedSetSearch::new(&problem, FlowOracle, config, &mut rng).unwrap();
        let best = fss.run(&mut rng);
        assert!(best.cost().is_finite());
        assert_eq!(best.validate(&problem, 1e-6), Ok(()));
        assert_eq!(fss.iterations(), 400);
        assert_eq!(fss.time_limit(), Duration::MAX);

        let config = Config::new(3, 2, 2, Duration::from_secs(1), 400);
        let best = search(&problem, &FlowOracle, &config, &mut rng).unwrap();
        assert!(best.cost().is_finite());
    }

    #[test]
    fn stops_early_without_improvement() {
        let problem = problem();
        let stub = Stub::new(Solution::infeasible(Pattern::closed(&problem)));
        let mut rng = StdRng::seed_from_u64(6);
        let config = Config {
            termination: Termination::Iterations(100).or(Termination::NoImprovement(4)),
            ..config(2, 0)
        };

        let mut fss = FixedSetSearch::new(&problem, &stub, config, &mut rng).unwrap();
        fss.run(&mut rng);
        assert_eq!(fss.iterations(), 4);
    }

    #[test]
    fn construction_errors_propagate() {
        let problem = Problem::from_vecs(
            vec![1.0],
            vec![5.0],
            vec![1.0],
            vec![50.0],
            vec![10.0],
            vec![vec![1.0]],
            vec![vec![1.0]],
        )
        .unwrap();

        let result = search(
            &problem,
            &FlowOracle,
            &Config::default(),
            &mut StdRng::seed_from_u64(0),
        );
        assert!(matches!(
            result,
            Err(ConstructionError::PlantCapacityExhausted(_))
        ));
    }

    #[test]
    #[should_panic]
    fn empty_population_is_refused() {
        let problem = problem();
        let config = Config::new(0, 1, 2, Duration::from_secs(1), 1);
        let _ = FixedSetSearch::new(&problem, FlowOracle, config, &mut StdRng::seed_from_u64(0));
    }
}
