use std::collections::HashSet;

use float_ord::FloatOrd;

use crate::solution::{Pattern, Solution};

/// Solutions with pairwise distinct patterns. Grows by insertion, never shrinks.
#[derive(Debug, Clone, Default)]
pub struct Population {
    solutions: Vec<Solution>,
    patterns: HashSet<Pattern>,
}

impl Population {
    pub fn new() -> Self {
        Population::default()
    }

    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    /// Whether some member has exactly this pattern
    pub fn contains(&self, pattern: &Pattern) -> bool {
        self.patterns.contains(pattern)
    }

    /// Appends `solution` unless its pattern is already present. Returns whether it was added.
    pub fn insert(&mut self, solution: Solution) -> bool {
        if !self.patterns.insert(solution.pattern().clone()) {
            return false;
        }
        self.solutions.push(solution);
        true
    }

    /// Sort ascending by cost. Equal costs keep their insertion order.
    pub fn sort(&mut self) {
        self.solutions.sort_by_key(|s| FloatOrd(s.cost()));
    }

    /// The first `n` members, which are the `n` best after a call to `sort`
    pub fn elite(&self, n: usize) -> &[Solution] {
        &self.solutions[..n.min(self.solutions.len())]
    }

    pub fn best(&self) -> Option<&Solution> {
        self.solutions.iter().min_by_key(|s| FloatOrd(s.cost()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Solution> {
        self.solutions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solution(cost: f64, plants: [bool; 2]) -> Solution {
        Solution::new(cost, Pattern::new(plants.to_vec(), vec![true]), None)
    }

    #[test]
    fn duplicate_patterns_are_refused() {
        let mut population = Population::new();
        assert!(population.insert(solution(10.0, [true, false])));
        assert!(!population.insert(solution(1.0, [true, false])));
        assert!(population.insert(solution(5.0, [false, true])));
        assert_eq!(population.len(), 2);
        assert_eq!(population.best().unwrap().cost(), 5.0);
    }

    #[test]
    fn elite_is_the_cheapest_after_sorting() {
        let mut population = Population::new();
        population.insert(solution(10.0, [true, false]));
        population.insert(solution(f64::INFINITY, [false, false]));
        population.insert(solution(5.0, [false, true]));
        population.insert(solution(7.0, [true, true]));
        population.sort();

        let costs = population.elite(2).iter().map(|s| s.cost()).collect::<Vec<_>>();
        assert_eq!(costs, vec![5.0, 7.0]);
        assert_eq!(population.elite(10).len(), 4);
        assert!(population.iter().last().unwrap().cost().is_infinite());
    }
}
