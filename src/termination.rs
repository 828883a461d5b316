use std::time::{Duration, Instant};

/// When to stop the fixed set search.
#[derive(Clone, Debug)]
pub enum Termination {
    /// Terminate after a given number of iterations
    Iterations(u64),
    /// Terminate if no solution has been accepted for the given number of iterations
    NoImprovement(u64),
    /// Maximum running time from `Instant`
    Timeout(Instant, Duration),
    /// Run forever
    Never,
    /// Terminate if either of the two termination criteria
    /// tells it to terminate
    Any(Box<Termination>, Box<Termination>),
    /// Terminate when both of the criteria tells it to terminate
    All(Box<Termination>, Box<Termination>),
}

impl Termination {
    /// `iteration` is the number of completed iterations, `since_improvement` the number of those since
    /// the last accepted solution.
    pub fn should_terminate(&self, iteration: u64, since_improvement: u64) -> bool {
        match self {
            Termination::Iterations(n) => iteration >= *n,
            Termination::NoImprovement(n) => since_improvement >= *n,
            Termination::Timeout(from, duration) => from.elapsed() > *duration,
            Termination::Never => false,
            Termination::Any(one, two) => {
                one.should_terminate(iteration, since_improvement)
                    || two.should_terminate(iteration, since_improvement)
            }
            Termination::All(one, two) => {
                one.should_terminate(iteration, since_improvement)
                    && two.should_terminate(iteration, since_improvement)
            }
        }
    }

    /// Stop when either `self` or `other` says so
    pub fn or(self, other: Termination) -> Termination {
        Termination::Any(Box::new(self), Box::new(other))
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Iterations(n) => write!(f, "{n} iterations"),
            Termination::NoImprovement(n) => write!(f, "{n} no-improvement"),
            Termination::Timeout(_, dur) => write!(f, "{} timeout", dur.as_secs()),
            Termination::Never => write!(f, "never"),
            Termination::Any(lhs, rhs) => write!(f, "({lhs}) | ({rhs})"),
            Termination::All(lhs, rhs) => write!(f, "({lhs}) & ({rhs})"),
        }
    }
}
