use float_ord::FloatOrd;
use log::Level;
use rand::Rng;

/// Quantities below this are considered zero
pub const EPSILON: f64 = 1e-6;

/// Level of progress messages: `Info` when the caller asked for verbose output, `Debug` otherwise
pub fn progress_level(verbose: bool) -> Level {
    match verbose {
        true => Level::Info,
        false => Level::Debug,
    }
}

/// Restricted candidate list selection: rank the candidates by ascending score, keep the best `size` of
/// them and choose one of those uniformly at random.
///
/// With `size == 1` this is a pure greedy choice and the random source is left untouched. Ties keep the
/// order of `candidates`. Returns `None` if there are no candidates.
pub fn choose_with_rcl<T, R>(candidates: &mut Vec<(T, f64)>, size: usize, rng: &mut R) -> Option<T>
where
    T: Copy,
    R: Rng + ?Sized,
{
    if candidates.is_empty() {
        return None;
    }

    candidates.sort_by_key(|&(_, score)| FloatOrd(score));
    let len = size.clamp(1, candidates.len());

    let chosen = match len {
        1 => 0,
        _ => rng.gen_range(0..len),
    };

    Some(candidates[chosen].0)
}

/// Arithmetic mean, or `0.0` for an empty iterator
pub fn mean<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), x| (sum + x, count + 1));
    match count {
        0 => 0.0,
        n => sum / n as f64,
    }
}
