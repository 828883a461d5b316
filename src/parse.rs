//! Reading problem instances.
//!
//! Two formats are understood. The JSON form is the serialized [RawProblem] and is taken as-is. The text
//! form lists sizes, opening costs, capacities and 1-D coordinates:
//!
//! ```text
//! I J K
//! f_0        (I lines)
//! g_0        (J lines)
//! U_0        (I lines)
//! V_0 x_0    (J lines, the coordinate is optional)
//! D_0 x_0    (K lines, the coordinate is optional)
//! ```
//!
//! Text instances get their capacities scaled up until they cover 110% of the total demand, and plants,
//! which have no coordinates, are placed uniformly at random between the outermost depots and customers.
//! Transport costs are the distances between coordinates.

use std::{
    io::{BufReader, Read},
    num::ParseFloatError,
    path::Path,
};

use derive_more::{Display, From};
use log::{debug, info};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::problem::{Cost, Problem, ProblemConstructionError, Quantity, RawProblem};

/// Seed of the plant placement in text instances, so that a file always yields the same problem.
pub const PLACEMENT_SEED: u64 = 42;

#[derive(Debug, Display, From)]
pub enum ParseError {
    #[display(fmt = "could not read instance: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "invalid JSON instance: {}", _0)]
    Json(serde_json::Error),
    #[display(fmt = "line {}: expected a header `I J K`", _0)]
    #[from(ignore)]
    BadHeader(usize),
    #[display(fmt = "unexpected end of file, expected {}", _0)]
    #[from(ignore)]
    MissingLine(&'static str),
    #[display(fmt = "line {}: {}", line, source)]
    #[from(ignore)]
    BadNumber {
        line: usize,
        source: ParseFloatError,
    },
    #[display(fmt = "invalid instance: {}", _0)]
    Problem(ProblemConstructionError),
}

impl std::error::Error for ParseError {}

/// Read an instance from `path`. Files ending in `.json` are read as JSON, anything else as text.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Problem, ParseError> {
    let path = path.as_ref();
    debug!("reading instance from {}", path.display());

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => read_json(BufReader::new(std::fs::File::open(path)?)),
        _ => read_text(&std::fs::read_to_string(path)?),
    }
}

pub fn read_json<R: Read>(reader: R) -> Result<Problem, ParseError> {
    let raw: RawProblem = serde_json::from_reader(reader)?;
    Ok(Problem::try_from(raw)?)
}

/// The non-blank lines of a text instance, with their 1-based line numbers
struct Lines<'a> {
    inner: Box<dyn Iterator<Item = (usize, &'a str)> + 'a>,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        Lines {
            inner: Box::new(
                text.lines()
                    .enumerate()
                    .map(|(n, line)| (n + 1, line.trim()))
                    .filter(|(_, line)| !line.is_empty()),
            ),
        }
    }

    fn next(&mut self, what: &'static str) -> Result<(usize, &'a str), ParseError> {
        self.inner.next().ok_or(ParseError::MissingLine(what))
    }

    /// Reads `n` lines of numbers. The first number of each line is required, the second defaults to 0.
    fn numbers(&mut self, n: usize, what: &'static str) -> Result<Vec<(f64, f64)>, ParseError> {
        (0..n)
            .map(|_| -> Result<(f64, f64), ParseError> {
                let (line, text) = self.next(what)?;
                let mut fields = text
                    .split_ascii_whitespace()
                    .map(|s| s.parse::<f64>().map_err(|source| ParseError::BadNumber { line, source }));

                let first = fields.next().ok_or(ParseError::MissingLine(what))??;
                let second = fields.next().transpose()?.unwrap_or(0.0);
                Ok((first, second))
            })
            .collect()
    }

    fn values(&mut self, n: usize, what: &'static str) -> Result<Vec<f64>, ParseError> {
        Ok(self.numbers(n, what)?.into_iter().map(|(v, _)| v).collect())
    }
}

fn header(lines: &mut Lines) -> Result<(usize, usize, usize), ParseError> {
    let (line, text) = lines.next("header")?;
    let sizes = text
        .split_ascii_whitespace()
        .map(|s| s.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ParseError::BadHeader(line))?;

    match sizes[..] {
        [i, j, k] => Ok((i, j, k)),
        _ => Err(ParseError::BadHeader(line)),
    }
}

/// Scale `capacities` up so that they sum to at least 110% of `demand`. Returns the factor used.
pub fn scale_capacities(capacities: &mut [Quantity], demand: Quantity) -> f64 {
    let total: Quantity = capacities.iter().sum();
    if total <= 0.0 {
        return 1.0;
    }

    let scale = (demand / total * 1.1).max(1.0);
    for capacity in capacities.iter_mut() {
        *capacity *= scale;
    }
    scale
}

fn distances(from: &[f64], to: &[f64]) -> Vec<Vec<Cost>> {
    from.iter()
        .map(|a| to.iter().map(|b| (a - b).abs()).collect())
        .collect()
}

#[allow(non_snake_case)]
pub fn read_text(text: &str) -> Result<Problem, ParseError> {
    let mut lines = Lines::new(text);
    let (I, J, K) = header(&mut lines)?;

    let f = lines.values(I, "plant opening cost")?;
    let g = lines.values(J, "depot opening cost")?;
    let mut U = lines.values(I, "plant capacity")?;
    let (mut V, depot_x): (Vec<_>, Vec<_>) = lines.numbers(J, "depot capacity")?.into_iter().unzip();
    let (D, customer_x): (Vec<_>, Vec<_>) = lines.numbers(K, "customer demand")?.into_iter().unzip();

    let demand: Quantity = D.iter().sum();
    let u_scale = scale_capacities(&mut U, demand);
    let v_scale = scale_capacities(&mut V, demand);
    info!("capacities scaled by {:.1} (plants) and {:.1} (depots)", u_scale, v_scale);

    let (lo, hi) = depot_x
        .iter()
        .chain(&customer_x)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (0.0, 0.0) };

    let mut rng = StdRng::seed_from_u64(PLACEMENT_SEED);
    let plant_x = (0..I).map(|_| rng.gen_range(lo..=hi)).collect::<Vec<_>>();

    let c = distances(&plant_x, &depot_x);
    let d = distances(&depot_x, &customer_x);

    Ok(Problem::from_vecs(f, U, g, V, D, c, d)?)
}
