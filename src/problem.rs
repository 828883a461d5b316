use derive_more::{Deref, Display, From, Into};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use typed_index_collections::TiVec;

/// The type used for quantities of goods (capacity, demand, flow)
pub type Quantity = f64;
/// The type used for cost.
pub type Cost = f64;

#[derive(Deref, Debug, Display, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct PlantIndex(usize);

#[derive(Deref, Debug, Display, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct DepotIndex(usize);

#[derive(Deref, Debug, Display, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct CustomerIndex(usize);

/// A facility with an opening cost and a throughput capacity. Used both for plants (primary facilities)
/// and depots (secondary facilities).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Facility {
    /// The fixed cost of opening the facility
    opening_cost: Cost,
    /// The maximum amount that can leave the facility
    capacity: Quantity,
}

impl Facility {
    pub fn new(opening_cost: Cost, capacity: Quantity) -> Self {
        Facility {
            opening_cost,
            capacity,
        }
    }

    /// The fixed cost of opening the facility
    pub fn opening_cost(&self) -> Cost {
        self.opening_cost
    }

    /// The maximum amount that can leave the facility
    pub fn capacity(&self) -> Quantity {
        self.capacity
    }

    /// Opening cost per unit of capacity
    pub fn unit_opening_cost(&self) -> Cost {
        self.opening_cost / (self.capacity + 1e-9)
    }
}

/// A two-stage capacitated facility location problem.
///
/// Goods flow from plants, through depots, to customers. The index sets are dense and derived from the
/// lengths of the facility and customer vectors.
#[derive(Debug, Clone)]
pub struct Problem {
    /// The primary facilities, ordered by index
    plants: TiVec<PlantIndex, Facility>,
    /// The secondary facilities, ordered by index
    depots: TiVec<DepotIndex, Facility>,
    /// Demand of each customer
    demands: TiVec<CustomerIndex, Quantity>,
    /// Unit transport cost from plant i to depot j, shape (plants, depots)
    plant_depot: Array2<Cost>,
    /// Unit transport cost from depot j to customer k, shape (depots, customers)
    depot_customer: Array2<Cost>,
}

#[derive(Debug, Display, PartialEq)]
pub enum ProblemConstructionError {
    /// The size of a cost matrix is not as expected
    #[display(
        fmt = "{} cost matrix has shape {:?}, expected {:?}",
        matrix,
        actual,
        expected
    )]
    MatrixShapeMismatch {
        matrix: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    /// A row of a nested cost matrix has the wrong length
    #[display(fmt = "row {} of the {} cost matrix is ragged", row, matrix)]
    RaggedMatrix { matrix: &'static str, row: usize },
    /// A cost, capacity or demand is negative, NaN or infinite
    #[display(fmt = "{} {} is not a non-negative finite number ({})", what, index, value)]
    InvalidValue {
        what: &'static str,
        index: usize,
        value: f64,
    },
    /// Facilities must be able to carry something
    #[display(fmt = "{} {} has non-positive capacity {}", what, index, value)]
    NonPositiveCapacity {
        what: &'static str,
        index: usize,
        value: f64,
    },
}

impl std::error::Error for ProblemConstructionError {}

fn check_value(what: &'static str, index: usize, value: f64) -> Result<(), ProblemConstructionError> {
    match value.is_finite() && value >= 0.0 {
        true => Ok(()),
        false => Err(ProblemConstructionError::InvalidValue { what, index, value }),
    }
}

fn check_facilities(what: &'static str, facilities: &[Facility]) -> Result<(), ProblemConstructionError> {
    for (index, facility) in facilities.iter().enumerate() {
        check_value(what, index, facility.opening_cost)?;
        check_value(what, index, facility.capacity)?;
        if facility.capacity <= 0.0 {
            return Err(ProblemConstructionError::NonPositiveCapacity {
                what,
                index,
                value: facility.capacity,
            });
        }
    }
    Ok(())
}

fn to_matrix(
    matrix: &'static str,
    rows: Vec<Vec<Cost>>,
    expected: (usize, usize),
) -> Result<Array2<Cost>, ProblemConstructionError> {
    if rows.len() != expected.0 {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        return Err(ProblemConstructionError::MatrixShapeMismatch {
            matrix,
            expected,
            actual: (rows.len(), width),
        });
    }

    if let Some(row) = rows.iter().position(|r| r.len() != expected.1) {
        return Err(ProblemConstructionError::RaggedMatrix { matrix, row });
    }

    let flat = rows.into_iter().flatten().collect::<Vec<_>>();
    Array2::from_shape_vec(expected, flat).map_err(|_| ProblemConstructionError::MatrixShapeMismatch {
        matrix,
        expected,
        actual: expected,
    })
}

impl Problem {
    pub fn new(
        plants: Vec<Facility>,
        depots: Vec<Facility>,
        demands: Vec<Quantity>,
        plant_depot: Array2<Cost>,
        depot_customer: Array2<Cost>,
    ) -> Result<Problem, ProblemConstructionError> {
        check_facilities("plant", &plants)?;
        check_facilities("depot", &depots)?;
        for (k, &demand) in demands.iter().enumerate() {
            check_value("customer demand", k, demand)?;
        }

        let expected = (plants.len(), depots.len());
        if plant_depot.dim() != expected {
            return Err(ProblemConstructionError::MatrixShapeMismatch {
                matrix: "plant-depot",
                expected,
                actual: plant_depot.dim(),
            });
        }
        let expected = (depots.len(), demands.len());
        if depot_customer.dim() != expected {
            return Err(ProblemConstructionError::MatrixShapeMismatch {
                matrix: "depot-customer",
                expected,
                actual: depot_customer.dim(),
            });
        }

        for ((_, j), &c) in plant_depot.indexed_iter() {
            check_value("plant-depot cost", j, c)?;
        }
        for ((_, k), &d) in depot_customer.indexed_iter() {
            check_value("depot-customer cost", k, d)?;
        }

        Ok(Problem {
            plants: plants.into(),
            depots: depots.into(),
            demands: demands.into(),
            plant_depot,
            depot_customer,
        })
    }

    /// Construct a problem from plain vectors, in the `f, U, g, V, D, c, d` notation of the TSCFLP.
    #[allow(non_snake_case)]
    pub fn from_vecs(
        f: Vec<Cost>,
        U: Vec<Quantity>,
        g: Vec<Cost>,
        V: Vec<Quantity>,
        D: Vec<Quantity>,
        c: Vec<Vec<Cost>>,
        d: Vec<Vec<Cost>>,
    ) -> Result<Problem, ProblemConstructionError> {
        if f.len() != U.len() {
            return Err(ProblemConstructionError::MatrixShapeMismatch {
                matrix: "plant opening cost/capacity",
                expected: (f.len(), 1),
                actual: (U.len(), 1),
            });
        }
        if g.len() != V.len() {
            return Err(ProblemConstructionError::MatrixShapeMismatch {
                matrix: "depot opening cost/capacity",
                expected: (g.len(), 1),
                actual: (V.len(), 1),
            });
        }

        let c = to_matrix("plant-depot", c, (f.len(), g.len()))?;
        let d = to_matrix("depot-customer", d, (g.len(), D.len()))?;

        let plants = f.into_iter().zip(U).map(|(f, u)| Facility::new(f, u)).collect();
        let depots = g.into_iter().zip(V).map(|(g, v)| Facility::new(g, v)).collect();

        Problem::new(plants, depots, D, c, d)
    }

    /// The plants of the problem, ordered by index (continuous, starting at 0)
    pub fn plants(&self) -> &TiVec<PlantIndex, Facility> {
        &self.plants
    }

    /// The depots of the problem, ordered by index (continuous, starting at 0)
    pub fn depots(&self) -> &TiVec<DepotIndex, Facility> {
        &self.depots
    }

    /// The demand of every customer, ordered by index (continuous, starting at 0)
    pub fn demands(&self) -> &TiVec<CustomerIndex, Quantity> {
        &self.demands
    }

    pub fn plant(&self, i: PlantIndex) -> &Facility {
        &self.plants[i]
    }

    pub fn depot(&self, j: DepotIndex) -> &Facility {
        &self.depots[j]
    }

    pub fn demand(&self, k: CustomerIndex) -> Quantity {
        self.demands[k]
    }

    /// Number of plants and depots combined
    pub fn facilities(&self) -> usize {
        self.plants.len() + self.depots.len()
    }

    pub fn customers(&self) -> usize {
        self.demands.len()
    }

    pub fn total_demand(&self) -> Quantity {
        self.demands.iter().sum()
    }

    /// Unit transport cost from plant `i` to depot `j`
    pub fn plant_depot_cost(&self, i: PlantIndex, j: DepotIndex) -> Cost {
        self.plant_depot[[*i, *j]]
    }

    /// Unit transport cost from depot `j` to customer `k`
    pub fn depot_customer_cost(&self, j: DepotIndex, k: CustomerIndex) -> Cost {
        self.depot_customer[[*j, *k]]
    }

    pub fn plant_indices(&self) -> impl Iterator<Item = PlantIndex> + Clone {
        (0..self.plants.len()).map(PlantIndex::from)
    }

    pub fn depot_indices(&self) -> impl Iterator<Item = DepotIndex> + Clone {
        (0..self.depots.len()).map(DepotIndex::from)
    }

    pub fn customer_indices(&self) -> impl Iterator<Item = CustomerIndex> + Clone {
        (0..self.demands.len()).map(CustomerIndex::from)
    }
}

/// The serialized form of a problem, in the usual `f, U, g, V, D, c, d` notation.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProblem {
    pub f: Vec<Cost>,
    pub U: Vec<Quantity>,
    pub g: Vec<Cost>,
    pub V: Vec<Quantity>,
    pub D: Vec<Quantity>,
    pub c: Vec<Vec<Cost>>,
    pub d: Vec<Vec<Cost>>,
}

impl TryFrom<RawProblem> for Problem {
    type Error = ProblemConstructionError;

    fn try_from(raw: RawProblem) -> Result<Self, Self::Error> {
        Problem::from_vecs(raw.f, raw.U, raw.g, raw.V, raw.D, raw.c, raw.d)
    }
}

impl From<&Problem> for RawProblem {
    fn from(problem: &Problem) -> Self {
        RawProblem {
            f: problem.plants.iter().map(|p| p.opening_cost).collect(),
            U: problem.plants.iter().map(|p| p.capacity).collect(),
            g: problem.depots.iter().map(|p| p.opening_cost).collect(),
            V: problem.depots.iter().map(|p| p.capacity).collect(),
            D: problem.demands.iter().copied().collect(),
            c: problem.plant_depot.outer_iter().map(|r| r.to_vec()).collect(),
            d: problem.depot_customer.outer_iter().map(|r| r.to_vec()).collect(),
        }
    }
}
