use grb::prelude::*;
use itertools::iproduct;
use log::{debug, error, log};

use super::{Oracle, SolveOptions};
use crate::{
    problem::{CustomerIndex, DepotIndex, Problem},
    solution::{FixedSet, Flows, Pattern, Solution},
    utils::progress_level,
};

/// The TSCFLP as a mixed integer program, solved with Gurobi.
#[derive(Debug, Clone, Copy, Default)]
pub struct GurobiOracle;

pub struct Variables {
    /// 1 if plant i is open
    x: Vec<Var>,
    /// 1 if depot j is open
    y: Vec<Var>,
    /// quantity shipped from plant i to depot j
    w: Vec<Vec<Var>>,
    /// quantity delivered from depot j to customer k
    z: Vec<Vec<Var>>,
}

fn add_vars(model: &mut Model, name: &str, n: usize, vtype: VarType) -> grb::Result<Vec<Var>> {
    let ub = match vtype {
        VarType::Binary => 1.0,
        _ => f64::INFINITY,
    };
    (0..n)
        .map(|i| model.add_var(&format!("{name}_{i}"), vtype, 0.0, 0.0, ub, std::iter::empty()))
        .collect()
}

fn values(model: &Model, vars: &[Var]) -> grb::Result<Vec<f64>> {
    vars.iter().map(|v| model.get_obj_attr(attr::X, v)).collect()
}

#[allow(non_snake_case)]
impl GurobiOracle {
    /// builds the TSCFLP model with the facilities in `fixed` forced to their state
    pub fn build(
        problem: &Problem,
        fixed: &FixedSet,
        options: &SolveOptions,
    ) -> grb::Result<(Model, Variables)> {
        debug!("Building TSCFLP model with {} fixed facilities", fixed.len());

        let mut model = Model::new("tscflp")?;
        model.set_param(param::OutputFlag, options.verbose as i32)?;
        if let Some(limit) = options.time_limit {
            model.set_param(param::TimeLimit, limit.as_secs_f64())?;
        }

        let I = problem.plants().len();
        let J = problem.depots().len();
        let K = problem.customers();

        //*************CREATE VARIABLES*************//
        let x = add_vars(&mut model, "x", I, VarType::Binary)?;
        let y = add_vars(&mut model, "y", J, VarType::Binary)?;
        let w = (0..I)
            .map(|i| add_vars(&mut model, &format!("w_{i}"), J, VarType::Continuous))
            .collect::<grb::Result<Vec<_>>>()?;
        let z = (0..J)
            .map(|j| add_vars(&mut model, &format!("z_{j}"), K, VarType::Continuous))
            .collect::<grb::Result<Vec<_>>>()?;

        model.update()?;

        // ******************** ADD CONSTRAINTS ********************
        // a plant ships at most its capacity, and nothing if closed
        for i in problem.plant_indices() {
            let lhs = (0..J).map(|j| w[*i][j]).grb_sum();
            let rhs = problem.plant(i).capacity() * x[*i];
            model.add_constr(&format!("plant_capacity_{i}"), c!(lhs <= rhs))?;
        }

        // a depot delivers at most its capacity, and nothing if closed
        for j in problem.depot_indices() {
            let lhs = (0..K).map(|k| z[*j][k]).grb_sum();
            let rhs = problem.depot(j).capacity() * y[*j];
            model.add_constr(&format!("depot_capacity_{j}"), c!(lhs <= rhs))?;
        }

        // everything that enters a depot leaves it
        for j in problem.depot_indices() {
            let inflow = (0..I).map(|i| w[i][*j]).grb_sum();
            let outflow = (0..K).map(|k| z[*j][k]).grb_sum();
            model.add_constr(&format!("conservation_{j}"), c!(inflow == outflow))?;
        }

        // every customer receives exactly its demand
        for k in problem.customer_indices() {
            let lhs = (0..J).map(|j| z[j][*k]).grb_sum();
            model.add_constr(&format!("demand_{k}"), c!(lhs == problem.demand(k)))?;
        }

        for (i, open) in fixed.plants() {
            let value = if open { 1.0 } else { 0.0 };
            model.add_constr(&format!("fixed_x_{i}"), c!(x[*i] == value))?;
        }
        for (j, open) in fixed.depots() {
            let value = if open { 1.0 } else { 0.0 };
            model.add_constr(&format!("fixed_y_{j}"), c!(y[*j] == value))?;
        }

        let opening = problem
            .plant_indices()
            .map(|i| problem.plant(i).opening_cost() * x[*i])
            .chain(
                problem
                    .depot_indices()
                    .map(|j| problem.depot(j).opening_cost() * y[*j]),
            )
            .grb_sum();

        let first_stage = iproduct!(problem.plant_indices(), problem.depot_indices())
            .map(|(i, j)| problem.plant_depot_cost(i, j) * w[*i][*j])
            .grb_sum();

        let second_stage = iproduct!(problem.depot_indices(), problem.customer_indices())
            .map(|(j, k)| problem.depot_customer_cost(j, k) * z[*j][*k])
            .grb_sum();

        model.set_objective(opening + first_stage + second_stage, Minimize)?;
        model.update()?;

        Ok((model, Variables { x, y, w, z }))
    }

    fn try_solve(
        problem: &Problem,
        fixed: &FixedSet,
        options: &SolveOptions,
    ) -> grb::Result<Option<Solution>> {
        let (mut model, vars) = Self::build(problem, fixed, options)?;
        model.optimize()?;

        let status = model.status()?;
        let count = model.get_attr(attr::SolCount)?;
        let message = format!("gurobi finished with status {:?} and {} solutions", status, count);
        log!(progress_level(options.verbose), "{}", message);

        if count == 0 {
            return Ok(None);
        }

        let cost = model.get_attr(attr::ObjVal)?;
        let x = values(&model, &vars.x)?;
        let y = values(&model, &vars.y)?;
        let pattern = Pattern::new(
            x.iter().map(|&v| v > 0.5).collect(),
            y.iter().map(|&v| v > 0.5).collect(),
        );

        let mut flows = Flows::zeros(problem);
        for i in problem.plant_indices() {
            for (j, amount) in values(&model, &vars.w[*i])?.into_iter().enumerate() {
                flows.add_shipped(i, DepotIndex::from(j), amount);
            }
        }
        for j in problem.depot_indices() {
            for (k, amount) in values(&model, &vars.z[*j])?.into_iter().enumerate() {
                flows.add_delivered(j, CustomerIndex::from(k), amount);
            }
        }

        Ok(Some(Solution::new(cost, pattern, Some(flows))))
    }
}

impl Oracle for GurobiOracle {
    fn solve(&self, problem: &Problem, fixed: &FixedSet, options: &SolveOptions) -> Solution {
        let mut echo = Pattern::closed(problem);
        for (facility, open) in fixed.iter() {
            echo.set(facility, open);
        }

        match Self::try_solve(problem, fixed, options) {
            Ok(Some(solution)) => solution,
            Ok(None) => Solution::infeasible(echo),
            Err(e) => {
                error!("gurobi failed: {}", e);
                Solution::infeasible(echo)
            }
        }
    }
}
