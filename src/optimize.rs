//! Bounded single-objective minimization
//!
//! Projected steepest descent in bound-normalized coordinates, with
//! finite-difference gradients and an Armijo backtracking line search. Every
//! accepted step strictly lowers the objective, and every point handed to
//! the model (gradient probes and line-search trials included) lies inside
//! the variable bounds.
//!
//! Stopping follows the feasible-directions convention: the absolute change
//! (`dabfun`) or relative change (`delfun`) of the objective must stay below
//! threshold for `itrm` consecutive iterations.

use serde::Serialize;
use thiserror::Error;

use crate::binding::{Bindings, ConfigurationError, DesignVariable};
use crate::model::{select_outputs, Case, EvalPoint, Facade, ModelError, Outputs};
use crate::recorder::CaseLog;

/// Projected-gradient norm treated as zero
const GRAD_TOL: f64 = 1e-12;

/// Sufficient-decrease constant for the line search
const ARMIJO: f64 = 1e-4;

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("objective evaluation failed at iteration {iteration} (last feasible point {last_feasible:?}): {source}")]
    Evaluation {
        iteration: usize,
        last_feasible: Option<EvalPoint>,
        #[source]
        source: ModelError,
    },
}

/// Optimizer settings
#[derive(Clone, Debug)]
pub struct OptimizerConfig {
    /// Iteration cap
    pub max_iter: usize,
    /// Absolute objective change threshold
    pub dabfun: f64,
    /// Relative objective change threshold
    pub delfun: f64,
    /// Consecutive below-threshold iterations needed to stop
    pub itrm: usize,
    /// Finite-difference step as a fraction of each variable's span
    pub fd_step: f64,
    /// First line-search step in normalized coordinates
    pub initial_step: f64,
    /// Step halvings before the line search gives up
    pub max_backtracks: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iter: 30,
            dabfun: 1e-5,
            delfun: 1e-3,
            itrm: 3,
            fd_step: 1e-3,
            initial_step: 0.1,
            max_backtracks: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Objective change stayed below `dabfun`/`delfun` for `itrm` iterations
    ObjectiveStalled,
    /// Projected gradient is zero: every free direction is flat
    GradientVanished,
    /// Line search found no lower objective along the descent direction
    NoDescent,
    /// `max_iter` reached first
    IterationCap,
}

impl StopReason {
    pub fn converged(self) -> bool {
        self != StopReason::IterationCap
    }
}

/// Non-fatal: the iteration cap was hit before the stopping rule fired.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("optimizer did not converge within {iterations} iterations; best {objective_name} = {objective}")]
pub struct ConvergenceWarning {
    pub iterations: usize,
    pub objective_name: String,
    pub objective: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub objective_name: String,
    /// Best (last accepted) point
    pub best: EvalPoint,
    pub objective: f64,
    pub outputs: Outputs,
    pub iterations: usize,
    /// Model calls, including gradient probes and rejected trials
    pub evaluations: usize,
    pub converged: bool,
    pub stop_reason: StopReason,
}

impl OptimizationResult {
    pub fn warning(&self) -> Option<ConvergenceWarning> {
        if self.converged {
            return None;
        }
        Some(ConvergenceWarning {
            iterations: self.iterations,
            objective_name: self.objective_name.clone(),
            objective: self.objective,
        })
    }
}

struct Evaluated {
    u: Vec<f64>,
    f: f64,
    point: EvalPoint,
    outputs: Outputs,
}

/// Maps normalized coordinates onto the facade and counts calls.
struct Problem<'a, F: ?Sized> {
    facade: &'a F,
    vars: &'a [DesignVariable],
    objective: &'a str,
    evaluations: usize,
}

impl<'a, F: Facade + ?Sized> Problem<'a, F> {
    fn to_point(&self, u: &[f64]) -> EvalPoint {
        self.vars
            .iter()
            .zip(u)
            .map(|(v, &ui)| {
                let x = v.lower + ui.clamp(0.0, 1.0) * v.span();
                (v.name.clone(), v.clamp(x))
            })
            .collect()
    }

    fn eval(&mut self, u: &[f64]) -> Result<Evaluated, ModelError> {
        let point = self.to_point(u);
        self.evaluations += 1;
        let outputs = self.facade.evaluate(&point)?;
        let f = *outputs
            .get(self.objective)
            .ok_or_else(|| ModelError::MissingOutput(self.objective.to_string()))?;
        if !f.is_finite() {
            return Err(ModelError::NonFinite(self.objective.to_string()));
        }
        Ok(Evaluated {
            u: u.to_vec(),
            f,
            point,
            outputs,
        })
    }
}

/// Bounded minimizer for one facade output
pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` over the bound variables, recording the start
    /// point and every accepted iterate in `log`.
    pub fn minimize<F: Facade + ?Sized>(
        &self,
        facade: &F,
        bindings: &Bindings,
        objective: &str,
        log: &mut CaseLog,
    ) -> Result<OptimizationResult, OptimizeError> {
        bindings.require_variables()?;
        let declared = bindings.outputs();
        if !facade.output_names().contains(&objective)
            || (!declared.is_empty() && !declared.iter().any(|d| d == objective))
        {
            return Err(ConfigurationError::UnknownObjective(objective.to_string()).into());
        }

        let vars = bindings.variables();
        let mut problem = Problem {
            facade,
            vars,
            objective,
            evaluations: 0,
        };
        let record = |log: &mut CaseLog, e: &Evaluated| {
            let outputs = if declared.is_empty() {
                e.outputs.clone()
            } else {
                select_outputs(&e.outputs, declared)
            };
            log.record(Case::new(e.point.clone(), outputs));
        };

        let u0: Vec<f64> = vars
            .iter()
            .map(|v| {
                let x0 = facade
                    .baseline(&v.name)
                    .filter(|x| x.is_finite())
                    .unwrap_or(v.lower + 0.5 * v.span());
                (v.clamp(x0) - v.lower) / v.span()
            })
            .collect();

        let mut current = problem
            .eval(&u0)
            .map_err(|source| OptimizeError::Evaluation {
                iteration: 0,
                last_feasible: None,
                source,
            })?;
        record(log, &current);

        let cfg = &self.config;
        let mut step = cfg.initial_step;
        let mut stalls = 0;
        let mut iterations = 0;
        let mut stop = StopReason::IterationCap;

        while iterations < cfg.max_iter {
            let failed = |iteration: usize, at: &Evaluated| {
                let last_feasible = Some(at.point.clone());
                move |source| OptimizeError::Evaluation {
                    iteration,
                    last_feasible,
                    source,
                }
            };

            let grad = self
                .gradient(&mut problem, &current)
                .map_err(failed(iterations + 1, &current))?;

            let projected: Vec<f64> = current
                .u
                .iter()
                .zip(&grad)
                .map(|(&ui, &gi)| {
                    if (ui <= 0.0 && gi > 0.0) || (ui >= 1.0 && gi < 0.0) {
                        0.0
                    } else {
                        gi
                    }
                })
                .collect();
            let norm = projected.iter().map(|g| g * g).sum::<f64>().sqrt();
            if norm < GRAD_TOL {
                stop = StopReason::GradientVanished;
                break;
            }
            let dir: Vec<f64> = projected.iter().map(|g| -g / norm).collect();

            let mut alpha = step;
            let mut accepted = None;
            for _ in 0..=cfg.max_backtracks {
                let trial: Vec<f64> = current
                    .u
                    .iter()
                    .zip(&dir)
                    .map(|(ui, di)| (ui + alpha * di).clamp(0.0, 1.0))
                    .collect();
                let slope: f64 = grad
                    .iter()
                    .zip(trial.iter().zip(&current.u))
                    .map(|(g, (t, ui))| g * (t - ui))
                    .sum();
                if slope < 0.0 {
                    let candidate = problem
                        .eval(&trial)
                        .map_err(failed(iterations + 1, &current))?;
                    if candidate.f < current.f && candidate.f <= current.f + ARMIJO * slope {
                        accepted = Some(candidate);
                        break;
                    }
                }
                alpha *= 0.5;
            }

            let Some(next) = accepted else {
                stop = StopReason::NoDescent;
                break;
            };

            iterations += 1;
            let abs_change = (current.f - next.f).abs();
            let rel_change = abs_change / current.f.abs().max(f64::MIN_POSITIVE);
            record(log, &next);
            current = next;
            step = (2.0 * alpha).min(1.0);

            if abs_change < cfg.dabfun || rel_change < cfg.delfun {
                stalls += 1;
            } else {
                stalls = 0;
            }
            if stalls >= cfg.itrm {
                stop = StopReason::ObjectiveStalled;
                break;
            }
        }

        Ok(OptimizationResult {
            objective_name: objective.to_string(),
            best: current.point,
            objective: current.f,
            outputs: current.outputs,
            iterations,
            evaluations: problem.evaluations,
            converged: stop.converged(),
            stop_reason: stop,
        })
    }

    /// One-sided differences in normalized coordinates. Steps that would
    /// leave the box are taken backwards instead.
    fn gradient<F: Facade + ?Sized>(
        &self,
        problem: &mut Problem<'_, F>,
        at: &Evaluated,
    ) -> Result<Vec<f64>, ModelError> {
        let h = self.config.fd_step;
        let mut grad = vec![0.0; at.u.len()];
        for i in 0..at.u.len() {
            let mut probe = at.u.clone();
            let target = if at.u[i] + h <= 1.0 { at.u[i] + h } else { at.u[i] - h };
            probe[i] = target.clamp(0.0, 1.0);
            let delta = probe[i] - at.u[i];
            if delta == 0.0 {
                continue;
            }
            let shifted = problem.eval(&probe)?;
            grad[i] = (shifted.f - at.f) / delta;
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{Fragile, Paraboloid, Spy};
    use approx::assert_abs_diff_eq;

    fn unit_box<F: Facade>(facade: &F) -> Bindings {
        let mut b = Bindings::new(facade);
        b.bind("x", -1.0, 1.0).unwrap();
        b.bind("y", -1.0, 1.0).unwrap();
        b
    }

    fn tight() -> OptimizerConfig {
        OptimizerConfig {
            max_iter: 200,
            dabfun: 1e-14,
            delfun: 1e-14,
            ..Default::default()
        }
    }

    /// `f = -x`, undefined past `x = 0.6`
    struct Cliff;

    impl Facade for Cliff {
        fn input_names(&self) -> &[&'static str] {
            &["x"]
        }

        fn output_names(&self) -> &[&'static str] {
            &["f"]
        }

        fn baseline(&self, _name: &str) -> Option<f64> {
            Some(0.0)
        }

        fn evaluate(&self, point: &EvalPoint) -> Result<Outputs, ModelError> {
            let x = point["x"];
            if x > 0.6 {
                return Err(ModelError::InvalidInput {
                    name: "x",
                    value: x,
                    reason: "past the cliff",
                });
            }
            let mut out = Outputs::new();
            out.insert("f".to_string(), -x);
            Ok(out)
        }
    }

    #[test]
    fn test_finds_interior_minimum() {
        let facade = Paraboloid { cx: 0.3, cy: -0.2 };
        let b = unit_box(&facade);
        let mut log = CaseLog::new();

        let result = Optimizer::new(tight())
            .minimize(&facade, &b, "f", &mut log)
            .unwrap();

        assert!(result.converged);
        assert_abs_diff_eq!(result.best["x"], 0.3, epsilon = 1e-2);
        assert_abs_diff_eq!(result.best["y"], -0.2, epsilon = 1e-2);
        assert_abs_diff_eq!(result.objective, 1.0, epsilon = 1e-3);
        assert_eq!(log.len(), result.iterations + 1);
    }

    #[test]
    fn test_stops_on_active_bound() {
        let facade = Paraboloid { cx: 5.0, cy: 0.5 };
        let b = unit_box(&facade);
        let mut log = CaseLog::new();

        let result = Optimizer::new(tight())
            .minimize(&facade, &b, "f", &mut log)
            .unwrap();

        assert_eq!(result.best["x"], 1.0);
        assert_abs_diff_eq!(result.best["y"], 0.5, epsilon = 1e-2);
    }

    #[test]
    fn test_never_leaves_bounds() {
        let facade = Spy::new(Paraboloid { cx: -4.0, cy: 3.0 });
        let b = unit_box(&facade);
        let mut log = CaseLog::new();

        Optimizer::new(tight())
            .minimize(&facade, &b, "f", &mut log)
            .unwrap();

        let seen = facade.seen.borrow();
        assert!(seen.len() > log.len());
        for p in seen.iter() {
            assert!((-1.0..=1.0).contains(&p["x"]), "x out of bounds: {}", p["x"]);
            assert!((-1.0..=1.0).contains(&p["y"]), "y out of bounds: {}", p["y"]);
        }
    }

    #[test]
    fn test_recorded_objective_non_increasing() {
        let facade = Paraboloid { cx: 0.7, cy: 0.9 };
        let b = unit_box(&facade);
        let mut log = CaseLog::new();

        Optimizer::new(OptimizerConfig::default())
            .minimize(&facade, &b, "f", &mut log)
            .unwrap();

        let f = log.column("f");
        assert!(f.len() >= 2);
        for pair in f.windows(2) {
            assert!(pair[1] <= pair[0], "objective rose: {} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_iteration_cap_is_a_warning() {
        let facade = Paraboloid { cx: 0.9, cy: -0.9 };
        let b = unit_box(&facade);
        let mut log = CaseLog::new();
        let config = OptimizerConfig {
            max_iter: 1,
            ..tight()
        };

        let result = Optimizer::new(config)
            .minimize(&facade, &b, "f", &mut log)
            .unwrap();

        assert!(!result.converged);
        assert_eq!(result.stop_reason, StopReason::IterationCap);
        assert_eq!(result.iterations, 1);
        assert_eq!(log.len(), 2);
        let warning = result.warning().unwrap();
        assert_eq!(warning.iterations, 1);
        assert_eq!(warning.objective, result.objective);
    }

    #[test]
    fn test_start_failure_has_no_feasible_point() {
        let facade = Fragile { limit: 4.0 };
        let mut b = Bindings::new(&facade);
        b.bind("x", 0.0, 10.0).unwrap();
        let mut log = CaseLog::new();

        let err = Optimizer::new(OptimizerConfig::default())
            .minimize(&facade, &b, "f", &mut log)
            .unwrap_err();

        match err {
            OptimizeError::Evaluation {
                iteration,
                last_feasible,
                ..
            } => {
                assert_eq!(iteration, 0);
                assert!(last_feasible.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(log.is_empty());
    }

    #[test]
    fn test_midrun_failure_reports_last_feasible_point() {
        let mut b = Bindings::new(&Cliff);
        b.bind("x", 0.0, 1.0).unwrap();
        let mut log = CaseLog::new();

        let err = Optimizer::new(tight())
            .minimize(&Cliff, &b, "f", &mut log)
            .unwrap_err();

        match err {
            OptimizeError::Evaluation {
                iteration,
                last_feasible: Some(point),
                ..
            } => {
                assert!(iteration >= 1);
                assert!(point["x"] <= 0.6);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!log.is_empty());
    }

    #[test]
    fn test_unknown_objective() {
        let facade = Paraboloid { cx: 0.0, cy: 0.0 };
        let mut b = unit_box(&facade);
        let mut log = CaseLog::new();
        let opt = Optimizer::new(OptimizerConfig::default());

        assert!(matches!(
            opt.minimize(&facade, &b, "lcoe", &mut log),
            Err(OptimizeError::Configuration(ConfigurationError::UnknownObjective(_)))
        ));

        // known to the model but not declared for recording
        b.declare_outputs(&["g"]).unwrap();
        assert!(matches!(
            opt.minimize(&facade, &b, "f", &mut log),
            Err(OptimizeError::Configuration(ConfigurationError::UnknownObjective(_)))
        ));
        assert!(log.is_empty());
    }
}
