//! Full-factorial design of experiments.
//!
//! Every combination of `levels` evenly spaced values per bound variable is
//! evaluated once, in a fixed nested order: the first bound variable varies
//! slowest, the last one fastest.

use rayon::prelude::*;
use thiserror::Error;

use crate::binding::{Bindings, ConfigurationError, DesignVariable};
use crate::model::{select_outputs, Case, EvalPoint, Facade, ModelError, Outputs};
use crate::recorder::CaseLog;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("model evaluation failed at grid indices {indices:?} {point:?}: {source}")]
    Evaluation {
        indices: Vec<usize>,
        point: EvalPoint,
        #[source]
        source: ModelError,
    },
}

/// Upper limit on grid levels per variable
pub const MAX_LEVELS: usize = 1000;

/// `n` evenly spaced values from `lower` to `upper`. Both endpoints are
/// exact.
pub fn linspace(lower: f64, upper: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lower],
        _ => {
            let denom = (n - 1) as f64;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        upper
                    } else {
                        lower + (upper - lower) * i as f64 / denom
                    }
                })
                .collect()
        }
    }
}

/// Grid specification: levels per variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullFactorial {
    levels: usize,
}

impl FullFactorial {
    pub fn new(levels: usize) -> Result<Self, ConfigurationError> {
        if levels < 2 {
            return Err(ConfigurationError::TooFewLevels(levels));
        }
        if levels > MAX_LEVELS {
            return Err(ConfigurationError::TooManyLevels {
                levels,
                max: MAX_LEVELS,
            });
        }
        Ok(Self { levels })
    }

    /// Number of grid points for `k` variables
    pub fn size(&self, k: usize) -> Result<usize, ConfigurationError> {
        if k == 0 {
            return Ok(0);
        }
        u32::try_from(k)
            .ok()
            .and_then(|k| self.levels.checked_pow(k))
            .ok_or(ConfigurationError::GridTooLarge {
                levels: self.levels,
                variables: k,
            })
    }

    pub fn axis(&self, var: &DesignVariable) -> Vec<f64> {
        linspace(var.lower, var.upper, self.levels)
    }

    pub fn points(&self, variables: &[DesignVariable]) -> GridPoints {
        GridPoints {
            names: variables.iter().map(|v| v.name.clone()).collect(),
            axes: variables.iter().map(|v| self.axis(v)).collect(),
            next: if variables.is_empty() {
                None
            } else {
                Some(vec![0; variables.len()])
            },
        }
    }
}

/// A grid node with its per-variable level indices
#[derive(Debug, Clone, PartialEq)]
pub struct GridPoint {
    pub indices: Vec<usize>,
    pub point: EvalPoint,
}

/// Odometer over the grid, last variable fastest
#[derive(Debug, Clone)]
pub struct GridPoints {
    names: Vec<String>,
    axes: Vec<Vec<f64>>,
    next: Option<Vec<usize>>,
}

impl Iterator for GridPoints {
    type Item = GridPoint;

    fn next(&mut self) -> Option<GridPoint> {
        let indices = self.next.take()?;

        let point: EvalPoint = self
            .names
            .iter()
            .zip(indices.iter())
            .zip(self.axes.iter())
            .map(|((name, &i), axis)| (name.clone(), axis[i]))
            .collect();

        let mut succ = indices.clone();
        for d in (0..succ.len()).rev() {
            succ[d] += 1;
            if succ[d] < self.axes[d].len() {
                self.next = Some(succ);
                break;
            }
            succ[d] = 0;
        }

        Some(GridPoint { indices, point })
    }
}

/// Evaluates a facade over a full-factorial grid and records every node.
#[derive(Debug, Clone, Copy)]
pub struct DoeDriver {
    grid: FullFactorial,
}

impl DoeDriver {
    pub fn new(levels: usize) -> Result<Self, ConfigurationError> {
        Ok(Self {
            grid: FullFactorial::new(levels)?,
        })
    }

    pub fn grid(&self) -> FullFactorial {
        self.grid
    }

    /// Evaluate the grid in order, one point at a time. Returns the number of
    /// cases recorded.
    pub fn run<F: Facade + ?Sized>(
        &self,
        facade: &F,
        bindings: &Bindings,
        log: &mut CaseLog,
    ) -> Result<usize, SweepError> {
        bindings.require_variables()?;
        self.grid.size(bindings.variables().len())?;
        let mut count = 0;
        for gp in self.grid.points(bindings.variables()) {
            let result = facade.evaluate(&gp.point);
            record(log, bindings, gp, result)?;
            count += 1;
        }
        Ok(count)
    }

    /// Evaluate grid points on the rayon pool. Results are recorded in grid
    /// order once every point has returned, so the log matches [`run`].
    ///
    /// [`run`]: DoeDriver::run
    pub fn run_parallel<F: Facade + Sync + ?Sized>(
        &self,
        facade: &F,
        bindings: &Bindings,
        log: &mut CaseLog,
    ) -> Result<usize, SweepError> {
        bindings.require_variables()?;
        self.grid.size(bindings.variables().len())?;
        let points: Vec<GridPoint> = self.grid.points(bindings.variables()).collect();
        let results: Vec<Result<Outputs, ModelError>> = points
            .par_iter()
            .map(|gp| facade.evaluate(&gp.point))
            .collect();

        let count = points.len();
        for (gp, result) in points.into_iter().zip(results) {
            record(log, bindings, gp, result)?;
        }
        Ok(count)
    }
}

fn record(
    log: &mut CaseLog,
    bindings: &Bindings,
    gp: GridPoint,
    result: Result<Outputs, ModelError>,
) -> Result<(), SweepError> {
    match result {
        Ok(outputs) => {
            let outputs = if bindings.outputs().is_empty() {
                outputs
            } else {
                select_outputs(&outputs, bindings.outputs())
            };
            log.record(Case::new(gp.point, outputs));
            Ok(())
        }
        Err(source) => Err(SweepError::Evaluation {
            indices: gp.indices,
            point: gp.point,
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{Fragile, Paraboloid, Spy};

    fn xy_bindings<F: Facade>(facade: &F) -> Bindings {
        let mut b = Bindings::new(facade);
        b.bind("x", 110.0, 145.0).unwrap();
        b.bind("y", 75.0, 100.0).unwrap();
        b
    }

    #[test]
    fn test_linspace_endpoints_exact() {
        let axis = linspace(110.0, 145.0, 10);
        assert_eq!(axis.len(), 10);
        assert_eq!(axis[0], 110.0);
        assert_eq!(axis[9], 145.0);
        for pair in axis.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert_eq!(linspace(0.1, 0.7, 3)[2], 0.7);
    }

    #[test]
    fn test_too_few_levels() {
        assert_eq!(
            FullFactorial::new(1).unwrap_err(),
            ConfigurationError::TooFewLevels(1)
        );
        assert!(DoeDriver::new(0).is_err());
    }

    #[test]
    fn test_too_many_levels() {
        assert_eq!(
            DoeDriver::new(MAX_LEVELS + 1).unwrap_err(),
            ConfigurationError::TooManyLevels {
                levels: MAX_LEVELS + 1,
                max: MAX_LEVELS
            }
        );
        assert!(DoeDriver::new(1 << 33).is_err());
        assert!(DoeDriver::new(MAX_LEVELS).is_ok());
    }

    #[test]
    fn test_grid_size_overflow() {
        let grid = FullFactorial::new(MAX_LEVELS).unwrap();
        assert_eq!(grid.size(0), Ok(0));
        assert_eq!(grid.size(2), Ok(1_000_000));
        // 1000^7 does not fit in 64 bits
        assert_eq!(
            grid.size(7),
            Err(ConfigurationError::GridTooLarge {
                levels: MAX_LEVELS,
                variables: 7
            })
        );
        assert_eq!(FullFactorial::new(10).unwrap().size(3), Ok(1000));
    }

    #[test]
    fn test_first_variable_varies_slowest() {
        let grid = FullFactorial::new(3).unwrap();
        let facade = Paraboloid { cx: 0.0, cy: 0.0 };
        let b = xy_bindings(&facade);

        let indices: Vec<Vec<usize>> = grid.points(b.variables()).map(|gp| gp.indices).collect();
        assert_eq!(indices.len(), 9);
        assert_eq!(indices[0], vec![0, 0]);
        assert_eq!(indices[1], vec![0, 1]);
        assert_eq!(indices[2], vec![0, 2]);
        assert_eq!(indices[3], vec![1, 0]);
        assert_eq!(indices[8], vec![2, 2]);
    }

    #[test]
    fn test_records_every_point_once() {
        let facade = Spy::new(Paraboloid { cx: 120.0, cy: 80.0 });
        let b = xy_bindings(&facade);
        let driver = DoeDriver::new(4).unwrap();
        let mut log = CaseLog::new();

        let n = driver.run(&facade, &b, &mut log).unwrap();

        assert_eq!(n, 16);
        assert_eq!(log.len(), 16);
        assert_eq!(facade.seen.borrow().len(), 16);
        let mut seen: Vec<(u64, u64)> = log
            .iter()
            .map(|c| (c.inputs["x"].to_bits(), c.inputs["y"].to_bits()))
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 16);
    }

    #[test]
    fn test_declared_outputs_only() {
        let facade = Paraboloid { cx: 0.0, cy: 0.0 };
        let mut b = xy_bindings(&facade);
        b.declare_outputs(&["g"]).unwrap();
        let mut log = CaseLog::new();

        DoeDriver::new(2).unwrap().run(&facade, &b, &mut log).unwrap();

        for case in &log {
            assert_eq!(case.outputs.len(), 1);
            assert_eq!(case.outputs["g"], case.inputs["x"] + case.inputs["y"]);
        }
    }

    #[test]
    fn test_failure_reports_grid_indices() {
        let facade = Fragile { limit: 130.0 };
        let b = xy_bindings(&facade);
        let mut log = CaseLog::new();

        let err = DoeDriver::new(3)
            .unwrap()
            .run(&facade, &b, &mut log)
            .unwrap_err();

        // x axis is [110, 127.5, 145]; first failing node is (2, 0)
        match err {
            SweepError::Evaluation { indices, point, .. } => {
                assert_eq!(indices, vec![2, 0]);
                assert_eq!(point["x"], 145.0);
                assert_eq!(point["y"], 75.0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_variables_is_configuration_error() {
        let facade = Paraboloid { cx: 0.0, cy: 0.0 };
        let b = Bindings::new(&facade);
        let mut log = CaseLog::new();
        let err = DoeDriver::new(2)
            .unwrap()
            .run(&facade, &b, &mut log)
            .unwrap_err();
        assert!(matches!(
            err,
            SweepError::Configuration(ConfigurationError::NoVariables)
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let facade = Paraboloid { cx: 130.0, cy: 90.0 };
        let b = xy_bindings(&facade);
        let driver = DoeDriver::new(7).unwrap();

        let mut serial = CaseLog::new();
        let mut parallel = CaseLog::new();
        driver.run(&facade, &b, &mut serial).unwrap();
        driver.run_parallel(&facade, &b, &mut parallel).unwrap();

        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_parallel_reports_first_failure_in_grid_order() {
        let facade = Fragile { limit: 120.0 };
        let b = xy_bindings(&facade);
        let mut log = CaseLog::new();

        let err = DoeDriver::new(3)
            .unwrap()
            .run_parallel(&facade, &b, &mut log)
            .unwrap_err();
        match err {
            SweepError::Evaluation { indices, .. } => assert_eq!(indices, vec![1, 0]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(log.len(), 3);
    }
}
