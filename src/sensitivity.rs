//! One-at-a-time sensitivity sweeps.
//!
//! Each sweep varies a single input over an evenly stepped range while every
//! other input stays at the facade baseline. Sweeps share nothing: each one
//! starts from the baseline and records into its own log.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::binding::{Bindings, ConfigurationError};
use crate::model::{select_outputs, Case, EvalPoint, Facade, ModelError};
use crate::recorder::CaseLog;

/// Upper limit on the values one sweep may evaluate
pub const MAX_SWEEP_POINTS: usize = 10_000;

#[derive(Debug, Error)]
pub enum SensitivityError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("sweep '{name}' needs a finite positive step, got {step}")]
    InvalidStep { name: String, step: f64 },
    #[error("sweep '{name}' spans {points} values, more than {max}")]
    TooManyPoints {
        name: String,
        points: usize,
        max: usize,
    },
    #[error("model evaluation failed in sweep '{sweep}' at {value}: {source}")]
    Evaluation {
        sweep: String,
        value: f64,
        #[source]
        source: ModelError,
    },
}

/// `start, start + step, ...` strictly below `stop`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSpec {
    pub name: String,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl SweepSpec {
    pub fn new(name: &str, start: f64, stop: f64, step: f64) -> Self {
        Self {
            name: name.to_string(),
            start,
            stop,
            step,
        }
    }

    pub fn values(&self) -> Vec<f64> {
        arange(self.start, self.stop, self.step)
    }

    /// Upper bound on `values().len()`, saturating for huge ranges
    pub fn point_count(&self) -> usize {
        steps(self.start, self.stop, self.step)
    }
}

fn steps(start: f64, stop: f64, step: f64) -> usize {
    if !(step > 0.0) || !(stop > start) {
        return 0;
    }
    // float-to-int casts saturate
    ((stop - start) / step).ceil() as usize
}

/// Half-open range with a fixed step. Values are computed as
/// `start + i * step` so no error accumulates along the range.
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let n = steps(start, stop, step);
    (0..n)
        .map(|i| start + i as f64 * step)
        .filter(|v| *v < stop)
        .collect()
}

/// Default sweeps over the plant model
pub fn default_sweeps() -> Vec<SweepSpec> {
    vec![
        SweepSpec::new("hubHeight", 70.0, 121.0, 10.0),
        SweepSpec::new("rotorDiameter", 112.0, 141.0, 2.0),
        SweepSpec::new("maxTipSpeed", 70.0, 101.0, 2.0),
        SweepSpec::new("ratedPower", 4500.0, 5501.0, 100.0),
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub name: String,
    pub log: CaseLog,
}

#[derive(Debug, Clone)]
pub struct SensitivityDriver {
    sweeps: Vec<SweepSpec>,
}

impl SensitivityDriver {
    pub fn new(sweeps: Vec<SweepSpec>) -> Self {
        Self { sweeps }
    }

    /// Check every sweep against the facade before anything is evaluated.
    pub fn check<F: Facade + ?Sized>(
        &self,
        facade: &F,
        outputs: &[String],
    ) -> Result<(), SensitivityError> {
        for spec in &self.sweeps {
            self.bindings(facade, spec, outputs)?;
        }
        Ok(())
    }

    fn bindings<F: Facade + ?Sized>(
        &self,
        facade: &F,
        spec: &SweepSpec,
        outputs: &[String],
    ) -> Result<Bindings, SensitivityError> {
        if !spec.step.is_finite() || spec.step <= 0.0 {
            return Err(SensitivityError::InvalidStep {
                name: spec.name.clone(),
                step: spec.step,
            });
        }
        let mut b = Bindings::new(facade);
        b.bind(&spec.name, spec.start, spec.stop)?;
        b.declare_outputs(outputs)?;
        let points = spec.point_count();
        if points > MAX_SWEEP_POINTS {
            return Err(SensitivityError::TooManyPoints {
                name: spec.name.clone(),
                points,
                max: MAX_SWEEP_POINTS,
            });
        }
        Ok(b)
    }

    /// Run every sweep in order. `outputs` limits what is recorded; empty
    /// records every output.
    pub fn run<F: Facade + ?Sized>(
        &self,
        facade: &F,
        outputs: &[String],
    ) -> Result<Vec<SweepResult>, SensitivityError> {
        self.check(facade, outputs)?;

        let mut results = Vec::with_capacity(self.sweeps.len());
        for spec in &self.sweeps {
            let bindings = self.bindings(facade, spec, outputs)?;
            let values = spec.values();
            let mut log = CaseLog::with_capacity(values.len());
            for value in values {
                let mut point = EvalPoint::new();
                point.insert(spec.name.clone(), value);
                evaluate_into(facade, &bindings, point, &spec.name, value, &mut log)?;
            }
            results.push(SweepResult {
                name: spec.name.clone(),
                log,
            });
        }
        Ok(results)
    }
}

/// Evaluate the baseline once per value of `name`, e.g. a technology
/// switch turned on and off.
pub fn compare_variants<F: Facade + ?Sized>(
    facade: &F,
    name: &str,
    values: &[f64],
    outputs: &[String],
) -> Result<CaseLog, SensitivityError> {
    if !facade.input_names().contains(&name) {
        return Err(ConfigurationError::UnknownInput(name.to_string()).into());
    }
    let mut bindings = Bindings::new(facade);
    bindings.declare_outputs(outputs)?;

    let mut log = CaseLog::with_capacity(values.len());
    for &value in values {
        let mut point = EvalPoint::new();
        point.insert(name.to_string(), value);
        evaluate_into(facade, &bindings, point, name, value, &mut log)?;
    }
    Ok(log)
}

fn evaluate_into<F: Facade + ?Sized>(
    facade: &F,
    bindings: &Bindings,
    point: EvalPoint,
    sweep: &str,
    value: f64,
    log: &mut CaseLog,
) -> Result<(), SensitivityError> {
    let outputs = facade
        .evaluate(&point)
        .map_err(|source| SensitivityError::Evaluation {
            sweep: sweep.to_string(),
            value,
            source,
        })?;
    let outputs = if bindings.outputs().is_empty() {
        outputs
    } else {
        select_outputs(&outputs, bindings.outputs())
    };
    log.record(Case::new(point, outputs));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{Fragile, Paraboloid, Spy};

    #[test]
    fn test_arange_excludes_stop() {
        assert_eq!(arange(70.0, 121.0, 10.0), vec![70.0, 80.0, 90.0, 100.0, 110.0, 120.0]);
        assert_eq!(arange(0.0, 1.0, 0.25), vec![0.0, 0.25, 0.5, 0.75]);
        assert!(arange(1.0, 1.0, 0.1).is_empty());
        assert!(arange(0.0, 1.0, 0.0).is_empty());
    }

    #[test]
    fn test_point_count_bounds_values() {
        let spec = SweepSpec::new("hubHeight", 70.0, 121.0, 10.0);
        assert_eq!(spec.point_count(), 6);
        assert_eq!(SweepSpec::new("x", 0.0, 1.0, 0.0).point_count(), 0);
        assert_eq!(SweepSpec::new("x", 1.0, 0.0, 0.1).point_count(), 0);
        assert!(SweepSpec::new("x", 70.0, 121.0, 1e-12).point_count() > MAX_SWEEP_POINTS);
        assert_eq!(SweepSpec::new("x", 0.0, 1.0, f64::MIN_POSITIVE).point_count(), usize::MAX);
    }

    #[test]
    fn test_default_sweep_counts() {
        let counts: Vec<usize> = default_sweeps().iter().map(|s| s.values().len()).collect();
        assert_eq!(counts, vec![6, 15, 16, 11]);

        let rp = default_sweeps()[3].values();
        assert_eq!(rp[0], 4500.0);
        assert_eq!(*rp.last().unwrap(), 5500.0);
    }

    #[test]
    fn test_each_sweep_starts_from_baseline() {
        let facade = Spy::new(Paraboloid { cx: 0.0, cy: 0.0 });
        let driver = SensitivityDriver::new(vec![
            SweepSpec::new("x", 0.0, 1.0, 0.5),
            SweepSpec::new("y", 2.0, 3.0, 0.5),
        ]);

        let results = driver.run(&facade, &[]).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].log.column("x"), vec![0.0, 0.5]);
        assert_eq!(results[1].log.column("y"), vec![2.0, 2.5]);
        // the y sweep never sees the last x value
        for p in facade.seen.borrow().iter().skip(2) {
            assert!(!p.contains_key("x"));
        }
        // g = x + y with the other input at its baseline of zero
        assert_eq!(results[1].log.column("g"), vec![2.0, 2.5]);
    }

    #[test]
    fn test_declared_outputs_filter_records() {
        let facade = Paraboloid { cx: 0.0, cy: 0.0 };
        let driver = SensitivityDriver::new(vec![SweepSpec::new("x", 0.0, 1.0, 0.5)]);

        let results = driver.run(&facade, &["f".to_string()]).unwrap();
        for case in &results[0].log {
            assert_eq!(case.outputs.len(), 1);
            assert!(case.outputs.contains_key("f"));
        }
    }

    #[test]
    fn test_bad_sweeps_rejected_before_evaluation() {
        let facade = Spy::new(Paraboloid { cx: 0.0, cy: 0.0 });

        let unknown = SensitivityDriver::new(vec![
            SweepSpec::new("x", 0.0, 1.0, 0.5),
            SweepSpec::new("nonexistentParam", 0.0, 1.0, 0.5),
        ]);
        assert!(matches!(
            unknown.run(&facade, &[]),
            Err(SensitivityError::Configuration(ConfigurationError::UnknownInput(_)))
        ));

        let zero_step = SensitivityDriver::new(vec![SweepSpec::new("x", 0.0, 1.0, 0.0)]);
        assert!(matches!(
            zero_step.run(&facade, &[]),
            Err(SensitivityError::InvalidStep { .. })
        ));

        let dense = SensitivityDriver::new(vec![
            SweepSpec::new("x", 0.0, 1.0, 0.5),
            SweepSpec::new("y", 70.0, 121.0, 1e-12),
        ]);
        match dense.run(&facade, &[]) {
            Err(SensitivityError::TooManyPoints { name, points, max }) => {
                assert_eq!(name, "y");
                assert!(points > max);
                assert_eq!(max, MAX_SWEEP_POINTS);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(facade.seen.borrow().is_empty());
    }

    #[test]
    fn test_failure_names_sweep_and_value() {
        let facade = Fragile { limit: 0.6 };
        let driver = SensitivityDriver::new(vec![SweepSpec::new("x", 0.0, 1.0, 0.25)]);

        match driver.run(&facade, &[]).unwrap_err() {
            SensitivityError::Evaluation { sweep, value, .. } => {
                assert_eq!(sweep, "x");
                assert_eq!(value, 0.75);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_compare_variants() {
        let facade = Paraboloid { cx: 0.0, cy: 0.0 };
        let log = compare_variants(&facade, "x", &[1.0, 0.0], &[]).unwrap();

        assert_eq!(log.column("x"), vec![1.0, 0.0]);
        assert_eq!(log.column("f"), vec![2.0, 1.0]);
        assert!(compare_variants(&facade, "z", &[1.0], &[]).is_err());
    }
}
