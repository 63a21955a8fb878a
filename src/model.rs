//! Facade seam between the study drivers and a cost model.
//!
//! Drivers only see named scalar inputs and outputs. Any deterministic model
//! that can be evaluated from an [`EvalPoint`] can be swept, optimized or
//! perturbed by the drivers in this crate.

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

/// Ordered mapping from design-variable name to value
pub type EvalPoint = IndexMap<String, f64>;

/// Ordered mapping from output name to value
pub type Outputs = IndexMap<String, f64>;

/// Rejection of an input combination by a model
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("unknown model input '{0}'")]
    UnknownInput(String),
    #[error("invalid value {value} for '{name}': {reason}")]
    InvalidInput {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error("turbine produces no energy at this site")]
    NoEnergy,
    #[error("model output '{0}' is not finite")]
    NonFinite(String),
    #[error("model did not produce output '{0}'")]
    MissingOutput(String),
}

/// A deterministic cost model evaluated by name.
pub trait Facade {
    /// Names accepted by [`Facade::evaluate`]
    fn input_names(&self) -> &[&'static str];

    /// Names produced by [`Facade::evaluate`]
    fn output_names(&self) -> &[&'static str];

    /// Value an input takes when it is not part of the evaluation point
    fn baseline(&self, name: &str) -> Option<f64>;

    /// Evaluate the model with `point` overriding the baseline inputs.
    fn evaluate(&self, point: &EvalPoint) -> Result<Outputs, ModelError>;
}

/// One recorded evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Case {
    pub inputs: EvalPoint,
    pub outputs: Outputs,
}

impl Case {
    pub fn new(inputs: EvalPoint, outputs: Outputs) -> Self {
        Self { inputs, outputs }
    }

    /// Look a name up among the inputs first, then the outputs
    pub fn value(&self, name: &str) -> Option<f64> {
        self.inputs
            .get(name)
            .or_else(|| self.outputs.get(name))
            .copied()
    }
}

/// Keep only the declared outputs, in declaration order.
pub fn select_outputs(all: &Outputs, declared: &[String]) -> Outputs {
    declared
        .iter()
        .filter_map(|name| all.get(name).map(|v| (name.clone(), *v)))
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use std::cell::RefCell;

    /// `f(x, y) = (x - cx)^2 + 2 (y - cy)^2 + 1`, with `g = x + y` as a
    /// secondary output.
    pub struct Paraboloid {
        pub cx: f64,
        pub cy: f64,
    }

    impl Facade for Paraboloid {
        fn input_names(&self) -> &[&'static str] {
            &["x", "y"]
        }

        fn output_names(&self) -> &[&'static str] {
            &["f", "g"]
        }

        fn baseline(&self, name: &str) -> Option<f64> {
            match name {
                "x" | "y" => Some(0.0),
                _ => None,
            }
        }

        fn evaluate(&self, point: &EvalPoint) -> Result<Outputs, ModelError> {
            let x = point.get("x").copied().unwrap_or(0.0);
            let y = point.get("y").copied().unwrap_or(0.0);
            let mut out = Outputs::new();
            out.insert(
                "f".to_string(),
                (x - self.cx).powi(2) + 2.0 * (y - self.cy).powi(2) + 1.0,
            );
            out.insert("g".to_string(), x + y);
            Ok(out)
        }
    }

    /// Wraps a facade and keeps every point it was asked to evaluate.
    pub struct Spy<F> {
        pub inner: F,
        pub seen: RefCell<Vec<EvalPoint>>,
    }

    impl<F> Spy<F> {
        pub fn new(inner: F) -> Self {
            Self {
                inner,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl<F: Facade> Facade for Spy<F> {
        fn input_names(&self) -> &[&'static str] {
            self.inner.input_names()
        }

        fn output_names(&self) -> &[&'static str] {
            self.inner.output_names()
        }

        fn baseline(&self, name: &str) -> Option<f64> {
            self.inner.baseline(name)
        }

        fn evaluate(&self, point: &EvalPoint) -> Result<Outputs, ModelError> {
            self.seen.borrow_mut().push(point.clone());
            self.inner.evaluate(point)
        }
    }

    /// Fails whenever `x` exceeds `limit`.
    pub struct Fragile {
        pub limit: f64,
    }

    impl Facade for Fragile {
        fn input_names(&self) -> &[&'static str] {
            &["x", "y"]
        }

        fn output_names(&self) -> &[&'static str] {
            &["f"]
        }

        fn baseline(&self, _name: &str) -> Option<f64> {
            None
        }

        fn evaluate(&self, point: &EvalPoint) -> Result<Outputs, ModelError> {
            let x = point.get("x").copied().unwrap_or(0.0);
            if x > self.limit {
                return Err(ModelError::InvalidInput {
                    name: "x",
                    value: x,
                    reason: "beyond fixture limit",
                });
            }
            let mut out = Outputs::new();
            out.insert("f".to_string(), x);
            Ok(out)
        }
    }

    pub fn point(pairs: &[(&str, f64)]) -> EvalPoint {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }
}
