use serde::Serialize;
use thiserror::Error;

use crate::model::Facade;

/// Setup mistakes, caught before any evaluation runs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("'{0}' is not an input of the model")]
    UnknownInput(String),
    #[error("'{0}' is not an output of the model")]
    UnknownOutput(String),
    #[error("design variable '{0}' is already bound")]
    DuplicateVariable(String),
    #[error("output '{0}' is declared twice")]
    DuplicateOutput(String),
    #[error("bounds for '{name}' must be finite with lower < upper, got [{lower}, {upper}]")]
    InvalidBounds { name: String, lower: f64, upper: f64 },
    #[error("no design variables are bound")]
    NoVariables,
    #[error("a full-factorial grid needs at least 2 levels per variable, got {0}")]
    TooFewLevels(usize),
    #[error("at most {max} levels per variable are allowed, got {levels}")]
    TooManyLevels { levels: usize, max: usize },
    #[error("{levels} levels over {variables} variables overflows the grid size")]
    GridTooLarge { levels: usize, variables: usize },
    #[error("objective '{0}' is not among the declared outputs")]
    UnknownObjective(String),
}

/// A bounded design variable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesignVariable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
}

impl DesignVariable {
    pub fn span(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }
}

/// Which model inputs a driver varies and which outputs it records.
///
/// Names are checked against the facade at bind time, so a driver handed a
/// `Bindings` never meets an unknown name.
#[derive(Debug, Clone)]
pub struct Bindings {
    known_inputs: Vec<&'static str>,
    known_outputs: Vec<&'static str>,
    variables: Vec<DesignVariable>,
    outputs: Vec<String>,
}

impl Bindings {
    pub fn new<F: Facade + ?Sized>(facade: &F) -> Self {
        Self {
            known_inputs: facade.input_names().to_vec(),
            known_outputs: facade.output_names().to_vec(),
            variables: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Register a design variable. Registration order is grid nesting order.
    pub fn bind(
        &mut self,
        name: &str,
        lower: f64,
        upper: f64,
    ) -> Result<&mut Self, ConfigurationError> {
        if !self.known_inputs.contains(&name) {
            return Err(ConfigurationError::UnknownInput(name.to_string()));
        }
        if self.variables.iter().any(|v| v.name == name) {
            return Err(ConfigurationError::DuplicateVariable(name.to_string()));
        }
        if !lower.is_finite() || !upper.is_finite() || lower >= upper {
            return Err(ConfigurationError::InvalidBounds {
                name: name.to_string(),
                lower,
                upper,
            });
        }

        self.variables.push(DesignVariable {
            name: name.to_string(),
            lower,
            upper,
        });
        Ok(self)
    }

    /// Fix the outputs recorded with every case, replacing any earlier
    /// declaration.
    pub fn declare_outputs<S: AsRef<str>>(
        &mut self,
        names: &[S],
    ) -> Result<&mut Self, ConfigurationError> {
        let mut declared: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if !self.known_outputs.contains(&name) {
                return Err(ConfigurationError::UnknownOutput(name.to_string()));
            }
            if declared.iter().any(|d| d == name) {
                return Err(ConfigurationError::DuplicateOutput(name.to_string()));
            }
            declared.push(name.to_string());
        }

        self.outputs = declared;
        Ok(self)
    }

    pub fn variables(&self) -> &[DesignVariable] {
        &self.variables
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn variable(&self, name: &str) -> Option<&DesignVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub(crate) fn require_variables(&self) -> Result<(), ConfigurationError> {
        if self.variables.is_empty() {
            return Err(ConfigurationError::NoVariables);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::Paraboloid;

    fn bindings() -> Bindings {
        Bindings::new(&Paraboloid { cx: 0.0, cy: 0.0 })
    }

    #[test]
    fn test_bind_keeps_registration_order() {
        let mut b = bindings();
        b.bind("y", 0.0, 1.0).unwrap().bind("x", -1.0, 1.0).unwrap();

        let names: Vec<&str> = b.variables().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["y", "x"]);
        assert_eq!(b.variable("x").unwrap().span(), 2.0);
    }

    #[test]
    fn test_unknown_input_rejected() {
        let mut b = bindings();
        let err = b.bind("nonexistentParam", 0.0, 1.0).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownInput("nonexistentParam".to_string())
        );
        assert!(b.variables().is_empty());
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let mut b = bindings();
        b.bind("x", 0.0, 1.0).unwrap();
        assert!(matches!(
            b.bind("x", 2.0, 3.0),
            Err(ConfigurationError::DuplicateVariable(_))
        ));
    }

    #[test]
    fn test_inverted_and_degenerate_bounds_rejected() {
        let mut b = bindings();
        assert!(matches!(
            b.bind("x", 5.0, 1.0),
            Err(ConfigurationError::InvalidBounds { .. })
        ));
        assert!(matches!(
            b.bind("x", 1.0, 1.0),
            Err(ConfigurationError::InvalidBounds { .. })
        ));
        assert!(matches!(
            b.bind("x", f64::NAN, 1.0),
            Err(ConfigurationError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn test_declare_outputs() {
        let mut b = bindings();
        b.declare_outputs(&["g", "f"]).unwrap();
        assert_eq!(b.outputs(), &["g".to_string(), "f".to_string()]);

        assert_eq!(
            b.declare_outputs(&["f", "lcoe"]).unwrap_err(),
            ConfigurationError::UnknownOutput("lcoe".to_string())
        );
        assert!(matches!(
            b.declare_outputs(&["f", "f"]),
            Err(ConfigurationError::DuplicateOutput(_))
        ));
        // failed declarations leave the previous set in place
        assert_eq!(b.outputs().len(), 2);
    }

    #[test]
    fn test_require_variables() {
        let mut b = bindings();
        assert_eq!(b.require_variables(), Err(ConfigurationError::NoVariables));
        b.bind("x", 0.0, 1.0).unwrap();
        assert!(b.require_variables().is_ok());
    }

    #[test]
    fn test_clamp() {
        let v = DesignVariable {
            name: "x".to_string(),
            lower: 110.0,
            upper: 145.0,
        };
        assert_eq!(v.clamp(100.0), 110.0);
        assert_eq!(v.clamp(150.0), 145.0);
        assert_eq!(v.clamp(120.0), 120.0);
    }
}
