use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::csm::{FinanceInput, LcoeInput, PlantInput, TurbineInput};
use crate::doe::MAX_LEVELS;
use crate::optimize::OptimizerConfig;
use crate::sensitivity::{default_sweeps, SweepSpec, MAX_SWEEP_POINTS};

/// Every section is optional; an empty file is the reference plant.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Root {
    pub turbine: TurbineInput,
    pub plant: PlantInput,
    pub finance: FinanceInput,
    pub doe: Doe,
    pub optimizer: Optimizer,
    pub sensitivity: Sensitivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    fn check(&self, key: &str) -> Result<()> {
        if !self.lower.is_finite() || !self.upper.is_finite() {
            bail!("{key} bounds must be finite");
        }
        if self.lower >= self.upper {
            bail!("{key}.lower must be < {key}.upper");
        }
        Ok(())
    }
}

/// Second design variable paired with rotor diameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryVariable {
    #[default]
    MaxTipSpeed,
    RatedPower,
}

impl SecondaryVariable {
    pub fn from_flag(rated_power: bool) -> Self {
        if rated_power {
            SecondaryVariable::RatedPower
        } else {
            SecondaryVariable::MaxTipSpeed
        }
    }

    /// Model input name
    pub fn port(self) -> &'static str {
        match self {
            SecondaryVariable::MaxTipSpeed => "maxTipSpeed",
            SecondaryVariable::RatedPower => "ratedPower",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Doe {
    /// Grid levels per variable
    pub levels: usize,
    pub rotor_diameter: Bounds,
    pub max_tip_speed: Bounds,
    pub rated_power: Bounds,
    /// Evaluate grid points on the rayon pool
    pub parallel: bool,
}

impl Default for Doe {
    fn default() -> Self {
        Self {
            levels: 10,
            rotor_diameter: Bounds::new(110.0, 145.0),
            max_tip_speed: Bounds::new(75.0, 100.0),
            rated_power: Bounds::new(4500.0, 5400.0),
            parallel: false,
        }
    }
}

impl Doe {
    pub fn secondary_bounds(&self, secondary: SecondaryVariable) -> Bounds {
        match secondary {
            SecondaryVariable::MaxTipSpeed => self.max_tip_speed,
            SecondaryVariable::RatedPower => self.rated_power,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Optimizer {
    pub max_iter: usize,
    /// Absolute objective change threshold
    pub dabfun: f64,
    /// Relative objective change threshold
    pub delfun: f64,
    /// Consecutive stalled iterations before stopping
    pub itrm: usize,
    /// Finite-difference step, fraction of the variable span
    pub fd_step: f64,
    /// First line-search step, fraction of the variable span
    pub initial_step: f64,
    pub max_backtracks: usize,
    pub rotor_diameter: Bounds,
    pub max_tip_speed: Bounds,
    pub rated_power: Bounds,
}

impl Default for Optimizer {
    fn default() -> Self {
        let solver = OptimizerConfig::default();
        Self {
            max_iter: solver.max_iter,
            dabfun: solver.dabfun,
            delfun: solver.delfun,
            itrm: solver.itrm,
            fd_step: solver.fd_step,
            initial_step: solver.initial_step,
            max_backtracks: solver.max_backtracks,
            rotor_diameter: Bounds::new(110.0, 145.0),
            max_tip_speed: Bounds::new(75.0, 100.0),
            rated_power: Bounds::new(4500.0, 5500.0),
        }
    }
}

impl Optimizer {
    pub fn secondary_bounds(&self, secondary: SecondaryVariable) -> Bounds {
        match secondary {
            SecondaryVariable::MaxTipSpeed => self.max_tip_speed,
            SecondaryVariable::RatedPower => self.rated_power,
        }
    }

    pub fn solver(&self) -> OptimizerConfig {
        OptimizerConfig {
            max_iter: self.max_iter,
            dabfun: self.dabfun,
            delfun: self.delfun,
            itrm: self.itrm,
            fd_step: self.fd_step,
            initial_step: self.initial_step,
            max_backtracks: self.max_backtracks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Sensitivity {
    pub sweep: Vec<SweepSpec>,
    /// Also evaluate the baseline with the advanced blade on and off
    pub compare_blade: bool,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self {
            sweep: default_sweeps(),
            compare_blade: true,
        }
    }
}

impl Root {
    /// Read and parse a TOML file; returns the raw text alongside for the
    /// manifest hash.
    pub fn load(path: &str) -> Result<(Self, String)> {
        let text = fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        let cfg: Root = toml::from_str(&text).with_context(|| format!("parsing config {path}"))?;
        Ok((cfg, text))
    }

    /// Reference configuration, used when no file is given
    pub fn reference() -> (Self, String) {
        let cfg = Root::default();
        let text = toml::to_string(&cfg).unwrap_or_default();
        (cfg, text)
    }

    pub fn input(&self) -> LcoeInput {
        LcoeInput {
            turbine: self.turbine.clone(),
            plant: self.plant.clone(),
            finance: self.finance.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.input()
            .validate()
            .context("invalid [turbine], [plant] or [finance] input")?;

        if self.doe.levels < 2 || self.doe.levels > MAX_LEVELS {
            bail!("doe.levels must be in [2, {MAX_LEVELS}]");
        }
        self.doe.rotor_diameter.check("doe.rotor_diameter")?;
        self.doe.max_tip_speed.check("doe.max_tip_speed")?;
        self.doe.rated_power.check("doe.rated_power")?;

        let opt = &self.optimizer;
        if opt.max_iter == 0 || opt.max_iter > 10_000 {
            bail!("optimizer.max_iter must be in [1, 10000]");
        }
        if !(opt.dabfun > 0.0) {
            bail!("optimizer.dabfun must be positive");
        }
        if !(opt.delfun > 0.0) {
            bail!("optimizer.delfun must be positive");
        }
        if opt.itrm == 0 {
            bail!("optimizer.itrm must be >= 1");
        }
        if !(0.0 < opt.fd_step && opt.fd_step < 0.5) {
            bail!("optimizer.fd_step must be in (0, 0.5)");
        }
        if !(0.0 < opt.initial_step && opt.initial_step <= 1.0) {
            bail!("optimizer.initial_step must be in (0, 1]");
        }
        opt.rotor_diameter.check("optimizer.rotor_diameter")?;
        opt.max_tip_speed.check("optimizer.max_tip_speed")?;
        opt.rated_power.check("optimizer.rated_power")?;

        for (i, sweep) in self.sensitivity.sweep.iter().enumerate() {
            if sweep.name.is_empty() {
                bail!("sensitivity.sweep[{i}].name must not be empty");
            }
            if !(sweep.step > 0.0) || !sweep.step.is_finite() {
                bail!("sensitivity.sweep[{i}].step must be positive ({})", sweep.name);
            }
            if !(sweep.stop > sweep.start) {
                bail!("sensitivity.sweep[{i}].stop must exceed start ({})", sweep.name);
            }
            if sweep.point_count() > MAX_SWEEP_POINTS {
                bail!(
                    "sensitivity.sweep[{i}] has more than {MAX_SWEEP_POINTS} points ({})",
                    sweep.name
                );
            }
        }

        Ok(())
    }
}
