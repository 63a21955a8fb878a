//! Wind plant cost-and-scaling model
//!
//! Parametric mass and cost relations for a wind plant, evaluated in
//! dataflow order: energy production (`aep`), turbine capital cost (`tcc`),
//! balance of station (`bos`), operations and maintenance (`om`) and
//! finance (`fin`). Component relations are in September 2002 USD and are
//! escalated to the project start date.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::model::{EvalPoint, Facade, ModelError, Outputs};

/// Wind speed grid spacing for the power curve (m/s)
pub const WIND_STEP: f64 = 0.25;

const HOURS_PER_YEAR: f64 = 8760.0;

/// Reference date of the component cost relations (September 2002)
const COST_BASE_YEAR: f64 = 2002.0 + 8.0 / 12.0;

/// Annual cost escalation applied from the reference date
const ESCALATION_RATE: f64 = 0.025;

const SEA_LEVEL_DENSITY: f64 = 1.225;

/// Betz limit
const MAX_CP: f64 = 16.0 / 27.0;

pub const INPUT_NAMES: &[&str] = &[
    "ratedPower",
    "rotorDiameter",
    "maxTipSpeed",
    "drivetrainDesign",
    "hubHeight",
    "bladeNumber",
    "advancedBlade",
    "thrustCoefficient",
    "maxPowerCoefficient",
    "optTipSpeedRatio",
    "cutInWindSpeed",
    "cutOutWindSpeed",
    "crane",
    "advancedBedplate",
    "seaDepth",
    "altitude",
    "turbineNumber",
    "year",
    "month",
    "shearExponent",
    "windSpeed50m",
    "weibullK",
    "airDensity",
    "soilingLosses",
    "arrayLosses",
    "availability",
    "fixedChargeRate",
    "constructionTime",
    "projectLifetime",
    "taxRate",
    "discountRate",
];

pub const OUTPUT_NAMES: &[&str] = &[
    "lcoe",
    "coe",
    "aep",
    "aepPerTurbine",
    "capacityFactor",
    "ratedRotorSpeed",
    "ratedWindSpeed",
    "maxEfficiency",
    "turbineCost",
    "turbineMass",
    "BOScost",
    "OnMcost",
    "preventativeMaintenanceCost",
    "correctiveMaintenanceCost",
    "landLeaseCost",
    "ratedPower",
    "rotorDiameter",
    "maxTipSpeed",
    "hubHeight",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Drivetrain {
    ThreeStage,
    SingleStage,
    MultiGenerator,
    DirectDrive,
}

impl Drivetrain {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Drivetrain::ThreeStage),
            2 => Some(Drivetrain::SingleStage),
            3 => Some(Drivetrain::MultiGenerator),
            4 => Some(Drivetrain::DirectDrive),
            _ => None,
        }
    }

    /// Loss coefficients `(c1, c2, c3)`; fractional loss at load `x` of
    /// rated is `c1 / x + c2 + c3 * x`.
    fn loss_coefficients(self) -> (f64, f64, f64) {
        match self {
            Drivetrain::ThreeStage => (0.01289, 0.08510, 0.0),
            Drivetrain::SingleStage => (0.01331, 0.03655, 0.06107),
            Drivetrain::MultiGenerator => (0.01547, 0.04463, 0.05790),
            Drivetrain::DirectDrive => (0.01007, 0.02000, 0.06899),
        }
    }

    fn efficiency(self, load: f64) -> f64 {
        if load <= 0.0 {
            return 0.0;
        }
        let (c1, c2, c3) = self.loss_coefficients();
        (1.0 - (c1 / load + c2 + c3 * load)).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TurbineInput {
    /// kW
    pub rated_power: f64,
    /// m
    pub rotor_diameter: f64,
    /// m/s
    pub max_tip_speed: f64,
    /// 1 three-stage geared, 2 single-stage, 3 multi-generator, 4 direct drive
    pub drivetrain_design: u32,
    /// m
    pub hub_height: f64,
    pub blade_number: u32,
    pub advanced_blade: bool,
    pub thrust_coefficient: f64,
    pub max_power_coefficient: f64,
    pub opt_tip_speed_ratio: f64,
    pub cut_in_wind_speed: f64,
    pub cut_out_wind_speed: f64,
    pub crane: bool,
    /// 0 conventional, 1 modular, 2 integrated
    pub advanced_bedplate: u32,
}

impl Default for TurbineInput {
    fn default() -> Self {
        Self {
            rated_power: 5000.0,
            rotor_diameter: 126.0,
            max_tip_speed: 80.0,
            drivetrain_design: 1,
            hub_height: 90.0,
            blade_number: 3,
            advanced_blade: true,
            thrust_coefficient: 0.50,
            max_power_coefficient: 0.488,
            opt_tip_speed_ratio: 7.525,
            cut_in_wind_speed: 3.0,
            cut_out_wind_speed: 25.0,
            crane: true,
            advanced_bedplate: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlantInput {
    /// m; anything above zero selects the offshore relations
    pub sea_depth: f64,
    /// m
    pub altitude: f64,
    pub turbine_number: u32,
    pub year: u32,
    pub month: u32,
    pub shear_exponent: f64,
    /// Mean wind speed at 50 m (m/s)
    pub wind_speed_50m: f64,
    pub weibull_k: f64,
    /// kg/m^3; zero derives density from altitude
    pub air_density: f64,
    pub soiling_losses: f64,
    pub array_losses: f64,
    pub availability: f64,
}

impl Default for PlantInput {
    fn default() -> Self {
        Self {
            sea_depth: 0.0,
            altitude: 0.0,
            turbine_number: 50,
            year: 2009,
            month: 12,
            shear_exponent: 0.143,
            wind_speed_50m: 8.02,
            weibull_k: 2.15,
            air_density: 0.0,
            soiling_losses: 0.0,
            array_losses: 0.10,
            availability: 0.941,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FinanceInput {
    pub fixed_charge_rate: f64,
    /// years
    pub construction_time: f64,
    /// years
    pub project_lifetime: f64,
    pub tax_rate: f64,
    pub discount_rate: f64,
}

impl Default for FinanceInput {
    fn default() -> Self {
        Self {
            fixed_charge_rate: 0.12,
            construction_time: 1.0,
            project_lifetime: 20.0,
            tax_rate: 0.4,
            discount_rate: 0.07,
        }
    }
}

/// Complete input set of the plant model
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LcoeInput {
    pub turbine: TurbineInput,
    pub plant: PlantInput,
    pub finance: FinanceInput,
}

fn port(name: &str) -> Result<&'static str, ModelError> {
    INPUT_NAMES
        .iter()
        .copied()
        .find(|n| *n == name)
        .ok_or_else(|| ModelError::UnknownInput(name.to_string()))
}

fn to_count(name: &'static str, value: f64) -> Result<u32, ModelError> {
    let rounded = value.round();
    if !(0.0..=u32::MAX as f64).contains(&rounded) {
        return Err(ModelError::InvalidInput {
            name,
            value,
            reason: "must be a non-negative integer",
        });
    }
    Ok(rounded as u32)
}

impl LcoeInput {
    /// Assign one input by port name. Integer ports round, boolean ports
    /// treat any non-zero value as true.
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), ModelError> {
        let name = port(name)?;
        if !value.is_finite() {
            return Err(ModelError::InvalidInput {
                name,
                value,
                reason: "must be finite",
            });
        }
        let t = &mut self.turbine;
        let p = &mut self.plant;
        let f = &mut self.finance;
        match name {
            "ratedPower" => t.rated_power = value,
            "rotorDiameter" => t.rotor_diameter = value,
            "maxTipSpeed" => t.max_tip_speed = value,
            "drivetrainDesign" => t.drivetrain_design = to_count(name, value)?,
            "hubHeight" => t.hub_height = value,
            "bladeNumber" => t.blade_number = to_count(name, value)?,
            "advancedBlade" => t.advanced_blade = value != 0.0,
            "thrustCoefficient" => t.thrust_coefficient = value,
            "maxPowerCoefficient" => t.max_power_coefficient = value,
            "optTipSpeedRatio" => t.opt_tip_speed_ratio = value,
            "cutInWindSpeed" => t.cut_in_wind_speed = value,
            "cutOutWindSpeed" => t.cut_out_wind_speed = value,
            "crane" => t.crane = value != 0.0,
            "advancedBedplate" => t.advanced_bedplate = to_count(name, value)?,
            "seaDepth" => p.sea_depth = value,
            "altitude" => p.altitude = value,
            "turbineNumber" => p.turbine_number = to_count(name, value)?,
            "year" => p.year = to_count(name, value)?,
            "month" => p.month = to_count(name, value)?,
            "shearExponent" => p.shear_exponent = value,
            "windSpeed50m" => p.wind_speed_50m = value,
            "weibullK" => p.weibull_k = value,
            "airDensity" => p.air_density = value,
            "soilingLosses" => p.soiling_losses = value,
            "arrayLosses" => p.array_losses = value,
            "availability" => p.availability = value,
            "fixedChargeRate" => f.fixed_charge_rate = value,
            "constructionTime" => f.construction_time = value,
            "projectLifetime" => f.project_lifetime = value,
            "taxRate" => f.tax_rate = value,
            "discountRate" => f.discount_rate = value,
            _ => return Err(ModelError::UnknownInput(name.to_string())),
        }
        Ok(())
    }

    /// Read one input by port name.
    pub fn get(&self, name: &str) -> Option<f64> {
        let t = &self.turbine;
        let p = &self.plant;
        let f = &self.finance;
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let v = match name {
            "ratedPower" => t.rated_power,
            "rotorDiameter" => t.rotor_diameter,
            "maxTipSpeed" => t.max_tip_speed,
            "drivetrainDesign" => t.drivetrain_design as f64,
            "hubHeight" => t.hub_height,
            "bladeNumber" => t.blade_number as f64,
            "advancedBlade" => flag(t.advanced_blade),
            "thrustCoefficient" => t.thrust_coefficient,
            "maxPowerCoefficient" => t.max_power_coefficient,
            "optTipSpeedRatio" => t.opt_tip_speed_ratio,
            "cutInWindSpeed" => t.cut_in_wind_speed,
            "cutOutWindSpeed" => t.cut_out_wind_speed,
            "crane" => flag(t.crane),
            "advancedBedplate" => t.advanced_bedplate as f64,
            "seaDepth" => p.sea_depth,
            "altitude" => p.altitude,
            "turbineNumber" => p.turbine_number as f64,
            "year" => p.year as f64,
            "month" => p.month as f64,
            "shearExponent" => p.shear_exponent,
            "windSpeed50m" => p.wind_speed_50m,
            "weibullK" => p.weibull_k,
            "airDensity" => p.air_density,
            "soilingLosses" => p.soiling_losses,
            "arrayLosses" => p.array_losses,
            "availability" => p.availability,
            "fixedChargeRate" => f.fixed_charge_rate,
            "constructionTime" => f.construction_time,
            "projectLifetime" => f.project_lifetime,
            "taxRate" => f.tax_rate,
            "discountRate" => f.discount_rate,
            _ => return None,
        };
        Some(v)
    }

    pub fn is_offshore(&self) -> bool {
        self.plant.sea_depth > 0.0
    }

    /// Reject non-physical inputs before any sub-model runs.
    pub fn validate(&self) -> Result<Drivetrain, ModelError> {
        for &name in INPUT_NAMES {
            if let Some(value) = self.get(name) {
                if !value.is_finite() {
                    return Err(ModelError::InvalidInput {
                        name,
                        value,
                        reason: "must be finite",
                    });
                }
            }
        }

        let t = &self.turbine;
        let p = &self.plant;
        let f = &self.finance;
        let check = |ok: bool, name: &'static str, value: f64, reason: &'static str| {
            if ok {
                Ok(())
            } else {
                Err(ModelError::InvalidInput {
                    name,
                    value,
                    reason,
                })
            }
        };

        check(t.rated_power > 0.0, "ratedPower", t.rated_power, "must be positive")?;
        check(t.rotor_diameter > 0.0, "rotorDiameter", t.rotor_diameter, "must be positive")?;
        check(t.max_tip_speed > 0.0, "maxTipSpeed", t.max_tip_speed, "must be positive")?;
        check(t.hub_height > 0.0, "hubHeight", t.hub_height, "must be positive")?;
        check(
            t.hub_height > 0.5 * t.rotor_diameter,
            "hubHeight",
            t.hub_height,
            "must exceed the rotor radius",
        )?;
        check(t.blade_number >= 1, "bladeNumber", t.blade_number as f64, "must be at least 1")?;
        check(
            t.thrust_coefficient > 0.0 && t.thrust_coefficient <= 1.0,
            "thrustCoefficient",
            t.thrust_coefficient,
            "must be in (0, 1]",
        )?;
        check(
            t.max_power_coefficient > 0.0 && t.max_power_coefficient <= MAX_CP,
            "maxPowerCoefficient",
            t.max_power_coefficient,
            "must be in (0, 16/27]",
        )?;
        check(
            t.opt_tip_speed_ratio > 0.0,
            "optTipSpeedRatio",
            t.opt_tip_speed_ratio,
            "must be positive",
        )?;
        check(
            t.cut_in_wind_speed >= 0.0,
            "cutInWindSpeed",
            t.cut_in_wind_speed,
            "must be non-negative",
        )?;
        check(
            t.cut_out_wind_speed > t.cut_in_wind_speed,
            "cutOutWindSpeed",
            t.cut_out_wind_speed,
            "must exceed cutInWindSpeed",
        )?;
        check(
            t.advanced_bedplate <= 2,
            "advancedBedplate",
            t.advanced_bedplate as f64,
            "must be 0, 1 or 2",
        )?;
        let drivetrain = Drivetrain::from_code(t.drivetrain_design).ok_or(ModelError::InvalidInput {
            name: "drivetrainDesign",
            value: t.drivetrain_design as f64,
            reason: "must be 1, 2, 3 or 4",
        })?;

        check(p.sea_depth >= 0.0, "seaDepth", p.sea_depth, "must be non-negative")?;
        check(p.altitude < 10_000.0, "altitude", p.altitude, "must be below 10 km")?;
        check(p.turbine_number >= 1, "turbineNumber", p.turbine_number as f64, "must be at least 1")?;
        check((1..=12).contains(&p.month), "month", p.month as f64, "must be in 1..=12")?;
        check(p.year >= 1900, "year", p.year as f64, "must be a calendar year")?;
        check(p.shear_exponent >= 0.0, "shearExponent", p.shear_exponent, "must be non-negative")?;
        check(p.wind_speed_50m > 0.0, "windSpeed50m", p.wind_speed_50m, "must be positive")?;
        check(p.weibull_k > 0.0, "weibullK", p.weibull_k, "must be positive")?;
        check(p.air_density >= 0.0, "airDensity", p.air_density, "must be non-negative")?;
        check(
            (0.0..1.0).contains(&p.soiling_losses),
            "soilingLosses",
            p.soiling_losses,
            "must be in [0, 1)",
        )?;
        check(
            (0.0..1.0).contains(&p.array_losses),
            "arrayLosses",
            p.array_losses,
            "must be in [0, 1)",
        )?;
        check(
            p.availability > 0.0 && p.availability <= 1.0,
            "availability",
            p.availability,
            "must be in (0, 1]",
        )?;

        check(
            f.fixed_charge_rate >= 0.0,
            "fixedChargeRate",
            f.fixed_charge_rate,
            "must be non-negative",
        )?;
        check(
            f.construction_time >= 0.0,
            "constructionTime",
            f.construction_time,
            "must be non-negative",
        )?;
        check(
            f.project_lifetime >= 1.0,
            "projectLifetime",
            f.project_lifetime,
            "must be at least one year",
        )?;
        check((0.0..1.0).contains(&f.tax_rate), "taxRate", f.tax_rate, "must be in [0, 1)")?;
        check(f.discount_rate >= 0.0, "discountRate", f.discount_rate, "must be non-negative")?;

        Ok(drivetrain)
    }

    /// Run every sub-model in order.
    pub fn evaluate(&self) -> Result<LcoeOutput, ModelError> {
        let drivetrain = self.validate()?;
        let escalation = escalation(self.plant.year, self.plant.month);

        let aep = aep(self, drivetrain)?;
        let tcc = tcc(self, drivetrain, &aep, escalation);
        let bos = bos(self, &tcc, escalation);
        let om = om(self, &aep, escalation);
        let fin = fin(self, &aep, &tcc, &bos, &om);

        let out = LcoeOutput {
            lcoe: fin.lcoe,
            coe: fin.coe,
            aep: aep.aep,
            aep_per_turbine: aep.aep_per_turbine,
            capacity_factor: aep.capacity_factor,
            rated_rotor_speed: aep.rated_rotor_speed,
            rated_wind_speed: aep.rated_wind_speed,
            max_efficiency: aep.max_efficiency,
            turbine_cost: tcc.turbine_cost,
            turbine_mass: tcc.turbine_mass,
            bos_cost: bos.bos_cost,
            om_cost: om.total(),
            preventative_maintenance_cost: om.preventative,
            corrective_maintenance_cost: om.corrective,
            land_lease_cost: om.land_lease,
            rated_power: self.turbine.rated_power,
            rotor_diameter: self.turbine.rotor_diameter,
            max_tip_speed: self.turbine.max_tip_speed,
            hub_height: self.turbine.hub_height,
            power_curve: aep.power_curve,
        };

        for name in OUTPUT_NAMES {
            if let Some(v) = out.get(name) {
                if !v.is_finite() {
                    return Err(ModelError::NonFinite(name.to_string()));
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LcoeOutput {
    /// Levelized cost of energy ($/kWh)
    pub lcoe: f64,
    /// Fixed-charge-rate cost of energy ($/kWh)
    pub coe: f64,
    /// Plant annual energy production (kWh)
    pub aep: f64,
    pub aep_per_turbine: f64,
    pub capacity_factor: f64,
    /// rpm
    pub rated_rotor_speed: f64,
    /// m/s
    pub rated_wind_speed: f64,
    pub max_efficiency: f64,
    /// Per turbine ($)
    pub turbine_cost: f64,
    /// Per turbine (kg)
    pub turbine_mass: f64,
    /// Plant total ($)
    #[serde(rename = "BOScost")]
    pub bos_cost: f64,
    /// Plant total per year ($)
    #[serde(rename = "OnMcost")]
    pub om_cost: f64,
    pub preventative_maintenance_cost: f64,
    pub corrective_maintenance_cost: f64,
    pub land_lease_cost: f64,
    pub rated_power: f64,
    pub rotor_diameter: f64,
    pub max_tip_speed: f64,
    pub hub_height: f64,
    /// `(wind speed m/s, electrical power kW)`
    pub power_curve: Vec<(f64, f64)>,
}

impl LcoeOutput {
    pub fn get(&self, name: &str) -> Option<f64> {
        let v = match name {
            "lcoe" => self.lcoe,
            "coe" => self.coe,
            "aep" => self.aep,
            "aepPerTurbine" => self.aep_per_turbine,
            "capacityFactor" => self.capacity_factor,
            "ratedRotorSpeed" => self.rated_rotor_speed,
            "ratedWindSpeed" => self.rated_wind_speed,
            "maxEfficiency" => self.max_efficiency,
            "turbineCost" => self.turbine_cost,
            "turbineMass" => self.turbine_mass,
            "BOScost" => self.bos_cost,
            "OnMcost" => self.om_cost,
            "preventativeMaintenanceCost" => self.preventative_maintenance_cost,
            "correctiveMaintenanceCost" => self.corrective_maintenance_cost,
            "landLeaseCost" => self.land_lease_cost,
            "ratedPower" => self.rated_power,
            "rotorDiameter" => self.rotor_diameter,
            "maxTipSpeed" => self.max_tip_speed,
            "hubHeight" => self.hub_height,
            _ => return None,
        };
        Some(v)
    }

    /// Scalar outputs keyed by port name
    pub fn to_outputs(&self) -> Outputs {
        OUTPUT_NAMES
            .iter()
            .filter_map(|name| self.get(name).map(|v| (name.to_string(), v)))
            .collect()
    }
}

/// Cost escalation factor from the reference date to the project start.
pub fn escalation(year: u32, month: u32) -> f64 {
    let t = year as f64 + (month as f64 - 1.0) / 12.0;
    (1.0 + ESCALATION_RATE).powf(t - COST_BASE_YEAR)
}

// ============================================================================
// Energy production
// ============================================================================

#[derive(Debug, Clone)]
struct AepOutput {
    aep: f64,
    aep_per_turbine: f64,
    capacity_factor: f64,
    rated_rotor_speed: f64,
    rated_wind_speed: f64,
    max_efficiency: f64,
    rated_hub_power: f64,
    power_curve: Vec<(f64, f64)>,
}

/// Natural log of the gamma function (Lanczos, g = 7)
fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = COEF[0];
    let t = x + G + 0.5;
    for (i, c) in COEF.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Air density from altitude, standard atmosphere
fn density_at(altitude: f64) -> f64 {
    SEA_LEVEL_DENSITY * (1.0 - 2.255_77e-5 * altitude).powf(4.2559)
}

struct Rotor {
    area: f64,
    density: f64,
    max_cp: f64,
    opt_tsr: f64,
    max_tip_speed: f64,
    rated_hub_power: f64,
    rated_power: f64,
    drivetrain: Drivetrain,
}

impl Rotor {
    /// Electrical power (kW) at hub-height wind speed `v`
    fn power(&self, v: f64) -> f64 {
        if v <= 0.0 {
            return 0.0;
        }
        let tsr = self.opt_tsr.min(self.max_tip_speed / v);
        let off = (tsr - self.opt_tsr) / self.opt_tsr;
        let cp = (self.max_cp * (1.0 - off * off)).max(0.0);
        let aero = 0.5 * self.density * self.area * v.powi(3) * cp / 1000.0;
        let hub = aero.min(self.rated_hub_power);
        let elec = hub * self.drivetrain.efficiency(hub / self.rated_hub_power);
        elec.min(self.rated_power)
    }

    /// Lowest wind speed reaching rated power, or `upper` if it never does
    fn rated_wind_speed(&self, lower: f64, upper: f64) -> f64 {
        if self.power(upper) < self.rated_power * (1.0 - 1e-9) {
            return upper;
        }
        let (mut lo, mut hi) = (lower, upper);
        for _ in 0..60 {
            let mid = 0.5 * (lo + hi);
            if self.power(mid) < self.rated_power * (1.0 - 1e-9) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        hi
    }
}

fn aep(input: &LcoeInput, drivetrain: Drivetrain) -> Result<AepOutput, ModelError> {
    let t = &input.turbine;
    let p = &input.plant;

    let (c1, c2, c3) = drivetrain.loss_coefficients();
    let max_efficiency = 1.0 - (c1 + c2 + c3);
    let rated_hub_power = t.rated_power / max_efficiency;
    let radius = 0.5 * t.rotor_diameter;

    let density = if p.air_density > 0.0 {
        p.air_density
    } else {
        density_at(p.altitude)
    };
    let rotor = Rotor {
        area: PI * radius * radius,
        density,
        max_cp: t.max_power_coefficient,
        opt_tsr: t.opt_tip_speed_ratio,
        max_tip_speed: t.max_tip_speed,
        rated_hub_power,
        rated_power: t.rated_power,
        drivetrain,
    };

    let hub_speed = p.wind_speed_50m * (t.hub_height / 50.0).powf(p.shear_exponent);
    let scale = hub_speed / ln_gamma(1.0 + 1.0 / p.weibull_k).exp();
    let exceed = |v: f64| (-(v.max(0.0) / scale).powf(p.weibull_k)).exp();

    let n = ((t.cut_out_wind_speed - t.cut_in_wind_speed) / WIND_STEP + 1e-9).floor() as usize + 1;
    let mut power_curve = Vec::with_capacity(n);
    let mut mean_power = 0.0;
    for i in 0..n {
        let v = t.cut_in_wind_speed + i as f64 * WIND_STEP;
        let power = rotor.power(v);
        let prob = exceed(v - 0.5 * WIND_STEP) - exceed(v + 0.5 * WIND_STEP);
        mean_power += power * prob;
        power_curve.push((v, power));
    }

    let loss_factor = (1.0 - p.soiling_losses) * (1.0 - p.array_losses) * p.availability;
    let aep_per_turbine = mean_power * HOURS_PER_YEAR * loss_factor;
    if !(aep_per_turbine > 0.0) {
        return Err(ModelError::NoEnergy);
    }

    Ok(AepOutput {
        aep: aep_per_turbine * p.turbine_number as f64,
        aep_per_turbine,
        capacity_factor: aep_per_turbine / (t.rated_power * HOURS_PER_YEAR),
        rated_rotor_speed: t.max_tip_speed / radius * 30.0 / PI,
        rated_wind_speed: rotor.rated_wind_speed(t.cut_in_wind_speed, t.cut_out_wind_speed),
        max_efficiency,
        rated_hub_power,
        power_curve,
    })
}

// ============================================================================
// Turbine capital cost
// ============================================================================

#[derive(Debug, Clone)]
struct TccOutput {
    /// Escalated, per turbine
    turbine_cost: f64,
    turbine_mass: f64,
}

/// Mass (kg) and cost (2002 USD) of one component
#[derive(Debug, Clone, Copy, Default)]
struct Component {
    mass: f64,
    cost: f64,
}

impl std::ops::Add for Component {
    type Output = Component;

    fn add(self, rhs: Component) -> Component {
        Component {
            mass: self.mass + rhs.mass,
            cost: self.cost + rhs.cost,
        }
    }
}

fn rotor(input: &LcoeInput) -> Component {
    let t = &input.turbine;
    let d = t.rotor_diameter;
    let r = 0.5 * d;
    let blades = t.blade_number as f64;

    let blade = if t.advanced_blade {
        Component {
            mass: 0.4948 * r.powf(2.53),
            cost: (0.4019 * r.powi(3) - 21_051.0 + 2.7445 * r.powf(2.5025)) / (1.0 - 0.28),
        }
    } else {
        Component {
            mass: 0.1452 * r.powf(2.9158),
            cost: (0.4019 * r.powi(3) - 955.24 + 2.7445 * r.powf(2.5025)) / (1.0 - 0.28),
        }
    };
    let blade_cost = blade.cost.max(0.0);

    let hub_mass = 0.954 * blade.mass + 5680.3;
    let hub = Component {
        mass: hub_mass,
        cost: 4.25 * hub_mass,
    };

    let bearing_mass = 0.1295 * blade.mass * blades + 491.31;
    let pitch = Component {
        mass: bearing_mass * 1.328 + 555.0,
        cost: 2.28 * (0.2106 * d.powf(2.6578)),
    };

    let cone_mass = (18.5 * d - 520.5).max(0.0);
    let spinner = Component {
        mass: cone_mass,
        cost: 5.57 * cone_mass,
    };

    Component {
        mass: blade.mass * blades,
        cost: blade_cost * blades,
    } + hub
        + pitch
        + spinner
}

fn nacelle(input: &LcoeInput, drivetrain: Drivetrain, aep: &AepOutput) -> Component {
    let t = &input.turbine;
    let d = t.rotor_diameter;
    let power = t.rated_power;
    // kN m
    let torque = aep.rated_hub_power / (aep.rated_rotor_speed * PI / 30.0);

    let low_speed_shaft = Component {
        mass: 0.0142 * d.powf(2.888),
        cost: 0.01 * d.powf(2.887),
    };

    let bearing_mass = (d * 8.0 / 600.0 - 0.033) * 0.0092 * d.powf(2.5);
    let main_bearings = Component {
        mass: bearing_mass,
        cost: 2.0 * bearing_mass * 17.6,
    };

    let gearbox = match drivetrain {
        Drivetrain::ThreeStage => Component {
            mass: 70.94 * torque.powf(0.759),
            cost: 16.45 * power.powf(1.249),
        },
        Drivetrain::SingleStage => Component {
            mass: 88.29 * torque.powf(0.774),
            cost: 74.1 * power,
        },
        Drivetrain::MultiGenerator => Component {
            mass: 139.69 * torque.powf(0.774),
            cost: 15.26 * power.powf(1.249),
        },
        Drivetrain::DirectDrive => Component::default(),
    };

    let generator = match drivetrain {
        Drivetrain::ThreeStage => Component {
            mass: 6.47 * power.powf(0.9223),
            cost: 65.0 * power,
        },
        Drivetrain::SingleStage => Component {
            mass: 10.51 * power.powf(0.9223),
            cost: 54.73 * power,
        },
        Drivetrain::MultiGenerator => Component {
            mass: 5.34 * power.powf(0.9223),
            cost: 48.03 * power,
        },
        Drivetrain::DirectDrive => Component {
            mass: 661.25 * torque.powf(0.606),
            cost: 219.33 * power,
        },
    };

    let brake_cost = 1.9894 * power - 0.1141;
    let brake = Component {
        mass: 0.1 * brake_cost,
        cost: brake_cost,
    };

    let electronics = Component {
        mass: 0.0,
        cost: 79.0 * power,
    };

    let yaw = Component {
        mass: 1.6 * (0.0009 * d.powf(3.314)),
        cost: 2.0 * (0.0339 * d.powf(2.964)),
    };

    let bedplate_factor = match t.advanced_bedplate {
        0 => 1.0,
        1 => 0.9,
        _ => 0.8,
    };
    let mut mainframe = match drivetrain {
        Drivetrain::ThreeStage => Component {
            mass: 2.233 * d.powf(1.953),
            cost: 9.489 * d.powf(1.953),
        },
        Drivetrain::SingleStage => Component {
            mass: 1.295 * d.powf(1.953),
            cost: 303.96 * d.powf(1.067),
        },
        Drivetrain::MultiGenerator => Component {
            mass: 1.721 * d.powf(1.953),
            cost: 17.92 * d.powf(1.672),
        },
        Drivetrain::DirectDrive => Component {
            mass: 1.228 * d.powf(1.953),
            cost: 627.28 * d.powf(0.85),
        },
    };
    mainframe.mass *= bedplate_factor;
    mainframe.cost *= bedplate_factor;

    let platform_mass = 0.125 * mainframe.mass;
    let platforms = Component {
        mass: platform_mass,
        cost: 8.7 * platform_mass,
    };
    let crane = if t.crane {
        Component {
            mass: 3000.0,
            cost: 12_000.0,
        }
    } else {
        Component::default()
    };

    let electrical = Component {
        mass: 0.0,
        cost: 40.0 * power,
    };
    let hydraulics = Component {
        mass: 0.08 * power,
        cost: 12.0 * power,
    };
    let cover_cost = 11.537 * power + 3849.7;
    let cover = Component {
        mass: cover_cost / 10.0,
        cost: cover_cost,
    };
    let controls = Component {
        mass: 0.0,
        cost: if input.is_offshore() { 55_000.0 } else { 35_000.0 },
    };

    low_speed_shaft
        + main_bearings
        + gearbox
        + generator
        + brake
        + electronics
        + yaw
        + mainframe
        + platforms
        + crane
        + electrical
        + hydraulics
        + cover
        + controls
}

fn tower(input: &LcoeInput) -> Component {
    let t = &input.turbine;
    let area = 0.25 * PI * t.rotor_diameter * t.rotor_diameter;
    let mass = (0.3973 * area * t.hub_height - 1414.0).max(0.0);
    Component {
        mass,
        cost: 1.5 * mass,
    }
}

fn tcc(input: &LcoeInput, drivetrain: Drivetrain, aep: &AepOutput, escalation: f64) -> TccOutput {
    let total = rotor(input) + nacelle(input, drivetrain, aep) + tower(input);
    TccOutput {
        turbine_cost: total.cost * escalation,
        turbine_mass: total.mass,
    }
}

// ============================================================================
// Balance of station
// ============================================================================

#[derive(Debug, Clone)]
struct BosOutput {
    /// Escalated, plant total
    bos_cost: f64,
}

fn bos(input: &LcoeInput, tcc: &TccOutput, escalation: f64) -> BosOutput {
    let t = &input.turbine;
    let p = &input.plant;
    let n = p.turbine_number as f64;
    let power = t.rated_power;
    let area = 0.25 * PI * t.rotor_diameter * t.rotor_diameter;

    let transportation = power * (1.581e-5 * power * power - 0.0375 * power + 54.7);

    let per_turbine = if input.is_offshore() {
        let support = 300.0 * power * (p.sea_depth / 20.0).max(0.5).sqrt();
        let port_staging = 20.0 * power;
        let installation = 100.0 * power;
        let electrical = 260.0 * power;
        let permits = 37.0 * power;
        let access = 60.0 * power;
        let scour = 55.0 * power;
        // turbine cost is already escalated
        let marinization = 0.135 * tcc.turbine_cost / escalation;
        support
            + transportation
            + port_staging
            + installation
            + electrical
            + permits
            + access
            + scour
            + marinization
    } else {
        let thrust_scale = (t.thrust_coefficient / 0.5).powf(0.4037);
        let foundation = 303.24 * (t.hub_height * area).powf(0.4037) * thrust_scale;
        let roads = power * (2.17e-6 * power * power - 0.0145 * power + 69.54);
        let assembly = 1.965 * (t.hub_height * t.rotor_diameter).powf(1.1736);
        let electrical = power * (3.49e-6 * power * power - 0.0221 * power + 109.7);
        let permits = power * (9.94e-4 * power + 20.31);
        foundation + transportation + roads + assembly + electrical + permits
    };

    BosOutput {
        bos_cost: per_turbine.max(0.0) * n * escalation,
    }
}

// ============================================================================
// Operations and maintenance
// ============================================================================

#[derive(Debug, Clone)]
struct OmOutput {
    preventative: f64,
    corrective: f64,
    land_lease: f64,
}

impl OmOutput {
    fn total(&self) -> f64 {
        self.preventative + self.corrective + self.land_lease
    }
}

fn om(input: &LcoeInput, aep: &AepOutput, escalation: f64) -> OmOutput {
    let installed_kw = input.turbine.rated_power * input.plant.turbine_number as f64;
    // $/kWh, $/kW-yr, $/kWh
    let (om_rate, replacement_rate, lease_rate) = if input.is_offshore() {
        (0.020, 17.0, 0.0)
    } else {
        (0.007, 10.7, 0.001_08)
    };
    OmOutput {
        preventative: om_rate * aep.aep * escalation,
        corrective: replacement_rate * installed_kw * escalation,
        land_lease: lease_rate * aep.aep * escalation,
    }
}

// ============================================================================
// Finance
// ============================================================================

#[derive(Debug, Clone)]
struct FinOutput {
    coe: f64,
    lcoe: f64,
}

fn fin(
    input: &LcoeInput,
    aep: &AepOutput,
    tcc: &TccOutput,
    bos: &BosOutput,
    om: &OmOutput,
) -> FinOutput {
    let f = &input.finance;
    let capital = tcc.turbine_cost * input.plant.turbine_number as f64 + bos.bos_cost;
    let after_tax = 1.0 - f.tax_rate;
    let annual = om.corrective + (om.preventative + om.land_lease) * after_tax;

    let coe = (f.fixed_charge_rate * capital + annual) / aep.aep;

    let r = f.discount_rate;
    let annuity = if r > 0.0 {
        (1.0 - (1.0 + r).powf(-f.project_lifetime)) / r
    } else {
        f.project_lifetime
    };
    let financed = capital * (1.0 + r).powf(f.construction_time);
    let lcoe = financed / (aep.aep * annuity) + annual / aep.aep;

    FinOutput { coe, lcoe }
}

// ============================================================================
// Facade
// ============================================================================

/// The plant model behind the driver seam. Points override `base` by port
/// name; every other input keeps its base value.
#[derive(Debug, Clone, Default)]
pub struct LcoeAssembly {
    pub base: LcoeInput,
}

impl LcoeAssembly {
    pub fn new(base: LcoeInput) -> Self {
        Self { base }
    }

    /// Base input with `point` applied
    pub fn input_at(&self, point: &EvalPoint) -> Result<LcoeInput, ModelError> {
        let mut input = self.base.clone();
        for (name, value) in point {
            input.set(name, *value)?;
        }
        Ok(input)
    }

    /// Full typed result at `point`
    pub fn solve(&self, point: &EvalPoint) -> Result<LcoeOutput, ModelError> {
        self.input_at(point)?.evaluate()
    }
}

impl Facade for LcoeAssembly {
    fn input_names(&self) -> &[&'static str] {
        INPUT_NAMES
    }

    fn output_names(&self) -> &[&'static str] {
        OUTPUT_NAMES
    }

    fn baseline(&self, name: &str) -> Option<f64> {
        self.base.get(name)
    }

    fn evaluate(&self, point: &EvalPoint) -> Result<Outputs, ModelError> {
        Ok(self.solve(point)?.to_outputs())
    }
}
