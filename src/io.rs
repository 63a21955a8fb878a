use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::model::Case;
use crate::recorder::CaseLog;
use crate::sensitivity::SweepResult;

pub const DOE_POINTS_HEADER: &str = "LCOE    Diam    TipSp  TurbCost     BOSCost    OnMCost    AEP";

/// Columns of a DOE points row, in file order
pub const DOE_POINTS_COLUMNS: [&str; 7] = [
    "lcoe",
    "rotorDiameter",
    "maxTipSpeed",
    "turbineCost",
    "BOScost",
    "OnMcost",
    "aep",
];

pub const SHORT_HEADER: &str = "  LCOE      COE      AEP(mWh)     TCC(K$)     BOS(K$)      O&M(K$)";

/// Create the parent directory of `path` if it has one.
pub fn ensure_parent(path: &str) -> Result<()> {
    if let Some(dir) = Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
    }
    Ok(())
}

fn create(path: &str) -> Result<BufWriter<File>> {
    ensure_parent(path)?;
    let f = File::create(path).with_context(|| format!("creating {path}"))?;
    Ok(BufWriter::new(f))
}

fn require(case: &Case, name: &str) -> Result<f64> {
    case.value(name)
        .with_context(|| format!("case has no value for '{name}'"))
}

/// Fixed-width DOE table, one row per case
pub struct DoePointsWriter {
    w: BufWriter<File>,
}

impl DoePointsWriter {
    pub fn create(path: &str) -> Result<Self> {
        Ok(Self { w: create(path)? })
    }

    pub fn write_header(&mut self) -> Result<()> {
        writeln!(self.w, "{DOE_POINTS_HEADER}")?;
        Ok(())
    }

    pub fn write_case(&mut self, case: &Case) -> Result<()> {
        let mut v = [0.0; 7];
        for (slot, name) in v.iter_mut().zip(DOE_POINTS_COLUMNS) {
            *slot = require(case, name)?;
        }
        writeln!(
            self.w,
            "{:7.5} {:6.2} {:6.2} {:9.1} {:9.1} {:9.1} {:9.1}",
            v[0], v[1], v[2], v[3], v[4], v[5], v[6]
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()?;
        Ok(())
    }
}

/// Write a whole DOE log in evaluation order.
pub fn write_doe_points(path: &str, log: &CaseLog) -> Result<usize> {
    let mut w = DoePointsWriter::create(path)?;
    w.write_header()?;
    for case in log {
        w.write_case(case)?;
    }
    w.flush()?;
    Ok(log.len())
}

/// Case log as CSV: a `case` index, the inputs, then the outputs, with
/// columns taken from the first case. Passthrough outputs that repeat an
/// input are written once.
pub fn write_case_csv(path: &str, log: &CaseLog) -> Result<usize> {
    let mut w = create(path)?;
    let Some(first) = log.iter().next() else {
        writeln!(w, "case")?;
        w.flush()?;
        return Ok(0);
    };

    let columns: Vec<&str> = first
        .inputs
        .keys()
        .chain(first.outputs.keys().filter(|k| !first.inputs.contains_key(*k)))
        .map(String::as_str)
        .collect();
    writeln!(w, "case,{}", columns.join(","))?;

    for (i, case) in log.iter().enumerate() {
        write!(w, "{i}")?;
        for name in &columns {
            match case.value(name) {
                Some(v) => write!(w, ",{v:.10e}")?,
                None => write!(w, ",")?,
            }
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(log.len())
}

/// Long-format sensitivity table: `sweep,value,output,result`
pub fn write_sensitivity_csv(path: &str, results: &[SweepResult]) -> Result<usize> {
    let mut w = create(path)?;
    writeln!(w, "sweep,value,output,result")?;
    let mut rows = 0;
    for sweep in results {
        for case in &sweep.log {
            let value = require(case, &sweep.name)?;
            for (output, result) in &case.outputs {
                writeln!(w, "{},{:.6},{},{:.10e}", sweep.name, value, output, result)?;
                rows += 1;
            }
        }
    }
    w.flush()?;
    Ok(rows)
}

/// One-line summary, costs in k$ per turbine and energy in MWh per turbine
pub fn short_row(case: &Case, turbines: f64) -> Result<String> {
    Ok(format!(
        " {:8.5}  {:8.5}  {:10.5}  {:10.5}  {:10.5}  {:10.5}",
        require(case, "lcoe")?,
        require(case, "coe")?,
        0.001 * require(case, "aep")? / turbines,
        0.001 * require(case, "turbineCost")?,
        0.001 * require(case, "BOScost")? / turbines,
        0.001 * require(case, "OnMcost")? / turbines,
    ))
}

/// Progress line for one evaluated design
pub fn case_line(case: &Case) -> Result<String> {
    Ok(format!(
        "LCOE {:7.5} at diameter {:6.2} m TS {:6.2} mps  T {:9.1} B {:9.1} O {:9.1} A {:9.1}",
        require(case, "lcoe")?,
        require(case, "rotorDiameter")?,
        require(case, "maxTipSpeed")?,
        require(case, "turbineCost")?,
        require(case, "BOScost")?,
        require(case, "OnMcost")?,
        require(case, "aep")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::point;
    use tempfile::tempdir;

    fn doe_case(lcoe: f64, diam: f64) -> Case {
        Case::new(
            point(&[("rotorDiameter", diam), ("maxTipSpeed", 75.0)]),
            point(&[
                ("lcoe", lcoe),
                ("coe", 0.06),
                ("turbineCost", 4_700_000.0),
                ("BOScost", 115_000_000.0),
                ("OnMcost", 8_000_000.0),
                ("aep", 830_000_000.0),
                ("maxTipSpeed", 75.0),
            ]),
        )
    }

    #[test]
    fn test_doe_points_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doePts.txt");
        let path = path.to_str().unwrap();

        let mut log = CaseLog::new();
        log.record(doe_case(0.054321, 110.0));
        log.record(doe_case(0.05, 145.0));
        assert_eq!(write_doe_points(path, &log).unwrap(), 2);

        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], DOE_POINTS_HEADER);
        assert_eq!(
            lines[1],
            "0.05432 110.00  75.00 4700000.0 115000000.0 8000000.0 830000000.0"
        );
        assert!(lines[2].starts_with("0.05000 145.00"));
    }

    #[test]
    fn test_doe_points_missing_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doePts.txt");
        let mut w = DoePointsWriter::create(path.to_str().unwrap()).unwrap();
        let case = Case::new(point(&[("rotorDiameter", 120.0)]), point(&[("lcoe", 0.05)]));

        let err = w.write_case(&case).unwrap_err();
        assert!(err.to_string().contains("maxTipSpeed"));
    }

    #[test]
    fn test_case_csv_columns_and_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out/cases.csv");
        let path = path.to_str().unwrap();

        let mut log = CaseLog::new();
        log.record(Case::new(point(&[("x", 1.0)]), point(&[("f", 2.5)])));
        log.record(Case::new(point(&[("x", 2.0)]), point(&[("f", 4.0)])));
        write_case_csv(path, &log).unwrap();

        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "case,x,f");
        assert_eq!(lines.len(), 3);
        let row: Vec<f64> = lines[2].split(',').map(|s| s.parse().unwrap()).collect();
        assert_eq!(row, vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn test_empty_case_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        assert_eq!(write_case_csv(path.to_str().unwrap(), &CaseLog::new()).unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "case\n");
    }

    #[test]
    fn test_sensitivity_long_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sens.csv");

        let mut log = CaseLog::new();
        log.record(Case::new(
            point(&[("hubHeight", 70.0)]),
            point(&[("lcoe", 0.05), ("aep", 1.0e8)]),
        ));
        let results = vec![SweepResult {
            name: "hubHeight".to_string(),
            log,
        }];

        let rows = write_sensitivity_csv(path.to_str().unwrap(), &results).unwrap();
        assert_eq!(rows, 2);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("sweep,value,output,result\n"));
        assert!(text.contains("hubHeight,70.000000,lcoe,"));
    }

    #[test]
    fn test_short_row_per_turbine() {
        let row = short_row(&doe_case(0.05, 126.0), 50.0).unwrap();
        let fields: Vec<f64> = row.split_whitespace().map(|s| s.parse().unwrap()).collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], 0.05);
        assert_eq!(fields[2], 16_600.0);
        assert_eq!(fields[3], 4_700.0);
        assert_eq!(fields[4], 2_300.0);
        assert_eq!(fields[5], 160.0);
    }

    #[test]
    fn test_case_line() {
        let line = case_line(&doe_case(0.05, 126.0)).unwrap();
        assert!(line.starts_with("LCOE 0.05000 at diameter 126.00 m TS  75.00 mps"));
    }
}
