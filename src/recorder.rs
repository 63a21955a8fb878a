use serde::Serialize;

use crate::model::Case;

/// Append-only log of evaluated cases, in evaluation order.
///
/// There is no removal or in-place mutation; drivers push, reporting reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CaseLog {
    cases: Vec<Case>,
}

impl CaseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            cases: Vec::with_capacity(n),
        }
    }

    pub fn record(&mut self, case: Case) {
        self.cases.push(case);
    }

    /// Iterate in insertion order. Each call starts from the first case.
    pub fn iter(&self) -> std::slice::Iter<'_, Case> {
        self.cases.iter()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn last(&self) -> Option<&Case> {
        self.cases.last()
    }

    /// Values of one input or output across the log; cases without it are
    /// skipped.
    pub fn column(&self, name: &str) -> Vec<f64> {
        self.cases.iter().filter_map(|c| c.value(name)).collect()
    }
}

impl<'a> IntoIterator for &'a CaseLog {
    type Item = &'a Case;
    type IntoIter = std::slice::Iter<'a, Case>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::point;

    fn case(x: f64, f: f64) -> Case {
        Case::new(point(&[("x", x)]), point(&[("f", f)]))
    }

    #[test]
    fn test_preserves_insertion_order() {
        let mut log = CaseLog::new();
        for (x, f) in [(3.0, 9.0), (1.0, 1.0), (2.0, 4.0), (1.0, 1.0)] {
            log.record(case(x, f));
        }

        assert_eq!(log.len(), 4);
        assert_eq!(log.column("x"), vec![3.0, 1.0, 2.0, 1.0]);
        assert_eq!(log.column("f"), vec![9.0, 1.0, 4.0, 1.0]);
        assert_eq!(log.last().unwrap().value("x"), Some(1.0));
    }

    #[test]
    fn test_iteration_is_restartable() {
        let mut log = CaseLog::with_capacity(3);
        for i in 0..3 {
            log.record(case(i as f64, (i * i) as f64));
        }

        let first: Vec<&Case> = log.iter().collect();
        let second: Vec<&Case> = (&log).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_empty_log() {
        let log = CaseLog::new();
        assert!(log.is_empty());
        assert!(log.last().is_none());
        assert!(log.column("x").is_empty());
    }
}
