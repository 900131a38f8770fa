//! Per-run accounting of what metering charged.

use std::collections::BTreeMap;

/// Cost distribution gathered while instrumenting one module.
///
/// `charges` lists every spliced charge in splice order; `by_key`
/// accumulates the static cost attributed to each opcode cost key, which
/// is useful when tuning a cost table against a real workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CostReport {
    pub charges: Vec<u64>,
    pub by_key: BTreeMap<String, u64>,
}

impl CostReport {
    /// Sum of all spliced charges.
    pub fn total(&self) -> u64 {
        self.charges.iter().sum()
    }

    pub(crate) fn record_op(&mut self, key: &str, cost: u64) {
        if cost != 0 {
            *self.by_key.entry(key.to_string()).or_insert(0) += cost;
        }
    }

    pub(crate) fn record_charge(&mut self, cost: u64) {
        self.charges.push(cost);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_charges() {
        let mut report = CostReport::default();
        report.record_charge(3);
        report.record_charge(4);
        assert_eq!(report.total(), 7);
    }

    #[test]
    fn zero_cost_keys_are_not_recorded() {
        let mut report = CostReport::default();
        report.record_op("nop", 0);
        report.record_op("add", 2);
        report.record_op("add", 2);
        assert_eq!(report.by_key.get("add"), Some(&4));
        assert!(!report.by_key.contains_key("nop"));
    }
}
