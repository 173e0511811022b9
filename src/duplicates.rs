// src/duplicates.rs

use serde::Serialize;
use std::collections::HashMap;

/// Values that occur more than once in a list, and how many such values there are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    pub count: usize,
    /// Each duplicated value once, in order of first appearance.
    pub names: Vec<String>,
}

/// Count the distinct values with multiplicity >= 2.
///
/// Comparison is exact: inputs are expected to be trimmed already by the
/// field extractor, and case differences count as different names.
pub fn count_duplicates(items: &[String]) -> DuplicateReport {
    let mut freq: HashMap<&str, usize> = HashMap::with_capacity(items.len());
    let mut order: Vec<&str> = Vec::new();

    for item in items {
        let seen = freq.entry(item.as_str()).or_insert(0);
        if *seen == 0 {
            order.push(item.as_str());
        }
        *seen += 1;
    }

    let names: Vec<String> = order
        .into_iter()
        .filter(|name| freq[name] > 1)
        .map(str::to_string)
        .collect();

    DuplicateReport {
        count: names.len(),
        names,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_counts_distinct_repeated_values() {
        let report = count_duplicates(&strings(&["a", "b", "a", "c", "b", "a"]));
        assert_eq!(report.count, 2);
        assert_eq!(report.names, strings(&["a", "b"]));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(count_duplicates(&[]), DuplicateReport::default());
    }

    #[test]
    fn test_no_repeats() {
        let report = count_duplicates(&strings(&["Lim", "Tan", "Low"]));
        assert_eq!(report.count, 0);
        assert!(report.names.is_empty());
    }

    #[test]
    fn test_exact_string_equality() {
        // "lim" and "Lim " are different values here
        let report = count_duplicates(&strings(&["Lim", "lim", "Lim ", "Lim"]));
        assert_eq!(report.names, strings(&["Lim"]));
    }

    #[test]
    fn test_order_independent_membership() {
        let a = count_duplicates(&strings(&["x", "y", "x", "y"]));
        let b = count_duplicates(&strings(&["y", "x", "y", "x"]));
        assert_eq!(a.count, b.count);
        let mut an = a.names.clone();
        let mut bn = b.names.clone();
        an.sort();
        bn.sort();
        assert_eq!(an, bn);
    }
}
