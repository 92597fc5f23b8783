//! Join of consolidated expenses against the registry, with tax-id checks.

use serde::Serialize;
use std::collections::HashMap;

use crate::cnpj::is_valid_cnpj;
use crate::consolidate::ConsolidatedExpenseRecord;
use crate::registry::RegistryEntry;

/// A consolidated expense joined with its registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord<'a> {
    pub expense: &'a ConsolidatedExpenseRecord,
    pub entry: &'a RegistryEntry,
    pub tax_id_valid: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentStats {
    pub expense_records: usize,
    pub unmatched_expense_records: usize,
    pub invalid_tax_id_records: usize,
    pub valid_records: usize,
}

/// Inner join on registry id. Expenses for ids absent from the registry are
/// dropped (and counted); joined rows carry the tax-id validity flag.
pub fn enrich<'a>(
    expenses: &'a [ConsolidatedExpenseRecord],
    registry: &'a [RegistryEntry],
) -> (Vec<EnrichedRecord<'a>>, EnrichmentStats) {
    let by_id: HashMap<&str, &RegistryEntry> = registry
        .iter()
        .map(|e| (e.registry_id.as_str(), e))
        .collect();

    let mut stats = EnrichmentStats {
        expense_records: expenses.len(),
        ..Default::default()
    };
    let mut joined = Vec::with_capacity(expenses.len());

    for expense in expenses {
        let Some(entry) = by_id.get(expense.registry_id.as_str()).copied() else {
            stats.unmatched_expense_records += 1;
            continue;
        };

        let tax_id_valid = is_valid_cnpj(&entry.tax_id);
        if tax_id_valid {
            stats.valid_records += 1;
        } else {
            stats.invalid_tax_id_records += 1;
        }

        joined.push(EnrichedRecord {
            expense,
            entry,
            tax_id_valid,
        });
    }

    (joined, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expense(id: &str, quarter: u8, value: f64) -> ConsolidatedExpenseRecord {
        ConsolidatedExpenseRecord {
            registry_id: id.to_string(),
            year: 2024,
            quarter,
            expense_value: value,
        }
    }

    fn entry(id: &str, tax_id: &str, name: &str) -> RegistryEntry {
        RegistryEntry {
            registry_id: id.to_string(),
            tax_id: tax_id.to_string(),
            legal_name: name.to_string(),
            region: "SP".to_string(),
        }
    }

    #[test]
    fn test_inner_join_and_validity() {
        let expenses = vec![
            expense("123", 1, 100.5),
            expense("123", 2, 50.0),
            expense("999", 1, 7.0),
            expense("456", 1, 3.0),
        ];
        let registry = vec![
            entry("123", "11222333000181", "ACME SAUDE"),
            entry("456", "11222333000182", "BAD CNPJ"),
            entry("789", "33000167000101", "NO EXPENSES"),
        ];

        let (joined, stats) = enrich(&expenses, &registry);

        assert_eq!(joined.len(), 3);
        assert!(joined[0].tax_id_valid);
        assert_eq!(joined[0].entry.legal_name, "ACME SAUDE");
        assert_eq!(joined[1].expense.quarter, 2);
        assert!(!joined[2].tax_id_valid);
        assert_eq!(
            stats,
            EnrichmentStats {
                expense_records: 4,
                unmatched_expense_records: 1,
                invalid_tax_id_records: 1,
                valid_records: 2,
            }
        );
    }

    #[test]
    fn test_registry_ids_never_in_expenses_are_ignored() {
        let registry = vec![entry("1", "11222333000181", "A")];
        let (joined, stats) = enrich(&[], &registry);
        assert!(joined.is_empty());
        assert_eq!(stats, EnrichmentStats::default());
    }

    #[test]
    fn test_join_is_exact_on_id() {
        let expenses = vec![expense("0123", 1, 1.0)];
        let registry = vec![entry("123", "11222333000181", "A")];
        let (joined, stats) = enrich(&expenses, &registry);
        assert!(joined.is_empty());
        assert_eq!(stats.unmatched_expense_records, 1);
    }
}
