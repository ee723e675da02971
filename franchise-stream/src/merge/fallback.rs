//! Deterministic fallback merge
//!
//! Applies a batch one record at a time, in order, each record against the
//! table as left by the records before it:
//! 1. first existing entry whose address matches wins (no scoring)
//! 2. on a match: keep the longer address (ties keep the existing one),
//!    take the new phone unless it is missing, add the new source
//! 3. otherwise append a new entry
//!
//! Pure function of its inputs; safe to retry.

use franchise_common::models::{MasterTable, MergedEntry, SourceSet, SourcedLocation};
use franchise_common::normalize_phone;
use franchise_common::phone::is_missing;

use super::matcher::AddressMatcher;

/// Fold a batch into the table without any external collaborator
pub fn fallback_merge(
    table: &MasterTable,
    batch: &[SourcedLocation],
    matcher: AddressMatcher,
) -> MasterTable {
    if batch.is_empty() {
        return table.clone();
    }

    let mut entries = table.entries().to_vec();
    for record in batch {
        apply_record(&mut entries, record, matcher);
    }
    MasterTable::from_entries(entries)
}

fn apply_record(entries: &mut Vec<MergedEntry>, record: &SourcedLocation, matcher: AddressMatcher) {
    let position = entries
        .iter()
        .position(|entry| matcher.matches(&record.address, &entry.address));

    let Some(index) = position else {
        entries.push(MergedEntry::new(
            record.address.clone(),
            normalize_phone(&record.phone_number),
            SourceSet::single(record.source.as_str()),
        ));
        return;
    };

    let entry = &mut entries[index];
    if record.address.chars().count() > entry.address.chars().count() {
        entry.address = record.address.clone();
    }
    entry.phone_number = if is_missing(&record.phone_number) {
        normalize_phone(&entry.phone_number)
    } else {
        normalize_phone(&record.phone_number)
    };
    entry.sources.insert(record.source.as_str());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: &str, phone: &str, source: &str) -> SourcedLocation {
        SourcedLocation::new(address, phone, source)
    }

    fn merge(table: &MasterTable, batch: &[SourcedLocation]) -> MasterTable {
        fallback_merge(table, batch, AddressMatcher::Containment)
    }

    #[test]
    fn test_first_record_into_empty_table() {
        let table = merge(
            &MasterTable::new(),
            &[record("123 Main St, NY", "(212) 555-0123", "A")],
        );

        assert_eq!(
            table.entries(),
            &[MergedEntry::new("123 Main St, NY", "+1 212-555-0123", SourceSet::single("A"))]
        );
    }

    #[test]
    fn test_duplicate_keeps_longer_address_and_existing_phone() {
        let table = merge(
            &MasterTable::new(),
            &[record("123 Main St, NY", "(212) 555-0123", "A")],
        );
        let table = merge(&table, &[record("123 Main St, NY 10001", "N/A", "B")]);

        assert_eq!(table.len(), 1);
        let entry = &table.entries()[0];
        assert_eq!(entry.address, "123 Main St, NY 10001");
        assert_eq!(entry.phone_number, "+1 212-555-0123");
        assert_eq!(entry.sources.iter().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_reformatted_address_without_containment_stays_separate() {
        let table = merge(
            &MasterTable::new(),
            &[record("123 Main St, NY", "(212) 555-0123", "A")],
        );
        let table = merge(&table, &[record("123 Main Street, New York", "N/A", "B")]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_new_phone_wins_when_present() {
        let table = merge(&MasterTable::new(), &[record("9 Elm St", "N/A", "A")]);
        let table = merge(&table, &[record("9 elm st", "303.555.0100", "B")]);

        assert_eq!(table.entries()[0].phone_number, "+1 303-555-0100");
        // Equal length: existing address kept
        assert_eq!(table.entries()[0].address, "9 Elm St");
    }

    #[test]
    fn test_first_match_in_table_order_wins() {
        let start = MasterTable::from_entries(vec![
            MergedEntry::new("Main St", "N/A", SourceSet::single("A")),
            MergedEntry::new("1 Main St", "N/A", SourceSet::single("B")),
        ]);
        let table = merge(&start, &[record("1 Main St", "N/A", "C")]);

        assert_eq!(table.len(), 2);
        assert!(table.entries()[0].sources.contains("C"));
        assert!(!table.entries()[1].sources.contains("C"));
        // Longer address replaces the shorter one
        assert_eq!(table.entries()[0].address, "1 Main St");
    }

    #[test]
    fn test_duplicates_within_batch_fold_together() {
        let table = merge(
            &MasterTable::new(),
            &[
                record("5 Oak Ave", "N/A", "A"),
                record("5 Oak Ave, Boulder", "720-555-0199", "A"),
                record("77 Pine Rd", "N/A", "A"),
            ],
        );

        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[0].address, "5 Oak Ave, Boulder");
        assert_eq!(table.entries()[0].phone_number, "+1 720-555-0199");
        assert_eq!(table.entries()[0].sources.len(), 1);
    }

    #[test]
    fn test_empty_batch_is_identity() {
        let start = merge(&MasterTable::new(), &[record("1 Main St", "N/A", "A")]);
        assert_eq!(merge(&start, &[]), start);
    }

    #[test]
    fn test_batch_equals_sequential_application() {
        let start = MasterTable::from_entries(vec![MergedEntry::new(
            "10 Broadway",
            "N/A",
            SourceSet::single("Seed"),
        )]);
        let a = record("10 Broadway, Denver", "3035550100", "A");
        let b = record("22 Colfax Ave", "N/A", "B");

        let together = merge(&start, &[a.clone(), b.clone()]);
        let one_by_one = merge(&merge(&start, &[a]), &[b]);
        assert_eq!(together, one_by_one);
    }

    #[test]
    fn test_no_source_tag_lost() {
        let start = MasterTable::from_entries(vec![MergedEntry::new(
            "1 Main St",
            "N/A",
            SourceSet::single("Seed"),
        )]);
        let batch = vec![
            record("1 Main St, Denver", "N/A", "A"),
            record("2 Main St", "N/A", "B"),
            record("2 MAIN ST", "N/A", "C"),
        ];
        let table = merge(&start, &batch);

        let all: Vec<_> = table.all_sources().iter().map(str::to_string).collect();
        assert_eq!(all, vec!["Seed", "A", "B", "C"]);
    }

    #[test]
    fn test_input_table_untouched() {
        let start = merge(&MasterTable::new(), &[record("1 Main St", "N/A", "A")]);
        let snapshot = start.clone();
        let _ = merge(&start, &[record("1 Main St", "2125550123", "B")]);
        assert_eq!(start, snapshot);
    }

    #[test]
    fn test_normalized_matcher_keeps_near_addresses_apart() {
        let start = fallback_merge(
            &MasterTable::new(),
            &[record("112 Main St", "N/A", "A")],
            AddressMatcher::Normalized,
        );
        let table = fallback_merge(&start, &[record("12 Main St", "N/A", "B")], AddressMatcher::Normalized);
        assert_eq!(table.len(), 2);
    }
}
