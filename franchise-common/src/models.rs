//! Data model shared by the decoder, collector, merge engine and session
//!
//! A [`SourcedLocation`] is one record reported by one search agent. The
//! merge engine folds records into [`MergedEntry`] rows of the [`MasterTable`].

use serde::{Deserialize, Serialize};

use crate::phone::NO_PHONE;
use crate::{Error, Result};

/// Search query sent to the stream endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FranchiseQuery {
    pub franchise_name: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

impl FranchiseQuery {
    pub fn new(
        franchise_name: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            franchise_name: franchise_name.into(),
            city: city.into(),
            state: state.into(),
            country: country.into(),
        }
    }

    /// Reject queries with any blank field
    pub fn validate(&self) -> Result<()> {
        let fields = [&self.franchise_name, &self.city, &self.state, &self.country];
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(Error::InvalidInput("Please fill out all fields".to_string()));
        }
        Ok(())
    }

    /// Free-text form used by the places lookup
    pub fn places_text(&self) -> String {
        format!(
            "{} in {}, {}, {}",
            self.franchise_name, self.city, self.state, self.country
        )
    }
}

/// One location record as reported by a single source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcedLocation {
    /// Street address (non-empty, trimmed)
    pub address: String,
    /// Raw phone number, or `"N/A"`
    pub phone_number: String,
    /// Label of the reporting source
    pub source: String,
}

impl SourcedLocation {
    pub fn new(
        address: impl Into<String>,
        phone_number: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let phone_number = phone_number.into();
        Self {
            address: address.into(),
            phone_number: if phone_number.trim().is_empty() {
                NO_PHONE.to_string()
            } else {
                phone_number
            },
            source: source.into(),
        }
    }
}

/// Insertion-ordered set of source labels
///
/// Serialized as a plain JSON array. Deserializing drops duplicates, so a
/// collaborator that repeats a label cannot smuggle it into the table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SourceSet(Vec<String>);

impl SourceSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn single(source: impl Into<String>) -> Self {
        Self(vec![source.into()])
    }

    /// Add a label; returns false if it was already present
    pub fn insert(&mut self, source: impl Into<String>) -> bool {
        let source = source.into();
        if self.contains(&source) {
            return false;
        }
        self.0.push(source);
        true
    }

    pub fn contains(&self, source: &str) -> bool {
        self.0.iter().any(|s| s == source)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for SourceSet {
    fn from(sources: Vec<String>) -> Self {
        let mut set = SourceSet::new();
        for source in sources {
            set.insert(source);
        }
        set
    }
}

impl From<SourceSet> for Vec<String> {
    fn from(set: SourceSet) -> Self {
        set.0
    }
}

impl<S: Into<String>> FromIterator<S> for SourceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = SourceSet::new();
        for source in iter {
            set.insert(source);
        }
        set
    }
}

/// One physical location as currently believed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedEntry {
    pub address: String,
    pub phone_number: String,
    pub sources: SourceSet,
}

impl MergedEntry {
    pub fn new(address: impl Into<String>, phone_number: impl Into<String>, sources: SourceSet) -> Self {
        Self {
            address: address.into(),
            phone_number: phone_number.into(),
            sources,
        }
    }
}

/// Deduplicated, ordered table of merged entries
///
/// Treated as a value: every merge produces a new table rather than
/// mutating the one the session currently publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MasterTable {
    entries: Vec<MergedEntry>,
}

impl MasterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<MergedEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[MergedEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<MergedEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MergedEntry> {
        self.entries.iter()
    }

    /// Union of all source labels in table order
    pub fn all_sources(&self) -> SourceSet {
        self.entries
            .iter()
            .flat_map(|e| e.sources.iter())
            .collect()
    }
}

impl<'a> IntoIterator for &'a MasterTable {
    type Item = &'a MergedEntry;
    type IntoIter = std::slice::Iter<'a, MergedEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Lifecycle state of one source within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Initializing,
    Searching,
    Complete,
    Error,
}

impl SourceStatus {
    /// Map a wire status value
    ///
    /// `progress` is what the search server sends while an agent runs; any
    /// unrecognized value is treated as ongoing work.
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "initializing" => SourceStatus::Initializing,
            "complete" => SourceStatus::Complete,
            "error" => SourceStatus::Error,
            _ => SourceStatus::Searching,
        }
    }

    /// `Complete` and `Error` end a source for the rest of the session
    pub fn is_terminal(self) -> bool {
        matches!(self, SourceStatus::Complete | SourceStatus::Error)
    }
}

/// Progress of one source, reported to the caller on every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub source: String,
    pub status: SourceStatus,
    pub message: String,
    pub count: u32,
}

impl SourceState {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::Initializing,
            message: String::new(),
            count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_validation() {
        let query = FranchiseQuery::new("Noodles", "Denver", "CO", "USA");
        assert!(query.validate().is_ok());
        assert_eq!(query.places_text(), "Noodles in Denver, CO, USA");

        let blank = FranchiseQuery::new("Noodles", " ", "CO", "USA");
        assert!(matches!(blank.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_sourced_location_blank_phone_becomes_placeholder() {
        let record = SourcedLocation::new("1 Main St", "  ", "Yelp");
        assert_eq!(record.phone_number, "N/A");
    }

    #[test]
    fn test_source_set_keeps_first_insertion_order() {
        let mut set = SourceSet::single("Yelp");
        assert!(set.insert("Google Maps"));
        assert!(!set.insert("Yelp"));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["Yelp", "Google Maps"]);
    }

    #[test]
    fn test_source_set_deserialize_drops_duplicates() {
        let set: SourceSet = serde_json::from_str(r#"["A","B","A"]"#).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["A","B"]"#);
    }

    #[test]
    fn test_merged_entry_wire_shape() {
        let entry = MergedEntry::new("1 Main St", "+1 212-555-0123", SourceSet::single("A"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["phoneNumber"], "+1 212-555-0123");
        assert_eq!(json["sources"][0], "A");
    }

    #[test]
    fn test_status_from_wire() {
        assert_eq!(SourceStatus::from_wire("progress"), SourceStatus::Searching);
        assert_eq!(SourceStatus::from_wire("COMPLETE"), SourceStatus::Complete);
        assert_eq!(SourceStatus::from_wire("error"), SourceStatus::Error);
        assert_eq!(SourceStatus::from_wire("initializing"), SourceStatus::Initializing);
        assert!(SourceStatus::Error.is_terminal());
        assert!(!SourceStatus::Searching.is_terminal());
    }

    #[test]
    fn test_table_source_union() {
        let table = MasterTable::from_entries(vec![
            MergedEntry::new("a", "N/A", vec!["A".to_string(), "B".to_string()].into()),
            MergedEntry::new("b", "N/A", SourceSet::single("B")),
            MergedEntry::new("c", "N/A", SourceSet::single("C")),
        ]);
        let all: Vec<_> = table.all_sources().iter().map(str::to_string).collect();
        assert_eq!(all, vec!["A", "B", "C"]);
        assert_eq!(table.iter().filter(|e| e.sources.contains("B")).count(), 2);
    }
}
