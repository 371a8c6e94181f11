// 📚 Reference Dataset - category → leaf records, loaded from a file
//
// Two on-disk formats:
// - JSON manifest: {"categories": [...], "records": {"<category>": [[name, scale, size], ...]}}
// - flat CSV:      category,name,scale,size_class
//
// The dataset is read once; the quality check normalises names before a run.

use crate::error::LoadError;
use serde::de::value::StrDeserializer;
use serde::de::{IntoDeserializer, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

// ============================================================================
// LEAF ATTRIBUTES
// ============================================================================

/// Market reach of a niche
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scale {
    Local,
    National,
    #[serde(rename = "National/Local")]
    NationalLocal,
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Local => "Local",
            Scale::National => "National",
            Scale::NationalLocal => "National/Local",
        }
    }
}

/// Size of the prospect database for a niche
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SizeClass {
    Small,
    Big,
}

impl SizeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Small => "Small",
            SizeClass::Big => "Big",
        }
    }
}

/// One leaf of the hierarchy (a niche), owned by the category it is filed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafRecord {
    pub name: String,
    pub scale: Scale,
    pub size_class: SizeClass,
}

impl LeafRecord {
    pub fn new(name: impl Into<String>, scale: Scale, size_class: SizeClass) -> Self {
        LeafRecord {
            name: name.into(),
            scale,
            size_class,
        }
    }
}

// ============================================================================
// FILE FORMATS
// ============================================================================

/// Dataset file format, detected from the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Json,
    Csv,
}

impl DatasetFormat {
    pub fn detect(path: &Path) -> Option<DatasetFormat> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(DatasetFormat::Json),
            "csv" => Some(DatasetFormat::Csv),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestEntry {
    Tuple(String, Scale, SizeClass),
    Object {
        name: String,
        scale: Scale,
        #[serde(alias = "size", alias = "database_size")]
        size_class: SizeClass,
    },
}

impl From<ManifestEntry> for LeafRecord {
    fn from(entry: ManifestEntry) -> Self {
        match entry {
            ManifestEntry::Tuple(name, scale, size_class) => LeafRecord::new(name, scale, size_class),
            ManifestEntry::Object { name, scale, size_class } => LeafRecord::new(name, scale, size_class),
        }
    }
}

#[derive(Deserialize)]
struct Manifest {
    #[serde(default)]
    categories: Option<Vec<String>>,
    /// Kept as a list: a category key may appear more than once
    #[serde(default, deserialize_with = "groups_in_file_order")]
    records: Vec<(String, Vec<ManifestEntry>)>,
}

/// Read the `records` object without collapsing repeated keys
fn groups_in_file_order<'de, D>(deserializer: D) -> Result<Vec<(String, Vec<ManifestEntry>)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct GroupsVisitor;

    impl<'de> Visitor<'de> for GroupsVisitor {
        type Value = Vec<(String, Vec<ManifestEntry>)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an object of category name to records")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut groups = Vec::new();
            while let Some((category, entries)) = map.next_entry::<String, Vec<ManifestEntry>>()? {
                groups.push((category, entries));
            }
            Ok(groups)
        }
    }

    deserializer.deserialize_map(GroupsVisitor)
}

#[derive(Deserialize)]
struct CsvRow {
    #[serde(alias = "industry")]
    category: String,
    #[serde(alias = "niche_name")]
    name: String,
    #[serde(deserialize_with = "trimmed")]
    scale: Scale,
    #[serde(alias = "database_size", deserialize_with = "trimmed")]
    size_class: SizeClass,
}

/// Enum field with the padding of a hand-written CSV (`Sports, Golf Courses, Local, Small`)
fn trimmed<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let value: StrDeserializer<'_, D::Error> = raw.trim().into_deserializer();
    T::deserialize(value)
}

// ============================================================================
// REFERENCE DATASET
// ============================================================================

/// Two-level hierarchy: category name → leaf records
///
/// `declared` is the creation set: the categories a run may create. Leaves can
/// reference categories outside it as long as those already exist in the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceDataset {
    declared: Vec<String>,
    groups: BTreeMap<String, Vec<LeafRecord>>,
}

impl ReferenceDataset {
    pub fn new() -> Self {
        ReferenceDataset::default()
    }

    /// Build from groups; every group key is declared
    pub fn from_groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<LeafRecord>)>,
        S: Into<String>,
    {
        let mut dataset = ReferenceDataset::new();
        for (category, leaves) in groups {
            let category = category.into();
            dataset.declare(&category);
            dataset.groups.entry(category).or_default().extend(leaves);
        }
        dataset
    }

    /// Add a category to the creation set (no-op if already declared)
    pub fn declare(&mut self, category: &str) {
        if !self.declared.iter().any(|c| c == category) {
            self.declared.push(category.to_string());
        }
    }

    /// Add a leaf under `category` without declaring it
    pub fn push(&mut self, category: &str, leaf: LeafRecord) {
        self.groups.entry(category.to_string()).or_default().push(leaf);
    }

    /// Replace the creation set
    pub fn with_declared<I, S>(mut self, declared: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared.clear();
        for category in declared {
            self.declare(&category.into());
        }
        self
    }

    /// Same records, empty creation set: only existing categories may be used
    pub fn without_creation_set(mut self) -> Self {
        self.declared.clear();
        self
    }

    pub fn declared_categories(&self) -> &[String] {
        &self.declared
    }

    /// Category names that own at least one leaf
    pub fn referenced_categories(&self) -> BTreeSet<String> {
        self.groups
            .iter()
            .filter(|(_, leaves)| !leaves.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn groups(&self) -> &BTreeMap<String, Vec<LeafRecord>> {
        &self.groups
    }

    pub(crate) fn groups_mut(&mut self) -> &mut BTreeMap<String, Vec<LeafRecord>> {
        &mut self.groups
    }

    pub(crate) fn declared_mut(&mut self) -> &mut Vec<String> {
        &mut self.declared
    }

    /// All leaves with their category, ordered by category then file order
    pub fn records(&self) -> impl Iterator<Item = (&str, &LeafRecord)> {
        self.groups
            .iter()
            .flat_map(|(category, leaves)| leaves.iter().map(move |leaf| (category.as_str(), leaf)))
    }

    /// Number of leaf records
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stable SHA-256 over creation set and records
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        let mut declared: Vec<&String> = self.declared.iter().collect();
        declared.sort();
        for category in declared {
            hasher.update(format!("declare\t{}\n", category));
        }

        for (category, leaf) in self.records() {
            hasher.update(format!(
                "leaf\t{}\t{}\t{}\t{}\n",
                category,
                leaf.name,
                leaf.scale.as_str(),
                leaf.size_class.as_str()
            ));
        }

        format!("{:x}", hasher.finalize())
    }

    // ========================================================================
    // LOADING
    // ========================================================================

    /// Load a dataset file, picking the format from its extension
    pub fn load(path: &Path) -> Result<ReferenceDataset, LoadError> {
        let format = DatasetFormat::detect(path).ok_or_else(|| {
            LoadError::dataset(format!(
                "{}: unsupported dataset format (expected .json or .csv)",
                path.display()
            ))
        })?;

        let dataset = match format {
            DatasetFormat::Json => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| LoadError::dataset(format!("{}: {}", path.display(), e)))?;
                Self::from_json_str(&text)
            }
            DatasetFormat::Csv => {
                let file = std::fs::File::open(path)
                    .map_err(|e| LoadError::dataset(format!("{}: {}", path.display(), e)))?;
                Self::from_csv_reader(file)
            }
        };

        dataset.map_err(|e| match e {
            LoadError::Dataset(msg) => LoadError::dataset(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse a JSON manifest
    pub fn from_json_str(text: &str) -> Result<ReferenceDataset, LoadError> {
        let manifest: Manifest = serde_json::from_str(text)
            .map_err(|e| LoadError::dataset(format!("invalid manifest: {}", e)))?;

        let mut dataset = ReferenceDataset::new();
        // Repeated category keys are merged; the quality check reports any
        // record that ends up listed twice
        for (category, entries) in manifest.records {
            dataset
                .groups
                .entry(category)
                .or_default()
                .extend(entries.into_iter().map(LeafRecord::from));
        }

        match manifest.categories {
            Some(declared) => {
                for category in declared {
                    dataset.declare(&category);
                }
            }
            None => {
                let keys: Vec<String> = dataset.groups.keys().cloned().collect();
                for category in keys {
                    dataset.declare(&category);
                }
            }
        }

        Ok(dataset)
    }

    /// Parse a flat CSV file; every category it mentions is declared
    pub fn from_csv_reader<R: std::io::Read>(reader: R) -> Result<ReferenceDataset, LoadError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);

        let mut dataset = ReferenceDataset::new();
        for (index, result) in rdr.deserialize::<CsvRow>().enumerate() {
            // header is line 1
            let row = result
                .map_err(|e| LoadError::dataset(format!("line {}: {}", index + 2, e)))?;
            dataset.declare(&row.category);
            dataset.push(&row.category, LeafRecord::new(row.name, row.scale, row.size_class));
        }

        Ok(dataset)
    }
}
