//! Severity categories and depth classification.
//!
//! A `CategoryTable` is validated once at construction so that `classify`
//! is total: sorted by priority, `max_depth` never decreases and the last
//! bucket is unbounded.

use std::collections::HashSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::invalid;

/// Display colour (RGB). Opaque to classification.
pub type Rgb = [u8; 3];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeverityCategory {
    pub name: String,
    /// Inclusive upper bound in meters. `f64::INFINITY` for the last bucket,
    /// written as `null` when serialized.
    #[serde(with = "unbounded_depth")]
    pub max_depth: f64,
    /// Rank, ascending with severity.
    pub priority: u32,
    pub color: Rgb,
    pub description: String,
}

mod unbounded_depth {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(depth: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if depth.is_finite() {
            serializer.serialize_some(depth)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

impl SeverityCategory {
    pub fn new(
        name: &str,
        max_depth: f64,
        priority: u32,
        color: Rgb,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            max_depth,
            priority,
            color,
            description: description.to_string(),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_depth.is_infinite()
    }

    /// Title-cased display label ("very_deep" -> "Very Deep").
    pub fn label(&self) -> String {
        self.name
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Priority-ordered, validated category table.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoryTable {
    categories: Vec<SeverityCategory>,
}

impl CategoryTable {
    pub fn new(mut categories: Vec<SeverityCategory>) -> Result<Self> {
        if categories.is_empty() {
            return invalid("category table is empty");
        }

        let mut names = HashSet::new();
        let mut priorities = HashSet::new();
        for category in &categories {
            if category.name.trim().is_empty() {
                return invalid("category name must not be empty");
            }
            if !names.insert(category.name.as_str()) {
                return invalid(format!("duplicate category name '{}'", category.name));
            }
            if !priorities.insert(category.priority) {
                return invalid(format!(
                    "duplicate category priority {} ('{}')",
                    category.priority, category.name
                ));
            }
            if category.max_depth.is_nan() || category.max_depth < 0.0 {
                return invalid(format!(
                    "category '{}' has invalid max_depth {}",
                    category.name, category.max_depth
                ));
            }
        }

        categories.sort_by_key(|category| category.priority);

        for pair in categories.windows(2) {
            if pair[1].max_depth < pair[0].max_depth {
                return invalid(format!(
                    "category '{}' (max_depth {}) is below lower-priority '{}' (max_depth {})",
                    pair[1].name, pair[1].max_depth, pair[0].name, pair[0].max_depth
                ));
            }
        }

        if let Some(last) = categories.last() {
            if !last.is_unbounded() {
                return invalid(format!(
                    "last category '{}' must be unbounded, found max_depth {}",
                    last.name, last.max_depth
                ));
            }
        }

        Ok(Self { categories })
    }

    /// Categories in ascending priority order.
    pub fn iter(&self) -> impl Iterator<Item = &SeverityCategory> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SeverityCategory> {
        self.categories.iter().find(|category| category.name == name)
    }

    /// The six-bucket table used by the enhanced detector.
    pub fn enhanced() -> Self {
        Self {
            categories: vec![
                SeverityCategory::new(
                    "very_shallow",
                    0.08,
                    1,
                    [0, 255, 0],
                    "Very shallow potholes (< 8cm)",
                ),
                SeverityCategory::new(
                    "shallow",
                    0.12,
                    2,
                    [128, 255, 0],
                    "Shallow potholes (8-12cm)",
                ),
                SeverityCategory::new(
                    "medium",
                    0.16,
                    3,
                    [255, 255, 0],
                    "Medium potholes (12-16cm)",
                ),
                SeverityCategory::new("deep", 0.20, 4, [255, 165, 0], "Deep potholes (16-20cm)"),
                SeverityCategory::new(
                    "very_deep",
                    0.25,
                    5,
                    [255, 0, 0],
                    "Very deep potholes (20-25cm)",
                ),
                SeverityCategory::new(
                    "critical",
                    f64::INFINITY,
                    6,
                    [128, 0, 0],
                    "Critical potholes (> 25cm)",
                ),
            ],
        }
    }

    /// The four-bucket table used by the simple detector.
    pub fn simple() -> Self {
        Self {
            categories: vec![
                SeverityCategory::new("shallow", 0.05, 1, [0, 255, 0], "Shallow potholes (< 5cm)"),
                SeverityCategory::new(
                    "medium",
                    0.10,
                    2,
                    [255, 255, 0],
                    "Medium potholes (5-10cm)",
                ),
                SeverityCategory::new("deep", 0.15, 3, [255, 165, 0], "Deep potholes (10-15cm)"),
                SeverityCategory::new(
                    "critical",
                    f64::INFINITY,
                    4,
                    [255, 0, 0],
                    "Critical potholes (> 15cm)",
                ),
            ],
        }
    }

    /// First category (by priority) whose `max_depth` is at least `depth`.
    pub fn classify(&self, depth: f64) -> Result<&SeverityCategory> {
        classify(depth, self)
    }
}

/// Map a depth to its severity bucket.
///
/// Total for every non-NaN depth: the last bucket is unbounded. On equal
/// `max_depth`, the lower priority wins.
pub fn classify(depth: f64, table: &CategoryTable) -> Result<&SeverityCategory> {
    if depth.is_nan() {
        return invalid("depth is NaN");
    }
    match table
        .categories
        .iter()
        .find(|category| depth <= category.max_depth)
    {
        Some(category) => Ok(category),
        // Unreachable for validated tables; +inf depth with a finite last bound
        // cannot be constructed through `CategoryTable::new`.
        None => invalid(format!("no category covers depth {}", depth)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InvalidInput;

    fn table() -> CategoryTable {
        CategoryTable::enhanced()
    }

    #[test]
    fn categories_survive_json() {
        let categories: Vec<SeverityCategory> = table().iter().cloned().collect();
        let json = serde_json::to_string(&categories).unwrap();
        assert!(json.contains("\"max_depth\":null"));
        let back: Vec<SeverityCategory> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, categories);
        assert!(back.last().unwrap().is_unbounded());
    }

    #[test]
    fn zero_depth_is_very_shallow() {
        assert_eq!(table().classify(0.0).unwrap().name, "very_shallow");
    }

    #[test]
    fn absurd_depth_lands_in_unbounded_category() {
        let t = table();
        let category = t.classify(1000.0).unwrap();
        assert_eq!(category.name, "critical");
        assert!(category.is_unbounded());
    }

    #[test]
    fn boundary_depth_stays_in_its_category() {
        let t = table();
        assert_eq!(t.classify(0.08).unwrap().name, "very_shallow");
        assert_eq!(t.classify(0.0800001).unwrap().name, "shallow");
        assert_eq!(t.classify(0.25).unwrap().name, "very_deep");
    }

    #[test]
    fn classification_is_idempotent() {
        let t = table();
        for depth in [0.02, 0.1, 0.17, 0.3] {
            let first = t.classify(depth).unwrap().name.clone();
            let second = t.classify(depth).unwrap().name.clone();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn classify_is_total_over_depth_range() {
        for t in [CategoryTable::enhanced(), CategoryTable::simple()] {
            let mut depth = 0.0;
            while depth <= 0.30 {
                let matches = t.iter().filter(|c| depth <= c.max_depth).count();
                assert!(matches >= 1);
                assert!(t.classify(depth).is_ok());
                depth += 0.001;
            }
        }
    }

    #[test]
    fn new_sorts_by_priority() {
        let t = CategoryTable::new(vec![
            SeverityCategory::new("bad", f64::INFINITY, 2, [255, 0, 0], "bad"),
            SeverityCategory::new("ok", 0.1, 1, [0, 255, 0], "ok"),
        ])
        .unwrap();
        let names: Vec<_> = t.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ok", "bad"]);
        assert_eq!(t.classify(0.05).unwrap().name, "ok");
    }

    #[test]
    fn equal_bounds_prefer_lower_priority() {
        let t = CategoryTable::new(vec![
            SeverityCategory::new("b", 0.1, 2, [0, 0, 0], ""),
            SeverityCategory::new("a", 0.1, 1, [0, 0, 0], ""),
            SeverityCategory::new("c", f64::INFINITY, 3, [0, 0, 0], ""),
        ])
        .unwrap();
        assert_eq!(t.classify(0.1).unwrap().name, "a");
    }

    #[test]
    fn rejects_bounded_last_category() {
        let err = CategoryTable::new(vec![
            SeverityCategory::new("a", 0.1, 1, [0, 0, 0], ""),
            SeverityCategory::new("b", 0.2, 2, [0, 0, 0], ""),
        ])
        .unwrap_err();
        assert!(err.downcast_ref::<InvalidInput>().is_some());
        assert!(err.to_string().contains("unbounded"));
    }

    #[test]
    fn rejects_decreasing_bounds() {
        let err = CategoryTable::new(vec![
            SeverityCategory::new("a", 0.2, 1, [0, 0, 0], ""),
            SeverityCategory::new("b", 0.1, 2, [0, 0, 0], ""),
            SeverityCategory::new("c", f64::INFINITY, 3, [0, 0, 0], ""),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("below"));
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        assert!(CategoryTable::new(vec![]).is_err());
        assert!(CategoryTable::new(vec![
            SeverityCategory::new("a", 0.1, 1, [0, 0, 0], ""),
            SeverityCategory::new("a", f64::INFINITY, 2, [0, 0, 0], ""),
        ])
        .is_err());
        assert!(CategoryTable::new(vec![
            SeverityCategory::new("a", 0.1, 1, [0, 0, 0], ""),
            SeverityCategory::new("b", f64::INFINITY, 1, [0, 0, 0], ""),
        ])
        .is_err());
    }

    #[test]
    fn rejects_nan_depth() {
        assert!(table().classify(f64::NAN).is_err());
    }

    #[test]
    fn builtin_tables_pass_validation() {
        let enhanced = CategoryTable::enhanced();
        let rebuilt = CategoryTable::new(enhanced.iter().cloned().collect()).unwrap();
        assert_eq!(rebuilt, enhanced);
        let simple = CategoryTable::simple();
        assert_eq!(
            CategoryTable::new(simple.iter().cloned().collect()).unwrap(),
            simple
        );
    }

    #[test]
    fn label_title_cases_name() {
        let t = table();
        assert_eq!(t.get("very_deep").unwrap().label(), "Very Deep");
        assert_eq!(t.get("critical").unwrap().label(), "Critical");
    }
}
