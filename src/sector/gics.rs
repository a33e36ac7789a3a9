// 🌳 GICS hierarchy - Sector(2) > Industry Group(4) > Industry(6) > Sub-Industry(8)
//
// Loaded from the standard GICS mapping CSV (one row per sub-industry, with
// the code and name of every ancestor level on the same row).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GicsLevel {
    Sector,
    IndustryGroup,
    Industry,
    SubIndustry,
}

impl GicsLevel {
    /// Level implied by the number of digits in a GICS code
    pub fn from_code(code: &str) -> Option<Self> {
        if !code.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        match code.len() {
            2 => Some(GicsLevel::Sector),
            4 => Some(GicsLevel::IndustryGroup),
            6 => Some(GicsLevel::Industry),
            8 => Some(GicsLevel::SubIndustry),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GicsLevel::Sector => "Sector",
            GicsLevel::IndustryGroup => "Industry Group",
            GicsLevel::Industry => "Industry",
            GicsLevel::SubIndustry => "Sub-Industry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GicsNode {
    pub code: String,
    pub name: String,
    pub level: GicsLevel,
    /// Sub-industry definition; the name for higher levels
    pub description: String,
    pub parent: Option<String>,
}

/// One row of the mapping CSV
#[derive(Debug, Deserialize)]
struct GicsRow {
    #[serde(rename = "Sector Code")]
    sector_code: String,
    #[serde(rename = "Sector")]
    sector: String,
    #[serde(rename = "Industry Group Code")]
    group_code: String,
    #[serde(rename = "Industry Group")]
    group: String,
    #[serde(rename = "Industry Code")]
    industry_code: String,
    #[serde(rename = "Industry")]
    industry: String,
    #[serde(rename = "Sub-Industry Code")]
    sub_industry_code: String,
    #[serde(rename = "Sub-Industry")]
    sub_industry: String,
    #[serde(rename = "Definition", default)]
    definition: String,
}

#[derive(Debug, Clone, Default)]
pub struct GicsTree {
    nodes: BTreeMap<String, GicsNode>,
}

impl GicsTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open GICS mapping: {}", path.as_ref().display()))?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut tree = GicsTree::new();
        for (line_num, result) in rdr.deserialize().enumerate() {
            let row: GicsRow = result
                .with_context(|| format!("Failed to parse GICS mapping line {}", line_num + 2))?;

            let sector = normalize_code(&row.sector_code);
            let group = normalize_code(&row.group_code);
            let industry = normalize_code(&row.industry_code);
            let sub_industry = normalize_code(&row.sub_industry_code);

            tree.insert(&sector, &row.sector, &row.sector, None);
            tree.insert(&group, &row.group, &row.group, Some(&sector));
            tree.insert(&industry, &row.industry, &row.industry, Some(&group));
            tree.insert(&sub_industry, &row.sub_industry, &row.definition, Some(&industry));
        }

        log::info!(
            "🌳 GICS tree loaded: {} sectors, {} sub-industries",
            tree.at_level(GicsLevel::Sector).len(),
            tree.at_level(GicsLevel::SubIndustry).len()
        );
        Ok(tree)
    }

    /// Add or rename a node. Returns false (and skips) when the code is not a
    /// GICS code or its parent is unknown.
    pub fn insert(&mut self, code: &str, name: &str, description: &str, parent: Option<&str>) -> bool {
        let Some(level) = GicsLevel::from_code(code) else {
            log::warn!("⚠️  Skipping invalid GICS code '{}' ({})", code, name);
            return false;
        };

        if let Some(parent) = parent {
            if !self.nodes.contains_key(parent) || !code.starts_with(parent) {
                log::warn!("⚠️  Parent {} not found for {} {}", parent, level.as_str(), code);
                return false;
            }
        }

        let description = if description.is_empty() { name } else { description };
        self.nodes.insert(
            code.to_string(),
            GicsNode {
                code: code.to_string(),
                name: name.to_string(),
                level,
                description: description.to_string(),
                parent: parent.map(|p| p.to_string()),
            },
        );
        true
    }

    pub fn get(&self, code: &str) -> Option<&GicsNode> {
        self.nodes.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.nodes.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn at_level(&self, level: GicsLevel) -> Vec<&GicsNode> {
        self.nodes.values().filter(|n| n.level == level).collect()
    }

    pub fn children(&self, code: &str) -> Vec<&GicsNode> {
        self.nodes
            .values()
            .filter(|n| n.parent.as_deref() == Some(code))
            .collect()
    }

    /// Path from the sector down to `code` (inclusive)
    pub fn lineage(&self, code: &str) -> Vec<&GicsNode> {
        let mut path = Vec::new();
        let mut current = self.nodes.get(code);
        while let Some(node) = current {
            path.push(node);
            current = node.parent.as_deref().and_then(|p| self.nodes.get(p));
        }
        path.reverse();
        path
    }

    /// Case-insensitive lookup of a sub-industry by name
    pub fn find_sub_industry(&self, name: &str) -> Option<&GicsNode> {
        let wanted = name.trim().to_lowercase();
        self.nodes
            .values()
            .filter(|n| n.level == GicsLevel::SubIndustry)
            .find(|n| n.name.to_lowercase() == wanted)
    }
}

/// "10.0" (spreadsheet export) -> "10"
fn normalize_code(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}
