//src/placement.rs

use std::fs::File;
use std::io::{BufReader, BufWriter, Read as IoRead, Write};
use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{GraftError, Result};
use crate::types::base_read_id;

pub const JPLACE_VERSION: u32 = 3;
pub const JPLACE_FIELDS: [&str; 3] = ["classification", "like_weight_ratio", "edge_num"];

/// Supports closer than this are tied.
pub const TIE_EPSILON: f64 = 1e-9;

/// One candidate location for a placed sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Taxon id or label, resolved through the package taxonomy.
    pub classification: String,
    pub like_weight_ratio: f64,
    pub edge_num: Option<i64>,
}

impl Candidate {
    pub fn new(classification: &str, like_weight_ratio: f64) -> Self {
        Candidate {
            classification: classification.to_string(),
            like_weight_ratio,
            edge_num: None,
        }
    }
}

/// A placement entry: candidates shared by one or more co-placed names.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub candidates: Vec<Candidate>,
    /// `(name, weight)` pairs; the weight is what the name adds to counts.
    pub names: Vec<(String, f64)>,
}

/// In-memory placement file.
#[derive(Debug, Clone, PartialEq)]
pub struct Jplace {
    pub tree: String,
    pub placements: Vec<Placement>,
    pub metadata: Value,
}

impl Default for Jplace {
    fn default() -> Self {
        Jplace {
            tree: String::new(),
            placements: Vec::new(),
            metadata: json!({}),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct JplaceDoc {
    #[serde(default)]
    tree: String,
    placements: Vec<JplaceEntry>,
    fields: Vec<String>,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    metadata: Value,
}

#[derive(Serialize, Deserialize)]
struct JplaceEntry {
    p: Vec<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    nm: Vec<(String, f64)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    n: Vec<String>,
}

fn default_version() -> u32 {
    JPLACE_VERSION
}

fn value_as_label(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn format_error(msg: impl Into<String>) -> GraftError {
    GraftError::parse("jplace", 0, msg)
}

/// Reads a placement file. Field order comes from `fields`; extra columns
/// are ignored. Entries listing bare names (`n`) get weight 1 each.
pub fn read_jplace<R: IoRead>(reader: R) -> Result<Jplace> {
    let doc: JplaceDoc = serde_json::from_reader(reader)?;
    let column = |name: &str| doc.fields.iter().position(|f| f == name);
    let class_col = column("classification")
        .ok_or_else(|| format_error("no classification field"))?;
    let lwr_col = column("like_weight_ratio")
        .ok_or_else(|| format_error("no like_weight_ratio field"))?;
    let edge_col = column("edge_num");

    let mut placements = Vec::with_capacity(doc.placements.len());
    for entry in doc.placements {
        let mut candidates = Vec::with_capacity(entry.p.len());
        for row in &entry.p {
            let classification = row
                .get(class_col)
                .and_then(value_as_label)
                .ok_or_else(|| format_error("placement row without classification"))?;
            let like_weight_ratio = row
                .get(lwr_col)
                .and_then(Value::as_f64)
                .ok_or_else(|| format_error("placement row without like_weight_ratio"))?;
            let edge_num = edge_col.and_then(|c| row.get(c)).and_then(Value::as_i64);
            candidates.push(Candidate {
                classification,
                like_weight_ratio,
                edge_num,
            });
        }
        let mut names = entry.nm;
        names.extend(entry.n.into_iter().map(|n| (n, 1.0)));
        placements.push(Placement { candidates, names });
    }

    Ok(Jplace {
        tree: doc.tree,
        placements,
        metadata: doc.metadata,
    })
}

pub fn read_jplace_file<P: AsRef<Path>>(path: P) -> Result<Jplace> {
    read_jplace(BufReader::new(File::open(path)?))
}

/// Writes a version 3 placement file with the standard field order.
pub fn write_jplace<P: AsRef<Path>>(path: P, jplace: &Jplace) -> Result<()> {
    let doc = JplaceDoc {
        tree: jplace.tree.clone(),
        placements: jplace
            .placements
            .iter()
            .map(|p| JplaceEntry {
                p: p
                    .candidates
                    .iter()
                    .map(|c| {
                        vec![
                            json!(c.classification),
                            json!(c.like_weight_ratio),
                            c.edge_num.map(Value::from).unwrap_or(Value::Null),
                        ]
                    })
                    .collect(),
                nm: p.names.clone(),
                n: Vec::new(),
            })
            .collect(),
        fields: JPLACE_FIELDS.iter().map(|f| f.to_string()).collect(),
        version: JPLACE_VERSION,
        metadata: jplace.metadata.clone(),
    };
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, &doc)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// One placed name with the read it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedRead {
    /// Fragment name; after mate reconciliation, the fragment that represents the pair.
    pub name: String,
    /// Source read id.
    pub read_id: String,
    pub candidates: Vec<Candidate>,
    pub weight: u32,
}

impl PlacedRead {
    /// Best like weight ratio over the candidates.
    pub fn support(&self) -> f64 {
        self.candidates
            .iter()
            .map(|c| c.like_weight_ratio)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Candidates tied at the best support, ordered by classification.
    pub fn top_candidates(&self) -> Vec<&Candidate> {
        let best = self.support();
        let mut top: Vec<&Candidate> = self
            .candidates
            .iter()
            .filter(|c| best - c.like_weight_ratio <= TIE_EPSILON)
            .collect();
        top.sort_by(|a, b| a.classification.cmp(&b.classification));
        top.dedup_by(|a, b| a.classification == b.classification);
        top
    }

    /// Classifications of the tied top candidates.
    pub fn top_classifications(&self) -> Vec<&str> {
        self.top_candidates()
            .into_iter()
            .map(|c| c.classification.as_str())
            .collect()
    }
}

/// Flattens placements into one record per name. `read_of` maps fragment
/// names to their source read; names missing from it are their own read.
pub fn placed_reads(jplace: &Jplace, read_of: &AHashMap<String, String>) -> Vec<PlacedRead> {
    let mut placed = Vec::new();
    for placement in &jplace.placements {
        for (name, weight) in &placement.names {
            let read_id = read_of
                .get(name)
                .cloned()
                .unwrap_or_else(|| base_read_id(name).to_string());
            placed.push(PlacedRead {
                name: name.clone(),
                read_id,
                candidates: placement.candidates.clone(),
                weight: weight.round().max(0.0) as u32,
            });
        }
    }
    placed
}

/// One placement entry per placed record.
pub fn placements_from_reads(placed: &[PlacedRead]) -> Vec<Placement> {
    placed
        .iter()
        .map(|r| Placement {
            candidates: r.candidates.clone(),
            names: vec![(r.name.clone(), r.weight as f64)],
        })
        .collect()
}
