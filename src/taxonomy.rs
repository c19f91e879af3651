//src/taxonomy.rs

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::{AHashMap, AHashSet};

use crate::error::{GraftError, Result};

/// Literal root token every lineage string starts with.
pub const ROOT: &str = "Root";

/// Ancestry of a taxon below the root, outermost rank first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lineage(pub Vec<String>);

impl Lineage {
    pub fn root() -> Self {
        Lineage(Vec::new())
    }

    /// Parses `a; b; c`, with or without the leading root token. Empty
    /// ranks (as in `k__Bacteria; ; `) are dropped.
    pub fn parse(s: &str) -> Self {
        let mut ranks: Vec<String> = s
            .split(';')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        if ranks.first().map(String::as_str) == Some(ROOT) {
            ranks.remove(0);
        }
        Lineage(ranks)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Deepest lineage that is a prefix of both.
    pub fn common_prefix(&self, other: &Lineage) -> Lineage {
        Lineage(
            self.0
                .iter()
                .zip(other.0.iter())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a.clone())
                .collect(),
        )
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ROOT)?;
        for rank in &self.0 {
            write!(f, "; {rank}")?;
        }
        Ok(())
    }
}

/// Maps placement classifications (taxon ids or labels) to lineages.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    lineages: AHashMap<String, Lineage>,
}

impl Taxonomy {
    pub fn from_lineages<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Lineage)>,
        K: Into<String>,
    {
        Taxonomy {
            lineages: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Parses a taxonomy file in either of two tab-separated layouts:
    /// ```text
    /// <id>\t<lineage; string>
    /// <taxid>\t<parentid>\t<taxname>\t<rank>
    /// ```
    /// In the second layout the root is the node that is its own parent
    /// (or has no parent); lineages are built by walking parent links.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut two_col: AHashMap<String, Lineage> = AHashMap::new();
        let mut parents: AHashMap<String, String> = AHashMap::new();
        let mut names: AHashMap<String, String> = AHashMap::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').map(str::trim).collect();
            match parts.len() {
                2 => {
                    two_col.insert(parts[0].to_string(), Lineage::parse(parts[1]));
                }
                n if n >= 4 => {
                    parents.insert(parts[0].to_string(), parts[1].to_string());
                    names.insert(parts[0].to_string(), parts[2].to_string());
                }
                _ => {
                    return Err(GraftError::parse(
                        "taxonomy",
                        idx + 1,
                        "expected 2 or 4 tab-separated columns",
                    ))
                }
            }
        }

        if !two_col.is_empty() && !parents.is_empty() {
            return Err(GraftError::Config(
                "taxonomy file mixes lineage and parent-link rows".to_string(),
            ));
        }

        let mut lineages = two_col;
        for taxid in parents.keys() {
            let lineage = walk_to_root(taxid, &parents, &names)?;
            // Names are classifications too, so pplacer output labelled
            // either way resolves.
            if let Some(name) = names.get(taxid) {
                lineages.entry(name.clone()).or_insert_with(|| lineage.clone());
            }
            lineages.insert(taxid.clone(), lineage);
        }
        log::debug!("Loaded {} taxonomy entries", lineages.len());
        Ok(Taxonomy { lineages })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    /// Lineage for a classification. Unknown labels that look like lineage
    /// strings are taken literally.
    pub fn lineage_of(&self, classification: &str) -> Option<Lineage> {
        if let Some(l) = self.lineages.get(classification) {
            return Some(l.clone());
        }
        if classification.contains(';') || classification == ROOT {
            return Some(Lineage::parse(classification));
        }
        None
    }

    pub fn len(&self) -> usize {
        self.lineages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lineages.is_empty()
    }
}

fn walk_to_root(
    taxid: &str,
    parents: &AHashMap<String, String>,
    names: &AHashMap<String, String>,
) -> Result<Lineage> {
    let mut ranks = Vec::new();
    let mut seen = AHashSet::new();
    let mut node = taxid;
    loop {
        if !seen.insert(node) {
            return Err(GraftError::Config(format!(
                "taxonomy has a parent cycle through {node}"
            )));
        }
        match parents.get(node) {
            Some(parent) if parent != node && !parent.is_empty() => {
                ranks.push(names.get(node).cloned().unwrap_or_else(|| node.to_string()));
                node = parent;
            }
            // root, or a parent missing from the file
            _ => break,
        }
    }
    ranks.reverse();
    Ok(Lineage(ranks))
}
