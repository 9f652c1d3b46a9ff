//! Reference database: signatures bound to genome metadata and taxonomy.
//!
//! The metadata store (`.gdb`) is a JSON document with two tables mirroring
//! the relational schema: `genomes(key, description, taxon_id?)` and
//! `taxa(id, name, rank?, ncbi_id?, parent_id?, distance_threshold?,
//! report)`. The core only ever sees the loaded, read-only object graph;
//! nothing here is mutated after [`ReferenceDatabase::load`] returns.
//!
//! Loading cross-checks the signature file against the metadata: the set of
//! signature ids must equal the set of genome keys, and every signature is
//! fully validated, so queries always run against checked data.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{GambitError, Result};
use crate::kmers::KmerSpec;
use crate::signatures::file::SignatureFile;
use crate::taxonomy::{Taxon, TaxonId, Taxonomy};

/// File extension of the metadata document.
pub const GENOMES_EXT: &str = "gdb";
/// File extension of the signature file.
pub const SIGNATURES_EXT: &str = "gs";

#[derive(Debug, Deserialize)]
struct DatabaseDoc {
    #[serde(default)]
    classification_version: Option<String>,
    #[serde(default)]
    extra: Option<serde_json::Value>,
    genomes: Vec<GenomeDoc>,
    taxa: Vec<TaxonDoc>,
}

#[derive(Debug, Deserialize)]
struct GenomeDoc {
    key: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    taxon_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TaxonDoc {
    id: i64,
    name: String,
    #[serde(default)]
    rank: Option<String>,
    #[serde(default)]
    ncbi_id: Option<i64>,
    #[serde(default)]
    parent_id: Option<i64>,
    #[serde(default)]
    distance_threshold: Option<f32>,
    #[serde(default = "default_report")]
    report: bool,
}

fn default_report() -> bool {
    true
}

/// One reference genome record.
#[derive(Debug, Clone)]
pub struct Genome {
    /// Stable key (accession) matching the signature file id.
    pub key: String,
    /// Human-readable description.
    pub description: String,
    /// Assigned taxon, if any.
    pub taxon: Option<TaxonId>,
}

/// Opaque database-level parameters passed through to results.
#[derive(Debug, Clone)]
pub struct DatabaseParameters {
    pub classification_version: Option<String>,
    pub extra: Option<serde_json::Value>,
}

/// Read-only facade binding each signature index to a genome record and a
/// taxon node.
#[derive(Debug)]
pub struct ReferenceDatabase {
    signatures: SignatureFile,
    genomes: Vec<Genome>,
    ref_taxa: Vec<Option<TaxonId>>,
    taxonomy: Taxonomy,
    parameters: DatabaseParameters,
}

impl ReferenceDatabase {
    /// Load and cross-validate a metadata document plus signature file.
    pub fn load(genomes_path: &Path, signatures_path: &Path) -> Result<ReferenceDatabase> {
        let signatures = SignatureFile::open(signatures_path)?;
        signatures.validate()?;

        let raw = fs::read(genomes_path).map_err(|e| GambitError::io(genomes_path, "read", e))?;
        let doc: DatabaseDoc = serde_json::from_slice(&raw)
            .map_err(|e| GambitError::database(genomes_path, e.to_string()))?;

        // Taxa: external id -> arena index, then resolve parent links
        let mut taxon_index: HashMap<i64, TaxonId> = HashMap::with_capacity(doc.taxa.len());
        for (i, taxon) in doc.taxa.iter().enumerate() {
            if taxon_index.insert(taxon.id, i as TaxonId).is_some() {
                return Err(GambitError::database(
                    genomes_path,
                    format!("duplicate taxon id {}", taxon.id),
                ));
            }
        }
        let mut nodes = Vec::with_capacity(doc.taxa.len());
        for taxon in &doc.taxa {
            let parent = match taxon.parent_id {
                None => None,
                Some(pid) => Some(*taxon_index.get(&pid).ok_or_else(|| {
                    GambitError::database(
                        genomes_path,
                        format!("taxon {} references unknown parent {}", taxon.id, pid),
                    )
                })?),
            };
            nodes.push(Taxon {
                name: taxon.name.clone(),
                rank: taxon.rank.clone(),
                ncbi_id: taxon.ncbi_id,
                distance_threshold: taxon.distance_threshold,
                report: taxon.report,
                parent,
                children: Vec::new(),
            });
        }
        let taxonomy = Taxonomy::new(nodes)
            .map_err(|detail| GambitError::database(genomes_path, detail))?;

        // Genomes keyed by accession
        let mut by_key: HashMap<&str, &GenomeDoc> = HashMap::with_capacity(doc.genomes.len());
        for genome in &doc.genomes {
            if by_key.insert(&genome.key, genome).is_some() {
                return Err(GambitError::database(
                    genomes_path,
                    format!("duplicate genome key '{}'", genome.key),
                ));
            }
        }

        // Bind signature indices to genomes by id; the two key sets must be equal
        let ids = signatures.ids().ok_or_else(|| {
            GambitError::ReferenceMismatch(format!(
                "signature file '{}' carries no ids",
                signatures_path.display()
            ))
        })?;

        let missing_genomes: Vec<&String> =
            ids.iter().filter(|id| !by_key.contains_key(id.as_str())).collect();
        if !missing_genomes.is_empty() {
            return Err(GambitError::ReferenceMismatch(format!(
                "{} signature id(s) have no genome record (first: '{}')",
                missing_genomes.len(),
                missing_genomes[0]
            )));
        }
        if by_key.len() != ids.len() {
            let seen: std::collections::HashSet<&str> =
                ids.iter().map(|s| s.as_str()).collect();
            let orphan = doc
                .genomes
                .iter()
                .find(|g| !seen.contains(g.key.as_str()))
                .expect("count mismatch implies an orphan genome");
            return Err(GambitError::ReferenceMismatch(format!(
                "{} genome record(s) have no signature (first: '{}')",
                by_key.len() - ids.len(),
                orphan.key
            )));
        }

        let mut genomes = Vec::with_capacity(ids.len());
        let mut ref_taxa = Vec::with_capacity(ids.len());
        for id in ids {
            let doc = by_key[id.as_str()];
            let taxon = match doc.taxon_id {
                None => None,
                Some(tid) => Some(*taxon_index.get(&tid).ok_or_else(|| {
                    GambitError::database(
                        genomes_path,
                        format!("genome '{}' references unknown taxon {}", doc.key, tid),
                    )
                })?),
            };
            genomes.push(Genome {
                key: doc.key.clone(),
                description: doc.description.clone(),
                taxon,
            });
            ref_taxa.push(taxon);
        }

        Ok(ReferenceDatabase {
            signatures,
            genomes,
            ref_taxa,
            taxonomy,
            parameters: DatabaseParameters {
                classification_version: doc.classification_version,
                extra: doc.extra,
            },
        })
    }

    /// Load from a directory containing exactly one `.gdb` and one `.gs` file.
    pub fn from_dir(dir: &Path) -> Result<ReferenceDatabase> {
        let mut genomes_file = None;
        let mut signatures_file = None;

        let entries = fs::read_dir(dir).map_err(|e| GambitError::io(dir, "read dir", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| GambitError::io(dir, "read dir", e))?;
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(GENOMES_EXT) => {
                    if genomes_file.replace(path).is_some() {
                        return Err(GambitError::database(
                            dir,
                            format!("multiple .{} files in database directory", GENOMES_EXT),
                        ));
                    }
                }
                Some(SIGNATURES_EXT) => {
                    if signatures_file.replace(path).is_some() {
                        return Err(GambitError::database(
                            dir,
                            format!("multiple .{} files in database directory", SIGNATURES_EXT),
                        ));
                    }
                }
                _ => {}
            }
        }

        let genomes_path = genomes_file.ok_or_else(|| {
            GambitError::database(dir, format!("no .{} file in database directory", GENOMES_EXT))
        })?;
        let signatures_path = signatures_file.ok_or_else(|| {
            GambitError::database(dir, format!("no .{} file in database directory", SIGNATURES_EXT))
        })?;
        Self::load(&genomes_path, &signatures_path)
    }

    /// Number of reference genomes (= number of signatures).
    pub fn num_refs(&self) -> usize {
        self.genomes.len()
    }

    pub fn spec(&self) -> &KmerSpec {
        self.signatures.spec()
    }

    pub fn signatures(&self) -> &SignatureFile {
        &self.signatures
    }

    /// The `i`th reference signature as an owned value.
    pub fn signature(&self, i: usize) -> crate::signatures::Signature {
        self.signatures.get(i)
    }

    pub fn genome(&self, i: usize) -> &Genome {
        &self.genomes[i]
    }

    pub fn taxon_of(&self, i: usize) -> Option<TaxonId> {
        self.ref_taxa[i]
    }

    /// Per-reference taxa in signature order, for the classifier.
    pub fn ref_taxa(&self) -> &[Option<TaxonId>] {
        &self.ref_taxa
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn parameters(&self) -> &DatabaseParameters {
        &self.parameters
    }
}
