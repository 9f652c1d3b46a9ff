//! Run queries against a reference database to predict taxonomy of genome
//! sequences.
//!
//! Ties the pipeline together: query signatures are compared against every
//! reference (distance vector per query), each vector is classified against
//! the taxonomy, and the predicted taxon is folded to its most specific
//! reportable ancestor for presentation.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;
use rayon::ThreadPool;

use crate::cancel::CancellationToken;
use crate::classify::{classify, matching_taxon, ClassifierResult, ClassifierWarning, GenomeMatch};
use crate::db::ReferenceDatabase;
use crate::error::{GambitError, Result};
use crate::kmers::KmerSpec;
use crate::metric::jaccard_distances_any;
use crate::signatures::calc::calc_file_signatures;
use crate::signatures::file::SignatureFile;
use crate::signatures::Signature;
use crate::taxonomy::TaxonId;

/// Parameters for running a query.
#[derive(Debug, Clone)]
pub struct QueryParams {
    /// Reconcile all significant reference matches instead of only the
    /// closest one.
    pub strict: bool,
    /// Number of reference signatures scanned between cancellation polls.
    pub chunksize: usize,
    /// Number of closest genomes to report per query (does not affect
    /// classification).
    pub report_closest: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        QueryParams {
            strict: false,
            chunksize: 1000,
            report_closest: 10,
        }
    }
}

/// Result for a single query.
#[derive(Debug)]
pub struct QueryResultItem {
    /// Unique label describing the query (file name or signature id).
    pub label: String,
    /// Path of the query genome file, when the query came from one.
    pub file: Option<PathBuf>,
    pub classifier_result: ClassifierResult,
    /// Final prediction to report: the most specific reportable ancestor of
    /// the predicted taxon.
    pub report_taxon: Option<TaxonId>,
    /// Closest reference genomes in ascending distance order.
    pub closest_genomes: Vec<GenomeMatch>,
}

/// Results for a set of queries.
#[derive(Debug)]
pub struct QueryResults {
    pub items: Vec<QueryResultItem>,
    pub params: QueryParams,
    /// Query completion time, seconds since the Unix epoch.
    pub timestamp: u64,
}

/// Verify the query spec matches the database spec.
pub fn check_spec(query_spec: &KmerSpec, db: &ReferenceDatabase) -> Result<()> {
    if query_spec != db.spec() {
        return Err(GambitError::DimensionMismatch {
            query: query_spec.to_string(),
            reference: db.spec().to_string(),
        });
    }
    Ok(())
}

/// Predict the taxonomy of pre-computed query signatures.
///
/// `labels` must be parallel to `queries`. Signatures must have been built
/// under the database's [`KmerSpec`].
pub fn query(
    db: &ReferenceDatabase,
    queries: &[Signature],
    labels: &[String],
    params: &QueryParams,
    pool: &ThreadPool,
    cancel: &CancellationToken,
) -> Result<QueryResults> {
    assert_eq!(queries.len(), labels.len());
    info!(
        "Querying {} signature(s) against {} references",
        queries.len(),
        db.num_refs()
    );

    let mut items = Vec::with_capacity(queries.len());
    for (sig, label) in queries.iter().zip(labels) {
        cancel.check()?;
        let dists =
            jaccard_distances_any(sig, db.signatures().signatures(), params.chunksize, pool, cancel)?;
        items.push(get_result_item(db, params, &dists, label.clone()));
    }

    Ok(QueryResults {
        items,
        params: params.clone(),
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    })
}

/// Query with signatures derived by parsing genome sequence files.
pub fn query_parse(
    db: &ReferenceDatabase,
    files: &[PathBuf],
    params: &QueryParams,
    pool: &ThreadPool,
    cancel: &CancellationToken,
) -> Result<QueryResults> {
    info!("Parsing {} query file(s)", files.len());
    let sigs = calc_file_signatures(db.spec(), files, pool, cancel)?;
    let labels: Vec<String> = files
        .iter()
        .map(|f| f.display().to_string())
        .collect();

    let mut results = query(db, &sigs, &labels, params, pool, cancel)?;
    for (item, file) in results.items.iter_mut().zip(files) {
        item.file = Some(file.clone());
    }
    Ok(results)
}

/// Query with signatures taken from an existing signature file.
///
/// The file's spec must equal the database spec; labels come from the file's
/// ids when present, else 1-based indices.
pub fn query_signature_file(
    db: &ReferenceDatabase,
    sigfile: &SignatureFile,
    params: &QueryParams,
    pool: &ThreadPool,
    cancel: &CancellationToken,
) -> Result<QueryResults> {
    check_spec(sigfile.spec(), db)?;

    let queries: Vec<Signature> = (0..sigfile.len()).map(|i| sigfile.get(i)).collect();
    let labels: Vec<String> = match sigfile.ids() {
        Some(ids) => ids.to_vec(),
        None => (1..=sigfile.len()).map(|i| i.to_string()).collect(),
    };
    query(db, &queries, &labels, params, pool, cancel)
}

/// Classify one distance vector and assemble the result item.
fn get_result_item(
    db: &ReferenceDatabase,
    params: &QueryParams,
    dists: &[f32],
    label: String,
) -> QueryResultItem {
    let taxonomy = db.taxonomy();
    let mut result = classify(taxonomy, db.ref_taxa(), dists, params.strict);
    let report_taxon = result
        .predicted_taxon
        .and_then(|t| taxonomy.reportable(t));

    // A prediction that cannot be reported, or a failed strict consensus,
    // means thresholds were met but no final answer exists: annotation gap
    if (result.predicted_taxon.is_some() && report_taxon.is_none()) || !result.success {
        result.warnings.push(ClassifierWarning::NoPrediction);
    }

    let mut order: Vec<usize> = (0..dists.len()).collect();
    order.sort_by(|&a, &b| dists[a].total_cmp(&dists[b]).then(a.cmp(&b)));
    let closest_genomes = order
        .into_iter()
        .take(params.report_closest)
        .map(|i| GenomeMatch {
            genome: i,
            distance: dists[i],
            matched_taxon: db
                .taxon_of(i)
                .and_then(|t| matching_taxon(taxonomy, t, dists[i])),
        })
        .collect();

    QueryResultItem {
        label,
        file: None,
        classifier_result: result,
        report_taxon,
        closest_genomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::build_pool;
    use tempfile::tempdir;

    fn spec3() -> KmerSpec {
        KmerSpec::new(b"ATGAC", 3).unwrap()
    }

    /// Two-reference database: R1 is E. coli (species τ=.2 under genus
    /// τ=.3), R2 carries no taxon.
    fn sample_db(dir: &std::path::Path) -> ReferenceDatabase {
        let gs = dir.join("refs.gs");
        let gdb = dir.join("refs.gdb");

        let sigs = vec![
            Signature::U16(vec![0, 21]), // = signature of ATGACAAAATGACCCC
            Signature::U16(vec![40, 50, 60]),
        ];
        let ids = vec!["R1".to_string(), "R2".to_string()];
        SignatureFile::create(&gs, &spec3(), sigs, Some(&ids), None).unwrap();

        let doc = serde_json::json!({
            "classification_version": "1.0",
            "genomes": [
                {"key": "R1", "description": "E. coli K-12", "taxon_id": 2},
                {"key": "R2", "description": "unplaced genome"}
            ],
            "taxa": [
                {"id": 1, "name": "Escherichia", "rank": "genus", "distance_threshold": 0.3},
                {"id": 2, "name": "Escherichia coli", "rank": "species", "ncbi_id": 562,
                 "parent_id": 1, "distance_threshold": 0.2}
            ]
        });
        std::fs::write(&gdb, serde_json::to_vec(&doc).unwrap()).unwrap();
        ReferenceDatabase::load(&gdb, &gs).unwrap()
    }

    #[test]
    fn test_query_parse_end_to_end() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let db = sample_db(dir.path());

        // Identical to R1's signature: distance 0 -> species prediction
        let query_file = dir.path().join("query.fa");
        std::fs::write(&query_file, ">q\nATGACAAAATGACCCC\n")?;

        let pool = build_pool(Some(2))?;
        let cancel = CancellationToken::new();
        let results = query_parse(
            &db,
            &[query_file.clone()],
            &QueryParams::default(),
            &pool,
            &cancel,
        )?;

        assert_eq!(results.items.len(), 1);
        let item = &results.items[0];
        assert_eq!(item.file.as_deref(), Some(query_file.as_path()));

        let predicted = item.report_taxon.expect("should predict");
        assert_eq!(db.taxonomy().get(predicted).name, "Escherichia coli");
        assert_eq!(item.classifier_result.closest_match.genome, 0);
        assert_eq!(item.classifier_result.closest_match.distance, 0.0);
        assert_eq!(item.classifier_result.next_taxon, None);
        Ok(())
    }

    #[test]
    fn test_query_signature_file_spec_mismatch() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let db = sample_db(dir.path());

        let other_spec = KmerSpec::new(b"ATGAC", 4).unwrap();
        let qpath = dir.path().join("queries.gs");
        SignatureFile::create(&qpath, &other_spec, vec![Signature::U16(vec![1])], None, None)?;
        let qfile = SignatureFile::open(&qpath)?;

        let pool = build_pool(Some(1))?;
        let cancel = CancellationToken::new();
        assert!(matches!(
            query_signature_file(&db, &qfile, &QueryParams::default(), &pool, &cancel),
            Err(GambitError::DimensionMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_query_closest_list_sorted() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let db = sample_db(dir.path());

        let pool = build_pool(Some(1))?;
        let cancel = CancellationToken::new();
        // Overlaps R2 only
        let queries = vec![Signature::U16(vec![40, 50, 60])];
        let labels = vec!["q".to_string()];
        let results = query(&db, &queries, &labels, &QueryParams::default(), &pool, &cancel)?;

        let item = &results.items[0];
        assert_eq!(item.closest_genomes.len(), 2);
        assert_eq!(item.closest_genomes[0].genome, 1);
        assert!(item.closest_genomes[0].distance <= item.closest_genomes[1].distance);
        // R2 has no taxon: closest but no prediction
        assert_eq!(item.report_taxon, None);
        Ok(())
    }

    #[test]
    fn test_query_cancelled() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let db = sample_db(dir.path());

        let pool = build_pool(Some(1))?;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let queries = vec![Signature::U16(vec![0])];
        let labels = vec!["q".to_string()];
        assert!(matches!(
            query(&db, &queries, &labels, &QueryParams::default(), &pool, &cancel),
            Err(GambitError::Cancelled)
        ));
        Ok(())
    }
}
