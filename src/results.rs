//! Export query results in CSV or JSON format.

use std::io::Write;

use crate::db::ReferenceDatabase;
use crate::error::{GambitError, Result};
use crate::query::{QueryResultItem, QueryResults};
use crate::taxonomy::{TaxonId, Taxonomy};

/// Version string reported in JSON output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CSV column order. `predicted.*` is the reportable taxon, `next.*` the
/// next most specific taxon whose threshold was not met.
const CSV_COLUMNS: [&str; 11] = [
    "query",
    "predicted.name",
    "predicted.rank",
    "predicted.ncbi_id",
    "predicted.threshold",
    "closest.distance",
    "closest.description",
    "next.name",
    "next.rank",
    "next.ncbi_id",
    "next.threshold",
];

/// Write results as CSV, one row per query.
pub fn export_csv<W: Write>(out: &mut W, results: &QueryResults, db: &ReferenceDatabase) -> Result<()> {
    let write_err = |e: std::io::Error| GambitError::io("<output>", "write", e);

    writeln!(out, "{}", CSV_COLUMNS.join(",")).map_err(write_err)?;
    for item in &results.items {
        let row = csv_row(item, db);
        let encoded: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        writeln!(out, "{}", encoded.join(",")).map_err(write_err)?;
    }
    Ok(())
}

fn csv_row(item: &QueryResultItem, db: &ReferenceDatabase) -> Vec<String> {
    let taxonomy = db.taxonomy();
    let closest = &item.classifier_result.closest_match;

    let mut row = vec![item.label.clone()];
    row.extend(taxon_fields(taxonomy, item.report_taxon));
    row.push(format_distance(closest.distance));
    row.push(db.genome(closest.genome).description.clone());
    row.extend(taxon_fields(taxonomy, item.classifier_result.next_taxon));
    row
}

/// `name`, `rank`, `ncbi_id`, `threshold` for a taxon; empty strings for
/// `None`.
fn taxon_fields(taxonomy: &Taxonomy, taxon: Option<TaxonId>) -> Vec<String> {
    match taxon {
        None => vec![String::new(); 4],
        Some(id) => {
            let taxon = taxonomy.get(id);
            vec![
                taxon.name.clone(),
                taxon.rank.clone().unwrap_or_default(),
                taxon.ncbi_id.map(|v| v.to_string()).unwrap_or_default(),
                taxon
                    .distance_threshold
                    .map(format_distance)
                    .unwrap_or_default(),
            ]
        }
    }
}

fn format_distance(d: f32) -> String {
    format!("{}", d)
}

/// Minimal CSV quoting: quote only fields containing the delimiter, quotes
/// or newlines, doubling embedded quotes.
fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write results as a single JSON document.
pub fn export_json<W: Write>(out: &mut W, results: &QueryResults, db: &ReferenceDatabase) -> Result<()> {
    let taxonomy = db.taxonomy();

    let items: Vec<serde_json::Value> = results
        .items
        .iter()
        .map(|item| {
            let result = &item.classifier_result;
            serde_json::json!({
                "query": {
                    "label": item.label,
                    "file": item.file.as_ref().map(|p| p.display().to_string()),
                },
                "predicted_taxon": taxon_json(taxonomy, item.report_taxon),
                "next_taxon": taxon_json(taxonomy, result.next_taxon),
                "closest_genomes": item.closest_genomes.iter().map(|m| serde_json::json!({
                    "distance": m.distance,
                    "genome": {
                        "key": db.genome(m.genome).key,
                        "description": db.genome(m.genome).description,
                    },
                    "matched_taxon": taxon_json(taxonomy, m.matched_taxon),
                })).collect::<Vec<_>>(),
                "success": result.success,
                "warnings": result.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
                "error": result.error,
            })
        })
        .collect();

    let doc = serde_json::json!({
        "gambit_version": VERSION,
        "timestamp": results.timestamp,
        "parameters": {
            "strict": results.params.strict,
        },
        "database": {
            "classification_version": db.parameters().classification_version,
            "extra": db.parameters().extra,
        },
        "items": items,
    });

    serde_json::to_writer_pretty(&mut *out, &doc)
        .map_err(|e| GambitError::io("<output>", "write", e.into()))?;
    writeln!(out).map_err(|e| GambitError::io("<output>", "write", e))?;
    Ok(())
}

fn taxon_json(taxonomy: &Taxonomy, taxon: Option<TaxonId>) -> serde_json::Value {
    match taxon {
        None => serde_json::Value::Null,
        Some(id) => {
            let taxon = taxonomy.get(id);
            serde_json::json!({
                "name": taxon.name,
                "rank": taxon.rank,
                "ncbi_id": taxon.ncbi_id,
                "distance_threshold": taxon.distance_threshold,
            })
        }
    }
}
