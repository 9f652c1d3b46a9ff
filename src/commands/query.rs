//! The `query` command: identify genomes against a reference database.

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::cancel::CancellationToken;
use crate::db::ReferenceDatabase;
use crate::parallel::build_pool;
use crate::query::{query_parse, query_signature_file, QueryParams};
use crate::results::{export_csv, export_json};
use crate::signatures::file::SignatureFile;

use super::args::{OutputFormat, QueryArgs};
use super::{collect_genome_inputs, open_output, resolve_db_path};

pub fn run(args: QueryArgs) -> Result<()> {
    let db_path = resolve_db_path(args.db)?;
    info!("Loading database from {}", db_path.display());
    let db = ReferenceDatabase::from_dir(&db_path)?;
    info!(
        "Loaded {} references under spec {}",
        db.num_refs(),
        db.spec()
    );

    let genomes = collect_genome_inputs(args.genomes, args.listfile.as_deref())?;
    let have_genomes = !genomes.is_empty();
    let have_sigfile = args.sigfile.is_some();
    if have_genomes == have_sigfile {
        return Err(anyhow!(
            "Supply either query genome files (positionally or via --listfile) or --sigfile"
        ));
    }

    let pool = build_pool(args.cores)?;
    let cancel = CancellationToken::new();
    let params = QueryParams {
        strict: args.strict,
        ..QueryParams::default()
    };

    let results = match &args.sigfile {
        Some(sigfile) => {
            let sigs = SignatureFile::open(sigfile)?;
            query_signature_file(&db, &sigs, &params, &pool, &cancel)?
        }
        None => query_parse(&db, &genomes, &params, &pool, &cancel)?,
    };

    let mut out = open_output(args.output.as_deref())?;
    match args.outfmt {
        OutputFormat::Csv => export_csv(&mut out, &results, &db)?,
        OutputFormat::Json => export_json(&mut out, &results, &db)?,
    }
    out.flush().context("Failed to flush output")?;
    Ok(())
}
