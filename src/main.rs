use anyhow::Result;
use clap::Parser;

use gambit::commands::args::{Cli, Commands, SignaturesCommands};
use gambit::logging::init_logger;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match cli.command {
        Commands::Query(args) => gambit::commands::query::run(args),
        Commands::Signatures(SignaturesCommands::Create {
            output,
            genomes,
            listfile,
            k,
            prefix,
            meta,
            compress,
            cores,
        }) => gambit::commands::signatures::run_create(
            output, genomes, listfile, k, prefix, meta, compress, cores,
        ),
    }
}
