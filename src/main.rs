//! dgeflow command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use dgeflow::cli::{Cli, Commands, PcaArgs, RunArgs};
use dgeflow::plot::{pca, render_pca, PcaParams};
use dgeflow::prelude::*;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Run(args) => run(&args),
        Commands::Pca(args) => run_pca(&args),
        Commands::Libraries { organism } => list_libraries(&organism),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let config = args.to_config()?;
    info!(
        "Running workflow: {} vs reference {:?}, output in {}",
        config.design_factor,
        config.reference_level,
        config.output_dir.display()
    );

    let lookup = BiomartClient::new(config.biomart.clone())?;
    let enrichr = EnrichrClient::for_organism(&config.organism)?;
    let report = run_workflow(&config, &lookup, &enrichr)?;

    print!("{}", report);
    Ok(())
}

fn run_pca(args: &PcaArgs) -> Result<()> {
    let (counts, clinical) = load_dataset(&args.clinical, &args.counts, &args.id_column)?;
    let counts = filter_low_counts(&counts, dgeflow::filter::DEFAULT_MIN_TOTAL)?;

    let mut dds = DgeDataSet::new(counts, clinical, &args.design, None)?;
    estimate_size_factors(&mut dds, SizeFactorMethod::Ratio)?;
    let transformed = vst(&dds, true)?;
    dds.set_vst_layer(transformed.data)?;

    let params = PcaParams {
        n_top: args.top,
        use_vst: true,
        color_by: args.color_by.clone(),
        symbol_by: args.symbol_by.clone(),
    };
    let result = pca(&dds, &params)?;
    render_pca(&result, &args.output)?;

    for (id, row) in result.sample_ids.iter().zip(result.coordinates.rows()) {
        println!("{}\t{:.4}\t{:.4}\t{:.4}", id, row[0], row[1], row[2]);
    }
    info!("PCA plot written to {}", args.output.display());
    Ok(())
}

fn list_libraries(organism: &str) -> Result<()> {
    let client = EnrichrClient::for_organism(organism)?;
    let names = client.library_names()?;
    info!("{} libraries for {}", names.len(), organism);
    for name in names {
        println!("{}", name);
    }
    Ok(())
}
