//! Command-line interface for dgeflow

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::error::Result;
use crate::mapping::UnmappedPolicy;
use crate::workflow::{SampleSubset, WorkflowConfig};

#[derive(Parser)]
#[command(name = "dgeflow")]
#[command(version)]
#[command(about = "RNA-seq differential expression and pathway enrichment workflow")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full workflow
    #[command(
        long_about = "Run the full workflow\n\n\
            Loads the clinical and count tables, drops low-count genes, draws a PCA\n\
            of all samples, fits the negative binomial model on the selected samples,\n\
            tests and shrinks fold changes, splits up- and down-regulated genes,\n\
            maps them to gene symbols with BioMart and queries Enrichr.",
        after_long_help = "\
Examples:
  # Cisplatin against untreated, kidney samples only
  dgeflow run --clinical clinical.tsv --counts counts.tsv \\
    --subset organ=kidney --reference untrt -o kidney_out

  # Settings from a JSON file, overriding the libraries
  dgeflow run --config workflow.json --library KEGG_2019_Mouse"
    )]
    Run(RunArgs),

    /// PCA of all samples only
    Pca(PcaArgs),

    /// List the gene-set libraries Enrichr offers for an organism
    Libraries {
        /// human, mouse, fly, yeast, worm or fish
        #[arg(long, default_value = "mouse")]
        organism: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON workflow configuration; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Clinical table (TSV with a sample id column)
    #[arg(long)]
    pub clinical: Option<PathBuf>,

    /// Count table (TSV, first column geneIDs)
    #[arg(long)]
    pub counts: Option<PathBuf>,

    /// Sample id column of the clinical table
    #[arg(long)]
    pub id_column: Option<String>,

    /// Design factor
    #[arg(short, long)]
    pub design: Option<String>,

    /// Reference level of the design factor
    #[arg(long)]
    pub reference: Option<String>,

    /// Level compared against the reference
    #[arg(long)]
    pub numerator: Option<String>,

    /// Analyse only samples with attribute=value
    #[arg(long, value_name = "ATTRIBUTE=VALUE")]
    pub subset: Option<SampleSubset>,

    /// Minimum total count of a kept gene
    #[arg(long)]
    pub min_count: Option<f64>,

    /// Skip the Cook's distance outlier refit
    #[arg(long)]
    pub no_refit: bool,

    /// Adjusted p-value threshold of regulated genes; also the testing
    /// alpha and the MA and volcano highlight threshold
    #[arg(long)]
    pub padj: Option<f64>,

    /// Absolute log2 fold change threshold of regulated genes and of the
    /// volcano guide lines; must be > 0
    #[arg(long)]
    pub lfc: Option<f64>,

    /// Identifiers per BioMart request
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// drop, keep-source or fail
    #[arg(long)]
    pub unmapped: Option<UnmappedPolicy>,

    /// Enrichr library; repeat for several
    #[arg(long = "library")]
    pub libraries: Vec<String>,

    /// Enrichr organism
    #[arg(long)]
    pub organism: Option<String>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Configuration file (or defaults) with every given flag applied
    pub fn to_config(&self) -> Result<WorkflowConfig> {
        let mut config = match &self.config {
            Some(path) => WorkflowConfig::from_json_file(path)?,
            None => WorkflowConfig::default(),
        };
        if let Some(v) = &self.clinical {
            config.clinical = v.clone();
        }
        if let Some(v) = &self.counts {
            config.counts = v.clone();
        }
        if let Some(v) = &self.id_column {
            config.id_column = v.clone();
        }
        if let Some(v) = &self.design {
            config.design_factor = v.clone();
        }
        if let Some(v) = &self.reference {
            config.reference_level = Some(v.clone());
        }
        if let Some(v) = &self.numerator {
            config.numerator = Some(v.clone());
        }
        if let Some(v) = &self.subset {
            config.subset = Some(v.clone());
        }
        if let Some(v) = self.min_count {
            config.min_total_count = v;
        }
        if self.no_refit {
            config.refit_cooks = false;
        }
        if let Some(v) = self.padj {
            config.split.padj = v;
            config.volcano.padj = v;
            config.alpha = v;
        }
        if let Some(v) = self.lfc {
            config.split.lfc = v;
            config.volcano.lfc = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.unmapped {
            config.unmapped_policy = v;
        }
        if !self.libraries.is_empty() {
            config.libraries = self.libraries.clone();
        }
        if let Some(v) = &self.organism {
            config.organism = v.clone();
        }
        if let Some(v) = &self.output {
            config.output_dir = v.clone();
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct PcaArgs {
    #[arg(long, default_value = "clinical.tsv")]
    pub clinical: PathBuf,

    #[arg(long, default_value = "counts.tsv")]
    pub counts: PathBuf,

    #[arg(long, default_value = "sampleID")]
    pub id_column: String,

    /// Design factor used to build the dataset
    #[arg(short, long, default_value = "condition")]
    pub design: String,

    /// Highest-variance genes to use (0 = all)
    #[arg(long, default_value = "500")]
    pub top: usize,

    #[arg(long, default_value = "organ")]
    pub color_by: String,

    #[arg(long, default_value = "condition")]
    pub symbol_by: String,

    /// Output SVG
    #[arg(short, long, default_value = "pca.svg")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "dgeflow",
            "run",
            "--subset",
            "organ=kidney",
            "--library",
            "KEGG_2019_Mouse",
            "--library",
            "GO_Biological_Process_2021",
            "--unmapped",
            "keep-source",
            "--no-refit",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.subset.unwrap().value, "kidney");
        assert_eq!(config.libraries.len(), 2);
        assert_eq!(config.unmapped_policy, UnmappedPolicy::KeepSource);
        assert!(!config.refit_cooks);
        assert_eq!(config.batch_size, 200);
    }

    #[test]
    fn test_thresholds_reach_plots_and_split() {
        let cli = Cli::try_parse_from(["dgeflow", "run", "--padj", "0.01", "--lfc", "2"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.split.padj, 0.01);
        assert_eq!(config.volcano.padj, 0.01);
        assert_eq!(config.alpha, 0.01);
        assert_eq!(config.split.lfc, 2.0);
        assert_eq!(config.volcano.lfc, 2.0);
    }

    #[test]
    fn test_libraries_default_organism() {
        let cli = Cli::try_parse_from(["dgeflow", "libraries"]).unwrap();
        match cli.command {
            Commands::Libraries { organism } => assert_eq!(organism, "mouse"),
            _ => panic!("expected libraries"),
        }
        assert!(Cli::try_parse_from(["dgeflow", "run", "--subset", "organ"]).is_err());
    }
}
