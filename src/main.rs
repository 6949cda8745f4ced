use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use env_logger::Builder;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn, LevelFilter};
use ndarray::Array2;
use prettytable::{row, Table};
use rand::rngs::StdRng;
use rand::SeedableRng;

use metapop::cluster::cluster_samples;
use metapop::consistency::{calculate_phylogenetic_consistency, ConsistencyReport};
use metapop::diversity::calculate_pi_matrix;
use metapop::fixation::fixation_from_config;
use metapop::haploid::classify_haploid_samples;
use metapop::io::{
    load_allele_count_map, load_coverage_histograms, load_distance_matrix, write_matrix_file,
    write_pca_results_to_file,
};
use metapop::ld::calculate_within_gene_sigmasquared;
use metapop::pca::{calculate_pca_coordinates, collect_polymorphic_genotypes};
use metapop::sfs::calculate_sample_sfs_maps;
use metapop::{GeneFilter, StatsConfig, VariantType};

#[derive(Parser, Debug)]
#[command(author, version, about = "Within- and between-host diversity statistics from per-sample allele counts", long_about = None)]
struct Args {
    /// Allele-count table (TSV, optionally gzipped)
    #[arg(short, long = "input")]
    input: PathBuf,

    /// Directory for all output files
    #[arg(short, long = "output_dir")]
    output_dir: PathBuf,

    /// Configuration file with `name = value` lines
    #[arg(long = "config_file")]
    config_file: Option<PathBuf>,

    /// Override a configuration option, e.g. --set fixation_min_change=0.6
    #[arg(long = "set", value_name = "NAME=VALUE")]
    overrides: Vec<String>,

    /// Restrict all statistics to one variant type (1D, 2D, 3D, 4D)
    #[arg(long = "variant_type")]
    variant_type: Option<String>,

    /// Ordinate samples by their polymorphic consensus genotypes
    #[arg(long = "pca", help = "Perform PCA on consensus genotypes")]
    enable_pca: bool,

    /// Pool within-gene linkage disequilibrium
    #[arg(long = "ld", help = "Estimate sigma^2 over within-gene site pairs")]
    enable_ld: bool,

    /// Cut heights for clustering; the consistency test runs at each one
    #[arg(long = "cluster_max_d", num_args = 1..)]
    cluster_max_d: Vec<f64>,

    /// Samples closer than this are collapsed before clustering
    #[arg(long = "min_d", default_value = "0")]
    min_d: f64,

    /// Distance matrix for clustering; defaults to the per-site fixation rate
    #[arg(long = "distance_matrix")]
    distance_matrix: Option<PathBuf>,

    /// Coverage histograms (sample, depth, count) for haploid classification
    #[arg(long = "coverage")]
    coverage: Option<PathBuf>,

    /// Seed for the permutation null
    #[arg(long = "seed", default_value = "0")]
    seed: u64,
}

fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.bold.green} {elapsed_precise} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn load_config(args: &Args) -> Result<StatsConfig> {
    let mut config = match &args.config_file {
        Some(path) => {
            println!("Config file provided: {}", path.display());
            let file = File::open(path)
                .with_context(|| format!("opening config file {}", path.display()))?;
            StatsConfig::from_reader(BufReader::new(file))?
        }
        None => StatsConfig::default(),
    };
    for entry in &args.overrides {
        let (name, value) = entry
            .split_once('=')
            .with_context(|| format!("override '{}' is not NAME=VALUE", entry))?;
        config.set_option(name.trim(), value)?;
    }
    config.validate()?;
    Ok(config)
}

fn write_consistency_table(path: &Path, reports: &[(f64, ConsistencyReport)]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(
        writer,
        "max_d\tvariant_type\tsingleton\tpolymorphic\tinconsistent\tnull_inconsistent"
    )?;
    for (max_d, report) in reports {
        for (variant_type, singletons) in &report.singleton_counts {
            let count =
                |m: &BTreeMap<VariantType, usize>| m.get(variant_type).copied().unwrap_or(0);
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}",
                max_d,
                variant_type,
                singletons,
                count(&report.polymorphic_counts),
                count(&report.inconsistent_counts),
                count(&report.null_inconsistent_counts)
            )?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn format_rate(rate: Option<f64>) -> String {
    rate.map_or_else(|| "NA".to_string(), |r| format!("{:.4}", r))
}

fn main() -> Result<()> {
    Builder::new().filter_level(LevelFilter::Info).init();
    let args = Args::parse();

    println!("{}", "Starting metagenomic diversity analysis...".green());
    let config = load_config(&args)?;
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating output directory {}", args.output_dir.display()))?;
    let out = |name: &str| args.output_dir.join(name);

    let filter = match &args.variant_type {
        Some(vt) => GeneFilter::variant_type(vt.parse::<VariantType>()?),
        None => GeneFilter::all(),
    };

    let spinner = create_spinner(&format!("Loading allele counts from {}", args.input.display()));
    let map = load_allele_count_map(&args.input)
        .with_context(|| format!("loading {}", args.input.display()))?;
    spinner.finish_and_clear();
    let samples = map.samples().to_vec();

    let mut summary = Table::new();
    summary.add_row(row!["Statistic", "Value"]);
    summary.add_row(row!["Samples", samples.len()]);
    summary.add_row(row!["Gene entries", map.len()]);

    let spinner = create_spinner("Calculating pairwise diversity");
    let pi = calculate_pi_matrix(&map, &filter);
    let (pi_per_site, avg_pi_per_site) = pi.normalized(config.min_passed_sites_per_person);
    write_matrix_file(&out("pi_matrix.tsv"), &samples, &pi_per_site)?;
    write_matrix_file(&out("avg_pi_matrix.tsv"), &samples, &avg_pi_per_site)?;
    write_matrix_file(&out("passed_sites.tsv"), &samples, &pi.passed_sites)?;
    spinner.finish_and_clear();
    let mean_within = if samples.is_empty() {
        0.0
    } else {
        pi_per_site.diag().sum() / samples.len() as f64
    };
    summary.add_row(row!["Mean within-sample pi", format!("{:.6}", mean_within)]);

    let spinner = create_spinner("Counting fixed differences");
    let (fixation, mutation_reversion, new_snps) = fixation_from_config(&map, &filter, &config);
    write_matrix_file(&out("fixation_matrix.tsv"), &samples, &fixation.fixations)?;
    write_matrix_file(&out("fixation_passed_sites.tsv"), &samples, &fixation.passed_sites)?;
    write_matrix_file(&out("mutation_matrix.tsv"), &samples, &mutation_reversion.mutations)?;
    write_matrix_file(&out("reversion_matrix.tsv"), &samples, &mutation_reversion.reversions)?;
    write_matrix_file(&out("new_snp_matrix.tsv"), &samples, &new_snps.new_snps)?;
    spinner.finish_and_clear();
    summary.add_row(row!["Fixed differences (pairs summed)", fixation.fixations.sum() / 2.0]);

    if args.enable_pca {
        let calls = collect_polymorphic_genotypes(&map, &filter, &config.consensus)?;
        if calls.num_sites() == 0 {
            warn!("No polymorphic sites; skipping PCA");
        } else {
            match calculate_pca_coordinates(&calls) {
                Ok(result) => {
                    write_pca_results_to_file(&out("pca.tsv"), &samples, &result)?;
                    summary.add_row(row![
                        "PC1 / PC2 variance",
                        format!(
                            "{:.3} / {:.3}",
                            result.variance_explained.0, result.variance_explained.1
                        )
                    ]);
                }
                Err(e) => warn!("PCA skipped: {}", e),
            }
        }
    }

    if args.enable_ld {
        let spinner = create_spinner("Estimating linkage disequilibrium");
        let accumulator = calculate_within_gene_sigmasquared(&map, &filter, &config.consensus)?;
        spinner.finish_and_clear();
        let mut writer = BufWriter::new(File::create(out("sigma_squared.txt"))?);
        writeln!(writer, "sigma_squared\t{}", format_rate(accumulator.estimate()))?;
        writeln!(writer, "pairs\t{}", accumulator.pairs)?;
        writeln!(writer, "undefined_pairs\t{}", accumulator.undefined_pairs)?;
        writer.flush()?;
        summary.add_row(row!["sigma^2", format_rate(accumulator.estimate())]);
    }

    if !args.cluster_max_d.is_empty() {
        let distance: Array2<f64> = match &args.distance_matrix {
            Some(path) => {
                let (names, matrix) = load_distance_matrix(path)?;
                if names != samples {
                    anyhow::bail!(
                        "distance matrix samples do not match the allele-count table in {}",
                        path.display()
                    );
                }
                matrix
            }
            None => fixation.distance_matrix(),
        };

        let clustering = cluster_samples(&distance, args.min_d, &args.cluster_max_d)?;
        let mut writer = BufWriter::new(File::create(out("clusters.tsv"))?);
        writeln!(writer, "max_d\tcluster\tsample")?;
        for (max_d, clusters) in args.cluster_max_d.iter().zip(&clustering.clusters) {
            for (cluster_idx, mask) in clusters.iter().enumerate() {
                for (sample, _) in samples.iter().zip(mask).filter(|&(_, &m)| m) {
                    writeln!(writer, "{}\t{}\t{}", max_d, cluster_idx, sample)?;
                }
            }
        }
        writer.flush()?;

        let mut rng = StdRng::seed_from_u64(args.seed);
        let spinner = create_spinner("Testing phylogenetic consistency");
        let mut reports = Vec::with_capacity(args.cluster_max_d.len());
        for (&max_d, clusters) in args.cluster_max_d.iter().zip(&clustering.clusters) {
            info!("Consistency test at max_d={} over {} clusters", max_d, clusters.len());
            let report = calculate_phylogenetic_consistency(
                &map,
                &filter,
                clusters,
                &clustering.coarse_grained,
                &config.consensus,
                config.permutation_max_attempts,
                &mut rng,
            )?;
            reports.push((max_d, report));
        }
        spinner.finish_and_clear();
        write_consistency_table(&out("consistency.tsv"), &reports)?;
        for ((max_d, report), clusters) in reports.iter().zip(&clustering.clusters) {
            summary.add_row(row![format!("Clusters (max_d={})", max_d), clusters.len()]);
            summary.add_row(row![
                format!("Inconsistency rate (max_d={})", max_d),
                format_rate(report.inconsistency_rate())
            ]);
            summary.add_row(row![
                format!("Null inconsistency rate (max_d={})", max_d),
                format_rate(report.null_inconsistency_rate())
            ]);
        }
    }

    if let Some(path) = &args.coverage {
        let histograms = load_coverage_histograms(path)
            .with_context(|| format!("loading coverage histograms {}", path.display()))?;
        let synonymous = GeneFilter::variant_type(VariantType::FourD);
        let sfs_maps = calculate_sample_sfs_maps(&map, &synonymous, &config.consensus)?;
        let haploid = classify_haploid_samples(&samples, &histograms, &sfs_maps, &config);
        let mut writer = BufWriter::new(File::create(out("haploid_samples.txt"))?);
        for sample in &haploid {
            writeln!(writer, "{}", sample)?;
        }
        writer.flush()?;
        summary.add_row(row!["Haploid samples", haploid.len()]);
    }

    println!("\n{}", "Summary:".green().bold());
    summary.printstd();
    info!("Outputs written to {}", args.output_dir.display());
    println!("{}", "Analysis complete.".green());
    Ok(())
}
