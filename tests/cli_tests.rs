// tests/cli_tests.rs

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const COUNT_TABLE: &str = "\
gene\tvariant_type\tcontig\tlocation\ts1\ts2\ts3\ts4
gA\t4D\tc1\t10\t10,10\t10,10\t0,10\t0,10
gA\t4D\tc1\t20\t10,10\t0,10\t0,10\t0,10
gA\t4D\tc1\t30\t0,10\t10,10\t10,10\t0,10
gA\t1D\tc1\t40\t5,10\t5,10\t0,10\t10,10
gB\t4D\tc2\t5\t10,10\t10,10\t0,10\t0,10
gB\t4D\tc2\t9\t0,10\t0,10\t10,10\t10,10
";

fn write_table(dir: &Path) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
    let path = dir.join("counts.tsv");
    fs::write(&path, COUNT_TABLE)?;
    Ok(path)
}

#[test]
fn test_default_outputs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = write_table(dir.path())?;
    let out_dir = dir.path().join("out");

    let mut cmd = Command::cargo_bin("metapop")?;
    cmd.arg("--input").arg(&input).arg("--output_dir").arg(&out_dir);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Analysis complete"));

    for name in [
        "pi_matrix.tsv",
        "avg_pi_matrix.tsv",
        "passed_sites.tsv",
        "fixation_matrix.tsv",
        "fixation_passed_sites.tsv",
        "mutation_matrix.tsv",
        "reversion_matrix.tsv",
        "new_snp_matrix.tsv",
    ] {
        assert!(out_dir.join(name).exists(), "missing {}", name);
    }

    let passed = fs::read_to_string(out_dir.join("passed_sites.tsv"))?;
    assert!(passed.starts_with("sample\ts1\ts2\ts3\ts4\n"));
    // six sites, all covered in every sample
    assert!(passed.contains("s1\t6.000000\t6.000000"));
    Ok(())
}

#[test]
fn test_pca_and_ld_outputs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = write_table(dir.path())?;
    let out_dir = dir.path().join("out");

    let mut cmd = Command::cargo_bin("metapop")?;
    cmd.arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&out_dir)
        .arg("--pca")
        .arg("--ld");
    cmd.assert().success();

    let pca = fs::read_to_string(out_dir.join("pca.tsv"))?;
    assert!(pca.contains("Sample\tPC1\tPC2"));
    assert_eq!(pca.lines().count(), 6);

    let ld = fs::read_to_string(out_dir.join("sigma_squared.txt"))?;
    assert!(ld.starts_with("sigma_squared\t"));
    assert!(ld.contains("pairs\t"));
    Ok(())
}

#[test]
fn test_clustering_and_consistency() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = write_table(dir.path())?;
    let out_dir = dir.path().join("out");

    let mut cmd = Command::cargo_bin("metapop")?;
    cmd.arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&out_dir)
        .arg("--cluster_max_d")
        .arg("0.5")
        .arg("2.0")
        .arg("--seed")
        .arg("3");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Inconsistency rate"));

    let clusters = fs::read_to_string(out_dir.join("clusters.tsv"))?;
    assert!(clusters.starts_with("max_d\tcluster\tsample\n"));
    let consistency = fs::read_to_string(out_dir.join("consistency.tsv"))?;
    assert!(consistency
        .starts_with("max_d\tvariant_type\tsingleton\tpolymorphic\tinconsistent\tnull_inconsistent\n"));
    assert!(consistency.contains("\t4D\t"));
    Ok(())
}

#[test]
fn test_config_file_and_coverage() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = write_table(dir.path())?;
    let out_dir = dir.path().join("out");
    let config = dir.path().join("stats.conf");
    fs::write(&config, "# lower cut-off\nfixation_min_change = 0.6\nmin_median_coverage\t5\n")?;
    let coverage = dir.path().join("coverage.tsv");
    fs::write(
        &coverage,
        "sample\tdepth\tcount\ns1\t10\t100\ns2\t10\t100\ns3\t1\t100\ns4\t10\t100\n",
    )?;

    let mut cmd = Command::cargo_bin("metapop")?;
    cmd.arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&out_dir)
        .arg("--config_file")
        .arg(&config)
        .arg("--coverage")
        .arg(&coverage);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Config file provided"));

    let haploid = fs::read_to_string(out_dir.join("haploid_samples.txt"))?;
    assert!(!haploid.contains("s3"), "s3 is below the coverage cut-off");
    Ok(())
}

#[test]
fn test_invalid_arguments_fail() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = write_table(dir.path())?;
    let out_dir = dir.path().join("out");

    let mut missing = Command::cargo_bin("metapop")?;
    missing
        .arg("-i")
        .arg(dir.path().join("does_not_exist.tsv"))
        .arg("-o")
        .arg(&out_dir);
    missing.assert().failure();

    let mut bad_option = Command::cargo_bin("metapop")?;
    bad_option
        .arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&out_dir)
        .arg("--set")
        .arg("not_an_option=1");
    bad_option
        .assert()
        .failure()
        .stderr(predicate::str::contains("not_an_option"));

    let mut bad_type = Command::cargo_bin("metapop")?;
    bad_type
        .arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&out_dir)
        .arg("--variant_type")
        .arg("7D");
    bad_type.assert().failure();
    Ok(())
}
