use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use flate2::read::MultiGzDecoder;
use itertools::Itertools;
use log::{debug, info};
use ndarray::Array2;

use crate::counts::{AlleleCountMap, AlleleCountMapBuilder, CoverageHistogram, Location, VariantType};
use crate::error::{Result, StatsError};
use crate::pca::PcaResult;

/// Fixed leading columns of the allele-count table; sample columns follow.
pub const COUNT_TABLE_COLUMNS: [&str; 4] = ["gene", "variant_type", "contig", "location"];

/// Opens a plain or gzip-compressed (by `.gz` extension) file.
pub fn open_reader(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn tsv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_reader(reader)
}

fn field<'a>(record: &'a StringRecord, idx: usize, line: usize, name: &str) -> Result<&'a str> {
    record
        .get(idx)
        .map(str::trim)
        .ok_or_else(|| StatsError::parse(line, format!("missing column '{}'", name)))
}

fn parse_field<T: std::str::FromStr>(text: &str, line: usize, name: &str) -> Result<T> {
    text.parse::<T>()
        .map_err(|_| StatsError::parse(line, format!("invalid {} '{}'", name, text)))
}

fn record_line(record: &StringRecord, fallback: usize) -> usize {
    record
        .position()
        .map_or(fallback, |p| p.line() as usize)
}

/// Parses one `alt,depth` cell into `(alt, ref)`.
fn parse_count_cell(cell: &str, line: usize) -> Result<(i64, i64)> {
    let (alt, depth) = cell
        .split_once(',')
        .ok_or_else(|| StatsError::parse(line, format!("expected 'alt,depth', found '{}'", cell)))?;
    let alt: i64 = parse_field(alt.trim(), line, "alt count")?;
    let depth: i64 = parse_field(depth.trim(), line, "depth")?;
    if alt > depth {
        return Err(StatsError::parse(
            line,
            format!("alt count {} exceeds depth {}", alt, depth),
        ));
    }
    Ok((alt, depth - alt))
}

/// Reads the long-format allele-count table.
///
/// The header is `gene variant_type contig location <sample>...` and every
/// sample cell holds `alt,depth`.
pub fn read_allele_count_map<R: Read>(reader: R) -> Result<AlleleCountMap> {
    let mut csv_reader = tsv_reader(reader);
    let headers = csv_reader.headers()?.clone();
    for (idx, expected) in COUNT_TABLE_COLUMNS.iter().enumerate() {
        if headers.get(idx).map(str::trim) != Some(*expected) {
            return Err(StatsError::parse(
                1,
                format!("header column {} must be '{}'", idx + 1, expected),
            ));
        }
    }
    let samples: Vec<String> = headers
        .iter()
        .skip(COUNT_TABLE_COLUMNS.len())
        .map(|s| s.trim().to_string())
        .collect();
    if samples.is_empty() {
        return Err(StatsError::EmptySampleSet("allele-count table"));
    }

    let mut builder = AlleleCountMapBuilder::new(samples);
    let mut cells = Vec::with_capacity(builder.num_samples());
    let mut num_sites = 0usize;
    for (idx, result) in csv_reader.records().enumerate() {
        let record = result?;
        let line = record_line(&record, idx + 2);
        if record.len() != headers.len() {
            return Err(StatsError::parse(
                line,
                format!("expected {} fields, found {}", headers.len(), record.len()),
            ));
        }
        let gene = field(&record, 0, line, "gene")?;
        let variant_type: VariantType = field(&record, 1, line, "variant_type")?
            .parse()
            .map_err(|e: StatsError| StatsError::parse(line, e.to_string()))?;
        let contig = field(&record, 2, line, "contig")?;
        let position: u64 = parse_field(field(&record, 3, line, "location")?, line, "location")?;

        cells.clear();
        for cell in record.iter().skip(COUNT_TABLE_COLUMNS.len()) {
            cells.push(parse_count_cell(cell.trim(), line)?);
        }
        builder.push_site(gene, variant_type, Location::new(contig, position), &cells)?;
        num_sites += 1;
    }

    let map = builder.finish()?;
    info!(
        "Loaded {} sites in {} genes across {} samples",
        num_sites,
        map.genes().len(),
        map.num_samples()
    );
    Ok(map)
}

pub fn load_allele_count_map(path: &Path) -> Result<AlleleCountMap> {
    debug!("Reading allele counts from {}", path.display());
    read_allele_count_map(open_reader(path)?)
}

/// Reads `sample depth count` rows into one histogram per sample.
pub fn read_coverage_histograms<R: Read>(reader: R) -> Result<BTreeMap<String, CoverageHistogram>> {
    let mut csv_reader = tsv_reader(reader);
    let mut histograms: BTreeMap<String, CoverageHistogram> = BTreeMap::new();
    for (idx, result) in csv_reader.records().enumerate() {
        let record = result?;
        let line = record_line(&record, idx + 2);
        let sample = field(&record, 0, line, "sample")?;
        let depth: u32 = parse_field(field(&record, 1, line, "depth")?, line, "depth")?;
        let count: u64 = parse_field(field(&record, 2, line, "count")?, line, "count")?;
        histograms
            .entry(sample.to_string())
            .or_default()
            .add(depth, count);
    }
    Ok(histograms)
}

pub fn load_coverage_histograms(path: &Path) -> Result<BTreeMap<String, CoverageHistogram>> {
    read_coverage_histograms(open_reader(path)?)
}

/// Reads a labelled square matrix: header `<corner> S1 S2 ...`, then one `Si v...` row per sample.
pub fn read_distance_matrix<R: Read>(reader: R) -> Result<(Vec<String>, Array2<f64>)> {
    let mut csv_reader = tsv_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let samples: Vec<String> = headers.iter().skip(1).map(|s| s.trim().to_string()).collect();
    let n = samples.len();
    if n == 0 {
        return Err(StatsError::EmptySampleSet("distance matrix"));
    }

    let mut matrix = Array2::<f64>::zeros((n, n));
    let mut rows = 0usize;
    for (idx, result) in csv_reader.records().enumerate() {
        let record = result?;
        let line = record_line(&record, idx + 2);
        if rows >= n {
            return Err(StatsError::parse(line, "more rows than header samples"));
        }
        let label = field(&record, 0, line, "sample")?;
        if label != samples[rows] {
            return Err(StatsError::parse(
                line,
                format!("row '{}' does not match column '{}'", label, samples[rows]),
            ));
        }
        StatsError::check_samples("distance matrix row", n + 1, record.len())?;
        for col in 0..n {
            let value: f64 = parse_field(field(&record, col + 1, line, "distance")?, line, "distance")?;
            matrix[[rows, col]] = value;
        }
        rows += 1;
    }
    StatsError::check_samples("distance matrix rows", n, rows)?;
    Ok((samples, matrix))
}

pub fn load_distance_matrix(path: &Path) -> Result<(Vec<String>, Array2<f64>)> {
    read_distance_matrix(open_reader(path)?)
}

/// Writes a labelled sample x sample matrix as TSV.
pub fn write_matrix_tsv<W: Write>(writer: W, samples: &[String], matrix: &Array2<f64>) -> Result<()> {
    let (rows, cols) = matrix.dim();
    StatsError::check_samples("matrix rows", samples.len(), rows)?;
    StatsError::check_samples("matrix columns", samples.len(), cols)?;

    let mut csv_writer = WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    let mut header = vec!["sample".to_string()];
    header.extend(samples.iter().cloned());
    csv_writer.write_record(&header)?;
    for (sample, row) in samples.iter().zip(matrix.outer_iter()) {
        let mut record = Vec::with_capacity(cols + 1);
        record.push(sample.clone());
        record.extend(row.iter().map(|v| format!("{:.6}", v)));
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_matrix_file(path: &Path, samples: &[String], matrix: &Array2<f64>) -> Result<()> {
    let file = File::create(path)?;
    write_matrix_tsv(BufWriter::new(file), samples, matrix)?;
    debug!("Wrote {}x{} matrix to {}", matrix.nrows(), matrix.ncols(), path.display());
    Ok(())
}

/// Distance matrix in PHYLIP square format (sample count, then one named row per sample).
pub fn phylip_distance_matrix_str(samples: &[String], matrix: &Array2<f64>) -> Result<String> {
    let (rows, cols) = matrix.dim();
    StatsError::check_samples("PHYLIP rows", samples.len(), rows)?;
    StatsError::check_samples("PHYLIP columns", samples.len(), cols)?;

    let lines = samples.iter().zip(matrix.outer_iter()).map(|(sample, row)| {
        std::iter::once(sample.clone())
            .chain(row.iter().map(|value| value.to_string()))
            .join(" ")
    });
    Ok(std::iter::once(samples.len().to_string())
        .chain(lines)
        .map(|line| line + "\n")
        .collect())
}

/// Writes `Sample PC1 PC2` rows for every sample.
pub fn write_pca_results<W: Write>(writer: W, samples: &[String], result: &PcaResult) -> Result<()> {
    StatsError::check_samples("PCA samples", samples.len(), result.pc1.len())?;
    let mut writer = writer;
    writeln!(
        writer,
        "# variance explained: PC1={:.6} PC2={:.6}",
        result.variance_explained.0, result.variance_explained.1
    )?;
    writeln!(writer, "Sample\tPC1\tPC2")?;
    for (idx, sample) in samples.iter().enumerate() {
        writeln!(
            writer,
            "{}\t{:.6}\t{:.6}",
            sample, result.pc1[idx], result.pc2[idx]
        )?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_pca_results_to_file(path: &Path, samples: &[String], result: &PcaResult) -> Result<()> {
    let file = File::create(path)?;
    write_pca_results(BufWriter::new(file), samples, result)?;
    info!("PCA results written to {}", path.display());
    Ok(())
}
