#[cfg(test)]
mod io_tests {
    use crate::counts::VariantType;
    use crate::error::StatsError;
    use crate::io::*;
    use crate::pca::PcaResult;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use ndarray::{array, Array1};
    use std::fs::File;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;

    const TABLE: &str = "gene\tvariant_type\tcontig\tlocation\tA\tB\n\
                         # comment lines are skipped\n\
                         g1\t4D\tc1\t100\t3,10\t0,5\n\
                         g1\t4D\tc1\t103\t0,0\t2,2\n\
                         g2\t1D\tc2\t7\t1,1\t0,9\n";

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_read_allele_count_map() {
        let map = read_allele_count_map(Cursor::new(TABLE)).unwrap();
        assert_eq!(map.samples(), &names(&["A", "B"])[..]);
        assert_eq!(map.len(), 8);

        let entry = map.get("g1", VariantType::FourD).unwrap();
        let counts = entry.sites.counts().unwrap();
        assert_eq!(counts.num_sites(), 2);
        assert_eq!((counts.alt(0, 0), counts.reference(0, 0)), (3, 7));
        assert_eq!(counts.depth(1, 0), 0);
        assert_eq!(entry.passed_sites, array![[1.0, 1.0], [1.0, 2.0]]);
        assert!(map.get("g2", VariantType::FourD).unwrap().sites.counts().is_none());
    }

    #[test]
    fn test_malformed_tables() {
        let bad_cell = "gene\tvariant_type\tcontig\tlocation\tA\ng\t4D\tc\t1\t3;10\n";
        assert!(matches!(
            read_allele_count_map(Cursor::new(bad_cell)),
            Err(StatsError::Parse { .. })
        ));
        let alt_above_depth = "gene\tvariant_type\tcontig\tlocation\tA\ng\t4D\tc\t1\t11,10\n";
        assert!(matches!(
            read_allele_count_map(Cursor::new(alt_above_depth)),
            Err(StatsError::Parse { .. })
        ));
        let bad_type = "gene\tvariant_type\tcontig\tlocation\tA\ng\t5D\tc\t1\t1,10\n";
        assert!(read_allele_count_map(Cursor::new(bad_type)).is_err());
        let wrong_header = "gene\ttype\tcontig\tlocation\tA\n";
        assert!(read_allele_count_map(Cursor::new(wrong_header)).is_err());
        let no_samples = "gene\tvariant_type\tcontig\tlocation\n";
        assert!(matches!(
            read_allele_count_map(Cursor::new(no_samples)),
            Err(StatsError::EmptySampleSet(_))
        ));
    }

    #[test]
    fn test_load_gzipped_table() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("counts.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        encoder.write_all(TABLE.as_bytes())?;
        encoder.finish()?;

        let map = load_allele_count_map(&path)?;
        assert_eq!(map.num_samples(), 2);
        assert_eq!(map.genes().len(), 2);
        Ok(())
    }

    #[test]
    fn test_read_coverage_histograms() {
        let text = "sample\tdepth\tcount\nA\t10\t5\nA\t20\t5\nA\t10\t1\nB\t3\t1\n";
        let histograms = read_coverage_histograms(Cursor::new(text)).unwrap();
        assert_eq!(histograms.len(), 2);
        assert_eq!(histograms["A"].counts[&10], 6);
        assert_eq!(histograms["A"].nonzero_median(), 10.0);
        assert_eq!(histograms["B"].nonzero_median(), 3.0);
    }

    #[test]
    fn test_read_distance_matrix() {
        let text = "sample\tA\tB\nA\t0\t1.5\nB\t1.5\t0\n";
        let (samples, matrix) = read_distance_matrix(Cursor::new(text)).unwrap();
        assert_eq!(samples, names(&["A", "B"]));
        assert_eq!(matrix, array![[0.0, 1.5], [1.5, 0.0]]);

        let swapped = "sample\tA\tB\nB\t0\t1.5\nA\t1.5\t0\n";
        assert!(read_distance_matrix(Cursor::new(swapped)).is_err());
        let missing_row = "sample\tA\tB\nA\t0\t1.5\n";
        assert!(read_distance_matrix(Cursor::new(missing_row)).is_err());
    }

    #[test]
    fn test_write_matrix_tsv() {
        let mut buffer = Vec::new();
        write_matrix_tsv(&mut buffer, &names(&["A", "B"]), &array![[0.0, 1.0], [1.0, 0.25]]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(
            text,
            "sample\tA\tB\nA\t0.000000\t1.000000\nB\t1.000000\t0.250000\n"
        );
        assert!(write_matrix_tsv(Vec::new(), &names(&["A"]), &array![[0.0, 1.0], [1.0, 0.0]]).is_err());
    }

    #[test]
    fn test_phylip_output() {
        let text =
            phylip_distance_matrix_str(&names(&["A", "B"]), &array![[0.0, 1.0], [1.0, 0.0]]).unwrap();
        assert_eq!(text, "2\nA 0 1\nB 1 0\n");
    }

    #[test]
    fn test_write_pca_results() {
        let result = PcaResult {
            pc1: Array1::from(vec![0.5, -0.5]),
            pc2: Array1::from(vec![0.0, 0.0]),
            variance_explained: (1.0, 0.0),
            eigenvalues: vec![1.0, 0.0],
        };
        let mut buffer = Vec::new();
        write_pca_results(&mut buffer, &names(&["A", "B"]), &result).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("# variance explained"));
        assert_eq!(lines[1], "Sample\tPC1\tPC2");
        assert_eq!(lines[2], "A\t0.500000\t0.000000");
        assert_eq!(lines.len(), 4);
    }
}
