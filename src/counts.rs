use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use ndarray::{Array2, Array3, ArrayView3, Axis};

use crate::error::{Result, StatsError};

/// Degeneracy class of a coding site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariantType {
    OneD,
    TwoD,
    ThreeD,
    FourD,
}

impl VariantType {
    pub const ALL: [VariantType; 4] = [
        VariantType::OneD,
        VariantType::TwoD,
        VariantType::ThreeD,
        VariantType::FourD,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantType::OneD => "1D",
            VariantType::TwoD => "2D",
            VariantType::ThreeD => "3D",
            VariantType::FourD => "4D",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantType {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1D" => Ok(VariantType::OneD),
            "2D" => Ok(VariantType::TwoD),
            "3D" => Ok(VariantType::ThreeD),
            "4D" => Ok(VariantType::FourD),
            other => Err(StatsError::InvalidInput(format!(
                "unknown variant type '{}'",
                other
            ))),
        }
    }
}

/// Genomic coordinate of a site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub contig: String,
    pub position: u64,
}

impl Location {
    pub fn new(contig: impl Into<String>, position: u64) -> Self {
        Location {
            contig: contig.into(),
            position,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.contig, self.position)
    }
}

/// Read counts indexed by (site, sample, allele), allele 0 = alt, 1 = ref.
///
/// Construction rejects cells whose total depth does not fit in a `u32`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlleleCounts {
    data: Array3<u32>,
}

impl AlleleCounts {
    pub fn new(data: Array3<u32>) -> Result<Self> {
        let (_, _, alleles) = data.dim();
        StatsError::check_samples("allele axis", 2, alleles)?;
        check_depths(&data)?;
        Ok(AlleleCounts { data })
    }

    /// Builds a tensor from one `(alt, ref)` vector per site.
    pub fn from_sites(sites: &[Vec<(u32, u32)>]) -> Result<Self> {
        let num_samples = sites.first().map(|s| s.len()).unwrap_or(0);
        let mut data = Array3::<u32>::zeros((sites.len(), num_samples, 2));
        for (site_idx, site) in sites.iter().enumerate() {
            StatsError::check_samples("site sample count", num_samples, site.len())?;
            for (sample_idx, &(alt, reference)) in site.iter().enumerate() {
                data[[site_idx, sample_idx, 0]] = alt;
                data[[site_idx, sample_idx, 1]] = reference;
            }
        }
        check_depths(&data)?;
        Ok(AlleleCounts { data })
    }

    /// Builds a tensor from signed counts, rejecting negative values.
    pub fn from_signed(sites: &[Vec<(i64, i64)>]) -> Result<Self> {
        let mut converted = Vec::with_capacity(sites.len());
        for (site_idx, site) in sites.iter().enumerate() {
            let mut row = Vec::with_capacity(site.len());
            for (sample_idx, &(alt, reference)) in site.iter().enumerate() {
                row.push((
                    checked_count(alt, site_idx, sample_idx)?,
                    checked_count(reference, site_idx, sample_idx)?,
                ));
            }
            converted.push(row);
        }
        AlleleCounts::from_sites(&converted)
    }

    pub fn num_sites(&self) -> usize {
        self.data.dim().0
    }

    pub fn num_samples(&self) -> usize {
        self.data.dim().1
    }

    pub fn is_empty(&self) -> bool {
        self.num_sites() == 0
    }

    pub fn view(&self) -> ArrayView3<'_, u32> {
        self.data.view()
    }

    pub fn alt(&self, site: usize, sample: usize) -> u32 {
        self.data[[site, sample, 0]]
    }

    pub fn reference(&self, site: usize, sample: usize) -> u32 {
        self.data[[site, sample, 1]]
    }

    pub fn depth(&self, site: usize, sample: usize) -> u32 {
        self.alt(site, sample) + self.reference(site, sample)
    }

    pub fn depths(&self) -> Array2<u32> {
        self.data.sum_axis(Axis(2))
    }

    /// Alt-allele frequencies; cells with zero depth read as 0 and must be masked by the caller.
    pub fn alt_freqs(&self) -> Array2<f64> {
        let (sites, samples, _) = self.data.dim();
        Array2::from_shape_fn((sites, samples), |(s, j)| {
            let depth = self.depth(s, j);
            if depth == 0 {
                0.0
            } else {
                self.alt(s, j) as f64 / depth as f64
            }
        })
    }

    /// Keeps only the samples whose mask entry is true, preserving order.
    pub fn select_samples(&self, mask: &[bool]) -> Result<AlleleCounts> {
        StatsError::check_samples("sample mask", self.num_samples(), mask.len())?;
        let kept: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        Ok(AlleleCounts {
            data: self.data.select(Axis(1), &kept),
        })
    }
}

fn check_depths(data: &Array3<u32>) -> Result<()> {
    let (sites, samples, _) = data.dim();
    for (site, sample) in (0..sites).cartesian_product(0..samples) {
        let (alt, reference) = (data[[site, sample, 0]], data[[site, sample, 1]]);
        if alt.checked_add(reference).is_none() {
            return Err(StatsError::InvalidInput(format!(
                "depth {} + {} at site {}, sample {} overflows u32",
                alt, reference, site, sample
            )));
        }
    }
    Ok(())
}

fn checked_count(value: i64, site: usize, sample: usize) -> Result<u32> {
    if value < 0 {
        return Err(StatsError::NegativeCount {
            site,
            sample,
            value,
        });
    }
    u32::try_from(value).map_err(|_| {
        StatsError::InvalidInput(format!(
            "read count {} at site {}, sample {} overflows u32",
            value, site, sample
        ))
    })
}

/// Sites of one gene and variant type. `Empty` contributes nothing to any statistic.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteData {
    Empty,
    Sites {
        locations: Vec<Location>,
        counts: AlleleCounts,
    },
}

impl SiteData {
    pub fn new(locations: Vec<Location>, counts: AlleleCounts) -> Result<Self> {
        StatsError::check_samples("site locations", counts.num_sites(), locations.len())?;
        if counts.is_empty() {
            return Ok(SiteData::Empty);
        }
        Ok(SiteData::Sites { locations, counts })
    }

    pub fn counts(&self) -> Option<&AlleleCounts> {
        match self {
            SiteData::Empty => None,
            SiteData::Sites { counts, .. } => Some(counts),
        }
    }

    pub fn locations(&self) -> &[Location] {
        match self {
            SiteData::Empty => &[],
            SiteData::Sites { locations, .. } => locations,
        }
    }
}

/// Passed-sites matrix and sites for one (gene, variant type) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneVariantData {
    /// Sample x sample count of sites covered in both samples.
    pub passed_sites: Array2<f64>,
    pub sites: SiteData,
}

impl GeneVariantData {
    /// Builds an entry whose passed-sites matrix is derived from the counts.
    pub fn from_sites(locations: Vec<Location>, counts: AlleleCounts) -> Result<Self> {
        let passed_sites = joint_coverage(&counts);
        Ok(GeneVariantData {
            passed_sites,
            sites: SiteData::new(locations, counts)?,
        })
    }
}

/// Sample x sample number of sites with depth > 0 in both samples.
pub fn joint_coverage(counts: &AlleleCounts) -> Array2<f64> {
    let covered = counts.depths().mapv(|d| if d > 0 { 1.0 } else { 0.0 });
    covered.t().dot(&covered)
}

pub type GeneKey = (String, VariantType);

/// Restricts a map traversal to some genes and variant types. `None` allows everything.
#[derive(Debug, Clone, Default)]
pub struct GeneFilter {
    pub genes: Option<BTreeSet<String>>,
    pub variant_types: Option<BTreeSet<VariantType>>,
}

impl GeneFilter {
    pub fn all() -> Self {
        GeneFilter::default()
    }

    pub fn variant_type(variant_type: VariantType) -> Self {
        GeneFilter {
            genes: None,
            variant_types: Some(std::iter::once(variant_type).collect()),
        }
    }

    pub fn with_genes<I, S>(mut self, genes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.genes = Some(genes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_variant_types<I: IntoIterator<Item = VariantType>>(mut self, types: I) -> Self {
        self.variant_types = Some(types.into_iter().collect());
        self
    }

    pub fn allows(&self, gene: &str, variant_type: VariantType) -> bool {
        self.genes.as_ref().map_or(true, |g| g.contains(gene))
            && self
                .variant_types
                .as_ref()
                .map_or(true, |t| t.contains(&variant_type))
    }
}

/// All genes of one species over a fixed, ordered sample axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AlleleCountMap {
    samples: Vec<String>,
    entries: BTreeMap<GeneKey, GeneVariantData>,
}

impl AlleleCountMap {
    pub fn new(samples: Vec<String>) -> Self {
        AlleleCountMap {
            samples,
            entries: BTreeMap::new(),
        }
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(
        &mut self,
        gene: impl Into<String>,
        variant_type: VariantType,
        data: GeneVariantData,
    ) -> Result<()> {
        let n = self.num_samples();
        let (rows, cols) = data.passed_sites.dim();
        StatsError::check_samples("passed-sites rows", n, rows)?;
        StatsError::check_samples("passed-sites columns", n, cols)?;
        if let Some(counts) = data.sites.counts() {
            StatsError::check_samples("allele-count samples", n, counts.num_samples())?;
        }
        self.entries.insert((gene.into(), variant_type), data);
        Ok(())
    }

    pub fn get(&self, gene: &str, variant_type: VariantType) -> Option<&GeneVariantData> {
        self.entries.get(&(gene.to_string(), variant_type))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GeneKey, &GeneVariantData)> {
        self.entries.iter()
    }

    /// Entries passing `filter`, in (gene, variant type) order.
    pub fn select<'a>(&'a self, filter: &GeneFilter) -> Vec<(&'a GeneKey, &'a GeneVariantData)> {
        self.entries
            .iter()
            .filter(|((gene, variant_type), _)| filter.allows(gene, *variant_type))
            .collect()
    }

    pub fn genes(&self) -> BTreeSet<&str> {
        self.entries.keys().map(|(gene, _)| gene.as_str()).collect()
    }

    /// Zero matrix matching the sample axis.
    pub fn zero_matrix(&self) -> Array2<f64> {
        Array2::zeros((self.num_samples(), self.num_samples()))
    }
}

#[derive(Debug, Default)]
struct PendingEntry {
    locations: Vec<Location>,
    counts: Vec<(u32, u32)>,
}

/// Incrementally assembles an [`AlleleCountMap`] one site at a time.
///
/// The first site of a gene registers every variant type for it, so absent
/// types show up as [`SiteData::Empty`] with a zero passed-sites matrix.
#[derive(Debug)]
pub struct AlleleCountMapBuilder {
    samples: Vec<String>,
    pending: BTreeMap<GeneKey, PendingEntry>,
}

impl AlleleCountMapBuilder {
    pub fn new(samples: Vec<String>) -> Self {
        AlleleCountMapBuilder {
            samples,
            pending: BTreeMap::new(),
        }
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn push_site(
        &mut self,
        gene: &str,
        variant_type: VariantType,
        location: Location,
        counts: &[(i64, i64)],
    ) -> Result<()> {
        StatsError::check_samples("site sample count", self.samples.len(), counts.len())?;
        let site_idx = self
            .pending
            .get(&(gene.to_string(), variant_type))
            .map_or(0, |p| p.locations.len());

        let mut row = Vec::with_capacity(counts.len());
        for (sample_idx, &(alt, reference)) in counts.iter().enumerate() {
            row.push((
                checked_count(alt, site_idx, sample_idx)?,
                checked_count(reference, site_idx, sample_idx)?,
            ));
        }

        if !self.pending.keys().any(|(g, _)| g == gene) {
            for vt in VariantType::ALL {
                self.pending
                    .insert((gene.to_string(), vt), PendingEntry::default());
            }
        }
        let entry = self
            .pending
            .entry((gene.to_string(), variant_type))
            .or_default();
        entry.locations.push(location);
        entry.counts.extend(row);
        Ok(())
    }

    pub fn finish(self) -> Result<AlleleCountMap> {
        let n = self.samples.len();
        let mut map = AlleleCountMap::new(self.samples);
        for ((gene, variant_type), pending) in self.pending {
            let num_sites = pending.locations.len();
            let mut data = Array3::<u32>::zeros((num_sites, n, 2));
            for (flat_idx, &(alt, reference)) in pending.counts.iter().enumerate() {
                let (site, sample) = (flat_idx / n, flat_idx % n);
                data[[site, sample, 0]] = alt;
                data[[site, sample, 1]] = reference;
            }
            let entry = GeneVariantData::from_sites(pending.locations, AlleleCounts::new(data)?)?;
            map.insert(gene, variant_type, entry)?;
        }
        Ok(map)
    }
}

/// Per-sample genome-wide coverage histogram (depth -> number of sites).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageHistogram {
    pub counts: BTreeMap<u32, u64>,
}

impl CoverageHistogram {
    pub fn new(counts: BTreeMap<u32, u64>) -> Self {
        CoverageHistogram { counts }
    }

    pub fn add(&mut self, depth: u32, count: u64) {
        *self.counts.entry(depth).or_insert(0) += count;
    }

    /// Median depth over sites with non-zero depth; 0 when nothing is covered.
    pub fn nonzero_median(&self) -> f64 {
        let total: u64 = self
            .counts
            .iter()
            .filter(|&(&depth, _)| depth > 0)
            .map(|(_, &count)| count)
            .sum();
        if total == 0 {
            return 0.0;
        }
        let mut cumulative = 0u64;
        for (&depth, &count) in self.counts.iter().filter(|&(&depth, _)| depth > 0) {
            cumulative += count;
            if cumulative as f64 / total as f64 >= 0.5 {
                return depth as f64;
            }
        }
        0.0
    }
}
