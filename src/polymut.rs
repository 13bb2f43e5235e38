use std::{
    collections::{HashMap, HashSet},
    fmt, fs,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{anyhow, Context};
use log::{debug, info};
use rust_htslib::bam::{self, Read};

use crate::{
    error::ParseError,
    fasta::read_fasta,
    types::{ContigPolymorphism, PolymutThresholds},
};

const BASES: [u8; 4] = *b"ACGT";
const MAX_DEPTH: u32 = 1_000_000;
/// Standard genetic code, codons ordered TCAG.
const CODON_TABLE: &[u8; 64] = b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

fn base_index(base: u8) -> Option<usize> {
    BASES.iter().position(|b| *b == base.to_ascii_uppercase())
}

fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        other => other,
    }
}

fn translate(codon: [u8; 3]) -> Option<u8> {
    let tcag = |b: u8| -> Option<usize> {
        match b {
            b'T' => Some(0),
            b'C' => Some(1),
            b'A' => Some(2),
            b'G' => Some(3),
            _ => None,
        }
    };
    let idx = 16 * tcag(codon[0])? + 4 * tcag(codon[1])? + tcag(codon[2])?;
    Some(CODON_TABLE[idx])
}

/// Quality-filtered base counts at every position of one contig.
#[derive(Debug, Clone)]
pub struct ContigPileup {
    pub name: String,
    pub counts: Vec<[u32; 4]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Dominance {
    base: u8,
    freq: f64,
    second: Option<u8>,
}

impl ContigPileup {
    pub fn new(name: &str, len: usize) -> Self {
        Self {
            name: name.to_string(),
            counts: vec![[0; 4]; len],
        }
    }

    pub fn add(&mut self, pos: usize, base: u8) {
        if let (Some(slot), Some(i)) = (self.counts.get_mut(pos), base_index(base)) {
            slot[i] += 1;
        }
    }

    /// Dominant allele at `pos`, undefined below `mincov`.
    fn dominance(&self, pos: usize, mincov: u32) -> Option<Dominance> {
        let counts = self.counts.get(pos)?;
        let cov: u32 = counts.iter().sum();
        if cov == 0 || cov < mincov {
            return None;
        }
        let mut order = [0usize, 1, 2, 3];
        // stable sort keeps ACGT order on ties
        order.sort_by(|a, b| counts[*b].cmp(&counts[*a]));
        let second = (counts[order[1]] > 0).then(|| BASES[order[1]]);

        Some(Dominance {
            base: BASES[order[0]],
            freq: counts[order[0]] as f64 / cov as f64,
            second,
        })
    }
}

/// Coding region from a GFF, 1-based inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct Cds {
    pub start: usize,
    pub end: usize,
    pub reverse: bool,
}

impl Cds {
    /// 0-based contig positions of each full codon, in reading order.
    fn codons(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        let n = (self.end + 1 - self.start) / 3;
        (0..n).map(move |i| {
            if self.reverse {
                let last = self.end - 1 - 3 * i;
                [last, last - 1, last - 2]
            } else {
                let first = self.start - 1 + 3 * i;
                [first, first + 1, first + 2]
            }
        })
    }
}

/// CDS features per contig. Parsing stops at an embedded `##FASTA` section.
pub fn read_gff<P: AsRef<Path>>(path: P) -> anyhow::Result<HashMap<String, Vec<Cds>>> {
    let path = path.as_ref();
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read GFF: {:?}", path))?;
    let mut features: HashMap<String, Vec<Cds>> = HashMap::new();

    for line in content.lines() {
        if line.starts_with("##FASTA") {
            break;
        }
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 7 || cols[2] != "CDS" {
            continue;
        }
        let coord = |v: &str| -> Result<usize, ParseError> {
            v.parse().map_err(|_| ParseError::InvalidNumber {
                path: path.to_path_buf(),
                what: "GFF coordinate".to_string(),
                value: v.to_string(),
            })
        };
        let (start, end) = (coord(cols[3])?, coord(cols[4])?);
        if start == 0 || end < start {
            return Err(anyhow!("{:?}: invalid CDS interval {}-{}", path, start, end));
        }
        features.entry(cols[0].to_string()).or_default().push(Cds {
            start,
            end,
            reverse: cols[6] == "-",
        });
    }
    Ok(features)
}

/// Count synonymous and non-synonymous polymorphisms over a contig's CDSs.
pub fn polymorphism_rate(
    pile: &ContigPileup,
    cds: &[Cds],
    thresholds: &PolymutThresholds,
) -> ContigPolymorphism {
    let dominance: Vec<Option<Dominance>> = (0..pile.counts.len())
        .map(|pos| pile.dominance(pos, thresholds.mincov))
        .collect();
    let mut stats = ContigPolymorphism {
        considered: dominance.iter().filter(|d| d.is_some()).count() as u64,
        ..Default::default()
    };

    for feature in cds {
        for positions in feature.codons() {
            let Some(doms) = positions
                .iter()
                .map(|p| dominance.get(*p).copied().flatten())
                .collect::<Option<Vec<Dominance>>>()
            else {
                continue;
            };
            let strand = |b: u8| if feature.reverse { complement(b) } else { b };
            let consensus = [strand(doms[0].base), strand(doms[1].base), strand(doms[2].base)];

            for (i, dom) in doms.iter().enumerate() {
                if dom.freq >= thresholds.dominant_frq_thrsh {
                    continue;
                }
                let Some(second) = dom.second else { continue };
                let mut alt = consensus;
                alt[i] = strand(second);

                match (translate(consensus), translate(alt)) {
                    (Some(a), Some(b)) if a != b'*' && b != b'*' => {
                        if a == b {
                            stats.ds += 1;
                        } else {
                            stats.dn += 1;
                        }
                    }
                    _ => stats.ambiguous += 1,
                }
            }
        }
    }
    stats
}

/// Pile up a sorted BAM, keeping only `contigs` when given.
pub fn pileup_contigs<P: AsRef<Path>>(
    bam_path: P,
    contigs: Option<&HashSet<String>>,
    minqual: u8,
) -> anyhow::Result<Vec<ContigPileup>> {
    let bam_path = bam_path.as_ref();
    let mut reader = bam::Reader::from_path(bam_path)
        .with_context(|| format!("Failed to open BAM: {:?}", bam_path))?;
    let header = reader.header().clone();

    let mut piles: Vec<Option<ContigPileup>> = (0..header.target_count())
        .map(|tid| {
            let name = String::from_utf8_lossy(header.tid2name(tid)).into_owned();
            let len = header.target_len(tid).unwrap_or(0) as usize;
            contigs
                .map_or(true, |c| c.contains(&name))
                .then(|| ContigPileup::new(&name, len))
        })
        .collect();

    let mut pileups = reader.pileup();
    pileups.set_max_depth(MAX_DEPTH);
    for column in pileups {
        let column = column.with_context(|| format!("Failed to pile up: {:?}", bam_path))?;
        let Some(pile) = piles
            .get_mut(column.tid() as usize)
            .and_then(Option::as_mut)
        else {
            continue;
        };
        let pos = column.pos() as usize;

        for aln in column.alignments() {
            // deletions and ref skips have no query base
            let Some(qpos) = aln.qpos() else { continue };
            let record = aln.record();
            if record.qual()[qpos] < minqual {
                continue;
            }
            pile.add(pos, record.seq()[qpos]);
        }
    }

    Ok(piles.into_iter().flatten().collect())
}

/// MAG-level totals of the per-contig statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PolymutSummary {
    pub dn: u64,
    pub ds: u64,
    pub considered: u64,
}

impl PolymutSummary {
    /// Non-synonymous polymorphisms per hundred considered positions.
    pub fn rate(&self) -> Option<f64> {
        (self.considered > 0).then(|| self.dn as f64 * 100.0 / self.considered as f64)
    }
}

impl fmt::Display for PolymutSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4}\t{:.4}\t{:.4}\t",
            self.dn as f64, self.ds as f64, self.considered as f64
        )?;
        match self.rate() {
            // shortest round-trip digits, `25.0` for whole numbers
            Some(r) => write!(f, "{:?}", r),
            None => write!(f, "NA"),
        }
    }
}

pub fn summarize_contigs(
    piles: &[ContigPileup],
    features: &HashMap<String, Vec<Cds>>,
    thresholds: &PolymutThresholds,
) -> PolymutSummary {
    piles
        .iter()
        .map(|pile| {
            let cds = features.get(&pile.name).map(Vec::as_slice).unwrap_or_default();
            let stats = polymorphism_rate(pile, cds, thresholds);
            debug!(
                "{}: DN={} DS={} D?={} considered={}",
                pile.name, stats.dn, stats.ds, stats.ambiguous, stats.considered
            );
            stats
        })
        .fold(PolymutSummary::default(), |acc, s| PolymutSummary {
            dn: acc.dn + s.dn,
            ds: acc.ds + s.ds,
            considered: acc.considered + s.considered,
        })
}

/// Strain heterogeneity of one MAG, written as a single tab-separated line.
pub fn polymut<P, Q, R>(
    bam_path: P,
    gff: Q,
    mag: Option<&Path>,
    thresholds: &PolymutThresholds,
    output: R,
) -> anyhow::Result<PolymutSummary>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    let contigs = mag
        .map(|m| -> anyhow::Result<HashSet<String>> {
            let mag_contigs = read_fasta(m)?;
            let total: u64 = mag_contigs.iter().map(|c| c.length).sum();
            debug!("{:?}: {} contigs, {} bp", m, mag_contigs.len(), total);
            Ok(mag_contigs.into_iter().map(|c| c.id).collect())
        })
        .transpose()?;
    let features = read_gff(gff)?;
    let piles = pileup_contigs(bam_path, contigs.as_ref(), thresholds.minqual)?;
    let summary = summarize_contigs(&piles, &features, thresholds);
    info!("{} contigs: {}", piles.len(), summary);

    let outpath = output.as_ref();
    let outfile =
        File::create(outpath).with_context(|| anyhow!("Could not create file: {:?}", outpath))?;
    let mut writer = BufWriter::new(outfile);
    writeln!(writer, "{}", summary)?;
    writer.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pile_from(columns: &[&[(u8, u32)]]) -> ContigPileup {
        let mut pile = ContigPileup::new("1_0", columns.len());
        for (pos, col) in columns.iter().enumerate() {
            for (base, n) in col.iter() {
                for _ in 0..*n {
                    pile.add(pos, *base);
                }
            }
        }
        pile
    }

    /// Two 10 bp contigs: `c1` carries a deletion and a low-quality base, `c2` one read.
    fn write_test_bam(path: &Path) {
        let mut header = bam::Header::new();
        for name in ["c1", "c2"] {
            let mut header_rec = bam::header::HeaderRecord::new(b"SQ");
            header_rec.push_tag(b"SN", name);
            header_rec.push_tag(b"LN", 10);
            header.push_record(&header_rec);
        }
        let view = bam::HeaderView::from_header(&header);
        let sam = [
            "r1\t0\tc1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII",
            "r2\t0\tc1\t1\t60\t2M1D2M\t*\t0\t0\tACGA\tII#I",
            "r3\t0\tc1\t1\t60\t4M\t*\t0\t0\tATGT\tIIII",
            "r4\t0\tc2\t3\t60\t4M\t*\t0\t0\tGGGG\tIIII",
        ];

        let mut writer = bam::Writer::from_path(path, &header, bam::Format::Bam).unwrap();
        for line in sam {
            let rec = bam::Record::from_sam(&view, line.as_bytes()).unwrap();
            writer.write(&rec).unwrap();
        }
    }

    #[test]
    fn pileup_skips_deletions_low_quality_and_other_contigs() {
        let dir = tempfile::tempdir().unwrap();
        let bam_path = dir.path().join("sorted.bam");
        write_test_bam(&bam_path);
        let keep = HashSet::from(["c1".to_string()]);

        let piles = pileup_contigs(&bam_path, Some(&keep), 30).unwrap();

        assert_eq!(piles.len(), 1);
        assert_eq!(piles[0].name, "c1");
        assert_eq!(piles[0].counts.len(), 10);
        // ACGT order
        assert_eq!(piles[0].counts[0], [3, 0, 0, 0]);
        assert_eq!(piles[0].counts[1], [0, 2, 0, 1]);
        assert_eq!(piles[0].counts[2], [0, 0, 2, 0]);
        assert_eq!(piles[0].counts[3], [0, 0, 0, 2]);
        assert_eq!(piles[0].counts[4], [1, 0, 0, 0]);
        assert!(piles[0].counts[5..].iter().all(|c| *c == [0; 4]));
    }

    #[test]
    fn pileup_without_filter_keeps_every_contig() {
        let dir = tempfile::tempdir().unwrap();
        let bam_path = dir.path().join("sorted.bam");
        write_test_bam(&bam_path);

        let piles = pileup_contigs(&bam_path, None, 0).unwrap();

        let names: Vec<&str> = piles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["c1", "c2"]);
        // minqual 0 keeps the low-quality G of r2
        assert_eq!(piles[0].counts[3], [0, 0, 1, 2]);
        assert_eq!(piles[1].counts[2], [0, 0, 1, 0]);
    }

    #[test]
    fn polymut_writes_mag_summary_line() {
        let dir = tempfile::tempdir().unwrap();
        let bam_path = dir.path().join("sorted.bam");
        write_test_bam(&bam_path);
        let mag = dir.path().join("1.fa");
        fs::write(&mag, ">c1 bin 1\nACGTACGTAC\n").unwrap();
        let gff = dir.path().join("1.gff");
        fs::write(&gff, "c1\tProdigal\tCDS\t1\t3\t.\t+\t0\tID=1_1\n").unwrap();
        let output = dir.path().join("1.polymut.txt");

        let summary = polymut(
            &bam_path,
            &gff,
            Some(mag.as_path()),
            &PolymutThresholds::default(),
            &output,
        )
        .unwrap();

        // ACG -> ATG at the second codon position
        assert_eq!(summary, PolymutSummary { dn: 1, ds: 0, considered: 5 });
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "1.0000\t0.0000\t5.0000\t20.0\n"
        );
    }

    #[test]
    fn translates_standard_code() {
        assert_eq!(translate(*b"ATG"), Some(b'M'));
        assert_eq!(translate(*b"TAA"), Some(b'*'));
        assert_eq!(translate(*b"GCC"), Some(b'A'));
        assert_eq!(translate(*b"ANG"), None);
    }

    #[test]
    fn counts_synonymous_and_nonsynonymous_sites() {
        // ATG GCT with a T/C split at codon 1 pos 2 and codon 2 pos 3
        let pile = pile_from(&[
            &[(b'A', 10)],
            &[(b'T', 7), (b'C', 3)],
            &[(b'G', 10)],
            &[(b'G', 10)],
            &[(b'C', 10)],
            &[(b'T', 6), (b'C', 4)],
        ]);
        let cds = [Cds { start: 1, end: 6, reverse: false }];

        let stats = polymorphism_rate(&pile, &cds, &PolymutThresholds::default());

        assert_eq!(stats.dn, 1);
        assert_eq!(stats.ds, 1);
        assert_eq!(stats.ambiguous, 0);
        assert_eq!(stats.considered, 6);
    }

    #[test]
    fn reverse_strand_codons_are_complemented() {
        // forward CAT reads as ATG on the minus strand; CAC -> GTG is Met -> Val
        let pile = pile_from(&[&[(b'C', 10)], &[(b'A', 10)], &[(b'T', 7), (b'C', 3)]]);
        let cds = [Cds { start: 1, end: 3, reverse: true }];

        let stats = polymorphism_rate(&pile, &cds, &PolymutThresholds::default());

        assert_eq!(stats.dn, 1);
        assert_eq!(stats.ds, 0);
    }

    #[test]
    fn stop_codon_is_ambiguous() {
        // TGG -> TGA
        let pile = pile_from(&[&[(b'T', 10)], &[(b'G', 10)], &[(b'G', 6), (b'A', 4)]]);
        let cds = [Cds { start: 1, end: 3, reverse: false }];

        let stats = polymorphism_rate(&pile, &cds, &PolymutThresholds::default());

        assert_eq!(stats.ambiguous, 1);
        assert_eq!(stats.dn + stats.ds, 0);
    }

    #[test]
    fn low_coverage_positions_are_not_considered() {
        let pile = pile_from(&[&[(b'A', 1)], &[(b'T', 5)], &[]]);
        let thresholds = PolymutThresholds {
            mincov: 2,
            ..Default::default()
        };

        let stats = polymorphism_rate(&pile, &[], &thresholds);

        assert_eq!(stats.considered, 1);
    }

    #[test]
    fn rate_is_na_without_considered_positions() {
        let empty = PolymutSummary::default();
        assert_eq!(empty.to_string(), "0.0000\t0.0000\t0.0000\tNA");

        let summary = PolymutSummary { dn: 1, ds: 3, considered: 4 };
        assert_eq!(summary.to_string(), "1.0000\t3.0000\t4.0000\t25.0");

        let summary = PolymutSummary { dn: 1, ds: 0, considered: 3 };
        assert_eq!(summary.to_string(), "1.0000\t0.0000\t3.0000\t33.333333333333336");
    }

    #[test]
    fn contigs_are_summed_with_their_own_features() {
        let mut a = pile_from(&[&[(b'A', 10)], &[(b'T', 7), (b'C', 3)], &[(b'G', 10)]]);
        a.name = "1_0".to_string();
        let mut b = pile_from(&[&[(b'G', 4)], &[(b'C', 4)]]);
        b.name = "1_1".to_string();
        let features = HashMap::from([(
            "1_0".to_string(),
            vec![Cds { start: 1, end: 3, reverse: false }],
        )]);

        let summary = summarize_contigs(&[a, b], &features, &PolymutThresholds::default());

        assert_eq!(summary, PolymutSummary { dn: 1, ds: 0, considered: 5 });
    }

    #[test]
    fn gff_cds_features_are_grouped_by_contig() {
        let dir = tempfile::tempdir().unwrap();
        let gff = dir.path().join("genes.gff");
        fs::write(
            &gff,
            "##gff-version 3\n\
             1_0\tProdigal\tCDS\t1\t300\t.\t+\t0\tID=1_1\n\
             1_0\tProdigal\tgene\t1\t300\t.\t+\t.\tID=g1\n\
             1_1\tProdigal\tCDS\t10\t99\t.\t-\t0\tID=2_1\n\
             ##FASTA\n>1_0\nACGT\n",
        )
        .unwrap();

        let features = read_gff(&gff).unwrap();

        assert_eq!(features["1_0"], vec![Cds { start: 1, end: 300, reverse: false }]);
        assert_eq!(features["1_1"], vec![Cds { start: 10, end: 99, reverse: true }]);
    }
}
