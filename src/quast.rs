use std::{collections::HashMap, fs, path::Path, path::PathBuf};

use anyhow::{anyhow, Context};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;

use crate::{error::ParseError, types::QuastRow};

enum QuastReport {
    /// QUAST had no reference to run against, keyed by MAG id.
    Unclassified(String),
    Assemblies(Vec<QuastRow>),
}

/// Leading integer of a QUAST cell; `3 + 1 part` -> 3, `-` -> 0.
fn count(path: &Path, what: &str, value: &str) -> Result<u64, ParseError> {
    match value.split_whitespace().next() {
        None | Some("-") => Ok(0),
        Some(v) => v.parse().map_err(|_| ParseError::InvalidNumber {
            path: path.to_path_buf(),
            what: what.to_string(),
            value: value.to_string(),
        }),
    }
}

fn optional(path: &Path, what: &str, value: &str) -> Result<Option<u64>, ParseError> {
    match value.trim() {
        "" | "-" => Ok(None),
        _ => count(path, what, value).map(Some),
    }
}

fn fraction(path: &Path, what: &str, value: &str) -> Result<f64, ParseError> {
    match value.trim() {
        "" | "-" => Ok(0.0),
        v => v.parse().map_err(|_| ParseError::InvalidNumber {
            path: path.to_path_buf(),
            what: what.to_string(),
            value: value.to_string(),
        }),
    }
}

fn cell<'a>(
    metrics: &HashMap<&str, Vec<&'a str>>,
    path: &Path,
    metric: &str,
    i: usize,
) -> Result<&'a str, ParseError> {
    metrics
        .get(metric)
        .and_then(|vals| vals.get(i).copied())
        .ok_or_else(|| ParseError::MissingColumn {
            path: path.to_path_buf(),
            column: metric.to_string(),
        })
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Turn a QUAST `report.tsv` (metrics by assembly) into one row per assembly.
pub fn parse_report(path: &Path, content: &str) -> Result<Vec<QuastRow>, ParseError> {
    let mut lines = content.lines();
    let header: Vec<&str> = lines.next().unwrap_or_default().split('\t').collect();
    let metrics: HashMap<&str, Vec<&str>> = lines
        .map(|l| l.split('\t'))
        .filter_map(|mut cols| cols.next().map(|name| (name.trim(), cols.collect())))
        .collect();

    header
        .iter()
        .skip(1)
        .enumerate()
        .map(|(i, mag)| {
            let get = |metric: &'static str| cell(&metrics, path, metric, i);
            let num_ctgs = count(path, "# contigs", get("# contigs")?)?;
            let size = count(path, "Total length", get("Total length")?)?;
            let misassemb_ctg_len = count(
                path,
                "Misassembled contigs length",
                get("Misassembled contigs length")?,
            )?;
            let num_misassemb_ctgs = count(
                path,
                "# misassembled contigs",
                get("# misassembled contigs")?,
            )?;
            let num_unaln_ctgs =
                count(path, "# unaligned contigs", get("# unaligned contigs")?)?;
            let unaln_len = count(path, "Unaligned length", get("Unaligned length")?)?;

            Ok(QuastRow {
                mag: mag.trim().to_string(),
                num_ctgs,
                size,
                genome_fraction: fraction(
                    path,
                    "Genome fraction (%)",
                    get("Genome fraction (%)")?,
                )?,
                ng50: optional(path, "NG50", get("NG50")?)?,
                na50: optional(path, "NA50", get("NA50")?)?,
                num_misassemb: count(path, "# misassemblies", get("# misassemblies")?)?,
                num_misassemb_ctgs,
                misassemb_ctg_len,
                num_unaln_ctgs,
                unaln_len,
                prop_misassemb_ctgs: ratio(num_misassemb_ctgs, num_ctgs),
                prop_misassemb_len: ratio(misassemb_ctg_len, size),
                prop_unaln_ctgs: ratio(num_unaln_ctgs, num_ctgs),
                prop_unaln_len: ratio(unaln_len, size),
            })
        })
        .collect()
}

fn load_report(path: &Path) -> anyhow::Result<QuastReport> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read QUAST report: {:?}", path))?;
    if content.is_empty() {
        let mag = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("Cannot derive MAG id from: {:?}", path))?;
        return Ok(QuastReport::Unclassified(mag.to_string()));
    }
    Ok(QuastReport::Assemblies(parse_report(path, &content)?))
}

/// Merge per-MAG QUAST reports, adding zeroed rows for MAGs without a reference.
///
/// Writes an empty file when none of the reports has content.
pub fn aggregate_quast<P: AsRef<Path>>(reports: &[PathBuf], output: P) -> anyhow::Result<usize> {
    let style =
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-");
    let pb = ProgressBar::new(reports.len() as u64);
    pb.set_style(style);
    pb.set_message("Reading QUAST reports...");

    let loaded = reports
        .par_iter()
        .progress_with(pb)
        .map(|p| load_report(p))
        .collect::<anyhow::Result<Vec<QuastReport>>>()?;

    let mut rows = Vec::new();
    let mut unc_mags = Vec::new();
    for report in loaded {
        match report {
            QuastReport::Unclassified(mag) => unc_mags.push(mag),
            QuastReport::Assemblies(mut r) => rows.append(&mut r),
        }
    }

    let outpath = output.as_ref();
    if rows.is_empty() {
        warn!("No usable QUAST reports, writing empty {:?}", outpath);
        fs::File::create(outpath)
            .with_context(|| anyhow!("Could not create file: {:?}", outpath))?;
        return Ok(0);
    }

    rows.extend(unc_mags.iter().map(|m| QuastRow::unclassified(m)));
    info!(
        "Aggregated {} QUAST rows ({} unclassified MAGs)",
        rows.len(),
        unc_mags.len()
    );

    let mut writer = csv::Writer::from_path(outpath)
        .with_context(|| anyhow!("Could not create file: {:?}", outpath))?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(rows.len())
}

/// Rows of an aggregated QUAST table; an empty file has none.
pub fn read_quast_table<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<QuastRow>> {
    let path = path.as_ref();
    if fs::metadata(path)
        .with_context(|| format!("No such file: {:?}", path))?
        .len()
        == 0
    {
        return Ok(Vec::new());
    }
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open: {:?}", path))?;
    reader
        .deserialize()
        .map(|row| row.with_context(|| format!("Malformed QUAST table: {:?}", path)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "Assembly\tbin.4
# contigs (>= 0 bp)\t10
# contigs\t10
Largest contig\t50000
Total length\t200000
Reference length\t250000
GC (%)\t51.2
Genome fraction (%)\t78.5
NG50\t21000
NA50\t-
# misassemblies\t3
# misassembled contigs\t2
Misassembled contigs length\t50000
# unaligned contigs\t4 + 1 part
Unaligned length\t20000
";

    #[test]
    fn report_is_transposed_with_ratios() {
        let rows = parse_report(Path::new("report.tsv"), REPORT).unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.mag, "bin.4");
        assert_eq!(row.num_ctgs, 10);
        assert_eq!(row.size, 200000);
        assert_eq!(row.genome_fraction, 78.5);
        assert_eq!(row.ng50, Some(21000));
        assert_eq!(row.na50, None);
        assert_eq!(row.num_unaln_ctgs, 4);
        assert_eq!(row.prop_misassemb_ctgs, 0.2);
        assert_eq!(row.prop_misassemb_len, 0.25);
        assert_eq!(row.prop_unaln_ctgs, 0.4);
        assert_eq!(row.prop_unaln_len, 0.1);
    }

    #[test]
    fn zero_totals_give_zero_ratios() {
        let report = REPORT
            .replace("# contigs\t10", "# contigs\t0")
            .replace("Total length\t200000", "Total length\t0");

        let rows = parse_report(Path::new("report.tsv"), &report).unwrap();

        assert_eq!(rows[0].prop_misassemb_ctgs, 0.0);
        assert_eq!(rows[0].prop_unaln_len, 0.0);
    }

    #[test]
    fn missing_metric_is_an_error() {
        let report = REPORT.replace("Unaligned length\t20000\n", "");
        assert!(parse_report(Path::new("report.tsv"), &report).is_err());
    }

    #[test]
    fn no_usable_reports_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let unc = dir.path().join("bin.1/report.tsv");
        fs::create_dir_all(unc.parent().unwrap()).unwrap();
        fs::write(&unc, "").unwrap();
        let output = dir.path().join("report.csv");

        let n = aggregate_quast(&[unc], &output).unwrap();

        assert_eq!(n, 0);
        assert_eq!(fs::metadata(&output).unwrap().len(), 0);
        assert!(read_quast_table(&output).unwrap().is_empty());
    }

    #[test]
    fn unclassified_mag_gets_zero_row() {
        let dir = tempfile::tempdir().unwrap();
        let unc = dir.path().join("bin.1/report.tsv");
        let cls = dir.path().join("bin.4/report.tsv");
        fs::create_dir_all(unc.parent().unwrap()).unwrap();
        fs::create_dir_all(cls.parent().unwrap()).unwrap();
        fs::write(&unc, "").unwrap();
        fs::write(&cls, REPORT).unwrap();
        let output = dir.path().join("report.csv");

        aggregate_quast(&[unc, cls], &output).unwrap();
        let rows = read_quast_table(&output).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].mag, "bin.4");
        assert_eq!(rows[0].num_misassemb, 3);
        assert_eq!(rows[1], QuastRow::unclassified("bin.1"));
        assert_eq!(rows[1].size, 0);
        assert_eq!(rows[1].prop_unaln_len, 0.0);
    }
}
