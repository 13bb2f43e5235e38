use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{BufRead, BufReader},
    iter::Peekable,
    path::Path,
    str::Chars,
};

use anyhow::{anyhow, Context};
use log::{debug, info};
use serde::Deserialize;

use crate::{
    error::ParseError,
    quast::read_quast_table,
    types::{Quality, SummaryRow},
};

/// Bare MAG id: `/path/to/12.fa` -> `12`.
pub fn mag_id(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.split('.').next().unwrap_or(base).trim().to_string()
}

fn missing(value: &str) -> bool {
    matches!(value.trim(), "" | "NA" | "nan" | "NaN" | "None" | "-")
}

fn parse_f64(path: &Path, what: &str, value: &str) -> Result<Option<f64>, ParseError> {
    if missing(value) {
        return Ok(None);
    }
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ParseError::InvalidNumber {
            path: path.to_path_buf(),
            what: what.to_string(),
            value: value.to_string(),
        })
}

/// Integers sometimes come out of Python as `12345.0`.
fn parse_u64(path: &Path, what: &str, value: &str) -> Result<Option<u64>, ParseError> {
    match value.trim().parse::<u64>() {
        Ok(v) => Ok(Some(v)),
        Err(_) => Ok(parse_f64(path, what, value)?.map(|v| v.round() as u64)),
    }
}

/// Tab when the header line has one, comma otherwise.
fn sniff_delimiter(path: &Path) -> anyhow::Result<u8> {
    let file = File::open(path).with_context(|| format!("Failed to open: {:?}", path))?;
    let header = BufReader::new(file).lines().next().transpose()?.unwrap_or_default();
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

fn tsv_reader(path: &Path, has_headers: bool) -> anyhow::Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(has_headers)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open: {:?}", path))
}

/// Completeness and contamination.
type CheckmQuality = (Option<f64>, Option<f64>);

/// CheckM table: genome file in the first column, completeness and contamination by name.
pub fn read_checkm(path: &Path) -> anyhow::Result<HashMap<String, CheckmQuality>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(path)?)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CheckM table: {:?}", path))?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| ParseError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
    };
    let (cpl, ctn) = (column("completeness")?, column("contamination")?);

    let mut table = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let get = |i: usize| record.get(i).unwrap_or_default();
        table.insert(
            mag_id(get(0)),
            (
                parse_f64(path, "completeness", get(cpl))?,
                parse_f64(path, "contamination", get(ctn))?,
            ),
        );
    }
    debug!("Read {} genomes from {:?}", table.len(), path);
    Ok(table)
}

/// CMSeq table: MAG path first, strain heterogeneity last.
pub fn read_cmseq(path: &Path) -> anyhow::Result<HashMap<String, Option<f64>>> {
    let mut table = HashMap::new();
    for record in tsv_reader(path, false)?.records() {
        let record = record?;
        if record.len() < 2 {
            return Err(anyhow!("{:?}: expected MAG and strain heterogeneity: {:?}", path, record));
        }
        let het = parse_f64(path, "strain heterogeneity", &record[record.len() - 1])?;
        table.insert(mag_id(&record[0]), het);
    }
    Ok(table)
}

#[derive(Debug, Deserialize)]
struct GtdbRow {
    user_genome: String,
    classification: Option<String>,
}

pub fn read_gtdb(path: &Path) -> anyhow::Result<HashMap<String, Option<String>>> {
    let mut reader = tsv_reader(path, true)?;
    reader
        .deserialize::<GtdbRow>()
        .map(|row| -> anyhow::Result<(String, Option<String>)> {
            let row = row.with_context(|| format!("Malformed GTDB-Tk summary: {:?}", path))?;
            Ok((mag_id(&row.user_genome), row.classification))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DnadiffCoverage {
    pub bin_cov: Option<f64>,
    pub ref_cov: Option<f64>,
    pub ani: Option<f64>,
}

/// Concatenated Dnadiff Parser rows.
pub fn read_dnadiff(path: &Path) -> anyhow::Result<HashMap<String, DnadiffCoverage>> {
    let mut table = HashMap::new();
    for record in tsv_reader(path, false)?.records() {
        let record = record?;
        if record.len() < 7 {
            return Err(ParseError::MissingColumn {
                path: path.to_path_buf(),
                column: "ANI".to_string(),
            }
            .into());
        }
        table.insert(
            mag_id(&record[0]),
            DnadiffCoverage {
                ref_cov: parse_f64(path, "ref_cov", &record[3])?,
                bin_cov: parse_f64(path, "bin_cov", &record[5])?,
                ani: parse_f64(path, "ANI", &record[6])?,
            },
        );
    }
    Ok(table)
}

fn skip_ws(chars: &mut Peekable<Chars>) {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}
}

fn quoted(chars: &mut Peekable<Chars>) -> Option<String> {
    let quote = chars.next_if(|c| *c == '\'' || *c == '"')?;
    let mut s = String::new();
    for c in chars.by_ref() {
        if c == quote {
            return Some(s);
        }
        s.push(c);
    }
    None
}

/// Value up to the next top-level `,` or `}`; nested brackets are kept verbatim.
fn bare(chars: &mut Peekable<Chars>) -> String {
    let mut s = String::new();
    let mut depth = 0usize;
    while let Some(&c) = chars.peek() {
        match c {
            ',' | '}' if depth == 0 => break,
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        s.push(c);
        chars.next();
    }
    s.trim().to_string()
}

/// Flat Python dict literal as CheckM writes into `bin_stats_ext.tsv`.
pub fn parse_py_dict(text: &str) -> Option<BTreeMap<String, String>> {
    let mut chars = text.trim().chars().peekable();
    chars.next_if_eq(&'{')?;
    let mut dict = BTreeMap::new();

    loop {
        skip_ws(&mut chars);
        if chars.next_if_eq(&'}').is_some() {
            return Some(dict);
        }
        let key = quoted(&mut chars)?;
        skip_ws(&mut chars);
        chars.next_if_eq(&':')?;
        skip_ws(&mut chars);
        let value = match chars.peek() {
            Some('\'') | Some('"') => quoted(&mut chars)?,
            _ => bare(&mut chars),
        };
        dict.insert(key, value);
        skip_ws(&mut chars);
        if chars.next_if_eq(&',').is_none() {
            chars.next_if_eq(&'}')?;
            return Some(dict);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BinSize {
    pub gc: Option<f64>,
    pub n50: Option<u64>,
    pub num_ctgs: Option<u64>,
    pub size: Option<u64>,
}

/// `mag<TAB>{python dict}` per line.
pub fn read_bin_sizes(path: &Path) -> anyhow::Result<HashMap<String, BinSize>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read size/GC stats: {:?}", path))?;
    let mut table = HashMap::new();

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let (mag, dict) = line
            .split_once('\t')
            .ok_or_else(|| anyhow!("{:?}: expected `mag<TAB>stats`: {}", path, line))?;
        let stats =
            parse_py_dict(dict).ok_or_else(|| anyhow!("{:?}: malformed stats for {}", path, mag))?;
        let get = |key: &str| stats.get(key).map(String::as_str).unwrap_or_default();

        table.insert(
            mag_id(mag),
            BinSize {
                gc: parse_f64(path, "GC", get("GC"))?,
                n50: parse_u64(path, "N50 (contigs)", get("N50 (contigs)"))?,
                num_ctgs: parse_u64(path, "# contigs", get("# contigs"))?,
                size: parse_u64(path, "Genome size", get("Genome size"))?,
            },
        );
    }
    Ok(table)
}

/// Input tables of the final report, one per tool.
pub struct ReportInputs<'a> {
    pub checkm: &'a Path,
    pub sizes: &'a Path,
    pub cmseq: &'a Path,
    pub gtdb: &'a Path,
    pub dnadiff: &'a Path,
    pub quast: &'a Path,
}

fn row<'a>(rows: &'a mut BTreeMap<String, SummaryRow>, mag: &str) -> &'a mut SummaryRow {
    rows.entry(mag.to_string()).or_insert_with(|| SummaryRow {
        mag: mag.to_string(),
        ..Default::default()
    })
}

/// Outer join of every tool table on MAG id.
pub fn join_reports(inputs: &ReportInputs) -> anyhow::Result<Vec<SummaryRow>> {
    let mut rows: BTreeMap<String, SummaryRow> = BTreeMap::new();

    for (mag, (completeness, contamination)) in read_checkm(inputs.checkm)? {
        let r = row(&mut rows, &mag);
        r.completeness = completeness;
        r.contamination = contamination;
    }
    for (mag, het) in read_cmseq(inputs.cmseq)? {
        row(&mut rows, &mag).strain_heterogeneity = het;
    }
    for (mag, classification) in read_gtdb(inputs.gtdb)? {
        row(&mut rows, &mag).classification = classification;
    }
    for (mag, cov) in read_dnadiff(inputs.dnadiff)? {
        let r = row(&mut rows, &mag);
        r.bin_cov = cov.bin_cov;
        r.ref_cov = cov.ref_cov;
        r.ani = cov.ani;
    }
    for (mag, sz) in read_bin_sizes(inputs.sizes)? {
        let r = row(&mut rows, &mag);
        r.gc = sz.gc;
        r.n50 = sz.n50;
        r.num_ctgs = sz.num_ctgs;
        r.size = sz.size;
    }
    for q in read_quast_table(inputs.quast)? {
        let r = row(&mut rows, &mag_id(&q.mag));
        r.genome_fraction = Some(q.genome_fraction);
        r.ng50 = q.ng50;
        r.na50 = q.na50;
        r.num_misassemb = Some(q.num_misassemb);
        r.num_misassemb_ctgs = Some(q.num_misassemb_ctgs);
        r.misassemb_ctg_len = Some(q.misassemb_ctg_len);
        r.num_unaln_ctgs = Some(q.num_unaln_ctgs);
        r.unaln_len = Some(q.unaln_len);
        r.prop_misassemb_ctgs = Some(q.prop_misassemb_ctgs);
        r.prop_misassemb_len = Some(q.prop_misassemb_len);
        r.prop_unaln_ctgs = Some(q.prop_unaln_ctgs);
        r.prop_unaln_len = Some(q.prop_unaln_len);
    }

    Ok(rows
        .into_values()
        .map(|mut r| {
            r.quality = Some(Quality::classify(r.completeness, r.contamination));
            r
        })
        .collect())
}

pub fn summarize_reports<P: AsRef<Path>>(inputs: &ReportInputs, output: P) -> anyhow::Result<usize> {
    let rows = join_reports(inputs)?;
    let high = rows
        .iter()
        .filter(|r| r.quality == Some(Quality::High))
        .count();
    info!("{} MAGs summarized, {} {}", rows.len(), high, Quality::High);

    let outpath = output.as_ref();
    let mut writer = csv::Writer::from_path(outpath)
        .with_context(|| anyhow!("Could not create file: {:?}", outpath))?;
    for r in &rows {
        writer.serialize(r)?;
    }
    writer.flush()?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const QUAST: &str = "mag,num_ctgs,size,genome_fraction,NG50,NA50,num_misassemb,num_misassemb_ctgs,misassemb_ctg_len,num_unaln_ctgs,unaln_len,prop_misassemb_ctgs,prop_misassemb_len,prop_unaln_ctgs,prop_unaln_len
1,10,200000,78.5,21000,,3,2,50000,4,20000,0.2,0.25,0.4,0.1
2,0,0,0.0,0,0,0,0,0,0,0,0.0,0.0,0.0,0.0
";

    struct Fixture {
        _dir: tempfile::TempDir,
        paths: Vec<PathBuf>,
    }

    impl Fixture {
        fn inputs(&self) -> ReportInputs<'_> {
            ReportInputs {
                checkm: &self.paths[0],
                sizes: &self.paths[1],
                cmseq: &self.paths[2],
                gtdb: &self.paths[3],
                dnadiff: &self.paths[4],
                quast: &self.paths[5],
            }
        }
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            ("checkm.csv", "genome,completeness,contamination\n1.fa,95.0,3.0\n2.fa,85.0,2.0\n"),
            (
                "sizes.tsv",
                "1\t{'GC': 0.52, 'N50 (contigs)': 4000, '# contigs': 10, 'Genome size': 200000, 'marker lineage': 'k__Bacteria (UID203)'}\n",
            ),
            ("cmseq.tsv", "/out/1_cmseq/gut/1.txt\t1.25\n/out/1_cmseq/gut/3.txt\tNA\n"),
            ("gtdb.tsv", "user_genome\tclassification\tfastani_reference\n1\td__Bacteria;s__E coli\tGCF_000005845.2\n"),
            ("dnadiff.tsv", "/out/tmp/gut/1.fa\tGCF_000005845.2\t100\t50.00\t200\t75.00\t99.50\n"),
            ("quast.csv", QUAST),
        ];
        let paths = files
            .iter()
            .map(|(name, content)| {
                let p = dir.path().join(name);
                fs::write(&p, content).unwrap();
                p
            })
            .collect();
        Fixture { _dir: dir, paths }
    }

    #[test]
    fn mag_ids_drop_path_and_extension() {
        assert_eq!(mag_id("/a/b/12.fa"), "12");
        assert_eq!(mag_id("12.fa.gz"), "12");
        assert_eq!(mag_id("7"), "7");
    }

    #[test]
    fn python_dict_literal_is_parsed() {
        let d = parse_py_dict("{'GC': 0.5, 'name': 'a, b', 'list': [1, 2], \"x\": 3}").unwrap();
        assert_eq!(d["GC"], "0.5");
        assert_eq!(d["name"], "a, b");
        assert_eq!(d["list"], "[1, 2]");
        assert_eq!(d["x"], "3");
        assert!(parse_py_dict("'GC': 1").is_none());
    }

    #[test]
    fn outer_join_keeps_every_mag() {
        let f = fixture();
        let rows = join_reports(&f.inputs()).unwrap();

        let mags: Vec<&str> = rows.iter().map(|r| r.mag.as_str()).collect();
        assert_eq!(mags, vec!["1", "2", "3"]);

        let one = &rows[0];
        assert_eq!(one.completeness, Some(95.0));
        assert_eq!(one.strain_heterogeneity, Some(1.25));
        assert_eq!(one.classification.as_deref(), Some("d__Bacteria;s__E coli"));
        assert_eq!(one.bin_cov, Some(75.0));
        assert_eq!(one.ref_cov, Some(50.0));
        assert_eq!(one.ani, Some(99.5));
        assert_eq!(one.n50, Some(4000));
        assert_eq!(one.size, Some(200000));
        assert_eq!(one.na50, None);
        assert_eq!(one.prop_unaln_len, Some(0.1));
        assert_eq!(one.quality, Some(Quality::High));

        assert_eq!(rows[1].quality, Some(Quality::Medium));
        assert_eq!(rows[1].genome_fraction, Some(0.0));
        assert_eq!(rows[2].completeness, None);
        assert_eq!(rows[2].strain_heterogeneity, None);
        assert_eq!(rows[2].quality, Some(Quality::Medium));
    }

    #[test]
    fn join_ignores_input_order() {
        let f = fixture();
        let base = join_reports(&f.inputs()).unwrap();

        // same content, rows reversed in every table
        for p in &f.paths {
            let content = fs::read_to_string(p).unwrap();
            let mut lines: Vec<&str> = content.lines().collect();
            let header = matches!(
                p.file_name().and_then(|n| n.to_str()),
                Some("checkm.csv" | "gtdb.tsv" | "quast.csv")
            );
            let start = usize::from(header);
            lines[start..].reverse();
            fs::write(p, lines.join("\n") + "\n").unwrap();
        }

        assert_eq!(join_reports(&f.inputs()).unwrap(), base);
    }

    #[test]
    fn summary_csv_has_header_and_quality() {
        let f = fixture();
        let output = f.paths[0].with_file_name("summary.csv");

        let n = summarize_reports(&f.inputs(), &output).unwrap();

        assert_eq!(n, 3);
        let content = fs::read_to_string(&output).unwrap();
        let mut lines = content.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("mag,completeness,contamination,strain_heterogeneity"));
        assert!(header.ends_with("prop_unaln_len,Quality"));
        assert!(lines.next().unwrap().ends_with(",High quality"));
        assert!(lines.next().unwrap().ends_with(",Medium quality"));
    }

    #[test]
    fn checkm_table_delimiter_follows_header() {
        let dir = tempfile::tempdir().unwrap();
        let tsv = dir.path().join("checkm.tsv");
        fs::write(&tsv, "Bin Id\tCompleteness\tContamination\n7.fa\t91.5\t0.8\n").unwrap();
        let empty = dir.path().join("empty.csv");
        fs::write(&empty, "").unwrap();

        assert_eq!(sniff_delimiter(&tsv).unwrap(), b'\t');
        assert_eq!(sniff_delimiter(&empty).unwrap(), b',');
        let table = read_checkm(&tsv).unwrap();
        assert_eq!(table["7"], (Some(91.5), Some(0.8)));
    }

    #[test]
    fn empty_quast_table_contributes_no_rows() {
        let f = fixture();
        fs::write(&f.paths[5], "").unwrap();

        let rows = join_reports(&f.inputs()).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.genome_fraction.is_none()));
    }
}
