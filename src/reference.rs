use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use log::{debug, info};
use serde::Deserialize;

use crate::error::ParseError;

/// The two GTDB-Tk summary columns needed to locate a reference genome.
#[derive(Debug, Clone, Deserialize)]
pub struct Classification {
    pub user_genome: String,
    #[serde(default)]
    pub fastani_reference: Option<String>,
}

fn is_missing(reference: &str) -> bool {
    matches!(reference.trim(), "" | "nan" | "NaN" | "N/A")
}

/// Location of a reference genome inside the GTDB-Tk fastani database.
///
/// `GCF_000005845.2` lives under `GCF/000/005/845/GCF_000005845.2_genomic.fna.gz`.
pub fn reference_path(accession: &str, db_root: &Path) -> Result<PathBuf, ParseError> {
    let invalid = || ParseError::InvalidAccession(accession.to_string());
    let (prefix, number) = accession.split_once('_').ok_or_else(invalid)?;
    let digits = number.get(0..9).ok_or_else(invalid)?;
    if !digits.is_ascii() {
        return Err(invalid());
    }

    Ok(db_root
        .join("fastani")
        .join("database")
        .join(prefix)
        .join(&digits[0..3])
        .join(&digits[3..6])
        .join(&digits[6..9])
        .join(format!("{}_genomic.fna.gz", accession)))
}

/// Write `{out_dir}/{user_genome}.ref` holding the reference path or `None`.
pub fn pair_mag_ref(
    row: &Classification,
    out_dir: &Path,
    db_root: &Path,
) -> anyhow::Result<Option<PathBuf>> {
    let r_path = match row.fastani_reference.as_deref() {
        Some(r) if !is_missing(r) => Some(reference_path(r.trim(), db_root)?),
        _ => None,
    };
    let line = r_path
        .as_ref()
        .map_or_else(|| "None".to_string(), |p| p.display().to_string());

    let outpath = out_dir.join(format!("{}.ref", row.user_genome));
    let outfile =
        File::create(&outpath).with_context(|| anyhow!("Could not create file: {:?}", outpath))?;
    let mut writer = BufWriter::new(outfile);
    writeln!(writer, "{}", line)?;
    writer.flush()?;

    debug!("{} -> {}", row.user_genome, line);
    Ok(r_path)
}

pub fn read_classifications<P: AsRef<Path>>(gtdb: P) -> anyhow::Result<Vec<Classification>> {
    let gtdb = gtdb.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(gtdb)
        .with_context(|| format!("Failed to open GTDB-Tk summary: {:?}", gtdb))?;

    reader
        .deserialize()
        .map(|row| row.with_context(|| format!("Malformed GTDB-Tk summary: {:?}", gtdb)))
        .collect()
}

/// Write one `.ref` file per classified genome in a GTDB-Tk summary table.
pub fn pair_mag_refs<P, Q, R>(gtdb: P, out_dir: Q, db_root: R) -> anyhow::Result<usize>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    let rows = read_classifications(gtdb)?;
    let mut matched = 0;
    for row in &rows {
        if pair_mag_ref(row, out_dir.as_ref(), db_root.as_ref())?.is_some() {
            matched += 1;
        }
    }
    info!("{} of {} MAGs have a reference genome", matched, rows.len());
    Ok(matched)
}
