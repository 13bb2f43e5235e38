use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{anyhow, Context};
use log::debug;

use crate::{error::ParseError, summary::mag_id, types::DnadiffRecord};

fn number<T: std::str::FromStr>(path: &Path, what: &str, value: &str) -> Result<T, ParseError> {
    value.parse::<T>().map_err(|_| ParseError::InvalidNumber {
        path: path.to_path_buf(),
        what: what.to_string(),
        value: value.to_string(),
    })
}

/// `50(50.00%)` -> `50.00`
fn aligned_pct(path: &Path, col: &str) -> Result<f64, ParseError> {
    let inner = col.rsplit('(').next().unwrap_or(col);
    let pct = inner.split('%').next().unwrap_or(inner);
    number(path, "AlignedBases percentage", pct)
}

/// Parse a dnadiff `.report`. An empty report means the MAG had no reference.
pub fn parse_report(path: &Path, content: &str) -> Result<DnadiffRecord, ParseError> {
    if content.is_empty() {
        return Ok(DnadiffRecord::unclassified(&mag_id(&path.to_string_lossy())));
    }

    let mut first = content.lines().next().unwrap_or_default().split_whitespace();
    let (reference, query) = match (first.next(), first.next()) {
        (Some(r), Some(q)) => (r.to_string(), q.to_string()),
        _ => {
            return Err(ParseError::MissingDnadiffHeader {
                path: path.to_path_buf(),
            })
        }
    };

    let mut lengths = None;
    let mut aligned = None;
    let mut identity = None;
    for line in content.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 2 {
            continue;
        }
        if line.contains("TotalBases") && cols.len() >= 3 {
            lengths = Some((
                number::<u64>(path, "TotalBases", cols[1])?,
                number::<u64>(path, "TotalBases", cols[2])?,
            ));
        }
        if line.contains("AlignedBases") && cols.len() >= 3 {
            aligned = Some((aligned_pct(path, cols[1])?, aligned_pct(path, cols[2])?));
        }
        if line.contains("AvgIdentity") {
            identity = Some(number::<f64>(path, "AvgIdentity", cols[1])?);
        }
    }

    let missing = |field| ParseError::MissingDnadiffField {
        path: path.to_path_buf(),
        field,
    };
    let (ref_len, query_len) = lengths.ok_or_else(|| missing("TotalBases"))?;
    let (ref_aligned_pct, query_aligned_pct) = aligned.ok_or_else(|| missing("AlignedBases"))?;
    let avg_identity = identity.ok_or_else(|| missing("AvgIdentity"))?;

    Ok(DnadiffRecord {
        query,
        reference: Some(reference),
        ref_len,
        ref_aligned_pct,
        query_len,
        query_aligned_pct,
        avg_identity,
    })
}

pub fn parse_dnadiff<P, Q>(input: P, output: Q) -> anyhow::Result<DnadiffRecord>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let input = input.as_ref();
    let content = fs::read_to_string(input)
        .with_context(|| format!("Failed to read dnadiff report: {:?}", input))?;
    let record = parse_report(input, &content)?;
    debug!("{:?}: {}", input, record);

    let outpath = output.as_ref();
    let outfile =
        File::create(outpath).with_context(|| anyhow!("Could not create file: {:?}", outpath))?;
    let mut writer = BufWriter::new(outfile);
    writeln!(writer, "{}", record)?;
    writer.flush()?;
    Ok(record)
}
