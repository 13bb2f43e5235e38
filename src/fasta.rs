use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{anyhow, Context};
use flate2::read::GzDecoder;
use log::debug;
use seq_io::fasta::{Reader, Record};

use crate::types::ContigStats;

fn open_reader(path: &Path) -> anyhow::Result<Reader<Box<dyn BufRead>>> {
    let file = File::open(path).with_context(|| format!("Failed to open FASTA: {:?}", path))?;
    let buf_reader: Box<dyn BufRead> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(Reader::new(buf_reader))
}

pub fn read_fasta<P>(path: P) -> anyhow::Result<Vec<ContigStats>>
where
    P: AsRef<Path>,
{
    let mut reader = open_reader(path.as_ref())?;
    let mut contigs = Vec::new();

    while let Some(record) = reader.next() {
        let record = record?;

        // aligners cut names at any whitespace, tabs included
        let id = std::str::from_utf8(record.head())?
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        let length = record.seq_lines().map(|l| l.len() as u64).sum();
        contigs.push(ContigStats { id, length });
    }

    Ok(contigs)
}

/// Prefix every contig with `{bin_num}_{index}`, keeping the old header after a tab.
pub fn add_bin_num<P, Q>(input: P, bin_num: &str, output: Q) -> anyhow::Result<usize>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let mut reader = open_reader(input.as_ref())?;
    let outpath = output.as_ref();
    let outfile = File::create(outpath)
        .with_context(|| anyhow!("Could not create file: {:?}", outpath))?;
    let mut writer = BufWriter::new(outfile);

    let mut ctg_num = 0usize;
    while let Some(record) = reader.next() {
        let record = record?;
        let header = std::str::from_utf8(record.head())
            .with_context(|| format!("Invalid UTF-8 in header of {:?}", input.as_ref()))?;

        writeln!(writer, ">{}_{}\t{}", bin_num, ctg_num, header)?;
        // raw sequence keeps the original line breaks
        let seq = record.seq();
        if !seq.is_empty() {
            writer.write_all(seq)?;
            writer.write_all(b"\n")?;
        }
        ctg_num += 1;
    }

    writer.flush()?;
    debug!("Renamed {} contigs with bin number {}", ctg_num, bin_num);
    Ok(ctg_num)
}
