use std::{
    collections::HashSet,
    fs::{self, File},
    io::{BufWriter, Write},
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use log::{debug, info};

use crate::{error::ParseError, types::Sample};

const OUT_DIRS: [&str; 6] = [
    "0_checkm",
    "1_cmseq",
    "2_gtdbtk",
    "3_dnadiff",
    "4_quast",
    "final_reports",
];
const LOG_DIRS: [&str; 5] = ["checkm", "gtdbtk", "cmseq", "dnadiff", "quast"];

/// Working directory tree shared by every step of one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowDirs {
    pub out: PathBuf,
    pub tmp: PathBuf,
    pub log: PathBuf,
}

impl WorkflowDirs {
    pub fn new<P: AsRef<Path>>(work_dir: P, module: &str) -> Self {
        let work_dir = work_dir.as_ref();
        Self {
            out: work_dir.join(module),
            tmp: work_dir.join("tmp"),
            log: work_dir.join("logs"),
        }
    }

    pub fn create(&self) -> anyhow::Result<()> {
        let dirs = OUT_DIRS
            .iter()
            .map(|d| self.out.join(d))
            .chain(std::iter::once(self.tmp.clone()))
            .chain(LOG_DIRS.iter().map(|d| self.log.join(d)));

        for dir in dirs {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create dir: {:?}", dir))?;
        }
        Ok(())
    }
}

pub fn read_samples<P: AsRef<Path>>(sheet: P) -> anyhow::Result<Vec<Sample>> {
    let sheet = sheet.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(sheet)
        .with_context(|| format!("Failed to open sample sheet: {:?}", sheet))?;

    reader
        .records()
        .map(|record| {
            let record = record?;
            if record.len() < 4 {
                return Err(anyhow!(
                    "Sample sheet row needs name, bin dir, fwd and rev reads: {:?}",
                    record
                ));
            }
            Ok(Sample {
                name: record[0].to_string(),
                bin_dir: PathBuf::from(&record[1]),
                fwd_reads: PathBuf::from(&record[2]),
                rev_reads: PathBuf::from(&record[3]),
            })
        })
        .collect()
}

/// Sample ids that already have a working directory under `tmp`.
pub fn materialized_samples<P: AsRef<Path>>(tmp: P) -> anyhow::Result<HashSet<String>> {
    let tmp = tmp.as_ref();
    if !tmp.exists() {
        return Ok(HashSet::new());
    }
    let entries = fs::read_dir(tmp).with_context(|| format!("Failed to list dir: {:?}", tmp))?;

    Ok(entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect())
}

/// Bin number token of a bin file, e.g. `bin.12.fa` -> `12`.
pub fn bin_number(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').nth(1))
        .map(str::to_string)
        .ok_or_else(|| ParseError::MissingBinNumber(path.to_path_buf()).into())
}

fn bin_paths(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to list dir: {:?}", dir))?;

    let mut paths = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
                filename.contains(".fa") && !filename.contains("unbinned")
            } else {
                false
            }
        })
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

fn link<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> anyhow::Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let abs = fs::canonicalize(src).with_context(|| format!("No such file: {:?}", src))?;
    symlink(&abs, dst).with_context(|| format!("Failed to link {:?} -> {:?}", dst, abs))
}

fn materialize(sample: &Sample, tmp: &Path) -> anyhow::Result<()> {
    let sample_dir = tmp.join(&sample.name);
    fs::create_dir_all(&sample_dir)
        .with_context(|| format!("Failed to create dir: {:?}", sample_dir))?;

    let manifest = tmp.join(format!("{}.out", sample.name));
    let outfile = File::create(&manifest)
        .with_context(|| anyhow!("Could not create file: {:?}", manifest))?;
    let mut writer = BufWriter::new(outfile);

    for bp in bin_paths(&sample.bin_dir)? {
        let prefix = bin_number(&bp)?;
        link(&bp, sample_dir.join(format!("{}.fa", prefix)))?;
        writeln!(writer, "{}", prefix)?;
    }
    writer.flush()?;

    link(&sample.fwd_reads, tmp.join(format!("{}_1.fastq.gz", sample.name)))?;
    link(&sample.rev_reads, tmp.join(format!("{}_2.fastq.gz", sample.name)))?;
    Ok(())
}

/// Link every sample's bins and reads into `tmp`, skipping samples in `materialized`.
///
/// Newly linked samples are added to `materialized`. Returns all sample names
/// in sheet order.
pub fn ingest_samples<P: AsRef<Path>>(
    samples: &[Sample],
    tmp: P,
    materialized: &mut HashSet<String>,
) -> anyhow::Result<Vec<String>> {
    let tmp = tmp.as_ref();

    for sample in samples {
        if materialized.contains(&sample.name) {
            debug!("Sample {} already ingested", sample.name);
            continue;
        }
        info!("Ingesting sample: {}", sample.name);
        materialize(sample, tmp)?;
        materialized.insert(sample.name.clone());
    }

    Ok(samples.iter().map(|s| s.name.clone()).collect())
}

/// Bin numbers recorded for a sample at ingest time.
pub fn get_bin_nums<P: AsRef<Path>>(sample: &str, tmp: P) -> anyhow::Result<Vec<String>> {
    let manifest = tmp.as_ref().join(format!("{}.out", sample));
    let content = fs::read_to_string(&manifest)
        .with_context(|| format!("Failed to read bin manifest: {:?}", manifest))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
