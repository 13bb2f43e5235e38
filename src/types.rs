use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

/// One row of the sample sheet.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub bin_dir: PathBuf,
    pub fwd_reads: PathBuf,
    pub rev_reads: PathBuf,
}

#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub struct ContigStats {
    pub id: String,
    pub length: u64,
}

/// Alignment statistics of a MAG against its closest reference.
#[derive(Debug, Clone, PartialEq)]
pub struct DnadiffRecord {
    pub query: String,
    /// `None` when the MAG had no species-level reference to compare with.
    pub reference: Option<String>,
    pub ref_len: u64,
    pub ref_aligned_pct: f64,
    pub query_len: u64,
    pub query_aligned_pct: f64,
    pub avg_identity: f64,
}

impl DnadiffRecord {
    pub fn unclassified(query: &str) -> Self {
        Self {
            query: query.to_string(),
            reference: None,
            ref_len: 0,
            ref_aligned_pct: 0.0,
            query_len: 0,
            query_aligned_pct: 0.0,
            avg_identity: 0.0,
        }
    }
}

impl fmt::Display for DnadiffRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{:.2}\t{}\t{:.2}\t{:.2}",
            self.query,
            self.reference.as_deref().unwrap_or("None"),
            self.ref_len,
            self.ref_aligned_pct,
            self.query_len,
            self.query_aligned_pct,
            self.avg_identity
        )
    }
}

/// Per-MAG QUAST metrics. Column names match the aggregated report header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuastRow {
    pub mag: String,
    pub num_ctgs: u64,
    pub size: u64,
    pub genome_fraction: f64,
    #[serde(rename = "NG50")]
    pub ng50: Option<u64>,
    #[serde(rename = "NA50")]
    pub na50: Option<u64>,
    pub num_misassemb: u64,
    pub num_misassemb_ctgs: u64,
    pub misassemb_ctg_len: u64,
    pub num_unaln_ctgs: u64,
    pub unaln_len: u64,
    pub prop_misassemb_ctgs: f64,
    pub prop_misassemb_len: f64,
    pub prop_unaln_ctgs: f64,
    pub prop_unaln_len: f64,
}

impl QuastRow {
    /// Placeholder row for a MAG QUAST never ran on.
    pub fn unclassified(mag: &str) -> Self {
        Self {
            mag: mag.to_string(),
            ng50: Some(0),
            na50: Some(0),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Quality {
    #[serde(rename = "High quality")]
    High,
    #[serde(rename = "Medium quality")]
    Medium,
}

impl Quality {
    pub fn classify(completeness: Option<f64>, contamination: Option<f64>) -> Self {
        match (completeness, contamination) {
            (Some(cpl), Some(ctn)) if cpl >= 90.0 && ctn <= 5.0 => Quality::High,
            _ => Quality::Medium,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::High => write!(f, "High quality"),
            Quality::Medium => write!(f, "Medium quality"),
        }
    }
}

/// Final per-MAG report row. Every metric comes from exactly one tool table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryRow {
    pub mag: String,
    pub completeness: Option<f64>,
    pub contamination: Option<f64>,
    pub strain_heterogeneity: Option<f64>,
    pub classification: Option<String>,
    pub bin_cov: Option<f64>,
    pub ref_cov: Option<f64>,
    #[serde(rename = "ANI")]
    pub ani: Option<f64>,
    #[serde(rename = "GC")]
    pub gc: Option<f64>,
    #[serde(rename = "N50")]
    pub n50: Option<u64>,
    pub num_ctgs: Option<u64>,
    pub size: Option<u64>,
    pub genome_fraction: Option<f64>,
    #[serde(rename = "NG50")]
    pub ng50: Option<u64>,
    #[serde(rename = "NA50")]
    pub na50: Option<u64>,
    pub num_misassemb: Option<u64>,
    pub num_misassemb_ctgs: Option<u64>,
    pub misassemb_ctg_len: Option<u64>,
    pub num_unaln_ctgs: Option<u64>,
    pub unaln_len: Option<u64>,
    pub prop_misassemb_ctgs: Option<f64>,
    pub prop_misassemb_len: Option<f64>,
    pub prop_unaln_ctgs: Option<f64>,
    pub prop_unaln_len: Option<f64>,
    #[serde(rename = "Quality")]
    pub quality: Option<Quality>,
}

/// Thresholds handed to the polymorphism caller.
#[derive(Debug, Clone, Copy)]
pub struct PolymutThresholds {
    pub minqual: u8,
    pub mincov: u32,
    pub dominant_frq_thrsh: f64,
}

impl Default for PolymutThresholds {
    fn default() -> Self {
        Self {
            minqual: 30,
            mincov: 1,
            dominant_frq_thrsh: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContigPolymorphism {
    pub dn: u64,
    pub ds: u64,
    pub ambiguous: u64,
    pub considered: u64,
}
