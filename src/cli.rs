use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Per-MAG quality report steps for CheckM, GTDB-Tk, QUAST, dnadiff and CMSeq")]
pub struct Args {
    #[arg(short, long, default_value_t = 1, global = true, help = "Num processes")]
    pub threads: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create the output, tmp and log directory tree
    Setup {
        #[arg(short, long, help = "Working directory")]
        work_dir: PathBuf,

        #[arg(short, long, default_value = "mag_qc", help = "Module output directory name")]
        module: String,
    },

    /// Link bins and reads of every sample into the tmp directory
    Ingest {
        #[arg(short, long, help = "Sample sheet: sample, bin dir, fwd reads, rev reads")]
        samples: PathBuf,

        #[arg(long, help = "tmp directory of the workflow")]
        tmp: PathBuf,
    },

    /// Print the bin numbers recorded for a sample
    BinNums {
        #[arg(short, long)]
        sample: String,

        #[arg(long, help = "tmp directory of the workflow")]
        tmp: PathBuf,
    },

    /// Prefix contig names with a bin number
    AddBinNum {
        #[arg(short, long, help = "Input FASTA, can be .gz")]
        input: PathBuf,

        #[arg(short, long)]
        bin_num: String,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write the fastANI reference genome path of every classified MAG
    PairRefs {
        #[arg(short, long, help = "GTDB-Tk summary table")]
        gtdb: PathBuf,

        #[arg(short, long, help = "Directory for the per-MAG .ref files")]
        out_dir: PathBuf,

        #[arg(long, env = "GTDBTK_DATA_PATH", help = "GTDB-Tk reference data root")]
        gtdb_path: PathBuf,
    },

    /// Turn one dnadiff report into a single tab-separated row
    ParseDnadiff {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Summarize strain heterogeneity of one MAG from its read alignments
    Polymut {
        #[arg(short, long, help = "Sorted BAM of reads mapped to the MAG")]
        bam: PathBuf,

        #[arg(short, long, help = "Gene annotations (GFF)")]
        gff: PathBuf,

        #[arg(short, long, help = "MAG FASTA restricting the contigs considered")]
        mag: Option<PathBuf>,

        #[arg(long, default_value_t = 30, help = "Minimum base quality")]
        minqual: u8,

        #[arg(long, default_value_t = 1, help = "Minimum position coverage")]
        mincov: u32,

        #[arg(long, default_value_t = 0.8, help = "Dominant allele frequency threshold")]
        dominant_frq_thrsh: f64,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Merge per-MAG QUAST reports into one table
    AggregateQuast {
        #[arg(short, long, num_args(1..), required = true, help = "QUAST report.tsv files")]
        reports: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Outer-join every tool table into the final per-MAG report
    Summarize {
        #[arg(long)]
        checkm: PathBuf,

        #[arg(long, help = "Size, GC and N50 stats per MAG")]
        sizes: PathBuf,

        #[arg(long)]
        cmseq: PathBuf,

        #[arg(long)]
        gtdb: PathBuf,

        #[arg(long)]
        dnadiff: PathBuf,

        #[arg(long)]
        quast: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
}

pub fn parse_args() -> Args {
    let mut args = Args::parse();
    args.threads = args.threads.max(1);
    args
}
