use anyhow::Context;
use log::info;

mod cli;
mod dnadiff;
mod error;
mod fasta;
mod io;
mod polymut;
mod quast;
mod reference;
mod summary;
mod types;

use crate::{
    cli::Commands,
    summary::ReportInputs,
    types::PolymutThresholds,
};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cli::parse_args();

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()
        .context("Failed to set up thread pool")?;

    match args.command {
        Commands::Setup { work_dir, module } => {
            let dirs = io::WorkflowDirs::new(&work_dir, &module);
            dirs.create()?;
            info!("Output: {:?}, tmp: {:?}, logs: {:?}", dirs.out, dirs.tmp, dirs.log);
        }
        Commands::Ingest { samples, tmp } => {
            let sheet = io::read_samples(&samples)?;
            let mut done = io::materialized_samples(&tmp)?;
            let names = io::ingest_samples(&sheet, &tmp, &mut done)?;
            info!("{} samples ready in {:?}", names.len(), tmp);
        }
        Commands::BinNums { sample, tmp } => {
            for bin in io::get_bin_nums(&sample, &tmp)? {
                println!("{}", bin);
            }
        }
        Commands::AddBinNum {
            input,
            bin_num,
            output,
        } => {
            fasta::add_bin_num(&input, &bin_num, &output)?;
        }
        Commands::PairRefs {
            gtdb,
            out_dir,
            gtdb_path,
        } => {
            reference::pair_mag_refs(&gtdb, &out_dir, &gtdb_path)?;
        }
        Commands::ParseDnadiff { input, output } => {
            dnadiff::parse_dnadiff(&input, &output)?;
        }
        Commands::Polymut {
            bam,
            gff,
            mag,
            minqual,
            mincov,
            dominant_frq_thrsh,
            output,
        } => {
            let thresholds = PolymutThresholds {
                minqual,
                mincov,
                dominant_frq_thrsh,
            };
            polymut::polymut(&bam, &gff, mag.as_deref(), &thresholds, &output)?;
        }
        Commands::AggregateQuast { reports, output } => {
            quast::aggregate_quast(&reports, &output)?;
        }
        Commands::Summarize {
            checkm,
            sizes,
            cmseq,
            gtdb,
            dnadiff,
            quast,
            output,
        } => {
            let inputs = ReportInputs {
                checkm: &checkm,
                sizes: &sizes,
                cmseq: &cmseq,
                gtdb: &gtdb,
                dnadiff: &dnadiff,
                quast: &quast,
            };
            summary::summarize_reports(&inputs, &output)?;
            info!("Summary written to {:?}", output);
        }
    }

    Ok(())
}
