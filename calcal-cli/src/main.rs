//! calcal CLI
//!
//! Runs calibration stages over event files and writes the per-tower TXT
//! tables.
#![allow(clippy::uninlined_format_args, clippy::redundant_closure)]

use calcal_algorithms::{CalibPipeline, InlBuilder, PipelineReport, StageStats, StandardFitter};
use calcal_core::{CalibConfig, DenseIndex, IdxArray, StageLog, TwrNum};
use calcal_io::{CalibTxtWriter, JsonlEventSource};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    CalcalIo(#[from] calcal_io::Error),

    #[error("{0}")]
    Core(#[from] calcal_core::Error),
}

/// Offline calibration production for the CsI calorimeter.
#[derive(Parser)]
#[command(name = "calcal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON run configuration (defaults apply to omitted settings)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Two-pass pedestal estimate from a pedestal run
    Pedestals {
        /// JSON-lines event file
        #[arg(short, long)]
        events: PathBuf,

        /// Output pedestal table
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Integral-nonlinearity curves from charge-injection sweeps
    Inl {
        /// Raw charge-injection table
        #[arg(long)]
        raw_ci: PathBuf,

        /// Output INL table
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Asymmetry and MeV/DAC from a muon run
    Muon {
        /// JSON-lines event file
        #[arg(short, long)]
        events: PathBuf,

        /// Pedestal table
        #[arg(long)]
        pedestals: PathBuf,

        /// INL table
        #[arg(long)]
        inl: PathBuf,

        /// Output asymmetry table
        #[arg(long)]
        asym_output: PathBuf,

        /// Output MeV/DAC table
        #[arg(long)]
        mpd_output: PathBuf,
    },

    /// Every stage, writing all tables into one directory
    All {
        /// Pedestal-run event file
        #[arg(long)]
        ped_events: PathBuf,

        /// Muon-run event file
        #[arg(long)]
        muon_events: PathBuf,

        /// Raw charge-injection table
        #[arg(long)]
        raw_ci: PathBuf,

        /// Output directory
        #[arg(long)]
        out_dir: PathBuf,
    },
}

/// Per-tower file name: `peds.txt` becomes `peds.T3.txt` when more than one
/// tower is active.
fn tower_path(path: &Path, twr: TwrNum, towers: &[TwrNum]) -> PathBuf {
    if towers.len() < 2 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}.T{}.{}", twr.raw(), ext.to_string_lossy()),
        None => format!("{stem}.T{}", twr.raw()),
    };
    path.with_file_name(name)
}

/// Reads one table per active tower and merges them.
fn read_per_tower<I, T>(
    path: &Path,
    towers: &[TwrNum],
    read: impl Fn(&Path, TwrNum) -> calcal_io::Result<IdxArray<I, Option<T>>>,
) -> Result<IdxArray<I, Option<T>>>
where
    I: DenseIndex,
    T: Clone,
{
    let mut merged = IdxArray::empty();
    for &twr in towers {
        let file = tower_path(path, twr, towers);
        log::info!("reading {}", file.display());
        let table = read(&file, twr)?;
        for (idx, rec) in table.populated() {
            merged[idx] = Some(rec.clone());
        }
    }
    Ok(merged)
}

fn write_per_tower(
    path: &Path,
    towers: &[TwrNum],
    mut write: impl FnMut(&mut CalibTxtWriter<BufWriter<File>>, TwrNum) -> calcal_io::Result<()>,
) -> Result<()> {
    for &twr in towers {
        let file = tower_path(path, twr, towers);
        let mut writer = CalibTxtWriter::create(&file)?;
        write(&mut writer, twr)?;
        log::info!("wrote {}", file.display());
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CalibConfig> {
    match path {
        Some(path) => Ok(calcal_io::load_config(path)?),
        None => Ok(CalibConfig::default()),
    }
}

fn print_report(report: &PipelineReport, start: Instant) {
    print!("{report}");
    println!("Finished in {:.2}s", start.elapsed().as_secs_f64());
}

/// Passes a pipeline step's result through, printing the counters gathered
/// so far when it failed.
fn or_report<T>(
    result: calcal_core::Result<T>,
    pipeline: &CalibPipeline<'_>,
    start: Instant,
) -> Result<T> {
    result.map_err(|e| {
        print_report(pipeline.report(), start);
        e.into()
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let towers = config.active_towers()?;
    let fitter = StandardFitter::new();
    let start = Instant::now();

    match cli.command {
        Commands::Pedestals { events, output } => {
            let mut source = JsonlEventSource::open(&events)?;
            let mut pipeline = CalibPipeline::new(config, &fitter, log::logger())?;
            or_report(pipeline.rough_pedestals(&mut source), &pipeline, start)?;
            or_report(pipeline.final_pedestals(&mut source), &pipeline, start)?;
            if let Some(peds) = pipeline.pedestals() {
                write_per_tower(&output, &towers, |w, twr| w.write_pedestals(peds, twr))?;
            }
            print_report(pipeline.report(), start);
        }

        Commands::Inl { raw_ci, output } => {
            let raw =
                read_per_tower(&raw_ci, &towers, |p, t| calcal_io::read_raw_ci_txt(p, t))?;
            let log = StageLog::global("calcal::inl");
            let mut stats = StageStats::default();
            let mut report = PipelineReport::default();
            let inl = match InlBuilder::new(&config.inl, &fitter).build_all(
                &raw,
                &towers,
                &log,
                &mut stats,
            ) {
                Ok(inl) => inl,
                Err(e) => {
                    report.push_failed("inl", stats);
                    print_report(&report, start);
                    return Err(e.into());
                }
            };
            write_per_tower(&output, &towers, |w, twr| w.write_inl(&inl, twr))?;
            report.push("inl", stats);
            print_report(&report, start);
        }

        Commands::Muon {
            events,
            pedestals,
            inl,
            asym_output,
            mpd_output,
        } => {
            let peds = read_per_tower(&pedestals, &towers, |p, t| {
                calcal_io::read_pedestals_txt(p, t)
            })?;
            let inl = read_per_tower(&inl, &towers, |p, t| calcal_io::read_inl_txt(p, t))?;
            let mut source = JsonlEventSource::open(&events)?;
            let mut pipeline = CalibPipeline::new(config, &fitter, log::logger())?;
            pipeline.supply_pedestals(peds)?;
            pipeline.supply_inl(inl)?;
            let out = or_report(pipeline.run_muon(&mut source), &pipeline, start)?;
            write_per_tower(&asym_output, &towers, |w, twr| w.write_asym(&out.asym, twr))?;
            write_per_tower(&mpd_output, &towers, |w, twr| {
                w.write_mev_per_dac(&out.mev_per_dac, twr)
            })?;
            print_report(&out.report, start);
        }

        Commands::All {
            ped_events,
            muon_events,
            raw_ci,
            out_dir,
        } => {
            std::fs::create_dir_all(&out_dir)?;
            let raw =
                read_per_tower(&raw_ci, &towers, |p, t| calcal_io::read_raw_ci_txt(p, t))?;
            let mut ped_source = JsonlEventSource::open(&ped_events)?;
            let mut muon_source = JsonlEventSource::open(&muon_events)?;
            let mut pipeline = CalibPipeline::new(config, &fitter, log::logger())?;
            let result = pipeline.run(&mut ped_source, &raw, &mut muon_source);
            let out = or_report(result, &pipeline, start)?;

            let table = |name: &str| out_dir.join(name);
            write_per_tower(&table("pedestals.txt"), &towers, |w, twr| {
                w.write_pedestals(&out.pedestals, twr)
            })?;
            write_per_tower(&table("inl.txt"), &towers, |w, twr| w.write_inl(&out.inl, twr))?;
            write_per_tower(&table("asym.txt"), &towers, |w, twr| w.write_asym(&out.asym, twr))?;
            write_per_tower(&table("mevPerDac.txt"), &towers, |w, twr| {
                w.write_mev_per_dac(&out.mev_per_dac, twr)
            })?;
            print_report(&out.report, start);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn twr(n: u8) -> TwrNum {
        TwrNum::new(n).unwrap()
    }

    #[test]
    fn test_tower_path() {
        let one = [twr(0)];
        let two = [twr(0), twr(5)];
        let base = Path::new("out/peds.txt");
        assert_eq!(tower_path(base, twr(0), &one), PathBuf::from("out/peds.txt"));
        assert_eq!(tower_path(base, twr(5), &two), PathBuf::from("out/peds.T5.txt"));
        assert_eq!(
            tower_path(Path::new("asym"), twr(0), &two),
            PathBuf::from("asym.T0")
        );
    }

    #[test]
    fn test_parse_muon_command() {
        let cli = Cli::try_parse_from([
            "calcal",
            "muon",
            "--events",
            "mu.jsonl",
            "--pedestals",
            "peds.txt",
            "--inl",
            "inl.txt",
            "--asym-output",
            "asym.txt",
            "--mpd-output",
            "mpd.txt",
            "--config",
            "run.json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("run.json")));
        assert!(matches!(cli.command, Commands::Muon { .. }));
    }

    #[test]
    fn test_muon_command_requires_tables() {
        assert!(Cli::try_parse_from(["calcal", "muon", "--events", "mu.jsonl"]).is_err());
    }

    #[test]
    fn test_failed_step_passes_error_through() {
        let fitter = StandardFitter::new();
        let sink = calcal_core::RecordingLog::new();
        let mut pipeline = CalibPipeline::new(CalibConfig::default(), &fitter, &sink).unwrap();
        let mut source = calcal_core::MemoryEventSource::default();
        or_report(pipeline.rough_pedestals(&mut source), &pipeline, Instant::now()).unwrap();
        let result = pipeline.final_pedestals(&mut source);
        let err = or_report(result, &pipeline, Instant::now()).unwrap_err();
        assert!(matches!(
            err,
            CliError::Core(calcal_core::Error::UnpopulatedChannel { .. })
        ));
        assert_eq!(pipeline.report().failed, Some("final_pedestal"));
    }

    #[test]
    fn test_missing_tables_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_per_tower(
            &dir.path().join("peds.txt"),
            &[twr(0)],
            |p, t| calcal_io::read_pedestals_txt(p, t),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::CalcalIo(calcal_io::Error::Io(_))));
    }
}
