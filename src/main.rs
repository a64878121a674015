//! The distributed string sorter driver.
//!
//! Generates (or reads) a string partition per rank, runs the configured
//! merge sort over the in-process cluster backend (`--procs`) or, with the
//! `mpi-cluster` feature, over MPI, and optionally verifies the output.
//! Measurement records are printed on the root as `RESULT` lines.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tracing::info;

use diststringsort::comm::{warmup, Communicator, ReduceOp};
use diststringsort::config::{
    AllToAllRoutine, GolombMode, PermutationKind, SamplePolicy, SortConfig,
};
use diststringsort::generator::InputSpec;
use diststringsort::grid::CommGrid;
use diststringsort::local_comm::run_cluster;
use diststringsort::measure::Measurements;
use diststringsort::sorter::{DistributedMergeSort, PrefixDoublingMergeSort};
use diststringsort::verify::{is_permutation_of_input, is_sorted_globally, local_digest, Checker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GeneratorArg {
    Random,
    File,
    FileSegment,
    Suffix,
    Window,
    DifferenceCover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SamplerArg {
    Strings,
    Chars,
    IndexedStrings,
    IndexedChars,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GolombArg {
    None,
    Sequential,
    Pipelined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RoutineArg {
    Small,
    Direct,
    Combined,
}

/// A distributed string sorter.
#[derive(Debug, Parser, Clone)]
#[command(name = "distributed_sorter")]
struct Args {
    /// Name identifying the experiment being run.
    #[arg(short = 'e', long, default_value = "")]
    experiment: String,

    /// Number of strings per rank (total with --strong-scaling).
    #[arg(short = 'n', long, default_value_t = 100_000)]
    num_strings: usize,

    /// Length of generated strings.
    #[arg(short = 'm', long, default_value_t = 50)]
    len_strings: usize,

    /// D/N ratio of generated strings.
    #[arg(short = 'r', long, default_value_t = 0.5)]
    dn_ratio: f64,

    /// Number of sorting iterations to run.
    #[arg(short = 'i', long, default_value_t = 5)]
    num_iterations: usize,

    /// Keep the total input size fixed instead of scaling with ranks.
    #[arg(short = 'x', long)]
    strong_scaling: bool,

    /// Check that the output is sorted and no strings were lost.
    #[arg(short = 'c', long)]
    check: bool,

    /// Check that the output is exactly a permutation of the input.
    #[arg(short = 'C', long)]
    check_exhaustive: bool,

    /// Compress LCP values during the string exchange.
    #[arg(short = 'l', long)]
    lcp_compression: bool,

    /// Send only distinct tails during the string exchange.
    #[arg(short = 'p', long)]
    prefix_compression: bool,

    /// Sort distinguishing prefixes instead of whole strings.
    #[arg(short = 'd', long)]
    prefix_doubling: bool,

    /// Golomb coding of the duplicate-detection hash exchange.
    #[arg(short = 'g', long, value_enum, default_value_t = GolombArg::None)]
    golomb: GolombArg,

    /// All-to-all routine for the string exchange.
    #[arg(short = 'a', long, value_enum, default_value_t = RoutineArg::Combined)]
    alltoall_routine: RoutineArg,

    /// Splitter sampling policy.
    #[arg(short = 's', long, value_enum, default_value_t = SamplerArg::Strings)]
    sample_policy: SamplerArg,

    /// Input generator.
    #[arg(short = 'k', long, value_enum, default_value_t = GeneratorArg::Random)]
    generator: GeneratorArg,

    /// Path to the input file for the file-based generators.
    #[arg(short = 'y', long)]
    path: Option<PathBuf>,

    /// Bytes per rank for the file-segment generator.
    #[arg(long, default_value_t = 1 << 20)]
    segment_bytes: usize,

    /// Characters to skip between suffix/window strings.
    #[arg(short = 'T', long, default_value_t = 1)]
    step: usize,

    /// Window length for the window generator.
    #[arg(short = 'w', long, default_value_t = 8)]
    window_len: usize,

    /// Difference-cover modulus.
    #[arg(short = 'D', long, default_value_t = 3)]
    difference_cover: usize,

    /// Ranks of the in-process cluster backend.
    #[arg(short = 'P', long, default_value_t = 1)]
    procs: usize,

    /// Group sizes for the multi-level merge sort (strictly decreasing).
    #[arg(value_name = "group-size")]
    levels: Vec<usize>,
}

impl Args {
    fn sort_config(&self) -> SortConfig {
        SortConfig {
            lcp_compression: self.lcp_compression,
            prefix_compression: self.prefix_compression,
            prefix_doubling: self.prefix_doubling,
            golomb: match self.golomb {
                GolombArg::None => GolombMode::None,
                GolombArg::Sequential => GolombMode::Sequential,
                GolombArg::Pipelined => GolombMode::Pipelined,
            },
            alltoall: match self.alltoall_routine {
                RoutineArg::Small => AllToAllRoutine::Small,
                RoutineArg::Direct => AllToAllRoutine::Direct,
                RoutineArg::Combined => AllToAllRoutine::Combined,
            },
            sample: match self.sample_policy {
                SamplerArg::Strings => SamplePolicy::Strings,
                SamplerArg::Chars => SamplePolicy::Chars,
                SamplerArg::IndexedStrings => SamplePolicy::IndexedStrings,
                SamplerArg::IndexedChars => SamplePolicy::IndexedChars,
            },
            levels: self.levels.clone(),
            permutation: PermutationKind::Simple,
            ..SortConfig::default()
        }
    }

    fn input_spec(&self, num_ranks: usize) -> anyhow::Result<InputSpec> {
        let path = || {
            self.path
                .clone()
                .context("the selected generator needs --path")
        };
        Ok(match self.generator {
            GeneratorArg::Random => InputSpec::Random {
                num_strings: if self.strong_scaling {
                    self.num_strings
                } else {
                    self.num_strings * num_ranks
                },
                len: self.len_strings,
                dn_ratio: self.dn_ratio,
            },
            GeneratorArg::File => InputSpec::File { path: path()? },
            GeneratorArg::FileSegment => InputSpec::FileSegment {
                path: path()?,
                bytes_per_rank: self.segment_bytes,
            },
            GeneratorArg::Suffix => InputSpec::Suffix {
                path: path()?,
                step: self.step,
            },
            GeneratorArg::Window => InputSpec::Window {
                path: path()?,
                window_len: self.window_len,
                step: self.step,
            },
            GeneratorArg::DifferenceCover => InputSpec::DifferenceCover {
                path: path()?,
                modulus: self.difference_cover,
            },
        })
    }

    fn result_prefix<C: Communicator>(&self, iteration: usize, comm: &C) -> String {
        let mut prefix = String::new();
        if !self.experiment.is_empty() {
            prefix.push_str(&format!("experiment={} ", self.experiment));
        }
        prefix.push_str(&format!(
            "num_procs={} num_strings={} len_strings={} num_levels={} iteration={}",
            comm.size(),
            self.num_strings,
            self.len_strings,
            self.levels.len(),
            iteration
        ));
        prefix
    }

    fn print_config<C: Communicator>(&self, cfg: &SortConfig, prefix: &str, comm: &C) {
        if !comm.is_root() {
            return;
        }
        println!("{prefix} key=string_generator name={:?}", self.generator);
        println!("{prefix} key=dn_ratio value={}", self.dn_ratio);
        println!("{prefix} key=sampler name={}", cfg.sample.name());
        println!("{prefix} key=alltoall_routine name={}", cfg.alltoall.name());
        println!("{prefix} key=golomb_encoding name={}", cfg.golomb.name());
        println!("{prefix} key=prefix_compression value={}", cfg.prefix_compression);
        println!("{prefix} key=lcp_compression value={}", cfg.lcp_compression);
        println!("{prefix} key=prefix_doubling value={}", cfg.prefix_doubling);
        println!("{prefix} key=strong_scaling value={}", self.strong_scaling);
    }
}

fn run_rank<C: Communicator>(comm: C, args: &Args) -> anyhow::Result<()> {
    let cfg = args.sort_config();
    cfg.validate()?;
    let levels = cfg.effective_levels(comm.size())?;
    let spec = args.input_spec(comm.size())?;

    // One throwaway exchange before anything is timed.
    warmup(args.num_strings.min(20_000), &comm);

    let grid = CommGrid::new(comm, &levels);
    let world = grid.world();

    for iteration in 0..args.num_iterations {
        let prefix = args.result_prefix(iteration, world);
        args.print_config(&cfg, &prefix, world);
        let mut measure = Measurements::new(prefix);

        if world.is_root() {
            info!(iteration, "string generation started");
        }
        world.barrier();
        measure.set_phase("generation");
        measure.start("generate_strings");
        let input = spec.generate(world)?;
        measure.stop("generate_strings");
        measure.add("input_strings", input.len() as u64);
        measure.add("input_chars", input.container().sum_len() as u64);
        if world.is_root() {
            info!(iteration, "string generation completed");
        }

        let mut checker = Checker::default();
        let digest = local_digest(&input);
        if args.check_exhaustive {
            checker.store_input(&input);
        }
        world.barrier();

        measure.set_phase("sorting");
        measure.start("sorting_overall");
        if cfg.prefix_doubling {
            let (sorted, permutation) =
                PrefixDoublingMergeSort::new(cfg.clone()).sort(input, &grid, &mut measure);
            measure.stop("sorting_overall");

            if args.check || args.check_exhaustive {
                if !is_sorted_globally(&sorted, world) {
                    bail!("output permutation is not sorted");
                }
                let total_in = world.allreduce_u64(digest.num_strings, ReduceOp::Sum);
                let total_out =
                    world.allreduce_u64(permutation.len() as u64, ReduceOp::Sum);
                if total_in != total_out {
                    bail!("output permutation is not complete");
                }
            }
            measure.add("output_strings", permutation.len() as u64);
        } else {
            let sorted =
                DistributedMergeSort::new(cfg.clone()).sort(input, &grid, &mut measure);
            measure.stop("sorting_overall");

            if args.check || args.check_exhaustive {
                if !is_sorted_globally(&sorted, world) {
                    bail!("output is not sorted");
                }
                if !is_permutation_of_input(digest, &sorted, world) {
                    bail!("output is not a permutation of the input");
                }
                if args.check_exhaustive && !checker.check_complete_exchange(&sorted, world) {
                    bail!("output does not exactly match the input");
                }
            }
            measure.add("output_strings", sorted.len() as u64);
            measure.add("output_chars", sorted.container().sum_len() as u64);
        }

        if world.is_root() {
            print!("{}", measure.to_result_lines());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(err) = args.sort_config().validate() {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    #[cfg(feature = "mpi-cluster")]
    if args.procs <= 1 {
        let universe = mpi::initialize().expect("failed to initialize MPI");
        let comm = diststringsort::mpi_comm::MpiComm::world(&universe);
        return match run_rank(comm, &args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::FAILURE
            }
        };
    }

    let results = run_cluster(args.procs, |comm| run_rank(comm, &args));
    for result in results {
        if let Err(err) = result {
            eprintln!("{err:#}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
