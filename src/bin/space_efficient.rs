//! The space-efficient sorter driver.
//!
//! Sorts in quantiles of a bounded byte budget and emits only the global
//! rank permutation of the input, never the materialized sorted strings.
//! Meant for suffix- and window-type inputs whose strings heavily overlap
//! in the shared text arena.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};

use diststringsort::comm::{warmup, Communicator, ReduceOp};
use diststringsort::config::{GolombMode, PermutationKind, SamplePolicy, SortConfig};
use diststringsort::generator::InputSpec;
use diststringsort::grid::CommGrid;
use diststringsort::local_comm::run_cluster;
use diststringsort::measure::Measurements;
use diststringsort::sorter::{count_duplicate_ranks, redistribute_ranks, SpaceEfficientSort};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GeneratorArg {
    Random,
    Suffix,
    Window,
    DifferenceCover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PermutationArg {
    Simple,
    MultiLevel,
    NonUnique,
}

/// A space-efficient distributed string sorter.
#[derive(Debug, Parser, Clone)]
#[command(name = "space_efficient_sorter")]
struct Args {
    /// Name identifying the experiment being run.
    #[arg(short = 'e', long, default_value = "")]
    experiment: String,

    /// Number of strings per rank for the random generator.
    #[arg(short = 'n', long, default_value_t = 10_000)]
    num_strings: usize,

    /// Number of characters per string.
    #[arg(short = 'm', long, default_value_t = 500)]
    len_strings: usize,

    /// D/N ratio of generated strings.
    #[arg(short = 'r', long, default_value_t = 0.5)]
    dn_ratio: f64,

    /// Number of sorting iterations to run.
    #[arg(short = 'i', long, default_value_t = 1)]
    num_iterations: usize,

    /// Characters to skip between strings.
    #[arg(short = 'T', long, default_value_t = 1)]
    step: usize,

    /// Difference-cover modulus.
    #[arg(short = 'D', long, default_value_t = 3)]
    difference_cover: usize,

    /// Input generator.
    #[arg(short = 'k', long, value_enum, default_value_t = GeneratorArg::Random)]
    generator: GeneratorArg,

    /// Path to the input file.
    #[arg(short = 'y', long)]
    path: Option<PathBuf>,

    /// Window length for the window generator.
    #[arg(short = 'w', long, default_value_t = 8)]
    window_len: usize,

    /// Permutation flavor to emit.
    #[arg(short = 'o', long, value_enum, default_value_t = PermutationArg::MultiLevel)]
    permutation: PermutationArg,

    /// Byte budget per quantile.
    #[arg(short = 'q', long, default_value_t = 100 * 1024 * 1024)]
    quantile_size: usize,

    /// Use the duplicate filter and sort distinguishing prefixes only.
    #[arg(short = 'd', long)]
    prefix_doubling: bool,

    /// Golomb coding of the duplicate-detection hash exchange.
    #[arg(short = 'g', long, default_value = "none")]
    golomb: String,

    /// Check that the permutation is sorted and complete.
    #[arg(short = 'c', long)]
    check: bool,

    /// Ranks of the in-process cluster backend.
    #[arg(short = 'P', long, default_value_t = 1)]
    procs: usize,

    /// Group sizes for the multi-level merge sort (strictly decreasing).
    #[arg(value_name = "group-size")]
    levels: Vec<usize>,
}

impl Args {
    fn sort_config(&self) -> anyhow::Result<SortConfig> {
        let golomb = match self.golomb.as_str() {
            "none" => GolombMode::None,
            "sequential" => GolombMode::Sequential,
            "pipelined" => GolombMode::Pipelined,
            other => bail!("unknown golomb mode {other:?}"),
        };
        Ok(SortConfig {
            prefix_doubling: self.prefix_doubling,
            golomb,
            sample: SamplePolicy::Strings,
            levels: self.levels.clone(),
            quantile_size: self.quantile_size,
            permutation: match self.permutation {
                PermutationArg::Simple => PermutationKind::Simple,
                PermutationArg::MultiLevel => PermutationKind::MultiLevel,
                PermutationArg::NonUnique => PermutationKind::NonUnique,
            },
            ..SortConfig::default()
        })
    }

    fn input_spec(&self, num_ranks: usize) -> anyhow::Result<InputSpec> {
        let path = || {
            self.path
                .clone()
                .context("the selected generator needs --path")
        };
        Ok(match self.generator {
            GeneratorArg::Random => InputSpec::Random {
                num_strings: self.num_strings * num_ranks,
                len: self.len_strings,
                dn_ratio: self.dn_ratio,
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
}

fn run_rank<C: Communicator>(comm: C, args: &Args) -> anyhow::Result<()> {
    let cfg = args.sort_config()?;
    cfg.validate()?;
    let levels = cfg.effective_levels(comm.size())?;
    let spec = args.input_spec(comm.size())?;

    warmup(args.num_strings.min(20_000), &comm);
    let grid = CommGrid::new(comm, &levels);
    let world = grid.world();

    for iteration in 0..args.num_iterations {
        let prefix = format!(
            "{}num_procs={} generator={} quantile_size={} permutation={} iteration={}",
            if args.experiment.is_empty() {
                String::new()
            } else {
                format!("experiment={} ", args.experiment)
            },
            world.size(),
            spec.name(),
            cfg.quantile_size,
            cfg.permutation.name(),
            iteration
        );
        let mut measure = Measurements::new(prefix);

        world.barrier();
        measure.set_phase("generation");
        measure.start("generate_strings");
        let input = spec.generate(world)?;
        measure.stop("generate_strings");
        measure.add("input_strings", input.len() as u64);
        measure.add("input_chars", input.char_size() as u64);
        measure.add(
            "uncompressed_input_chars",
            input.container().sum_len() as u64,
        );
        let num_local = input.len();
        world.barrier();

        measure.set_phase("sorting");
        measure.start("sorting_overall");
        let ranks = SpaceEfficientSort::new(cfg.clone()).sort(input, &grid, &mut measure);
        measure.stop("sorting_overall");

        count_duplicate_ranks(&ranks, world, &mut measure);

        if args.check {
            if ranks.len() != num_local {
                bail!("permutation size does not match the input");
            }
            let total = world.allreduce_u64(num_local as u64, ReduceOp::Sum);
            let local_max = ranks.iter().max().map(|&r| r as u64 + 1).unwrap_or(0);
            if world.allreduce_u64(local_max, ReduceOp::Max) > total {
                bail!("permutation contains out-of-range ranks");
            }
            if cfg.permutation != PermutationKind::NonUnique {
                // Unique ranks: after redistribution by value interval,
                // every value must occur exactly once globally.
                let owned = redistribute_ranks(&ranks, world);
                let distinct_here = owned.windows(2).all(|w| w[0] != w[1]);
                let all_distinct = !world.allreduce_bool_or(!distinct_here);
                let count = world.allreduce_u64(owned.len() as u64, ReduceOp::Sum);
                if !all_distinct || count != total {
                    bail!("permutation is not complete");
                }
            }
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
