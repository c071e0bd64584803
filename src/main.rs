use std::env;
use std::process;
use std::time::Instant;

#[cfg(feature = "mpi")]
use icrs_dist::MpiComm;
#[cfg(not(feature = "mpi"))]
use icrs_dist::LocalGroup;
use icrs_dist::{Communicator, DistributedSpmv, Result, SetupConfig};
use tracing_subscriber::EnvFilter;

fn usage(program: &str) -> ! {
    eprintln!("usage: {} <matrix-file> <v-distribution> <u-distribution> [processes]", program);
    eprintln!();
    eprintln!("Without the `mpi` feature, [processes] ranks run as threads of this process.");
    eprintln!("With it, start one process per rank under mpirun; [processes] must match.");
    eprintln!("On failure the exit status is 8 or 10 for a process count mismatch in the");
    eprintln!("matrix or vector file, 9 for a non-square matrix, 11 for a vector file out of");
    eprintln!("order, 2 for a missing file, 3 for a malformed entry, 4 for other header");
    eprintln!("problems and 5 for communication failures.");
    process::exit(2);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("icrs-dist");
    if args.len() < 4 || args.len() > 5 {
        usage(program);
    }

    let mut config = SetupConfig::default();
    let requested = match args.get(4).map(|arg| arg.parse::<usize>()) {
        None => None,
        Some(Ok(p)) if p > 0 => Some(p),
        Some(_) => usage(program),
    };
    if let Some(p) = requested {
        config.processes = p;
    }

    if let Err(error) = run(&args[1], &args[2], &args[3], requested, config) {
        eprintln!("error: {}", error);
        process::exit(error.exit_status());
    }
}

/// Runs every rank as a thread of this process
#[cfg(not(feature = "mpi"))]
fn run(matrix: &str, v: &str, u: &str, _requested: Option<usize>, config: SetupConfig) -> Result<()> {
    let group = LocalGroup::new(config.processes)?;
    tracing::info!(processes = group.size(), matrix, v, u, "starting process group");

    group.run(|comm| benchmark(comm, matrix, v, u, &config))?;
    Ok(())
}

/// Runs this process as one rank of an MPI job
#[cfg(feature = "mpi")]
fn run(matrix: &str, v: &str, u: &str, requested: Option<usize>, mut config: SetupConfig) -> Result<()> {
    let comm = MpiComm::init()?;
    if let Some(p) = requested.filter(|&p| p != comm.size()) {
        let error = icrs_dist::SetupError::InvalidConfig(format!(
            "{} processes requested, MPI job has {}",
            p,
            comm.size()
        ));
        comm.abort(&error);
        return Err(error);
    }
    config.processes = comm.size();

    if let Err(error) = benchmark(&comm, matrix, v, u, &config) {
        // Peers may be blocked in a collective; only MPI_Abort releases them
        comm.abort(&error);
        return Err(error);
    }
    Ok(())
}

/// Sets up the product and times `config.iterations` products with `v[i] = i + 1`
fn benchmark<C: Communicator>(comm: &C, matrix: &str, v: &str, u: &str, config: &SetupConfig) -> Result<()> {
    let start = Instant::now();
    let spmv = DistributedSpmv::from_files(comm, matrix, v, u, config)?;
    comm.barrier()?;
    let setup_time = start.elapsed();

    let vloc: Vec<f64> = spmv.v().vindex().iter().map(|&g| (g + 1) as f64).collect();
    let mut uloc = vec![0.0; spmv.u().nv()];

    comm.barrier()?;
    let start = Instant::now();
    for _ in 0..config.iterations {
        spmv.multiply(comm, &vloc, &mut uloc)?;
    }
    comm.barrier()?;
    let product_time = start.elapsed();

    let local_sum: f64 = uloc.iter().sum();
    let sums = comm.all_to_allv(vec![vec![local_sum]; comm.size()])?;
    if comm.is_root(config.root) {
        let checksum: f64 = sums.iter().flatten().sum();
        let per_product = product_time.as_secs_f64() / config.iterations.max(1) as f64;
        tracing::info!(
            n = spmv.n(),
            processes = comm.size(),
            setup_secs = setup_time.as_secs_f64(),
            iterations = config.iterations,
            secs_per_product = per_product,
            checksum,
            "benchmark finished"
        );
    }
    Ok(())
}
