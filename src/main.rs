use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use graphcollective::{
    logging, status, Buffer, Cluster, Config, DataType, Fabric, NetAddr, PeerSpec, ReduceOp,
    Session, TcpFabric, Workspace,
};

#[derive(Parser, Debug)]
#[command(name = "graphcollective")]
#[command(about = "Graph-driven collectives over TCP")]
struct Args {
    #[arg(long)]
    rank: usize,
    /// Every peer's listen address, in rank order
    #[arg(long = "peer", required = true)]
    peers: Vec<NetAddr>,
    #[arg(long, default_value = "allreduce")]
    mode: String,
    /// Algorithm name; overrides config file and COLLECTIVE_ALGO
    #[arg(long)]
    algo: Option<String>,
    /// JSON config file
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    /// Elements (f32) per operation
    #[arg(long, default_value_t = 1024 * 1024)]
    size: usize,
    #[arg(long, default_value_t = 100)]
    iters: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(algo) = &args.algo {
        config.algorithm = algo.clone();
    }

    let peers: Vec<PeerSpec> = args.peers.iter().cloned().map(PeerSpec::from).collect();
    let cluster = Cluster::new(peers, args.rank)?;
    let fabric = TcpFabric::new(cluster.self_addr().clone(), config.fabric.clone()).await?;
    let fabric: Arc<dyn Fabric> = Arc::new(fabric);
    let session = Session::new(&config, cluster, fabric)?;

    let warmup = session.warmup().await;
    println!("rank {} warmup -> {}", session.rank(), status::code(&warmup));

    let code = match args.mode.as_str() {
        "allreduce" | "reduce" | "broadcast" => run_mode(&session, &args).await?,
        "warmup" => status::code(&warmup),
        _ => {
            eprintln!(
                "unknown mode: {}. Use 'allreduce', 'reduce', 'broadcast' or 'warmup'",
                args.mode
            );
            1
        }
    };
    std::process::exit(code);
}

async fn run_mode(session: &Session, args: &Args) -> Result<i32> {
    let values = vec![session.rank() as f32 + 1.0; args.size];
    let send = Buffer::from_slice(&values);
    let mut recv = Buffer::zeros(args.size, DataType::F32);

    let start = std::time::Instant::now();
    let mut code = 0;
    for i in 0..args.iters {
        let w = Workspace::new(&send, &mut recv, ReduceOp::Sum, args.mode.as_str())?;
        let result = match args.mode.as_str() {
            "reduce" => session.reduce(w).await,
            "broadcast" => session.broadcast(w).await,
            _ => session.all_reduce(w).await,
        };
        if let Err(e) = &result {
            eprintln!("rank {} {} #{} failed: {}", session.rank(), args.mode, i, e);
        }
        code = code.max(status::code(&result));
    }
    let elapsed = start.elapsed().as_secs_f64();

    let bytes = args.size * DataType::F32.size();
    let gbps = (bytes as f64 * args.iters as f64 * 2.0 / elapsed) / 1e9;
    let first = recv.to_vec::<f32>()?.first().copied().unwrap_or_default();
    println!(
        "rank {} {} {} bytes x {} iters -> {:.2} GB/s, final[0] = {}",
        session.rank(),
        args.mode,
        bytes,
        args.iters,
        gbps,
        first
    );

    Ok(code)
}
