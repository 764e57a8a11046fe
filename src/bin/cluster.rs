//! ChainKV local cluster executable: boots an in-process chain and drives
//! a small concurrent workload through logging workers.

use std::io::Write;

use chrono::Local;
use clap::Parser;
use env_logger::Env;
use rand::Rng;
use tokio::runtime::Builder;

use chainkv::{
    logged_err, parsed_config, pf_error, ChainKvError, ChainProtocol,
    ChainTopology, ClusterConfig, ClusterManager, ServerInfo,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Name of replication protocol variant to use.
    #[arg(short, long, default_value_t = String::from("Craq"))]
    protocol: String,

    /// Number of chain replicas; replica i listens on base_port + i.
    #[arg(short, long, default_value_t = 4)]
    replicas: u8,

    /// Base port for replica listeners.
    #[arg(short, long, default_value_t = 52700)]
    base_port: u16,

    /// Number of concurrent client workers to drive.
    #[arg(short, long, default_value_t = 2)]
    workers: u8,

    /// Number of operations per worker.
    #[arg(short, long, default_value_t = 20)]
    ops: u32,

    /// Distinct keys touched by the workload.
    #[arg(short, long, default_value_t = 8)]
    keys: u32,

    /// Cluster configuration in TOML format, e.g. 'pool_size = 8'.
    #[arg(short, long)]
    config: Option<String>,
}

impl CliArgs {
    /// Sanitize command line arguments, returning `Ok(protocol)` on success
    /// or `Err(ChainKvError)` on any error.
    fn sanitize(&self) -> Result<ChainProtocol, ChainKvError> {
        if self.replicas == 0 {
            Err(ChainKvError(format!(
                "invalid number of replicas {}",
                self.replicas
            )))
        } else if self.base_port <= 1024 {
            Err(ChainKvError(format!(
                "invalid base_port {}",
                self.base_port
            )))
        } else if self.base_port.checked_add(self.replicas as u16).is_none()
        {
            Err(ChainKvError(format!(
                "replica ports overflow past base_port {}",
                self.base_port
            )))
        } else if self.workers == 0 {
            Err(ChainKvError(format!(
                "invalid number of workers {}",
                self.workers
            )))
        } else if self.ops == 0 || self.keys == 0 {
            Err(ChainKvError(format!(
                "invalid workload shape: {} ops over {} keys",
                self.ops, self.keys
            )))
        } else {
            ChainProtocol::parse_name(&self.protocol).ok_or_else(|| {
                ChainKvError(format!(
                    "protocol name '{}' unrecognized",
                    self.protocol
                ))
            })
        }
    }
}

/// Replica names follow the chain order: `a`, `b`, `c`, ...
fn replica_name(idx: u8) -> String {
    if idx < 26 {
        ((b'a' + idx) as char).to_string()
    } else {
        format!("r{}", idx)
    }
}

// Cluster executable main entrance.
fn cluster_main(
    args: &CliArgs,
    protocol: ChainProtocol,
) -> Result<(), ChainKvError> {
    let config = parsed_config!(args.config.as_deref() => ClusterConfig;
                                pool_size, conn_retries)?;
    let infos: Vec<ServerInfo> = (0..args.replicas)
        .map(|idx| {
            ServerInfo::new(
                &replica_name(idx),
                "127.0.0.1",
                args.base_port + idx as u16,
            )
        })
        .collect();
    let topology = ChainTopology::chain(protocol, infos)?;

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("chainkv-cluster")
        .build()?;

    let workers = args.workers;
    let ops = args.ops;
    let keys = args.keys;
    runtime.block_on(async move {
        let mut manager = ClusterManager::new(protocol, topology, config);
        manager.launch().await?;
        let client = manager.client()?;

        let mut tasks = Vec::new();
        for _ in 0..workers {
            let mut worker = client.worker();
            tasks.push(tokio::spawn(async move {
                for op in 0..ops {
                    let key =
                        format!("k{}", rand::thread_rng().gen_range(0..keys));
                    if rand::thread_rng().gen_bool(0.5) {
                        if !worker.set(&key, &op.to_string()).await? {
                            return logged_err!("workload";
                                               "write to {} rejected", key);
                        }
                    } else {
                        worker.get(&key).await?;
                    }
                }
                Ok::<(), ChainKvError>(())
            }));
        }
        for task in tasks {
            task.await??;
        }

        manager.shutdown();
        Ok(())
    })
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} {} {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let args = CliArgs::parse();
    match args.sanitize() {
        Ok(protocol) => {
            if let Err(e) = cluster_main(&args, protocol) {
                pf_error!("cluster"; "cluster_main exited: {}", e);
            }
        }
        Err(e) => {
            pf_error!("cluster"; "invalid arguments: {}", e);
        }
    }
}
