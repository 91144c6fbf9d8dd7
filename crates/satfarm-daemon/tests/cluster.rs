//! A server driven by an in-process manager, with real worker coordinators
//! connecting over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use satfarm_base::config::{ServerConfig, WorkerConfig};
use satfarm_base::Result;
use satfarm_daemon::Server;
use satfarm_protocol::channel;
use satfarm_protocol::{
    Link, ManagerToServer, ServerToManager, ServerToWorker, TaskFile, TaskStatistics,
    WorkerToServer,
};
use satfarm_worker::{Coordinator, CoordinatorSettings, ProbSatEngine, WorkerSummary};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct Cluster {
    manager: Link<ServerToManager, ManagerToServer>,
    worker_addr: String,
    server: JoinHandle<Result<()>>,
}

async fn start(config: ServerConfig) -> Cluster {
    let manager_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager_addr = manager_listener.local_addr().unwrap().to_string();
    let connecting = tokio::spawn(async move {
        channel::connect::<ManagerToServer, ServerToManager>(&manager_addr)
            .await
            .unwrap()
    });
    let (stream, _) = manager_listener.accept().await.unwrap();
    let manager = channel::accept::<ServerToManager, ManagerToServer>(stream)
        .await
        .unwrap();
    let server_link = connecting.await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = Server::new(&config, listener, server_link);
    let worker_addr = server.local_addr().unwrap().to_string();
    Cluster {
        manager,
        worker_addr,
        server: tokio::spawn(server.run()),
    }
}

fn spawn_worker(addr: String, threads: usize) -> JoinHandle<Result<WorkerSummary>> {
    tokio::spawn(async move {
        let link = channel::connect::<ServerToWorker, WorkerToServer>(&addr).await?;
        let engine = Arc::new(ProbSatEngine::from_config(&WorkerConfig::default()));
        let settings = CoordinatorSettings {
            threads,
            default_max_flips: 100_000,
            poll_interval: Duration::from_millis(5),
        };
        Coordinator::new(link, engine, settings)?.run().await
    })
}

fn write_cnf(tag: &str, text: &str) -> String {
    let path = std::env::temp_dir().join(format!(
        "satfarm-cluster-{tag}-{}.cnf",
        satfarm_base::utils::fresh_seed()
    ));
    std::fs::write(&path, text).unwrap();
    path.display().to_string()
}

/// Everything the server sends the manager up to and including `DISCONNECT`.
async fn collect(manager: &mut Link<ServerToManager, ManagerToServer>) -> Vec<ServerToManager> {
    let mut seen = Vec::new();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(30), manager.inbox.recv())
            .await
            .expect("server went silent")
            .unwrap()
            .expect("server closed without DISCONNECT");
        let last = msg == ServerToManager::Disconnect;
        seen.push(msg);
        if last {
            return seen;
        }
    }
}

fn statistics(seen: &[ServerToManager]) -> Vec<(TaskFile, TaskStatistics)> {
    seen.iter()
        .filter_map(|msg| match msg {
            ServerToManager::SendStatistics { file, statistics } => {
                Some((file.clone(), statistics.clone()))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_solution_terminates_run() {
    let filename = write_cnf("sat", "p cnf 3 3\n1 2 0\n-1 3 0\n-2 -3 0\n");
    let mut cluster = start(ServerConfig::default()).await;

    cluster
        .manager
        .outbox
        .send(&ManagerToServer::AddWorkers { count: 2 })
        .await
        .unwrap();
    let workers: Vec<_> = (0..2)
        .map(|_| spawn_worker(cluster.worker_addr.clone(), 2))
        .collect();
    cluster
        .manager
        .outbox
        .send(&ManagerToServer::AddFile(TaskFile {
            start_configs: 8,
            max_flips: 0,
            filename: filename.clone(),
        }))
        .await
        .unwrap();

    let seen = collect(&mut cluster.manager).await;
    assert!(matches!(seen[0], ServerToManager::FoundSolution(ref s) if s.filename == filename));
    let stats = statistics(&seen);
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].0.filename, filename);
    assert!(stats[0].1.times_solved >= 1);
    assert!(stats[0].1.instances_started <= 8);

    cluster.server.await.unwrap().unwrap();
    for worker in workers {
        worker.await.unwrap().unwrap();
    }
    assert_eq!(cluster.manager.inbox.recv().await.unwrap(), None);
    let _ = std::fs::remove_file(filename);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_quota_exhausted_without_solution() {
    let filename = write_cnf("unsat", "p cnf 1 2\n1 0\n-1 0\n");
    let mut cluster = start(ServerConfig::default()).await;

    cluster
        .manager
        .outbox
        .send(&ManagerToServer::AddWorkers { count: 2 })
        .await
        .unwrap();
    let workers: Vec<_> = (0..2)
        .map(|_| spawn_worker(cluster.worker_addr.clone(), 2))
        .collect();
    cluster
        .manager
        .outbox
        .send(&ManagerToServer::AddFile(TaskFile {
            start_configs: 6,
            max_flips: 50,
            filename: filename.clone(),
        }))
        .await
        .unwrap();

    let seen = collect(&mut cluster.manager).await;
    assert!(!seen
        .iter()
        .any(|msg| matches!(msg, ServerToManager::FoundSolution(_))));
    let stats = statistics(&seen);
    assert_eq!(stats.len(), 1);
    let (_, statistics) = &stats[0];
    assert_eq!(statistics.instances_started, 6);
    assert_eq!(statistics.times_solved, 0);
    assert_eq!(statistics.total_flips, 300);
    assert_eq!(statistics.min_flips_to_solve, u64::MAX);
    assert_eq!(statistics.num_vars, 1);

    cluster.server.await.unwrap().unwrap();
    let trials: u64 = total_trials(workers).await;
    assert_eq!(trials, 6);
    let _ = std::fs::remove_file(filename);
}

async fn total_trials(workers: Vec<JoinHandle<Result<WorkerSummary>>>) -> u64 {
    let mut total = 0;
    for worker in workers {
        total += worker.await.unwrap().unwrap().trials_completed;
    }
    total
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_terminate_idle_workers() {
    let mut cluster = start(ServerConfig::default()).await;
    cluster
        .manager
        .outbox
        .send(&ManagerToServer::AddWorkers { count: 1 })
        .await
        .unwrap();
    let worker = spawn_worker(cluster.worker_addr.clone(), 1);
    cluster
        .manager
        .outbox
        .send(&ManagerToServer::Terminate)
        .await
        .unwrap();

    let seen = collect(&mut cluster.manager).await;
    assert_eq!(seen, vec![ServerToManager::Disconnect]);
    cluster.server.await.unwrap().unwrap();
    assert_eq!(worker.await.unwrap().unwrap(), WorkerSummary::default());
}

#[tokio::test]
async fn test_bad_worker_count_is_rejected() {
    let mut cluster = start(ServerConfig::default()).await;
    cluster
        .manager
        .outbox
        .send(&ManagerToServer::AddWorkers { count: 0 })
        .await
        .unwrap();
    cluster
        .manager
        .outbox
        .send(&ManagerToServer::Terminate)
        .await
        .unwrap();

    assert_eq!(
        collect(&mut cluster.manager).await,
        vec![ServerToManager::Disconnect]
    );
    cluster.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_manager_loss_stops_server() {
    let cluster = start(ServerConfig::default()).await;
    let Cluster {
        mut manager,
        server,
        ..
    } = cluster;
    manager.outbox.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server kept running")
        .unwrap()
        .unwrap();
}
