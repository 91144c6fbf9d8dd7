//! Channels over real TCP connections.

use std::time::Duration;

use satfarm_protocol::channel;
use satfarm_protocol::{
    JobBatch, ManagerToServer, Rendezvous, ServerToManager, ServerToWorker, TaskFile,
    WorkerToServer, DEFAULT_PAYLOAD_CAPACITY,
};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_worker_link_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let worker = tokio::spawn(async move {
        let mut link = channel::connect::<ServerToWorker, WorkerToServer>(&addr)
            .await
            .unwrap();
        link.outbox
            .send(&WorkerToServer::GetInstances { requested: 64 })
            .await
            .unwrap();
        let grant = link.inbox.recv().await.unwrap().unwrap();
        link.outbox.send(&WorkerToServer::Disconnect).await.unwrap();
        assert_eq!(link.inbox.recv().await.unwrap(), None);
        (grant, link.inbox.capacity())
    });

    let (stream, _) = listener.accept().await.unwrap();
    let mut server = channel::accept::<WorkerToServer, ServerToWorker>(stream)
        .await
        .unwrap();
    assert_eq!(
        server.inbox.recv().await.unwrap(),
        Some(WorkerToServer::GetInstances { requested: 64 })
    );
    let batches: Vec<_> = (0..64)
        .map(|i| JobBatch {
            file: TaskFile {
                start_configs: 64,
                max_flips: 1000,
                filename: format!("/bench/uf250/uf250-{i:04}.cnf"),
            },
            instances: 1,
            task_id: i,
        })
        .collect();
    let grant = ServerToWorker::SendInstances(batches);
    server.outbox.send(&grant).await.unwrap();
    assert_eq!(
        server.inbox.recv().await.unwrap(),
        Some(WorkerToServer::Disconnect)
    );
    server.outbox.close().await.unwrap();

    let (received, capacity) = worker.await.unwrap();
    assert_eq!(received, grant);
    assert!(capacity > DEFAULT_PAYLOAD_CAPACITY);
}

#[tokio::test]
async fn test_manager_link_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        let mut link = channel::connect::<ManagerToServer, ServerToManager>(&addr)
            .await
            .unwrap();
        let msg = link.inbox.recv().await.unwrap();
        link.outbox.send(&ServerToManager::Disconnect).await.unwrap();
        link.outbox.close().await.unwrap();
        msg
    });

    let (stream, _) = listener.accept().await.unwrap();
    let mut manager = channel::accept::<ServerToManager, ManagerToServer>(stream)
        .await
        .unwrap();
    manager
        .outbox
        .send(&ManagerToServer::AddWorkers { count: 3 })
        .await
        .unwrap();
    assert_eq!(
        manager.inbox.recv().await.unwrap(),
        Some(ServerToManager::Disconnect)
    );
    assert_eq!(manager.inbox.recv().await.unwrap(), None);
    assert_eq!(
        server.await.unwrap(),
        Some(ManagerToServer::AddWorkers { count: 3 })
    );
}

#[tokio::test]
async fn test_published_address_is_connectable() {
    let dir = std::env::temp_dir().join(format!(
        "satfarm-loopback-{}",
        satfarm_base::utils::fresh_seed()
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let rendezvous = Rendezvous::new(&dir, "loopback").unwrap();
    rendezvous
        .publish(&listener.local_addr().unwrap().to_string())
        .await
        .unwrap();

    let addr = rendezvous.lookup(Duration::from_secs(5)).await.unwrap();
    let connecting = tokio::spawn(async move {
        channel::connect::<ServerToWorker, WorkerToServer>(&addr).await
    });
    let (stream, _) = listener.accept().await.unwrap();
    channel::accept::<WorkerToServer, ServerToWorker>(stream)
        .await
        .unwrap();
    assert!(connecting.await.unwrap().is_ok());

    rendezvous.unpublish().await.unwrap();
    let _ = std::fs::remove_dir_all(dir);
}
