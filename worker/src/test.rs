use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use comms::WeightUpdate;
use futures::future;
use machine_learning::{
    dataset::{DataPointLoader, MemoryLoader, Record},
    initialization,
    weights::{Ownership, WeightVector},
};
use tokio::{
    io::{DuplexStream, ReadHalf, WriteHalf},
    net::TcpListener,
};

use crate::{IterationController, JobConfig, Mesh, Result, TrainErr};

const DUPLEX_BUF_SIZE: usize = 1 << 16;

type DuplexMesh = Mesh<WriteHalf<DuplexStream>>;

type DuplexLink = (
    usize,
    comms::OnoReceiver<ReadHalf<DuplexStream>>,
    comms::OnoSender<WriteHalf<DuplexStream>>,
);

fn link(peer: usize, stream: DuplexStream) -> DuplexLink {
    let (rx, tx) = tokio::io::split(stream);
    let (rx, tx) = comms::channel(rx, tx);
    (peer, rx, tx)
}

/// Connects `hosts` in-memory hosts with each other.
fn meshes(hosts: usize) -> Vec<DuplexMesh> {
    let mut links: Vec<Vec<DuplexLink>> = (0..hosts).map(|_| Vec::new()).collect();

    for i in 0..hosts {
        for j in i + 1..hosts {
            let (a, b) = tokio::io::duplex(DUPLEX_BUF_SIZE);
            links[i].push(link(j, a));
            links[j].push(link(i, b));
        }
    }

    links
        .into_iter()
        .enumerate()
        .map(|(id, links)| Mesh::new(id, links).unwrap())
        .collect()
}

fn addrs(n: usize) -> Vec<SocketAddr> {
    (0..n)
        .map(|i| SocketAddr::from(([127, 0, 0, 1], 9000 + i as u16)))
        .collect()
}

fn job(hosts: usize, host_id: usize, iterations: usize, initial: &[f64]) -> JobConfig {
    JobConfig {
        inputs: vec!["memory".into()],
        partitions: 2,
        iterations,
        dimensions: initial.len(),
        hosts: if hosts > 1 { addrs(hosts) } else { Vec::new() },
        host_id,
        initial_weights: Some(initial.to_vec()),
        ..Default::default()
    }
}

fn dataset(n: usize) -> Vec<String> {
    (0..n)
        .map(|k| {
            let k = k as f64;
            let label = if (k as usize) % 3 == 0 { -1 } else { 1 };
            format!(
                "{:.3},{:.3},{:.3},{:.3},{label}",
                (k * 0.7).sin(),
                (k * 1.3).cos(),
                k / 10.,
                1. - k / 20.
            )
        })
        .collect()
}

async fn train_local(
    lines: Vec<String>,
    iterations: usize,
    initial: &[f64],
) -> Result<WeightVector> {
    let config = job(1, 0, iterations, initial);
    let mut loader = MemoryLoader::new(lines);

    IterationController::new(&config, Mesh::local())?
        .run(&mut loader, WeightVector::new(initial.to_vec()))
        .await
}

async fn train_cluster(
    shares: Vec<Vec<String>>,
    iterations: usize,
    initial: &[f64],
) -> Vec<Result<WeightVector>> {
    let hosts = shares.len();
    let runs = meshes(hosts)
        .into_iter()
        .zip(shares)
        .enumerate()
        .map(|(host_id, (mesh, lines))| async move {
            let config = job(hosts, host_id, iterations, initial);
            let mut loader = MemoryLoader::new(lines);

            IterationController::new(&config, mesh)?
                .run(&mut loader, WeightVector::new(initial.to_vec()))
                .await
        });

    future::join_all(runs).await
}

/// Counts how many times the dataset is read.
struct CountingLoader {
    inner: MemoryLoader,
    reads: Arc<Mutex<usize>>,
}

impl DataPointLoader for CountingLoader {
    fn records(&mut self) -> Box<dyn Iterator<Item = io::Result<Record>> + '_> {
        *self.reads.lock().unwrap() += 1;
        self.inner.records()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn single_host_single_iteration_is_exact() {
    let lines = vec!["1.0,2.0,0.5,1.0,1".to_string(), "0.5,1.5,1.0,0.5,-1".to_string()];
    let mut config = job(1, 0, 1, &[0.; 4]);
    config.partitions = 1;

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);

    let weights = IterationController::new(&config, Mesh::local())
        .unwrap()
        .with_reporter(Box::new(move |iteration: usize, weights: &WeightVector| {
            sink.lock().unwrap().push((iteration, weights.to_vec()));
        }))
        .run(&mut MemoryLoader::new(lines), WeightVector::zeros(4))
        .await
        .unwrap();

    assert_eq!(weights.to_vec(), [0.25, 0.25, -0.25, 0.25]);
    assert_eq!(
        *reports.lock().unwrap(),
        [(1, vec![0.25, 0.25, -0.25, 0.25])]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn dataset_is_parsed_once() {
    let reads = Arc::new(Mutex::new(0));
    let mut loader = CountingLoader {
        inner: MemoryLoader::new(dataset(10)),
        reads: Arc::clone(&reads),
    };

    let initial = [0.1, -0.2, 0.3, 0.];
    let config = job(1, 0, 5, &initial);
    let iterations = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&iterations);

    IterationController::new(&config, Mesh::local())
        .unwrap()
        .with_reporter(Box::new(move |iteration: usize, _: &WeightVector| {
            sink.lock().unwrap().push(iteration);
        }))
        .run(&mut loader, WeightVector::new(initial.to_vec()))
        .await
        .unwrap();

    assert_eq!(*reads.lock().unwrap(), 1);
    assert_eq!(*iterations.lock().unwrap(), [1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn cluster_converges_like_a_single_host() {
    const HOSTS: usize = 3;
    const ITERATIONS: usize = 4;

    let lines = dataset(17);
    let initial = initialization::seeded_uniform(initialization::DEFAULT_SEED, 4)
        .unwrap()
        .to_vec();

    let mut shares = vec![Vec::new(); HOSTS];
    for (i, line) in lines.iter().enumerate() {
        shares[i % HOSTS].push(line.clone());
    }

    let expected = train_local(lines, ITERATIONS, &initial).await.unwrap();
    let replicas: Vec<_> = train_cluster(shares, ITERATIONS, &initial)
        .await
        .into_iter()
        .map(|res| res.unwrap())
        .collect();

    for replica in &replicas {
        assert_eq!(replica, &replicas[0]);
    }

    for (a, b) in replicas[0].view().iter().zip(expected.view()) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn hosts_without_samples_still_take_part() {
    let initial = [0.; 4];
    let lines = vec!["1.0,2.0,0.5,1.0,1".to_string(), "0.5,1.5,1.0,0.5,-1".to_string()];
    let shares = vec![lines, Vec::new()];

    for replica in train_cluster(shares, 1, &initial).await {
        assert_eq!(replica.unwrap().to_vec(), [0.25, 0.25, -0.25, 0.25]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_reaches_every_peer_but_the_sender() {
    const HOSTS: usize = 3;
    let hosts = std::num::NonZeroUsize::new(HOSTS).unwrap();
    let mut meshes = meshes(HOSTS);

    let updates = [WeightUpdate::new(0, 1.5), WeightUpdate::new(3, -2.)];
    let mut sent = Vec::new();
    for (id, mesh) in meshes.iter_mut().enumerate() {
        let own: &[WeightUpdate] = if id == 0 { &updates } else { &[] };
        sent.push(mesh.broadcaster().broadcast(1, own).await.unwrap());
    }
    assert_eq!(sent, [4, 0, 0]);

    let mut replicas = Vec::new();
    for (id, mesh) in meshes.iter_mut().enumerate() {
        let mut weights = WeightVector::zeros(4);
        let applied = mesh
            .receiver(Ownership::new(id, hosts))
            .receive(1, &mut weights)
            .await
            .unwrap();
        replicas.push((applied, weights.to_vec()));
    }

    assert_eq!(replicas[0], (0, vec![0.; 4]));
    assert_eq!(replicas[1], (2, vec![1.5, 0., 0., -2.]));
    assert_eq!(replicas[2], (2, vec![1.5, 0., 0., -2.]));
}

#[tokio::test(flavor = "multi_thread")]
async fn updates_for_owned_weights_are_ignored() {
    let hosts = std::num::NonZeroUsize::new(2).unwrap();
    let mut meshes = meshes(2);

    meshes[1]
        .broadcaster()
        .broadcast(1, &[WeightUpdate::new(0, 9.), WeightUpdate::new(1, 7.)])
        .await
        .unwrap();

    let mut weights = WeightVector::new(vec![0.5, 0.]);
    let applied = meshes[0]
        .receiver(Ownership::new(0, hosts))
        .receive(1, &mut weights)
        .await
        .unwrap();

    assert_eq!(applied, 1);
    assert_eq!(weights.to_vec(), [0.5, 7.]);
}

#[tokio::test(flavor = "multi_thread")]
async fn mesh_rejects_self_and_duplicate_links() {
    let (a, b) = tokio::io::duplex(DUPLEX_BUF_SIZE);
    let res = Mesh::new(0, vec![link(0, a)]);
    assert!(matches!(res, Err(TrainErr::Configuration(_))));

    let (c, _d) = tokio::io::duplex(DUPLEX_BUF_SIZE);
    let res = Mesh::new(0, vec![link(1, b), link(1, c)]);
    assert!(matches!(res, Err(TrainErr::Configuration(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn mesh_must_match_the_job() {
    let config = job(2, 0, 1, &[0.; 4]);
    let res = IterationController::new(&config, Mesh::local());
    assert!(matches!(res, Err(TrainErr::Configuration(_))));

    let (a, _b) = tokio::io::duplex(DUPLEX_BUF_SIZE);
    let stranger = Mesh::new(0, vec![link(2, a)]).unwrap();
    let res = IterationController::new(&config, stranger);
    assert!(matches!(res, Err(TrainErr::Configuration(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn every_host_sees_the_others_as_peers() {
    let meshes = meshes(3);

    for (id, mesh) in meshes.iter().enumerate() {
        let expected: Vec<_> = (0..3).filter(|&peer| peer != id).collect();
        assert_eq!(mesh.host_id(), id);
        assert_eq!(mesh.hosts(), 3);
        assert_eq!(mesh.peer_ids().collect::<Vec<_>>(), expected);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_record_aborts_the_job() {
    let lines = vec!["1.0,2.0,0.5,1.0,1".to_string(), "1.0,x,0.5,1.0,1".to_string()];
    let err = train_local(lines, 3, &[0.; 4]).await.unwrap_err();

    assert!(matches!(err, TrainErr::MalformedRecord { key: 1, .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_host_aborts_its_peers() {
    let shares = vec![vec!["not,a,record".to_string()], dataset(4)];
    let results = train_cluster(shares, 2, &[0.; 4]).await;

    assert!(matches!(results[0], Err(TrainErr::MalformedRecord { key: 0, .. })));
    assert!(matches!(
        results[1],
        Err(TrainErr::PartitionUnavailable { host: 0, .. })
            | Err(TrainErr::BroadcastDelivery { host: 0, .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn vanished_peer_aborts_the_reduce() {
    let mut meshes = meshes(2);
    meshes[1].abort();
    let mesh = meshes.swap_remove(0);

    let config = job(2, 0, 1, &[0.; 4]);
    let err = IterationController::new(&config, mesh)
        .unwrap()
        .run(&mut MemoryLoader::new(dataset(4)), WeightVector::zeros(4))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TrainErr::PartitionUnavailable { host: 1, .. } | TrainErr::BroadcastDelivery { host: 1, .. }
    ));
}

async fn free_addrs(n: usize) -> Vec<SocketAddr> {
    let mut listeners = Vec::with_capacity(n);
    for _ in 0..n {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }

    listeners
        .iter()
        .map(|listener| listener.local_addr().unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn tcp_cluster_trains() {
    let hosts = free_addrs(2).await;
    let initial = [0.2, -0.1, 0.05, 0.3];
    let lines = dataset(9);

    let runs = (0..hosts.len()).map(|host_id| {
        let hosts = hosts.clone();
        let share: Vec<String> = lines.iter().skip(host_id).step_by(2).cloned().collect();

        async move {
            let config = JobConfig {
                hosts: hosts.clone(),
                ..job(2, host_id, 3, &initial)
            };
            let mesh = Mesh::connect(host_id, &hosts).await?;

            IterationController::new(&config, mesh)?
                .run(&mut MemoryLoader::new(share), WeightVector::new(initial.to_vec()))
                .await
        }
    });

    let replicas = future::try_join_all(runs).await.unwrap();
    let expected = train_local(lines, 3, &initial).await.unwrap();

    assert_eq!(replicas[0], replicas[1]);
    for (a, b) in replicas[0].view().iter().zip(expected.view()) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }
}
