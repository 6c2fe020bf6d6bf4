use std::num::NonZeroUsize;

use log::{debug, error, info};
use machine_learning::{
    dataset::{DataPointLoader, LineParser, PartitionedDataStore},
    gradient,
    optimization::WeightUpdater,
    weights::{Ownership, WeightVector},
};
use tokio::{io::AsyncWrite, task};

use crate::{Result, TrainErr, config::JobConfig, mesh::Mesh};

/// The stages every iteration goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    ParseOnce,
    Compute,
    Reduce,
    Update,
    Broadcast,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::ParseOnce => "parse_once",
            Stage::Compute => "compute",
            Stage::Reduce => "reduce",
            Stage::Update => "update",
            Stage::Broadcast => "broadcast",
            Stage::Done => "done",
        }
    }
}

/// Receives the iteration number and the weights right after each iteration.
pub type Reporter = Box<dyn FnMut(usize, &WeightVector) + Send>;

/// Drives a host through every iteration of the job.
pub struct IterationController<W: AsyncWrite + Unpin> {
    iterations: NonZeroUsize,
    partitions: NonZeroUsize,
    parser: LineParser,
    ownership: Ownership,
    updater: WeightUpdater,
    mesh: Mesh<W>,
    reporter: Option<Reporter>,
    stage: Stage,
}

impl<W: AsyncWrite + Unpin> IterationController<W> {
    /// Creates a new `IterationController`.
    ///
    /// # Arguments
    /// * `config` - The job to run.
    /// * `mesh` - The connections to the rest of the cluster.
    ///
    /// # Returns
    /// The controller, or a `Configuration` error if the job is invalid or the mesh
    /// doesn't match the job's cluster.
    pub fn new(config: &JobConfig, mesh: Mesh<W>) -> Result<Self> {
        config.validate()?;

        let ownership = config.ownership();
        let others = (0..ownership.hosts()).filter(|&id| id != ownership.host_id());
        if mesh.host_id() != ownership.host_id() || !mesh.peer_ids().eq(others) {
            return Err(TrainErr::configuration(format!(
                "mesh of host {} with {} hosts doesn't match host {} of {}",
                mesh.host_id(),
                mesh.hosts(),
                ownership.host_id(),
                ownership.hosts()
            )));
        }

        Ok(Self {
            iterations: config.iterations()?,
            partitions: config.partitions()?,
            parser: config.parser(),
            ownership,
            updater: WeightUpdater::new(ownership),
            mesh,
            reporter: None,
            stage: Stage::Init,
        })
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Trains until the last iteration and disconnects from the cluster.
    ///
    /// The dataset is read and parsed once, during the first iteration. Any failure
    /// aborts the whole job: the connections are dropped and the error is returned.
    ///
    /// # Arguments
    /// * `loader` - The source of this host's records.
    /// * `weights` - The initial weights, identical on every host.
    ///
    /// # Returns
    /// The final weights.
    ///
    /// # Panics
    /// If not called from tokio's multi-thread runtime, parsing and gradient
    /// computation use `task::block_in_place`.
    pub async fn run<L>(mut self, loader: &mut L, weights: WeightVector) -> Result<WeightVector>
    where
        L: DataPointLoader + ?Sized,
    {
        let weights = match self.train(loader, weights).await {
            Ok(weights) => weights,
            Err(e) => {
                error!(stage = self.stage.as_str(); "aborting job: {e}");
                self.mesh.abort();
                return Err(e);
            }
        };

        self.mesh.shutdown().await?;
        self.enter(Stage::Done, self.iterations.get());

        Ok(weights)
    }

    async fn train<L>(&mut self, loader: &mut L, mut weights: WeightVector) -> Result<WeightVector>
    where
        L: DataPointLoader + ?Sized,
    {
        if weights.len() != self.parser.dimensions() {
            return Err(TrainErr::configuration(format!(
                "{} initial weights for {} dimensions",
                weights.len(),
                self.parser.dimensions()
            )));
        }

        // Part of the first iteration, every later one reuses the store.
        self.enter(Stage::ParseOnce, 1);
        let (parser, partitions) = (&self.parser, self.partitions);
        let store =
            task::block_in_place(|| PartitionedDataStore::build(loader, parser, partitions))?;

        for iteration in 1..=self.iterations.get() {
            self.enter(Stage::Compute, iteration);
            let mut aggregate =
                task::block_in_place(|| gradient::reduce_store(&store, &weights))?;

            self.enter(Stage::Reduce, iteration);
            self.mesh
                .exchange(self.ownership)
                .exchange(iteration, &mut aggregate)
                .await?;

            self.enter(Stage::Update, iteration);
            let updates = self.updater.apply(&mut weights, &aggregate)?;

            self.enter(Stage::Broadcast, iteration);
            self.mesh.broadcaster().broadcast(iteration, &updates).await?;
            self.mesh
                .receiver(self.ownership)
                .receive(iteration, &mut weights)
                .await?;

            info!(iteration = iteration; "weights: {:?}", weights.to_vec());
            if let Some(reporter) = self.reporter.as_mut() {
                reporter(iteration, &weights);
            }
        }

        Ok(weights)
    }

    fn enter(&mut self, stage: Stage, iteration: usize) {
        self.stage = stage;
        debug!(
            host_id = self.ownership.host_id(),
            iteration = iteration,
            stage = stage.as_str();
            "entering stage"
        );
    }
}
