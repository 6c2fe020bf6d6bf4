use std::{
    collections::HashSet,
    env, fs,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use machine_learning::{
    dataset::{FileLoader, LineParser, Stride},
    initialization::{self, DEFAULT_SEED},
    weights::{Ownership, WeightVector},
};
use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr};

/// Overrides `host_id`, so every host of a cluster can share the same file.
const HOST_ID_KEY: &str = "HOST_ID";

/// The description of a training job, shared by every host of the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Files or directories with one record per line.
    pub inputs: Vec<PathBuf>,
    pub partitions: usize,
    pub iterations: usize,
    pub dimensions: usize,
    pub delimiter: char,
    /// Seeds the initial weights, identical on every host.
    pub seed: u64,
    /// The address of every host, indexed by host id. Empty means a single host.
    pub hosts: Vec<SocketAddr>,
    pub host_id: usize,
    /// Replaces the random initial weights.
    pub initial_weights: Option<Vec<f64>>,
    /// Whether every host reads the same inputs and keeps only its own share of them.
    pub shard_inputs: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            partitions: 2,
            iterations: 1,
            dimensions: 4,
            delimiter: ',',
            seed: DEFAULT_SEED,
            hosts: Vec::new(),
            host_id: 0,
            initial_weights: None,
            shard_inputs: false,
        }
    }
}

impl JobConfig {
    /// Reads and validates a job from a json file, applying the environment overrides.
    ///
    /// # Arguments
    /// * `path` - The path to the json file.
    ///
    /// # Returns
    /// The validated config or the reason it was rejected.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)
            .map_err(|e| TrainErr::configuration(format!("malformed job file: {e}")))?;

        if let Ok(host_id) = env::var(HOST_ID_KEY) {
            config.host_id = host_id
                .parse()
                .map_err(|e| TrainErr::configuration(format!("{HOST_ID_KEY}: {e}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks every constraint the training loop relies on.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(TrainErr::configuration("no inputs were given"));
        }

        self.partitions()?;
        self.iterations()?;

        if self.dimensions == 0 {
            return Err(TrainErr::configuration("dimensions must be positive"));
        }

        let hosts = self.hosts.len().max(1);
        if self.host_id >= hosts {
            return Err(TrainErr::configuration(format!(
                "host id {} out of range for {hosts} hosts",
                self.host_id
            )));
        }

        let mut seen = HashSet::new();
        if let Some(addr) = self.hosts.iter().find(|addr| !seen.insert(*addr)) {
            return Err(TrainErr::configuration(format!("duplicate host {addr}")));
        }

        if let Some(weights) = &self.initial_weights
            && weights.len() != self.dimensions
        {
            return Err(TrainErr::configuration(format!(
                "{} initial weights given for {} dimensions",
                weights.len(),
                self.dimensions
            )));
        }

        Ok(())
    }

    pub fn partitions(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.partitions)
            .ok_or_else(|| TrainErr::configuration("partitions must be positive"))
    }

    pub fn iterations(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.iterations)
            .ok_or_else(|| TrainErr::configuration("iterations must be positive"))
    }

    /// Whether the job runs on a single host without any networking.
    pub fn is_local(&self) -> bool {
        self.hosts.len() <= 1
    }

    pub fn parser(&self) -> LineParser {
        LineParser::new(self.dimensions, self.delimiter)
    }

    /// # Panics
    /// If the config wasn't validated.
    pub fn ownership(&self) -> Ownership {
        let hosts = NonZeroUsize::new(self.hosts.len()).unwrap_or(NonZeroUsize::MIN);
        Ownership::new(self.host_id, hosts)
    }

    /// The weights every host starts from.
    pub fn initial_weights(&self) -> Result<WeightVector> {
        match &self.initial_weights {
            Some(weights) => Ok(WeightVector::new(weights.clone())),
            None => Ok(initialization::seeded_uniform(self.seed, self.dimensions)?),
        }
    }

    /// Opens the inputs, striding them over the cluster when `shard_inputs` is set.
    pub fn loader(&self) -> Result<FileLoader> {
        let loader = FileLoader::new(&self.inputs)?;

        if !self.shard_inputs {
            return Ok(loader);
        }

        let ownership = self.ownership();
        let hosts = NonZeroUsize::new(ownership.hosts()).unwrap_or(NonZeroUsize::MIN);
        Ok(loader.with_stride(Stride::new(ownership.host_id(), hosts)))
    }
}

#[cfg(test)]
mod tests {
    use std::process;

    use machine_learning::dataset::PartitionedDataStore;

    use super::*;

    fn config() -> JobConfig {
        JobConfig {
            inputs: vec!["data.csv".into()],
            ..Default::default()
        }
    }

    fn addrs(n: u16) -> Vec<SocketAddr> {
        (0..n)
            .map(|i| SocketAddr::from(([127, 0, 0, 1], 7000 + i)))
            .collect()
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config: JobConfig = serde_json::from_str(r#"{ "inputs": ["a.csv"] }"#).unwrap();

        assert_eq!(config.partitions, 2);
        assert_eq!(config.iterations, 1);
        assert_eq!(config.dimensions, 4);
        assert_eq!(config.delimiter, ',');
        assert_eq!(config.seed, DEFAULT_SEED);
        assert!(config.is_local());
        config.validate().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res = serde_json::from_str::<JobConfig>(r#"{ "inputs": [], "epochs": 3 }"#);
        assert!(res.is_err());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        for config in [
            JobConfig {
                partitions: 0,
                ..config()
            },
            JobConfig {
                iterations: 0,
                ..config()
            },
            JobConfig {
                dimensions: 0,
                ..config()
            },
            JobConfig {
                inputs: Vec::new(),
                ..config()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(TrainErr::Configuration(_))
            ));
        }
    }

    #[test]
    fn cluster_layout_is_checked() {
        let out_of_range = JobConfig {
            hosts: addrs(2),
            host_id: 2,
            ..config()
        };
        assert!(out_of_range.validate().is_err());

        let mut hosts = addrs(2);
        hosts.push(hosts[0]);
        let duplicated = JobConfig {
            hosts,
            ..config()
        };
        assert!(duplicated.validate().is_err());

        let valid = JobConfig {
            hosts: addrs(3),
            host_id: 2,
            ..config()
        };
        valid.validate().unwrap();
        assert_eq!(valid.ownership().hosts(), 3);
        assert!(!valid.is_local());
    }

    #[test]
    fn initial_weights_must_match_dimensions() {
        let config = JobConfig {
            initial_weights: Some(vec![0.; 3]),
            ..config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn initial_weights_override_the_seed() {
        let fixed = JobConfig {
            initial_weights: Some(vec![0.; 4]),
            ..config()
        };
        assert_eq!(fixed.initial_weights().unwrap().to_vec(), [0.; 4]);

        let a = config().initial_weights().unwrap();
        let b = config().initial_weights().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sharded_hosts_fill_every_partition() {
        let dir = env::temp_dir().join(format!("config-shards-{}", process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let path = dir.join("data.csv");
        let lines: Vec<_> = (0..40).map(|i| format!("{i},1,0,0,1")).collect();
        fs::write(&path, lines.join("\n")).unwrap();

        for host_id in 0..2 {
            let config = JobConfig {
                inputs: vec![path.clone()],
                hosts: addrs(2),
                host_id,
                shard_inputs: true,
                ..Default::default()
            };

            let mut loader = config.loader().unwrap();
            let partitions = config.partitions().unwrap();
            let store =
                PartitionedDataStore::build(&mut loader, &config.parser(), partitions).unwrap();

            assert_eq!(store.num_partitions(), 2);
            assert_eq!(store.partition(0).len(), 10);
            assert_eq!(store.partition(1).len(), 10);
            assert!(store.partitions().iter().flatten().all(|s| s.key() % 2 == host_id as u64));
        }

        fs::remove_dir_all(dir).unwrap();
    }
}
