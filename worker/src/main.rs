use std::{env, time::Instant};

use anyhow::{Context, bail};
use log::info;
use machine_learning::{dataset::FileLoader, weights::WeightVector};
use tokio::{io::AsyncWrite, signal};

use worker::{IterationController, JobConfig, Mesh};

fn print_weights(weights: &WeightVector) {
    println!("w: {:?}", weights.to_vec());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let Some(path) = env::args().nth(1) else {
        bail!("usage: worker <job.json>");
    };

    let config = JobConfig::load(&path).with_context(|| format!("loading job {path}"))?;
    let mut loader = config.loader().context("opening the inputs")?;
    let weights = config.initial_weights()?;

    println!("Initial w:");
    print_weights(&weights);

    let start = Instant::now();

    let train = async {
        if config.is_local() {
            run_job(&config, Mesh::local(), &mut loader, weights).await
        } else {
            let mesh = Mesh::connect(config.host_id, &config.hosts).await?;
            run_job(&config, mesh, &mut loader, weights).await
        }
    };

    tokio::select! {
        ret = train => {
            let weights = ret.context("training aborted")?;
            info!(dimensions = weights.len(); "training finished");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
            return Ok(());
        }
    }

    println!("time: {}ns", start.elapsed().as_nanos());
    Ok(())
}

async fn run_job<W>(
    config: &JobConfig,
    mesh: Mesh<W>,
    loader: &mut FileLoader,
    weights: WeightVector,
) -> worker::Result<WeightVector>
where
    W: AsyncWrite + Unpin,
{
    IterationController::new(config, mesh)?
        .with_reporter(Box::new(report))
        .run(loader, weights)
        .await
}

fn report(iteration: usize, weights: &WeightVector) {
    println!("On iteration {iteration}");
    print_weights(weights);
}
