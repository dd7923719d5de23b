//! Offline batch trainer.
//!
//! Replays a recorded dataset through the TD training algorithm without
//! driving a robot. The dataset is a property map file with keys
//! `states.<signal>` (n + 1 rows), `masks.<action>` (n rows) and
//! `rewards` (n rows).

use clap::Parser;
use ndarray::Ix2;
use std::collections::BTreeMap;
use std::path::Path;
use wheelly_rl::{store, SeedRng, Signals, TDAgent};

#[derive(Parser, Debug)]
#[command(name = "wheelly-batch")]
#[command(version, about = "Train an agent from a recorded dataset")]
struct Args {
    /// Agent model directory
    #[arg(short = 'a', long, default_value = "models/default")]
    agent: String,

    /// Dataset file
    #[arg(short = 'd', long)]
    dataset: String,

    /// Number of passes over the dataset
    #[arg(short = 'p', long, default_value_t = 1)]
    passes: usize,

    /// Random seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Silent run (warnings only)
    #[arg(short = 's', long)]
    silent: bool,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    std::process::exit(0)
                }
                _ => std::process::exit(1),
            }
        }
    };
    let filter = if args.silent { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(2);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut agent = TDAgent::load(
        Path::new(&args.agent),
        usize::MAX,
        SeedRng::new(args.seed),
    )?;

    let props = store::load_props(Path::new(&args.dataset))?;
    let mut states = Signals::new();
    let mut masks = BTreeMap::new();
    let mut rewards = None;
    for (name, array) in props {
        let array = array
            .into_dimensionality::<Ix2>()
            .map_err(|e| format!("{}: {}", name, e))?;
        if let Some(key) = name.strip_prefix("states.") {
            states.insert(key.to_string(), array);
        } else if let Some(key) = name.strip_prefix("masks.") {
            masks.insert(key.to_string(), array);
        } else if name == "rewards" {
            rewards = Some(array);
        } else {
            log::warn!("ignoring dataset entry {:?}", name);
        }
    }
    let rewards = rewards.ok_or("dataset has no rewards")?;
    let n = rewards.nrows();
    if n == 0 {
        return Err("dataset is empty".into());
    }
    for (name, value) in &states {
        if value.nrows() != n + 1 {
            return Err(format!(
                "states.{} has {} rows, expected {}",
                name,
                value.nrows(),
                n + 1
            )
            .into());
        }
    }
    for (name, value) in &masks {
        if value.nrows() != n {
            return Err(
                format!("masks.{} has {} rows, expected {}", name, value.nrows(), n).into(),
            );
        }
    }

    log::info!(
        "training over {} steps, {} passes, avgReward {:.4}",
        n,
        args.passes,
        agent.avg_reward()
    );
    for pass in 0..args.passes {
        agent.train_batch(&states, &masks, &rewards)?;
        log::info!(
            "pass {}/{}, avgReward {:.4}",
            pass + 1,
            args.passes,
            agent.avg_reward()
        );
    }
    agent.save()?;
    Ok(())
}
