//! Wheelly - session runner.
//!
//! Drives a session of interaction between the robot (real or simulated)
//! and an agent: the TD actor-critic learner or the scripted state
//! machine, as selected by the agent configuration.

mod config;
mod controller;
mod engines;
mod env;
mod error;
mod objectives;

use clap::error::ErrorKind;
use clap::Parser;
use config::{
    AgentConfig, ControllerConfig, EnvConfig, RobotConfig, AGENT_SCHEMA, CONTROLLER_SCHEMA,
    ENV_SCHEMA, ROBOT_SCHEMA,
};
use controller::{PendingCommand, RobotController};
use engines::StateMachineAgent;
use env::RobotEnv;
use error::{NavError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wheelly_rl::agent::SPEC_SCHEMA;
use wheelly_rl::kpi::{BinarySink, CsvSink, KpiFilter, KpiSink, KpiWriter};
use wheelly_rl::{AgentSpec, SeedRng, SignalSpec, TDAgent};

/// Default session duration (s): 12 hours.
const DEFAULT_DURATION: u64 = 43_200;

#[derive(Parser, Debug)]
#[command(name = "wheelly")]
#[command(version, about = "Run a session of interaction between robot and environment")]
struct Args {
    /// Robot yaml configuration file
    #[arg(short = 'r', long, default_value = "robot.yml")]
    robot: String,

    /// Controller yaml configuration file
    #[arg(short = 'c', long, default_value = "controller.yml")]
    controller: String,

    /// Environment yaml configuration file
    #[arg(short = 'e', long, default_value = "env.yml")]
    env: String,

    /// Agent yaml configuration file
    #[arg(short = 'a', long, default_value = "agent.yml")]
    agent: String,

    /// Kpis path (empty to disable)
    #[arg(short = 'k', long, default_value = "")]
    kpis: String,

    /// Kpi labels comma separated ("all" for all kpis)
    #[arg(short = 'l', long, default_value = "")]
    labels: String,

    /// Silent session (warnings only)
    #[arg(short = 's', long)]
    silent: bool,

    /// Session duration (s)
    #[arg(short = 't', long, default_value_t = DEFAULT_DURATION)]
    time: u64,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => std::process::exit(0),
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

fn run(args: &Args) -> Result<()> {
    log::info!("Wheelly v{}", env!("CARGO_PKG_VERSION"));

    let robot_config: RobotConfig = config::load_config(Path::new(&args.robot), ROBOT_SCHEMA)?;
    let controller_config: ControllerConfig =
        config::load_config(Path::new(&args.controller), CONTROLLER_SCHEMA)?;
    let env_config: EnvConfig = config::load_config(Path::new(&args.env), ENV_SCHEMA)?;
    let agent_config: AgentConfig = config::load_config(Path::new(&args.agent), AGENT_SCHEMA)?;

    let robot = robot_config.build()?;
    let controller = RobotController::new(robot, &controller_config);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        flag.store(true, Ordering::Release);
    })
    .map_err(|e| NavError::Config(format!("cannot set signal handler: {}", e)))?;

    let duration = Duration::from_secs(args.time);
    match agent_config {
        AgentConfig::Td { .. } => {
            let env = RobotEnv::new(controller, &env_config);
            run_learning_session(args, env, agent_config, shutdown, duration)
        }
        AgentConfig::StateMachine { entry, states } => {
            let agent = StateMachineAgent::create(&entry, &states)?;
            run_engine_session(
                controller,
                agent,
                env_config.reaction_interval,
                shutdown,
                duration,
            )
        }
    }
}

/// Builds the TD agent from its configuration, loading the saved model
/// when present.
fn build_td_agent(env: &RobotEnv, agent_config: AgentConfig) -> Result<TDAgent> {
    let AgentConfig::Td {
        model_path,
        seed,
        saving_interval_steps,
        reward_alpha,
        alphas,
        lambda,
        num_steps,
        num_epochs,
        batch_size,
        network,
        input_process,
    } = agent_config
    else {
        return Err(NavError::Config("not a td agent configuration".to_string()));
    };
    let model_path = PathBuf::from(model_path);
    if model_path.join("agent.yml").exists() {
        log::info!("loading agent from {:?}", model_path);
        let agent = TDAgent::load(&model_path, saving_interval_steps, SeedRng::new(seed))?;
        validate_specs(agent.spec().state.clone(), env.state_spec(), "state")?;
        validate_specs(agent.spec().actions.clone(), env.action_spec(), "actions")?;
        return Ok(agent);
    }
    log::info!("creating agent at {:?}", model_path);
    let spec = AgentSpec {
        schema: SPEC_SCHEMA.to_string(),
        state: env.state_spec().clone(),
        actions: env.action_spec().clone(),
        reward_alpha,
        alphas,
        lambda,
        num_steps,
        num_epochs,
        batch_size,
        network,
        input_process,
    };
    Ok(TDAgent::create(
        spec,
        None,
        SeedRng::new(seed),
        &model_path,
        saving_interval_steps,
    )?)
}

fn validate_specs(
    agent_spec: BTreeMap<String, SignalSpec>,
    env_spec: &BTreeMap<String, SignalSpec>,
    what: &str,
) -> Result<()> {
    if &agent_spec != env_spec {
        return Err(NavError::Config(format!(
            "saved agent {} spec does not match the environment",
            what
        )));
    }
    Ok(())
}

/// KPI filter: explicit labels, or the default training indicators.
fn kpi_filter(labels: &str, actions: &BTreeMap<String, SignalSpec>) -> Result<KpiFilter> {
    if !labels.is_empty() {
        return Ok(KpiFilter::parse(labels)?);
    }
    let mut patterns: Vec<String> = [
        "^avgReward$",
        "^delta$",
        "^counters$",
        "^trainingLayers\\.critic$",
        "^trainedLayers\\.critic$",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for action in actions.keys() {
        patterns.push(format!("^trainingLayers\\.{}$", action));
        patterns.push(format!("^grads\\.{}$", action));
        patterns.push(format!("^actionMasks\\.{}$", action));
    }
    let patterns: Vec<&str> = patterns.iter().map(String::as_str).collect();
    Ok(KpiFilter::from_patterns(&patterns)?)
}

fn run_learning_session(
    args: &Args,
    mut env: RobotEnv,
    agent_config: AgentConfig,
    shutdown: Arc<AtomicBool>,
    duration: Duration,
) -> Result<()> {
    let mut agent = build_td_agent(&env, agent_config)?;

    let mut kpi_writer = if args.kpis.is_empty() {
        None
    } else {
        let filter = kpi_filter(&args.labels, env.action_spec())?;
        let path = Path::new(&args.kpis);
        // A .bin path selects the compact binary container, a directory
        // the CSV sink
        let sink: Box<dyn KpiSink> = if path.extension().is_some_and(|e| e == "bin") {
            Box::new(BinarySink::create(path, filter)?)
        } else {
            Box::new(CsvSink::create(path, filter)?)
        };
        let writer = KpiWriter::spawn(vec![sink])?;
        agent.set_kpis(writer.sender());
        Some(writer)
    };

    let start = Instant::now();
    let mut obs = env.reset()?;
    let mut steps: u64 = 0;
    while !shutdown.load(Ordering::Acquire) && start.elapsed() < duration && !env.is_closed() {
        let actions = agent.act(&obs)?;
        let result = env.execute(&actions)?;
        obs = result.next_state.clone();
        agent.observe(result)?;
        steps += 1;
        if steps % 100 == 0 {
            log::info!(
                "step {}, robot time {} ms, avgReward {:.4}",
                steps,
                env.controller().status().simulation_time(),
                agent.avg_reward()
            );
        }
    }
    log::info!("session finished after {} steps", steps);

    env.shutdown();
    agent.autosave();
    if let Some(writer) = &mut kpi_writer {
        writer.join();
    }
    Ok(())
}

fn run_engine_session(
    mut controller: RobotController,
    mut agent: StateMachineAgent,
    reaction_interval: i64,
    shutdown: Arc<AtomicBool>,
    duration: Duration,
) -> Result<()> {
    controller.start()?;
    agent.init(controller.status().clone());

    let start = Instant::now();
    let mut sensor = 0;
    while !shutdown.load(Ordering::Acquire) && start.elapsed() < duration && !controller.is_closed()
    {
        let status = controller.read_status(reaction_interval)?;
        let commands = agent.step(status.clone(), controller.radar());
        if let Some(scan) = commands.scan {
            sensor = scan;
        }
        let (direction, speed) = commands.drive.unwrap_or((status.direction(), 0.0));
        controller.set_command(PendingCommand {
            halt: commands.halt,
            direction,
            speed,
            sensor,
        });
    }
    log::info!("engine session finished in state {:?}", agent.current_state());
    controller.shutdown();
    Ok(())
}
