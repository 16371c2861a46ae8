// Training commands

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use rlx_agent::AlgorithmRegistry;
use rlx_core::{PPOConfig, UpdateStats};
use rlx_env::EnvRegistry;

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Algorithm name
    #[arg(short, long, default_value = "ppo")]
    pub algorithm: String,

    /// Environment name
    #[arg(short, long, default_value = "pendulum")]
    pub env: String,

    /// JSON config file; missing fields take their defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the timestep budget
    #[arg(long)]
    pub total_timesteps: Option<u64>,

    /// Override the number of parallel environments
    #[arg(long)]
    pub nr_envs: Option<usize>,

    /// Override the seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the episode length limit
    #[arg(long)]
    pub max_episode_steps: Option<usize>,

    /// Print every update as a JSON line instead of a table row
    #[arg(long)]
    pub json: bool,
}

fn load_config(args: &TrainArgs) -> Result<PPOConfig> {
    let mut config = match &args.config {
        Some(path) => PPOConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PPOConfig::default(),
    };
    if let Some(total_timesteps) = args.total_timesteps {
        config.total_timesteps = total_timesteps;
    }
    if let Some(nr_envs) = args.nr_envs {
        config.nr_envs = nr_envs;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.validate().context("invalid training config")?;
    Ok(config)
}

fn print_update(stats: &UpdateStats, as_json: bool) {
    if as_json {
        println!("{}", json!(stats));
        return;
    }
    let episode_return = stats
        .mean_episode_return
        .map_or_else(|| "-".to_string(), |r| format!("{r:.2}"));
    println!(
        "{:>10} {:>10.4} {:>10.4} {:>8.4} {:>8.5} {:>6.3} {:>6} {:>8.3} {:>10}",
        stats.global_step,
        stats.diagnostics.pg_loss,
        stats.diagnostics.v_loss,
        stats.diagnostics.entropy_loss,
        stats.last_epoch_kl,
        stats.diagnostics.clip_fraction,
        stats.epochs,
        stats.explained_variance,
        episode_return,
    );
}

/// Build everything through the registries and train until done or Ctrl-C
pub async fn train(args: TrainArgs) -> Result<()> {
    let config = load_config(&args)?;

    let envs = EnvRegistry::with_defaults();
    let mut env_config = envs
        .default_config(&args.env)
        .with_context(|| format!("unknown environment '{}'", args.env))?;
    env_config.seed = config.seed;
    if let Some(limit) = args.max_episode_steps {
        env_config.max_episode_steps = Some(limit);
    }
    let env = envs
        .make(&env_config, config.nr_envs)
        .context("failed to create environment")?;

    let mut algorithm = AlgorithmRegistry::with_defaults()
        .make(&args.algorithm, config.clone(), Box::new(env))
        .with_context(|| format!("failed to create algorithm '{}'", args.algorithm))?;

    println!("🤖 Training {} on {}", args.algorithm, args.env);
    println!("   Timesteps: {}", config.total_timesteps);
    println!("   Environments: {}", config.nr_envs);
    println!("   Updates: {}", config.nr_updates());
    if !args.json {
        println!(
            "\n{:>10} {:>10} {:>10} {:>8} {:>8} {:>6} {:>6} {:>8} {:>10}",
            "step", "pg_loss", "v_loss", "entropy", "kl", "clip", "epochs", "expl_var", "return"
        );
    }

    let stop = algorithm.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing the current update");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let as_json = args.json;
    let (algorithm, completed) = tokio::task::spawn_blocking(move || {
        let completed = algorithm.train(&mut |stats| print_update(stats, as_json));
        (algorithm, completed)
    })
    .await
    .context("training task panicked")?;
    let completed = completed.context("training failed")?;

    println!(
        "\n✅ Finished {completed} updates, {} environment steps",
        algorithm.global_step()
    );
    Ok(())
}

/// Print the registered algorithms and environments
pub fn list() -> Result<()> {
    println!("Algorithms:");
    for name in AlgorithmRegistry::with_defaults().list() {
        println!("   {name}");
    }
    println!("Environments:");
    for name in EnvRegistry::with_defaults().list() {
        println!("   {name}");
    }
    Ok(())
}

/// Print the default training config and the environment's default config
pub fn default_config(env: &str) -> Result<()> {
    let env_config = EnvRegistry::with_defaults()
        .default_config(env)
        .with_context(|| format!("unknown environment '{env}'"))?;
    let out = json!({
        "training": PPOConfig::default(),
        "environment": env_config,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
