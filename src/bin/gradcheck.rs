//! Gradient Check Runner
//!
//! Builds a double-precision network, feeds it a random batch, and compares
//! every analytic gradient against centered finite differences.
//!
//! ## Usage
//!
//! ```bash
//! # Two hidden layers with batch norm and dropout
//! cargo run --release --bin fcnet-gradcheck -- \
//!   --hidden 20,30 --normalization batchnorm --keep 0.5 --reg 0.7
//!
//! # Network described by a JSON config
//! cargo run --release --bin fcnet-gradcheck -- --config net.json
//! ```
//!
//! Set `RUST_LOG=debug` to see per-call loss logging.

use clap::{Parser, ValueEnum};
use fcnet::gradcheck::check_gradients;
use fcnet::{FullyConnectedNet, NetConfig, Normalization, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fcnet-gradcheck")]
#[command(about = "Check fully-connected network gradients against finite differences", long_about = None)]
struct Args {
    /// JSON network config; overrides the architecture flags below
    #[arg(long)]
    config: Option<String>,

    /// Comma-separated hidden layer widths
    #[arg(long, value_delimiter = ',', default_value = "20,30")]
    hidden: Vec<usize>,

    /// Number of input features
    #[arg(long, default_value = "15")]
    input_dim: usize,

    /// Number of classes
    #[arg(long, default_value = "10")]
    classes: usize,

    /// Normalization between hidden affine layers and ReLUs
    #[arg(long, value_enum, default_value = "none")]
    normalization: NormArg,

    /// Dropout keep ratio (1.0 disables dropout)
    #[arg(long, default_value = "1.0")]
    keep: f64,

    /// L2 regularization strength
    #[arg(long, default_value = "0.0")]
    reg: f64,

    /// Standard deviation of the initial weights
    #[arg(long, default_value = "0.05")]
    weight_scale: f64,

    /// Number of samples in the random batch
    #[arg(long, default_value = "2")]
    batch: usize,

    /// Seed for weights, data and dropout masks
    #[arg(long, default_value = "231")]
    seed: u64,

    /// Finite-difference step
    #[arg(long, default_value = "1e-5")]
    step: f64,

    /// Largest relative error reported as a pass
    #[arg(long, default_value = "1e-4")]
    tolerance: f64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NormArg {
    None,
    Batchnorm,
    Layernorm,
}

impl NormArg {
    fn resolve(self) -> Option<Normalization> {
        match self {
            NormArg::None => None,
            NormArg::Batchnorm => Some(Normalization::BatchNorm),
            NormArg::Layernorm => Some(Normalization::LayerNorm),
        }
    }
}

fn build_config(args: &Args) -> Result<NetConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => NetConfig::from_json_file(path)?,
        None => {
            let mut config = NetConfig::new(args.hidden.clone())
                .with_input_dim(args.input_dim)
                .with_num_classes(args.classes)
                .with_dropout(args.keep)
                .with_reg(args.reg)
                .with_weight_scale(args.weight_scale);
            config.normalization = args.normalization.resolve();
            config
        }
    };
    // Masks must repeat across the perturbed loss evaluations
    if config.seed.is_none() {
        config.seed = Some(args.seed);
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut net: FullyConnectedNet<f64> = FullyConnectedNet::with_rng(config, &mut rng)?;

    let input_dim = net.config().input_dim;
    let num_classes = net.config().num_classes;
    let x = Tensor::new(
        (0..args.batch * input_dim).map(|_| rng.random::<f64>() * 2.0 - 1.0).collect(),
        vec![args.batch, input_dim],
    );
    let labels: Vec<usize> = (0..args.batch).map(|_| rng.random_range(0..num_classes)).collect();

    let (loss, grads) = net.loss_and_grads(&x, &labels)?;
    info!(loss, grad_norm = grads.global_norm(), "initial loss");

    let checks = check_gradients(&net, &x, &labels, args.step)?;

    println!("{:<10} {:>14}  status", "param", "rel error");
    let mut failures = 0;
    for check in &checks {
        let ok = check.rel_error <= args.tolerance;
        if !ok {
            failures += 1;
        }
        println!(
            "{:<10} {:>14.3e}  {}",
            check.id.to_string(),
            check.rel_error,
            if ok { "ok" } else { "FAIL" }
        );
    }

    if failures > 0 {
        return Err(format!(
            "{} of {} parameters exceed tolerance {:e}",
            failures,
            checks.len(),
            args.tolerance
        )
        .into());
    }
    info!(params = checks.len(), "all gradients match");
    Ok(())
}
