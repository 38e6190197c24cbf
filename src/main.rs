use anyhow::{Context, anyhow};
use burn::{
    backend::NdArray,
    backend::ndarray::NdArrayDevice,
    config::Config,
    tensor::s,
};
use rand::{SeedableRng, rngs::StdRng};
use rust_rpn::{
    anchor_target::AnchorTarget,
    config::{AnchorTargetConfig, Commands, RpnCmd},
    labels::{Match, labels_from_tensor},
    scene::Scene,
};
use tracing::{Level, debug, info};

fn main() -> anyhow::Result<()> {
    type B = NdArray<f32>;
    let device = NdArrayDevice::default();

    let cli_cmd: RpnCmd = argh::from_env();

    tracing_subscriber::fmt()
        .with_max_level(if cli_cmd.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    match cli_cmd.commands {
        Commands::Targets(sub_command_targets) => {
            let config = match &sub_command_targets.c {
                Some(path) => AnchorTargetConfig::load(path)
                    .map_err(|err| anyhow!("could not load config {path}: {err:?}"))?,
                None => AnchorTargetConfig::new(),
            };
            let seed = sub_command_targets.r.unwrap_or(0);

            let json = std::fs::read_to_string(&sub_command_targets.s)
                .with_context(|| format!("could not read scene {}", sub_command_targets.s))?;
            let scene = Scene::from_json(&json).context("invalid scene file")?;
            let tensors = scene.to_tensors::<B>(&device)?;

            info!(
                images = scene.batch_size(),
                anchors = scene.anchors.len(),
                seed,
                "building anchor targets"
            );

            let target = AnchorTarget::new(config)?;
            debug!("anchor target config {}", target.config());

            let targets = target.build_targets(
                tensors.anchors,
                tensors.valid_flags,
                tensors.gt_boxes,
                tensors.gt_class_ids,
                &mut StdRng::seed_from_u64(seed),
            )?;

            for (i, (stats, positive_ids)) in
                targets.stats.iter().zip(&targets.positive_ids).enumerate()
            {
                println!("image {i:<4}{stats}  positives {positive_ids:?}");

                if cli_cmd.verbose {
                    let matches = targets
                        .matches
                        .clone()
                        .slice(s![i, ..])
                        .reshape([scene.anchors.len()]);

                    for (j, label) in labels_from_tensor(matches)?.into_iter().enumerate() {
                        if label != Match::Neutral {
                            println!("    anchor {j:<6}{label}");
                        }
                    }
                }
            }
        }
        Commands::Config(sub_command_config) => {
            AnchorTargetConfig::new()
                .save(&sub_command_config.o)
                .with_context(|| format!("could not write {}", sub_command_config.o))?;

            info!("wrote default config to {}", sub_command_config.o);
        }
    };

    Ok(())
}
