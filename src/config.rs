use argh::FromArgs;
use burn::config::Config;

use crate::error::TargetError;

/// Parameters of the region proposal anchor target builder.
///
/// The same instance has to be used to build training targets and to decode predicted deltas
/// at inference time, otherwise decoded boxes are systematically biased by the difference in
/// `target_means` / `target_stds`.
///
/// "Faster R-CNN: Towards Real-Time Object Detection with Region Proposal Networks"
/// Authors: Shaoqing Ren, Kaiming He, Ross Girshick, Jian Sun
/// Paper: https://arxiv.org/abs/1506.01497
///
/// 3.1.2 Loss Function
///
/// For training RPNs, we assign a binary class label (of being an object or not) to each anchor.
/// We assign a positive label to two kinds of anchors: (i) the anchor/anchors with the highest
/// Intersection-over-Union (IoU) overlap with a ground-truth box, or (ii) an anchor that has an
/// IoU overlap higher than 0.7 with any ground-truth box. [...] We assign a negative label to a
/// non-positive anchor if its IoU ratio is lower than 0.3 for all ground-truth boxes. Anchors
/// that are neither positive nor negative do not contribute to the training objective.
///
/// 3.1.3 Training RPNs
///
/// [...] we randomly sample 256 anchors in an image to compute the loss function of a
/// mini-batch, where the sampled positive and negative anchors have a ratio of up to 1:1.
#[derive(Config, Debug)]
pub struct AnchorTargetConfig {
    /// Bounding box refinement mean, subtracted from the raw deltas.
    #[config(default = "[0.0, 0.0, 0.0, 0.0]")]
    pub target_means: [f32; 4],
    /// Bounding box refinement standard deviation, the raw deltas are divided by it.
    #[config(default = "[0.1, 0.1, 0.2, 0.2]")]
    pub target_stds: [f32; 4],
    #[config(default = 0.7)]
    pub pos_iou_thr: f32,
    #[config(default = 0.3)]
    pub neg_iou_thr: f32,
    /// Number of anchors sampled per image, also the number of delta rows per image.
    #[config(default = 256)]
    pub num_rpn_deltas: usize,
    #[config(default = 0.5)]
    pub pos_fraction: f32,
}

impl AnchorTargetConfig {
    /// Maximum number of positive anchors kept per image, `floor(num_rpn_deltas * pos_fraction)`.
    ///
    /// `pos_fraction` is an f32 that can sit just below its decimal value (`0.29` is stored as
    /// `0.2899999917`), the product is given a relative tolerance of `1e-6` before truncating.
    pub fn max_positives(&self) -> usize {
        let exact = self.num_rpn_deltas as f64 * f64::from(self.pos_fraction);

        ((exact * (1.0 + 1e-6)).floor() as usize).min(self.num_rpn_deltas)
    }

    pub fn validate(&self) -> Result<(), TargetError> {
        let unit = 0.0..=1.0;

        if !unit.contains(&self.pos_iou_thr) || !unit.contains(&self.neg_iou_thr) {
            return Err(TargetError::InvalidConfig(format!(
                "iou thresholds must lie in [0, 1], got pos {} neg {}",
                self.pos_iou_thr, self.neg_iou_thr
            )));
        }

        if self.neg_iou_thr > self.pos_iou_thr {
            return Err(TargetError::InvalidConfig(format!(
                "neg_iou_thr {} is above pos_iou_thr {}",
                self.neg_iou_thr, self.pos_iou_thr
            )));
        }

        if !unit.contains(&self.pos_fraction) {
            return Err(TargetError::InvalidConfig(format!(
                "pos_fraction must lie in [0, 1], got {}",
                self.pos_fraction
            )));
        }

        if self.num_rpn_deltas == 0 {
            return Err(TargetError::InvalidConfig(
                "num_rpn_deltas must be positive".into(),
            ));
        }

        if self.target_means.iter().any(|m| !m.is_finite()) {
            return Err(TargetError::InvalidConfig(format!(
                "target_means must be finite, got {:?}",
                self.target_means
            )));
        }

        if self.target_stds.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(TargetError::InvalidConfig(format!(
                "target_stds must be finite and non zero, got {:?}",
                self.target_stds
            )));
        }

        Ok(())
    }
}

#[derive(FromArgs, PartialEq, Debug)]
/// Top-level command.
pub struct RpnCmd {
    #[argh(subcommand)]
    pub commands: Commands,
    #[argh(switch, short = 'v')]
    /// log per image matching details
    pub verbose: bool,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum Commands {
    Targets(SubCommandTargets),
    Config(SubCommandConfig),
}

#[derive(FromArgs, PartialEq, Debug)]
/// Build anchor targets for every image of a scene file
#[argh(subcommand, name = "targets")]
pub struct SubCommandTargets {
    #[argh(option)]
    /// scene file path (anchors, valid flags and ground truth as json)
    pub s: String,
    #[argh(option)]
    /// anchor target config file path, defaults are used when omitted
    pub c: Option<String>,
    #[argh(option)]
    /// seed of the positive / negative subsampling
    pub r: Option<u64>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// Write the default anchor target config as json
#[argh(subcommand, name = "config")]
pub struct SubCommandConfig {
    #[argh(option)]
    /// output file path
    pub o: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnchorTargetConfig::new();

        assert_eq!(config.target_means, [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(config.target_stds, [0.1, 0.1, 0.2, 0.2]);
        assert_eq!(config.pos_iou_thr, 0.7);
        assert_eq!(config.neg_iou_thr, 0.3);
        assert_eq!(config.num_rpn_deltas, 256);
        assert_eq!(config.max_positives(), 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_positives_floor() {
        let cases = [
            (256, 0.5, 128),
            (10, 0.3, 3),
            (100, 0.29, 29),
            (1000, 0.7, 700),
            (7, 1.0, 7),
            (7, 0.0, 0),
        ];

        for (num_rpn_deltas, pos_fraction, expected) in cases {
            let config = AnchorTargetConfig::new()
                .with_num_rpn_deltas(num_rpn_deltas)
                .with_pos_fraction(pos_fraction);

            assert_eq!(
                config.max_positives(),
                expected,
                "{num_rpn_deltas} * {pos_fraction}"
            );
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            AnchorTargetConfig::new().with_pos_iou_thr(1.5),
            AnchorTargetConfig::new().with_neg_iou_thr(f32::NAN),
            AnchorTargetConfig::new()
                .with_pos_iou_thr(0.2)
                .with_neg_iou_thr(0.3),
            AnchorTargetConfig::new().with_pos_fraction(1.2),
            AnchorTargetConfig::new().with_num_rpn_deltas(0),
            AnchorTargetConfig::new().with_target_stds([0.1, 0.0, 0.2, 0.2]),
            AnchorTargetConfig::new().with_target_means([0.0, f32::INFINITY, 0.0, 0.0]),
        ];

        for config in bad {
            assert!(
                matches!(config.validate(), Err(TargetError::InvalidConfig(_))),
                "accepted {config:?}"
            );
        }
    }

    #[test]
    fn test_json_round_trip() {
        let config = AnchorTargetConfig::new()
            .with_target_means([0.1, 0.0, -0.1, 0.0])
            .with_num_rpn_deltas(128);

        let json = config.to_string();
        let loaded = AnchorTargetConfig::load_binary(json.as_bytes()).unwrap();

        assert_eq!(loaded.target_means, [0.1, 0.0, -0.1, 0.0]);
        assert_eq!(loaded.num_rpn_deltas, 128);
        assert_eq!(loaded.max_positives(), 64);
    }

    #[test]
    fn test_cli_targets() {
        let cmd = RpnCmd::from_args(&["rust_rpn"], &["-v", "targets", "--s", "scene.json"])
            .unwrap();

        assert!(cmd.verbose);
        assert_eq!(
            cmd.commands,
            Commands::Targets(SubCommandTargets {
                s: "scene.json".into(),
                c: None,
                r: None,
            })
        );
    }
}
