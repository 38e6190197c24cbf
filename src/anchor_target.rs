use burn::{
    prelude::Backend,
    tensor::{Int, Tensor, TensorData, s},
};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::index};
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::{
    boxes::{box_rows, check_extents, compute_overlaps, trim_zeros},
    config::AnchorTargetConfig,
    error::TargetError,
    labels::Match,
    stats::MatchStats,
    tensor_ops::{index_tensor, to_host_f32, to_host_i64},
    transforms::{bbox2delta, delta2bbox},
};

/// Training targets of a single image.
#[derive(Clone, Debug)]
pub struct SingleTarget<B: Backend> {
    /// `[num_anchors]` labels, `1` positive, `-1` negative, `0` neutral.
    pub matches: Tensor<B, 1, Int>,
    /// `[num_rpn_deltas, 4]` deltas `(dy, dx, log(dh), log(dw))`, zero padded.
    pub deltas: Tensor<B, 2>,
    /// Anchor index of every non padding delta row, ascending. Row `k` of `deltas` belongs to
    /// anchor `positive_ids[k]`, not to anchor `k`.
    pub positive_ids: Vec<usize>,
    pub stats: MatchStats,
}

/// Training targets of a batch of images, stacked along the first dimension.
#[derive(Clone, Debug)]
pub struct RpnTargets<B: Backend> {
    /// `[batch_size, num_anchors]`
    pub matches: Tensor<B, 2, Int>,
    /// `[batch_size, num_rpn_deltas, 4]`, detached from any autodiff graph.
    pub deltas: Tensor<B, 3>,
    /// Per image anchor index of every non padding delta row, see [`SingleTarget`].
    pub positive_ids: Vec<Vec<usize>>,
    pub stats: Vec<MatchStats>,
}

/// Computes regression and classification targets for the anchors of a region proposal
/// network.
///
/// Each anchor is labelled from its overlap with the ground truth boxes of the image:
///
/// 1. An anchor overlapping a ground truth box with IoU >= `pos_iou_thr` is positive.
/// 2. An anchor whose best IoU is below `neg_iou_thr` is negative, unless its valid flag is
///    off, in which case it is neutral.
/// 3. No ground truth box is left unmatched, the anchor with the highest overlap is made
///    positive whatever its IoU or validity.
///
/// Positives and negatives are then randomly subsampled down to `num_rpn_deltas` anchors with
/// at most `num_rpn_deltas * pos_fraction` positives. Neutral anchors don't influence the loss.
#[derive(Debug)]
pub struct AnchorTarget {
    config: AnchorTargetConfig,
}

impl AnchorTarget {
    pub fn new(config: AnchorTargetConfig) -> Result<Self, TargetError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnchorTargetConfig {
        &self.config
    }

    /// Given the anchors and ground truth boxes, compute overlaps and identify positive anchors
    /// and the deltas that refine them into their ground truth boxes.
    ///
    /// Images are processed independently and in parallel. The subsampling of every image uses
    /// its own `StdRng` seeded from `rng` in image order, so a seeded `rng` gives the same
    /// targets whatever the scheduling.
    ///
    /// # Arguments
    ///
    /// * `anchors` - `[num_anchors, (y1, x1, y2, x2)]` in image coordinates, shared by the batch.
    /// * `valid_flags` - `[batch_size, num_anchors]`, `1` for anchors inside the valid region.
    /// * `gt_boxes` - `[batch_size, num_gt_boxes, (y1, x1, y2, x2)]`, zero padded.
    /// * `gt_class_ids` - `[batch_size, num_gt_boxes]` integer class ids, zero padded.
    ///
    /// # Returns
    ///
    /// [`RpnTargets`] holding `[batch_size, num_anchors]` matches and
    /// `[batch_size, num_rpn_deltas, 4]` deltas.
    pub fn build_targets<B: Backend, R: Rng + ?Sized>(
        &self,
        anchors: Tensor<B, 2>,
        valid_flags: Tensor<B, 2, Int>,
        gt_boxes: Tensor<B, 3>,
        gt_class_ids: Tensor<B, 2, Int>,
        rng: &mut R,
    ) -> Result<RpnTargets<B>, TargetError> {
        let num_anchors = self.check_anchors(&anchors)?;

        let [batch_size, flag_count] = valid_flags.dims();
        let [gt_batch, max_gt, gt_cols] = gt_boxes.dims();
        let [ids_batch, ids_count] = gt_class_ids.dims();

        if batch_size == 0 {
            return Err(TargetError::ShapeMismatch("batch is empty".into()));
        }

        if gt_batch != batch_size || ids_batch != batch_size {
            return Err(TargetError::ShapeMismatch(format!(
                "batch sizes differ: {batch_size} valid flag rows, {gt_batch} ground truth sets, \
                 {ids_batch} class id sets"
            )));
        }

        if flag_count != num_anchors {
            return Err(TargetError::ShapeMismatch(format!(
                "{flag_count} valid flags per image for {num_anchors} anchors"
            )));
        }

        if gt_cols != 4 || ids_count != max_gt {
            return Err(TargetError::ShapeMismatch(format!(
                "ground truth is [{gt_batch}, {max_gt}, {gt_cols}] with [{ids_batch}, {ids_count}] \
                 class ids"
            )));
        }

        let seeds = (0..batch_size)
            .map(|_| rng.random::<u64>())
            .collect::<Vec<u64>>();

        let targets = seeds
            .into_par_iter()
            .enumerate()
            .map(|(i, seed)| {
                let mut rng = StdRng::seed_from_u64(seed);

                let valid_flags = valid_flags.clone().slice(s![i, ..]).reshape([num_anchors]);
                let gt_boxes = gt_boxes.clone().slice(s![i, .., ..]).reshape([max_gt, 4]);
                let gt_class_ids = gt_class_ids.clone().slice(s![i, ..]).reshape([max_gt]);

                self.single_target(
                    anchors.clone(),
                    valid_flags,
                    gt_boxes,
                    gt_class_ids,
                    &mut rng,
                )
                .map_err(|err| err.in_image(i))
            })
            .collect::<Result<Vec<SingleTarget<B>>, TargetError>>()?;

        let mut matches = Vec::with_capacity(batch_size);
        let mut deltas = Vec::with_capacity(batch_size);
        let mut positive_ids = Vec::with_capacity(batch_size);
        let mut stats = Vec::with_capacity(batch_size);

        for target in targets {
            matches.push(target.matches);
            deltas.push(target.deltas);
            positive_ids.push(target.positive_ids);
            stats.push(target.stats);
        }

        let matches: Tensor<B, 2, Int> = Tensor::stack(matches, 0);
        let deltas: Tensor<B, 3> = Tensor::stack(deltas, 0);

        Ok(RpnTargets {
            matches,
            deltas: deltas.detach(),
            positive_ids,
            stats,
        })
    }

    /// Computes the targets of a single image.
    ///
    /// # Arguments
    ///
    /// * `anchors` - `[num_anchors, (y1, x1, y2, x2)]`
    /// * `valid_flags` - `[num_anchors]`
    /// * `gt_boxes` - `[num_gt_boxes, (y1, x1, y2, x2)]`, may contain all-zero padding rows.
    /// * `gt_class_ids` - `[num_gt_boxes]`, trimmed together with the boxes.
    pub fn build_single_target<B: Backend, R: Rng + ?Sized>(
        &self,
        anchors: Tensor<B, 2>,
        valid_flags: Tensor<B, 1, Int>,
        gt_boxes: Tensor<B, 2>,
        gt_class_ids: Tensor<B, 1, Int>,
        rng: &mut R,
    ) -> Result<SingleTarget<B>, TargetError> {
        self.check_anchors(&anchors)?;
        self.single_target(anchors, valid_flags, gt_boxes, gt_class_ids, rng)
    }

    /// Applies predicted deltas to boxes with the normalization these targets were built with.
    pub fn decode_deltas<B: Backend>(
        &self,
        boxes: Tensor<B, 2>,
        deltas: Tensor<B, 2>,
    ) -> Result<Tensor<B, 2>, TargetError> {
        delta2bbox(
            boxes,
            deltas,
            self.config.target_means,
            self.config.target_stds,
        )
    }

    fn check_anchors<B: Backend>(&self, anchors: &Tensor<B, 2>) -> Result<usize, TargetError> {
        let num_anchors = box_rows(anchors, "anchor")?;

        if num_anchors == 0 {
            return Err(TargetError::ShapeMismatch("anchor set is empty".into()));
        }

        check_extents(&to_host_f32(anchors.clone())?, "anchor")?;

        Ok(num_anchors)
    }

    fn single_target<B: Backend, R: Rng + ?Sized>(
        &self,
        anchors: Tensor<B, 2>,
        valid_flags: Tensor<B, 1, Int>,
        gt_boxes: Tensor<B, 2>,
        gt_class_ids: Tensor<B, 1, Int>,
        rng: &mut R,
    ) -> Result<SingleTarget<B>, TargetError> {
        let device = anchors.device();
        let [num_anchors, _] = anchors.dims();
        let [flag_count] = valid_flags.dims();

        if flag_count != num_anchors {
            return Err(TargetError::ShapeMismatch(format!(
                "{flag_count} valid flags for {num_anchors} anchors"
            )));
        }

        let valid = to_host_i64(valid_flags)?
            .into_iter()
            .map(|flag| flag == 1)
            .collect::<Vec<bool>>();

        // Class ids only travel with the boxes while the padding is removed
        let gt_boxes = match trim_zeros(gt_boxes, gt_class_ids)? {
            Some((gt_boxes, _)) => {
                check_extents(&to_host_f32(gt_boxes.clone())?, "ground truth")?;
                Some(gt_boxes)
            }
            None => None,
        };

        // Best ground truth of every anchor and best anchor of every ground truth box. With no
        // ground truth the best overlap is -inf so that every anchor falls below both thresholds
        let (anchor_best, gt_best_anchor) = match &gt_boxes {
            Some(gt_boxes) => {
                let [num_gt, _] = gt_boxes.dims();
                let overlaps = to_host_f32(compute_overlaps(anchors.clone(), gt_boxes.clone()))?;

                (
                    row_argmax(&overlaps, num_gt),
                    col_argmax(&overlaps, num_anchors, num_gt),
                )
            }
            None => (vec![(0, f32::NEG_INFINITY); num_anchors], vec![]),
        };

        let best_iou = anchor_best
            .iter()
            .map(|(_, iou)| *iou)
            .collect::<Vec<f32>>();

        let labels = label_by_overlap(&best_iou, &valid, &self.config);
        let labels = force_gt_coverage(labels, &gt_best_anchor);

        trace!(
            forced = gt_best_anchor.len(),
            positives = count(&labels, Match::Positive),
            "labelled anchors before subsampling"
        );

        // Subsample to balance positive and negative anchors, positives are capped first and
        // negatives fill the rest of the sample
        let labels = subsample(labels, Match::Positive, self.config.max_positives(), rng);
        let positives = count(&labels, Match::Positive);

        if positives > self.config.num_rpn_deltas {
            return Err(TargetError::ShapeMismatch(format!(
                "{positives} positive anchors do not fit in {} delta rows",
                self.config.num_rpn_deltas
            )));
        }

        let labels = subsample(
            labels,
            Match::Negative,
            self.config.num_rpn_deltas - positives,
            rng,
        );

        let positive_ids = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label == Match::Positive)
            .map(|(i, _)| i)
            .collect::<Vec<usize>>();

        // For positive anchors, compute shift and scale needed to transform them to match the
        // corresponding ground truth boxes
        let deltas = match gt_boxes {
            Some(gt_boxes) if !positive_ids.is_empty() => {
                let matched_gt = positive_ids
                    .iter()
                    .map(|&i| anchor_best[i].0)
                    .collect::<Vec<usize>>();

                let positive_anchors = anchors.select(0, index_tensor::<B>(&positive_ids, &device));
                let matched_gt = gt_boxes.select(0, index_tensor::<B>(&matched_gt, &device));

                let deltas = bbox2delta(
                    positive_anchors,
                    matched_gt,
                    self.config.target_means,
                    self.config.target_stds,
                )?;

                let padding = self.config.num_rpn_deltas - positive_ids.len();

                if padding > 0 {
                    Tensor::cat(vec![deltas, Tensor::zeros([padding, 4], &device)], 0)
                } else {
                    deltas
                }
            }
            _ => Tensor::zeros([self.config.num_rpn_deltas, 4], &device),
        };

        let stats = MatchStats::from_labels(&labels);

        debug!(
            anchors = num_anchors,
            ground_truth = gt_best_anchor.len(),
            "anchor targets {stats}"
        );

        let matches = Tensor::<B, 1, Int>::from_data(
            TensorData::new(
                labels.iter().map(|label| label.as_i64()).collect::<Vec<i64>>(),
                [num_anchors],
            ),
            &device,
        );

        Ok(SingleTarget {
            matches,
            deltas,
            positive_ids,
            stats,
        })
    }
}

/// Index and value of the first maximum, so ties resolve to the lowest index.
fn first_max(values: impl Iterator<Item = f32>) -> (usize, f32) {
    values
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| {
            if v > best.1 { (i, v) } else { best }
        })
}

/// Best column of every row of a row-major `[rows, cols]` matrix, `cols > 0`.
fn row_argmax(values: &[f32], cols: usize) -> Vec<(usize, f32)> {
    values
        .chunks_exact(cols)
        .map(|row| first_max(row.iter().copied()))
        .collect()
}

/// Best row of every column of a row-major `[rows, cols]` matrix.
fn col_argmax(values: &[f32], rows: usize, cols: usize) -> Vec<usize> {
    (0..cols)
        .map(|j| first_max((0..rows).map(|i| values[i * cols + j])).0)
        .collect()
}

fn count(labels: &[Match], kind: Match) -> usize {
    labels.iter().filter(|label| **label == kind).count()
}

/// Labels every anchor from its best overlap alone. Later rules win over earlier ones:
///
/// 1. below `neg_iou_thr` -> negative
/// 2. invalid anchor -> neutral
/// 3. at least `pos_iou_thr` -> positive, even for an invalid anchor
fn label_by_overlap(best_iou: &[f32], valid: &[bool], config: &AnchorTargetConfig) -> Vec<Match> {
    best_iou
        .iter()
        .zip(valid)
        .map(|(&iou, &valid)| {
            if iou >= config.pos_iou_thr {
                Match::Positive
            } else if !valid {
                Match::Neutral
            } else if iou < config.neg_iou_thr {
                Match::Negative
            } else {
                Match::Neutral
            }
        })
        .collect()
}

/// Makes the best anchor of every ground truth box positive regardless of its IoU value.
fn force_gt_coverage(mut labels: Vec<Match>, gt_best_anchor: &[usize]) -> Vec<Match> {
    for &anchor in gt_best_anchor {
        labels[anchor] = Match::Positive;
    }

    labels
}

/// Resets a uniformly random selection of the `kind` labels to neutral until at most `keep`
/// of them remain.
fn subsample<R: Rng + ?Sized>(
    mut labels: Vec<Match>,
    kind: Match,
    keep: usize,
    rng: &mut R,
) -> Vec<Match> {
    let ids = labels
        .iter()
        .enumerate()
        .filter(|(_, label)| **label == kind)
        .map(|(i, _)| i)
        .collect::<Vec<usize>>();

    if ids.len() <= keep {
        return labels;
    }

    for pick in index::sample(rng, ids.len(), ids.len() - keep) {
        labels[ids[pick]] = Match::Neutral;
    }

    labels
}
