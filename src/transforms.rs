use burn::{
    prelude::Backend,
    tensor::{Device, Tensor},
};

use crate::{
    boxes::{BoxCoords, box_rows, boxes_to_components},
    ensure_finite,
    error::TargetError,
    tensor_ops::to_host_f32,
};

/// Converts a tensor of bounding boxes from corner format (y1, x1, y2, x2) to center format
/// (cy, cx, h, w).
pub fn yxyx_to_cyxhw<B: Backend>(a: Tensor<B, 2>) -> Tensor<B, 2> {
    let (y1, x1, y2, x2) = boxes_to_components(a);

    let h = y2 - y1.clone();
    let w = x2 - x1.clone();
    let cy = y1 + h.clone() * 0.5;
    let cx = x1 + w.clone() * 0.5;

    Tensor::cat(vec![cy, cx, h, w], 1)
}

/// Converts a tensor of bounding boxes from center format (cy, cx, h, w) to corner format
/// (y1, x1, y2, x2).
pub fn cyxhw_to_yxyx<B: Backend>(a: Tensor<B, 2>) -> Tensor<B, 2> {
    let (cy, cx, h, w) = boxes_to_components(a);

    let y1 = cy - h.clone() * 0.5;
    let x1 = cx - w.clone() * 0.5;
    let y2 = y1.clone() + h;
    let x2 = x1.clone() + w;

    Tensor::cat(vec![y1, x1, y2, x2], 1)
}

/// Repeats a 4 component row `rows` times so it lines up with a `[rows, 4]` box tensor.
fn per_column<B: Backend>(values: [f32; 4], rows: usize, device: &Device<B>) -> Tensor<B, 2> {
    Tensor::<B, 1>::from_floats(values, device)
        .reshape([1, 4])
        .repeat_dim(0, rows)
}

fn paired_rows<B: Backend>(
    boxes: &Tensor<B, 2>,
    other: &Tensor<B, 2>,
    other_name: &str,
) -> Result<usize, TargetError> {
    let rows = box_rows(boxes, "source")?;
    let other_rows = box_rows(other, other_name)?;

    if rows != other_rows {
        return Err(TargetError::ShapeMismatch(format!(
            "{rows} source boxes paired with {other_rows} {other_name} rows"
        )));
    }

    Ok(rows)
}

/// Rejects boxes whose height or width is not strictly positive. `cyxhw` is the flat host copy
/// of the boxes in center format.
fn ensure_positive_size(cyxhw: &[f32], what: &'static str) -> Result<(), TargetError> {
    for (row, b) in cyxhw.chunks_exact(4).enumerate() {
        let (height, width) = (b[2], b[3]);

        // written so that NaN sizes are rejected too
        if !(height > 0.0 && width > 0.0) {
            return Err(TargetError::DegenerateBox {
                what,
                row,
                height,
                width,
            });
        }
    }

    Ok(())
}

/// Computes the refinement needed to transform each box into the ground truth box on the same
/// row.
///
/// The regression formula, with every box in center format:
/// - dy = (Gy - Py) / Ph
/// - dx = (Gx - Px) / Pw
/// - dh = log(Gh / Ph)
/// - dw = log(Gw / Pw)
///
/// followed by the affine normalization `(delta - means) / stds` per column.
///
/// "Faster R-CNN: Towards Real-Time Object Detection with Region Proposal Networks"
/// Authors: Shaoqing Ren, Kaiming He, Ross Girshick, Jian Sun
/// Paper: https://arxiv.org/abs/1506.01497
///
/// 3.1.2 Loss Function
///
/// This can be thought of as bounding-box regression from an anchor box to a nearby ground-truth
/// box.
///
/// # Arguments
///
/// * `boxes` - Source boxes (anchors) of shape [num_boxes, 4] in yxyx format.
/// * `gt_boxes` - Target boxes of shape [num_boxes, 4] in yxyx format, paired by row.
/// * `means`, `stds` - Per column normalization of the raw deltas.
///
/// # Returns
///
/// * `Tensor<B, 2>` of shape [num_boxes, 4] holding `(dy, dx, log(dh), log(dw))`.
///
/// # Errors
///
/// * `DegenerateBox` when a box on either side has a non-positive height or width, which would
///   otherwise turn into infinite or NaN deltas.
/// * `ShapeMismatch` when the row counts differ or a tensor does not have 4 columns.
pub fn bbox2delta<B: Backend>(
    boxes: Tensor<B, 2>,
    gt_boxes: Tensor<B, 2>,
    means: [f32; 4],
    stds: [f32; 4],
) -> Result<Tensor<B, 2>, TargetError> {
    let rows = paired_rows(&boxes, &gt_boxes, "ground truth")?;
    let device = boxes.device();

    if rows == 0 {
        return Ok(Tensor::zeros([0, 4], &device));
    }

    let boxes = yxyx_to_cyxhw(boxes);
    let gt_boxes = yxyx_to_cyxhw(gt_boxes);

    ensure_positive_size(&to_host_f32(boxes.clone())?, "source")?;
    ensure_positive_size(&to_host_f32(gt_boxes.clone())?, "ground truth")?;

    let (cy, cx, h, w) = boxes_to_components(boxes);
    let (gt_cy, gt_cx, gt_h, gt_w) = boxes_to_components(gt_boxes);

    //      Gy - Py
    // dy = ───────
    //        Ph

    let dy = (gt_cy - cy) / h.clone();
    let dx = (gt_cx - cx) / w.clone();

    //          ⎛Gh⎞
    // dh = log ⎜──⎟
    //          ⎝Ph⎠

    let dh = (gt_h / h).log();
    let dw = (gt_w / w).log();

    let delta = Tensor::cat(vec![dy, dx, dh, dw], 1);

    Ok((delta - per_column(means, rows, &device)) / per_column(stds, rows, &device))
}

/// Applies regression deltas to boxes, the exact inverse of [`bbox2delta`] for the same
/// `means` and `stds`.
///
/// - delta = delta * stds + means
/// - cy = dy * Ph + Py, cx = dx * Pw + Px
/// - h = exp(dh) * Ph, w = exp(dw) * Pw
///
/// # Arguments
///
/// * `boxes` - Boxes to update, shape [num_boxes, 4] in yxyx format.
/// * `deltas` - Refinements `(dy, dx, log(dh), log(dw))` of shape [num_boxes, 4].
///
/// # Returns
///
/// * `Tensor<B, 2>` of shape [num_boxes, 4] in yxyx format.
pub fn delta2bbox<B: Backend>(
    boxes: Tensor<B, 2>,
    deltas: Tensor<B, 2>,
    means: [f32; 4],
    stds: [f32; 4],
) -> Result<Tensor<B, 2>, TargetError> {
    let rows = paired_rows(&boxes, &deltas, "delta")?;
    let device = boxes.device();

    if rows == 0 {
        return Ok(Tensor::zeros([0, 4], &device));
    }

    ensure_finite!(to_host_f32(deltas.clone())?, "deltas");

    let deltas = deltas * per_column(stds, rows, &device) + per_column(means, rows, &device);

    let (cy, cx, h, w) = boxes_to_components(yxyx_to_cyxhw(boxes));
    let (dy, dx, dh, dw) = boxes_to_components(deltas);

    let cy = dy * h.clone() + cy;
    let cx = dx * w.clone() + cx;
    let h = dh.exp() * h;
    let w = dw.exp() * w;

    Ok(cyxhw_to_yxyx(Tensor::cat(vec![cy, cx, h, w], 1)))
}

/// Clips every box coordinate into `window` given as `(wy1, wx1, wy2, wx2)`.
///
/// Each coordinate is first capped at the far edge and then raised to the near edge, so a box
/// lying completely outside the window collapses onto its border.
pub fn bbox_clip<B: Backend>(boxes: Tensor<B, 2>, window: BoxCoords) -> Tensor<B, 2> {
    let [wy1, wx1, wy2, wx2] = window;
    let (y1, x1, y2, x2) = boxes_to_components(boxes);

    Tensor::cat(
        vec![
            y1.clamp_max(wy2).clamp_min(wy1),
            x1.clamp_max(wx2).clamp_min(wx1),
            y2.clamp_max(wy2).clamp_min(wy1),
            x2.clamp_max(wx2).clamp_min(wx1),
        ],
        1,
    )
}
