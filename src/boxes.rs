use burn::{
    prelude::Backend,
    tensor::{Device, Int, Tensor, TensorData, s},
};

use crate::{
    ensure_finite,
    error::TargetError,
    tensor_ops::{index_tensor, to_host_f32},
};

/// A single box as `(y1, x1, y2, x2)` in absolute image pixels.
pub type BoxCoords = [f32; 4];

/// Builds a `[num_boxes, 4]` tensor from host boxes.
pub fn boxes_from_slice<B: Backend>(boxes: &[BoxCoords], device: &Device<B>) -> Tensor<B, 2> {
    let flat = boxes.iter().flatten().copied().collect::<Vec<f32>>();

    Tensor::from_data(TensorData::new(flat, [boxes.len(), 4]), device)
}

/// Splits a tensor of bounding boxes in any 4 component format (yxyx, cyxhw, ect..) into
/// individual components.
///
/// # Arguments
///
/// * `boxes` - Tensor of shape [num_boxes, 4].
///
/// # Returns
///
/// * Tuple of four tensors `(c1, c2, c3, c4)` each of shape [num_boxes, 1].
pub fn boxes_to_components<B: Backend>(
    boxes: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>) {
    (
        boxes.clone().slice(s![.., 0]),
        boxes.clone().slice(s![.., 1]),
        boxes.clone().slice(s![.., 2]),
        boxes.slice(s![.., 3]),
    )
}

/// Returns the row count of a box tensor after checking it has exactly 4 columns.
pub fn box_rows<B: Backend>(boxes: &Tensor<B, 2>, what: &str) -> Result<usize, TargetError> {
    let [rows, cols] = boxes.dims();

    if cols != 4 {
        return Err(TargetError::ShapeMismatch(format!(
            "{what} boxes have {cols} columns, expected 4"
        )));
    }

    Ok(rows)
}

/// Checks a flat host copy of `[num_boxes, 4]` boxes for NaN / infinite coordinates and for
/// negative extents (`y2 < y1` or `x2 < x1`). Zero sized boxes pass.
pub fn check_extents(boxes: &[f32], what: &'static str) -> Result<(), TargetError> {
    ensure_finite!(boxes, what);

    for (row, b) in boxes.chunks_exact(4).enumerate() {
        let (height, width) = (b[2] - b[0], b[3] - b[1]);

        if height < 0.0 || width < 0.0 {
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

/// Computes the Intersection over Union (IoU) between two sets of bounding boxes in `yxyx`
/// format.
///
/// Each box is represented by its `(y1, x1, y2, x2)` coordinates, where `(y1, x1)` is the
/// top-left corner and `(y2, x2)` is the bottom-right corner.
///
/// `IoU = intersection_area / union_area`, and `0` where the union area is `0`.
///
/// # Arguments
/// * `boxes_a` - Tensor of shape `[N, 4]`, e.g. the anchors.
/// * `boxes_b` - Tensor of shape `[M, 4]`, e.g. the ground truth boxes.
///
/// # Returns
/// * `Tensor<B, 2>` - IoU matrix of shape `[N, M]`.
pub fn compute_overlaps<B: Backend>(boxes_a: Tensor<B, 2>, boxes_b: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, _] = boxes_a.dims();
    let [m, _] = boxes_b.dims();

    if n == 0 || m == 0 {
        return Tensor::zeros([n, m], &boxes_a.device());
    }

    let (ay1, ax1, ay2, ax2) = boxes_to_components(boxes_a);
    let (by1, bx1, by2, bx2) = boxes_to_components(boxes_b);

    let area_a = (ay2.clone() - ay1.clone()) * (ax2.clone() - ax1.clone());
    let area_b = (by2.clone() - by1.clone()) * (bx2.clone() - bx1.clone());

    // Lay every component of `a` along the rows and every component of `b` along the columns
    //
    //                  boxes_b
    //             ┌──────────────►
    //             │┌──────────────────┐
    //     boxes_a ││     [N, M]       │
    //             ▼└──────────────────┘
    let rows = |t: Tensor<B, 2>| t.repeat_dim(1, m);
    let cols = |t: Tensor<B, 2>| t.reshape([1, m]).repeat_dim(0, n);

    // --- Intersection corners ---
    let y1 = rows(ay1).max_pair(cols(by1));
    let x1 = rows(ax1).max_pair(cols(bx1));
    let y2 = rows(ay2).min_pair(cols(by2));
    let x2 = rows(ax2).min_pair(cols(bx2));

    // Clamp at 0 so disjoint boxes have no intersection
    let intersection = (y2 - y1).clamp_min(0.0) * (x2 - x1).clamp_min(0.0);

    let union = rows(area_a) + cols(area_b) - intersection.clone();
    let empty_union = union.clone().lower_equal_elem(0.0);

    (intersection / union).mask_fill(empty_union, 0.0)
}

/// Drops the all-zero padding rows of a ground truth set together with their class ids.
///
/// Batched ground truth is zero padded up to a fixed number of boxes per image. A row counts
/// as padding when all four coordinates are exactly zero.
///
/// # Returns
///
/// * `None` when every row is padding.
/// * `Some((boxes, class_ids))` with the remaining rows in their original order.
pub fn trim_zeros<B: Backend>(
    boxes: Tensor<B, 2>,
    class_ids: Tensor<B, 1, Int>,
) -> Result<Option<(Tensor<B, 2>, Tensor<B, 1, Int>)>, TargetError> {
    let rows = box_rows(&boxes, "ground truth")?;
    let [ids] = class_ids.dims();

    if rows != ids {
        return Err(TargetError::ShapeMismatch(format!(
            "{rows} ground truth boxes but {ids} class ids"
        )));
    }

    let device = boxes.device();
    let host = to_host_f32(boxes.clone())?;

    let keep = host
        .chunks_exact(4)
        .enumerate()
        .filter(|(_, b)| b.iter().any(|v| *v != 0.0))
        .map(|(i, _)| i)
        .collect::<Vec<usize>>();

    if keep.is_empty() {
        return Ok(None);
    }

    if keep.len() == rows {
        return Ok(Some((boxes, class_ids)));
    }

    let keep = index_tensor::<B>(&keep, &device);

    Ok(Some((
        boxes.select(0, keep.clone()),
        class_ids.select(0, keep),
    )))
}
