use burn::{
    prelude::Backend,
    tensor::{Device, Int, Tensor, TensorData},
};
use serde::{Deserialize, Serialize};

use crate::{
    boxes::{BoxCoords, boxes_from_slice},
    error::TargetError,
};

/// A batch of images sharing one anchor set, as read from a json file.
///
/// ```json
/// {
///   "anchors": [[0, 0, 10, 10], [100, 100, 110, 110]],
///   "valid_flags": [[1, 1]],
///   "gt_boxes": [[[0, 0, 10, 10]]],
///   "gt_class_ids": [[1]]
/// }
/// ```
///
/// Images may hold different numbers of ground truth boxes, they are zero padded to the
/// largest count when converted to tensors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub anchors: Vec<BoxCoords>,
    pub valid_flags: Vec<Vec<i64>>,
    pub gt_boxes: Vec<Vec<BoxCoords>>,
    pub gt_class_ids: Vec<Vec<i64>>,
}

/// Batched tensors of a [`Scene`], laid out as `AnchorTarget::build_targets` expects them.
#[derive(Clone, Debug)]
pub struct SceneTensors<B: Backend> {
    /// `[num_anchors, 4]`
    pub anchors: Tensor<B, 2>,
    /// `[batch_size, num_anchors]`
    pub valid_flags: Tensor<B, 2, Int>,
    /// `[batch_size, max_gt, 4]`
    pub gt_boxes: Tensor<B, 3>,
    /// `[batch_size, max_gt]`
    pub gt_class_ids: Tensor<B, 2, Int>,
}

impl Scene {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn batch_size(&self) -> usize {
        self.valid_flags.len()
    }

    pub fn to_tensors<B: Backend>(&self, device: &Device<B>) -> Result<SceneTensors<B>, TargetError> {
        let batch_size = self.batch_size();
        let num_anchors = self.anchors.len();

        if self.gt_boxes.len() != batch_size || self.gt_class_ids.len() != batch_size {
            return Err(TargetError::ShapeMismatch(format!(
                "scene has {batch_size} valid flag rows, {} ground truth sets and {} class id sets",
                self.gt_boxes.len(),
                self.gt_class_ids.len()
            )));
        }

        if let Some((i, flags)) = self
            .valid_flags
            .iter()
            .enumerate()
            .find(|(_, flags)| flags.len() != num_anchors)
        {
            return Err(TargetError::ShapeMismatch(format!(
                "image {i} has {} valid flags for {num_anchors} anchors",
                flags.len()
            )));
        }

        if let Some((i, (boxes, ids))) = self
            .gt_boxes
            .iter()
            .zip(&self.gt_class_ids)
            .enumerate()
            .find(|(_, (boxes, ids))| boxes.len() != ids.len())
        {
            return Err(TargetError::ShapeMismatch(format!(
                "image {i} has {} ground truth boxes but {} class ids",
                boxes.len(),
                ids.len()
            )));
        }

        // At least one padding row keeps the ground truth tensors non empty
        let max_gt = self.gt_boxes.iter().map(Vec::len).max().unwrap_or(0).max(1);

        let mut gt_boxes = Vec::with_capacity(batch_size * max_gt * 4);
        let mut gt_class_ids = Vec::with_capacity(batch_size * max_gt);

        for (boxes, ids) in self.gt_boxes.iter().zip(&self.gt_class_ids) {
            let padding = max_gt - boxes.len();

            gt_boxes.extend(boxes.iter().flatten().copied());
            gt_boxes.extend(std::iter::repeat_n(0.0_f32, padding * 4));

            gt_class_ids.extend(ids.iter().copied());
            gt_class_ids.extend(std::iter::repeat_n(0_i64, padding));
        }

        let valid_flags = self.valid_flags.iter().flatten().copied().collect::<Vec<i64>>();

        Ok(SceneTensors {
            anchors: boxes_from_slice(&self.anchors, device),
            valid_flags: Tensor::from_data(
                TensorData::new(valid_flags, [batch_size, num_anchors]),
                device,
            ),
            gt_boxes: Tensor::from_data(
                TensorData::new(gt_boxes, [batch_size, max_gt, 4]),
                device,
            ),
            gt_class_ids: Tensor::from_data(
                TensorData::new(gt_class_ids, [batch_size, max_gt]),
                device,
            ),
        })
    }
}
