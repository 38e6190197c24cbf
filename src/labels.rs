use std::fmt;

use burn::{
    prelude::Backend,
    tensor::{Int, Tensor},
};

use crate::{error::TargetError, tensor_ops::to_host_i64};

/// Training label of a single anchor.
///
/// The discriminants are the values written into the `Int` match tensors handed to the
/// training loop: `1` positive, `-1` negative and `0` neutral. Neutral anchors do not
/// contribute to the loss.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Match {
    Negative = -1,
    Neutral = 0,
    Positive = 1,
}

impl Match {
    /// Returns the tensor value of the label.
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Maps a tensor value back to a label, `None` for anything outside `{-1, 0, 1}`.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Match::Negative),
            0 => Some(Match::Neutral),
            1 => Some(Match::Positive),
            _ => None,
        }
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Match::Negative => "negative",
            Match::Neutral => "neutral",
            Match::Positive => "positive",
        };

        f.write_str(name)
    }
}

/// Reads a `[num_anchors]` match tensor back into labels.
pub fn labels_from_tensor<B: Backend>(
    matches: Tensor<B, 1, Int>,
) -> Result<Vec<Match>, TargetError> {
    to_host_i64(matches)?
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            Match::from_i64(value).ok_or_else(|| {
                TargetError::TensorData(format!("anchor {i} has label {value}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};

    type B = NdArray<f32>;

    #[test]
    fn test_tensor_values() {
        for label in [Match::Negative, Match::Neutral, Match::Positive] {
            assert_eq!(Match::from_i64(label.as_i64()), Some(label));
        }

        assert_eq!(Match::Negative.as_i64(), -1);
        assert_eq!(Match::Positive.as_i64(), 1);
        assert_eq!(Match::from_i64(2), None);
    }

    #[test]
    fn test_labels_from_tensor() {
        let device = &NdArrayDevice::default();

        let labels =
            labels_from_tensor(Tensor::<B, 1, Int>::from_data([1, -1, 0], device)).unwrap();

        assert_eq!(labels, vec![Match::Positive, Match::Negative, Match::Neutral]);
        assert_eq!(
            labels.iter().map(|l| l.to_string()).collect::<Vec<String>>(),
            vec!["positive", "negative", "neutral"]
        );

        assert!(matches!(
            labels_from_tensor(Tensor::<B, 1, Int>::from_data([1, 3], device)),
            Err(TargetError::TensorData(_))
        ));
    }
}
