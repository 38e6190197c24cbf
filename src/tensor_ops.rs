use burn::{
    prelude::Backend,
    tensor::{Device, Int, Tensor},
};

use crate::error::TargetError;

/// Reads a float tensor back to the host as a flat row-major `Vec<f32>`, whatever the
/// backend's float element type is.
pub fn to_host_f32<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<Vec<f32>, TargetError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| TargetError::TensorData(format!("{err:?}")))
}

/// Reads an `Int` tensor back to the host as a flat row-major `Vec<i64>`.
pub fn to_host_i64<B: Backend, const D: usize>(
    tensor: Tensor<B, D, Int>,
) -> Result<Vec<i64>, TargetError> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| TargetError::TensorData(format!("{err:?}")))
}

/// Builds a 1-d `Int` tensor of row indexes to be used with `select`.
pub fn index_tensor<B: Backend>(ids: &[usize], device: &Device<B>) -> Tensor<B, 1, Int> {
    let ids = ids.iter().map(|&i| i as i64).collect::<Vec<i64>>();

    Tensor::<B, 1, Int>::from_data(ids.as_slice(), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};

    #[test]
    pub fn test_to_host_f32() {
        let device = &NdArrayDevice::default();
        type B = NdArray<f32>;

        let t = Tensor::<B, 2>::from_data([[1.0, 2.0], [3.0, 4.5]], device);

        assert_eq!(to_host_f32(t).unwrap(), vec![1.0, 2.0, 3.0, 4.5]);
    }

    #[test]
    pub fn test_to_host_i64() {
        let device = &NdArrayDevice::default();
        type B = NdArray<f32>;

        let t = Tensor::<B, 1, Int>::from_data([-1, 0, 1], device);

        assert_eq!(to_host_i64(t).unwrap(), vec![-1, 0, 1]);
    }

    #[test]
    pub fn test_index_tensor_selects_rows() {
        let device = &NdArrayDevice::default();
        type B = NdArray<f32>;

        let t = Tensor::<B, 2>::from_data([[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]], device);
        let selected = t.select(0, index_tensor::<B>(&[2, 0], device));

        Tensor::<B, 2>::from_data([[2.0, 2.0], [0.0, 0.0]], device)
            .into_data()
            .assert_eq(&selected.to_data(), true);
    }
}
