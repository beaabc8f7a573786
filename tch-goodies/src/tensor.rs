use crate::common::*;

pub trait TensorExt {
    fn is_empty(&self) -> bool;

    /// Concatenate along `dim`, or create a zero tensor of `empty_shape` if
    /// there is nothing to concatenate.
    fn f_cat_or_empty<T>(
        tensors: &[T],
        dim: i64,
        empty_shape: &[i64],
        options: (Kind, Device),
    ) -> Result<Tensor>
    where
        T: Borrow<Tensor>;
}

impl TensorExt for Tensor {
    fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    fn f_cat_or_empty<T>(
        tensors: &[T],
        dim: i64,
        empty_shape: &[i64],
        options: (Kind, Device),
    ) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        if tensors.is_empty() {
            return Ok(Tensor::zeros(empty_shape, options));
        }
        Ok(Tensor::f_cat(tensors, dim)?)
    }
}
