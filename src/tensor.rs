//! The core tensor value type threaded between sessions.
//!
//! A [`Tensor`] is a value-like triple of dtype, dims, and a contiguous
//! buffer. The state bundle, speaker embeddings, and every session input/
//! output are all expressed in terms of this one type so that state
//! propagation can compare and coerce dtypes uniformly.

/// Element dtype of a [`Tensor`]. The model family only ever uses these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    I64,
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::F32 => write!(f, "f32"),
            Self::I64 => write!(f, "i64"),
        }
    }
}

/// A value-like tensor: dtype and buffer can never disagree because the
/// buffer is stored inside the dtype-tagged variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    F32 { dims: Vec<usize>, data: Vec<f32> },
    I64 { dims: Vec<usize>, data: Vec<i64> },
}

impl Tensor {
    /// Build an f32 tensor, panicking if `data.len()` doesn't match the
    /// product of `dims` (a programmer error at every call site).
    pub fn f32(dims: impl Into<Vec<usize>>, data: impl Into<Vec<f32>>) -> Self {
        let dims = dims.into();
        let data = data.into();
        debug_assert_eq!(dims.iter().product::<usize>(), data.len());
        Self::F32 { dims, data }
    }

    /// Build an i64 tensor, panicking if `data.len()` doesn't match the
    /// product of `dims`.
    pub fn i64(dims: impl Into<Vec<usize>>, data: impl Into<Vec<i64>>) -> Self {
        let dims = dims.into();
        let data = data.into();
        debug_assert_eq!(dims.iter().product::<usize>(), data.len());
        Self::I64 { dims, data }
    }

    /// A zero-filled tensor of the given dtype and shape.
    pub fn zeros(dtype: DType, dims: Vec<usize>) -> Self {
        let len = dims.iter().product();
        match dtype {
            DType::F32 => Self::F32 {
                dims,
                data: vec![0.0; len],
            },
            DType::I64 => Self::I64 {
                dims,
                data: vec![0; len],
            },
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Self::F32 { .. } => DType::F32,
            Self::I64 { .. } => DType::I64,
        }
    }

    pub fn dims(&self) -> &[usize] {
        match self {
            Self::F32 { dims, .. } => dims,
            Self::I64 { dims, .. } => dims,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::F32 { data, .. } => Some(data),
            Self::I64 { .. } => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            Self::I64 { data, .. } => Some(data),
            Self::F32 { .. } => None,
        }
    }

    pub fn into_f32(self) -> Option<Vec<f32>> {
        match self {
            Self::F32 { data, .. } => Some(data),
            Self::I64 { .. } => None,
        }
    }

    /// Coerce this tensor to the target dtype, converting element-wise:
    /// f32 → i64 rounds then widens, i64 → f32 widens. A no-op if already
    /// the target dtype.
    pub fn coerce_to(self, target: DType) -> Self {
        match (self, target) {
            (t @ Self::F32 { .. }, DType::F32) | (t @ Self::I64 { .. }, DType::I64) => t,
            (Self::F32 { dims, data }, DType::I64) => {
                let data = data.into_iter().map(|v| v.round() as i64).collect();
                Self::I64 { dims, data }
            }
            (Self::I64 { dims, data }, DType::F32) => {
                let data = data.into_iter().map(|v| v as f32).collect();
                Self::F32 { dims, data }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_f32_has_correct_length() {
        let t = Tensor::zeros(DType::F32, vec![2, 3]);
        assert_eq!(t.as_f32().expect("f32").len(), 6);
    }

    #[test]
    fn zeros_i64_has_correct_length() {
        let t = Tensor::zeros(DType::I64, vec![1]);
        assert_eq!(t.as_i64().expect("i64").len(), 1);
    }

    #[test]
    fn coerce_f32_to_i64_rounds_to_nearest() {
        let t = Tensor::f32(vec![1], vec![3.7_f32]);
        let coerced = t.coerce_to(DType::I64);
        assert_eq!(coerced.as_i64().expect("i64"), &[4]);
    }

    #[test]
    fn coerce_i64_to_f32_widens() {
        let t = Tensor::i64(vec![1], vec![4_i64]);
        let coerced = t.coerce_to(DType::F32);
        assert_eq!(coerced.as_f32().expect("f32"), &[4.0]);
    }

    #[test]
    fn coerce_same_dtype_is_identity() {
        let t = Tensor::f32(vec![1], vec![1.5_f32]);
        let coerced = t.clone().coerce_to(DType::F32);
        assert_eq!(coerced, t);
    }

    #[test]
    fn coerce_rounds_half_away_from_zero_for_negative() {
        let t = Tensor::f32(vec![1], vec![-2.5_f32]);
        let coerced = t.coerce_to(DType::I64);
        assert_eq!(coerced.as_i64().expect("i64"), &[-3]);
    }
}
