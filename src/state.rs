//! The recurrent state bundle threaded through every backbone run.

use crate::session::{SessionHandle, STATE_OUTPUT_PREFIX};
use crate::tensor::{DType, Tensor};
use std::collections::HashMap;

/// "Tall" KV-cache fallback shape for f32 state slots when the session
/// reports a dtype but no dims. `1000` is the backbone's discovered
/// max-context length — not an invented constant, but the value every
/// backbone build to date has reported.
pub const FALLBACK_TALL_DIMS: [usize; 5] = [2, 1, 1000, 16, 64];
/// Fallback shape for i64 scalar-marker state slots (e.g. step counters).
pub const FALLBACK_SCALAR_DIMS: [usize; 1] = [1];

/// `state_i` → Tensor, with the invariant that every entry's dtype matches
/// the backbone's declared input dtype for that slot.
pub type StateBundle = HashMap<String, Tensor>;

/// Build a zero-initialized state bundle for every `state_*` input the
/// backbone declares.
///
/// Prefer the session-reported dtype and dims; when dims are unavailable,
/// fall back to a shape selected by dtype: f32 → the tall KV-cache shape,
/// i64 → the scalar-marker shape. The "empty" `[0]` shape is only used when
/// the session itself reports a dims vector containing a zero — never as a
/// blind default.
pub fn init_state_bundle(backbone: &dyn SessionHandle, slot_names: &[String]) -> StateBundle {
    let mut bundle = StateBundle::with_capacity(slot_names.len());
    for name in slot_names {
        let dtype = backbone.input_dtype(name).unwrap_or(DType::F32);
        let dims = backbone
            .input_dims(name)
            .filter(|d| d.iter().all(|&v| v >= 0))
            .map(|d| d.into_iter().map(|v| v as usize).collect::<Vec<_>>())
            .unwrap_or_else(|| fallback_dims(dtype));
        bundle.insert(name.clone(), Tensor::zeros(dtype, dims));
    }
    bundle
}

fn fallback_dims(dtype: DType) -> Vec<usize> {
    match dtype {
        DType::F32 => FALLBACK_TALL_DIMS.to_vec(),
        DType::I64 => FALLBACK_SCALAR_DIMS.to_vec(),
    }
}

/// After a backbone run, replace every `state_i` entry in `bundle` with the
/// corresponding `out_state_i` output, coercing dtype when the expected
/// input dtype differs from what the backbone emitted.
pub fn propagate_state(
    bundle: &mut StateBundle,
    outputs: &HashMap<String, Tensor>,
    backbone: &dyn SessionHandle,
) {
    for (input_name, current) in bundle.iter_mut() {
        let output_name = format!("{STATE_OUTPUT_PREFIX}{}", &input_name[crate::session::STATE_INPUT_PREFIX.len()..]);
        let Some(new_value) = outputs.get(&output_name) else {
            continue;
        };
        let expected_dtype = backbone.input_dtype(input_name).unwrap_or(current.dtype());
        *current = new_value.clone().coerce_to(expected_dtype);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::MockSessionHandle;

    fn mock(inputs: Vec<(String, DType, Vec<i64>)>) -> MockSessionHandle {
        MockSessionHandle::new(inputs, vec![], Box::new(|_| HashMap::new()))
    }

    #[test]
    fn init_uses_session_reported_dims_when_available() {
        let backbone = mock(vec![("state_0".into(), DType::F32, vec![1, 2])]);
        let bundle = init_state_bundle(&backbone, &["state_0".to_owned()]);
        assert_eq!(bundle["state_0"].dims(), &[1, 2]);
    }

    #[test]
    fn init_falls_back_to_tall_shape_for_f32_without_dims() {
        let backbone = mock(vec![("state_0".into(), DType::F32, vec![-1])]);
        let bundle = init_state_bundle(&backbone, &["state_0".to_owned()]);
        assert_eq!(bundle["state_0"].dims(), &FALLBACK_TALL_DIMS);
    }

    #[test]
    fn init_falls_back_to_scalar_shape_for_i64_without_dims() {
        let backbone = mock(vec![("state_1".into(), DType::I64, vec![-1])]);
        let bundle = init_state_bundle(&backbone, &["state_1".to_owned()]);
        assert_eq!(bundle["state_1"].dims(), &FALLBACK_SCALAR_DIMS);
    }

    #[test]
    fn init_honors_session_reported_zero_dim() {
        let backbone = mock(vec![("state_2".into(), DType::F32, vec![0])]);
        let bundle = init_state_bundle(&backbone, &["state_2".to_owned()]);
        assert_eq!(bundle["state_2"].dims(), &[0]);
    }

    #[test]
    fn propagate_coerces_f32_output_to_i64_input_rounding() {
        let backbone = mock(vec![("state_2".into(), DType::I64, vec![1])]);
        let mut bundle = StateBundle::new();
        bundle.insert("state_2".to_owned(), Tensor::i64(vec![1], vec![0_i64]));

        let mut outputs = HashMap::new();
        outputs.insert("out_state_2".to_owned(), Tensor::f32(vec![1], vec![3.7_f32]));

        propagate_state(&mut bundle, &outputs, &backbone);
        assert_eq!(bundle["state_2"].as_i64(), Some(&[4_i64][..]));
    }

    #[test]
    fn propagate_leaves_slot_untouched_when_output_absent() {
        let backbone = mock(vec![("state_0".into(), DType::F32, vec![1])]);
        let mut bundle = StateBundle::new();
        bundle.insert("state_0".to_owned(), Tensor::f32(vec![1], vec![9.0_f32]));

        propagate_state(&mut bundle, &HashMap::new(), &backbone);
        assert_eq!(bundle["state_0"].as_f32(), Some(&[9.0_f32][..]));
    }
}
