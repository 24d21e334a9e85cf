//! Graph session hosting.
//!
//! [`SessionHandle`] is a trait rather than a concrete type specifically so
//! the AR Driver and Flow-Matching Refiner can run against either a real
//! `ort::session::Session` or, in tests, an in-memory mock — no ONNX
//! Runtime model binaries are available in this environment.

use crate::error::{EngineError, Result};
use crate::tensor::{DType, Tensor};
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::ValueType;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// An opaque graph-session holder.
pub trait SessionHandle: Send {
    /// Ordered input identifiers.
    fn input_names(&self) -> Vec<String>;
    /// Ordered output identifiers.
    fn output_names(&self) -> Vec<String>;
    /// Declared dtype of an input, if the session reports one.
    fn input_dtype(&self, name: &str) -> Option<DType>;
    /// Declared dims of an input, if the session reports them. Dynamic axes
    /// are reported as `-1`.
    fn input_dims(&self, name: &str) -> Option<Vec<i64>>;
    /// Run the graph, returning exactly one tensor per output name.
    fn run(&mut self, inputs: HashMap<String, Tensor>) -> Result<HashMap<String, Tensor>>;
}

/// A [`SessionHandle`] backed by a real `ort::session::Session`.
pub struct OrtSessionHandle {
    name: String,
    session: Session,
}

impl OrtSessionHandle {
    /// Load an ONNX graph from disk.
    pub fn load(name: &str, path: &Path) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| model_load_err(name, &e))?
            .commit_from_file(path)
            .map_err(|e| model_load_err(name, &e))?;
        info!(session = name, path = %path.display(), "session loaded");
        Ok(Self {
            name: name.to_owned(),
            session,
        })
    }

    fn dtype_of(ty: TensorElementType) -> Option<DType> {
        match ty {
            TensorElementType::Float32 => Some(DType::F32),
            TensorElementType::Int64 => Some(DType::I64),
            _ => None,
        }
    }
}

fn model_load_err(session: &str, cause: &impl std::fmt::Display) -> EngineError {
    EngineError::ModelLoad {
        session: session.to_owned(),
        cause: cause.to_string(),
    }
}

fn session_err(session: &str, cause: impl std::fmt::Display) -> EngineError {
    EngineError::Session {
        session: session.to_owned(),
        cause: cause.to_string(),
    }
}

impl SessionHandle for OrtSessionHandle {
    fn input_names(&self) -> Vec<String> {
        self.session.inputs.iter().map(|i| i.name.clone()).collect()
    }

    fn output_names(&self) -> Vec<String> {
        self.session
            .outputs
            .iter()
            .map(|o| o.name.clone())
            .collect()
    }

    fn input_dtype(&self, name: &str) -> Option<DType> {
        let input = self.session.inputs.iter().find(|i| i.name == name)?;
        match &input.input_type {
            ValueType::Tensor { ty, .. } => Self::dtype_of(*ty),
            _ => None,
        }
    }

    fn input_dims(&self, name: &str) -> Option<Vec<i64>> {
        let input = self.session.inputs.iter().find(|i| i.name == name)?;
        match &input.input_type {
            ValueType::Tensor { shape, .. } => Some(shape.as_ref().to_vec()),
            _ => None,
        }
    }

    fn run(&mut self, inputs: HashMap<String, Tensor>) -> Result<HashMap<String, Tensor>> {
        let mut feed: Vec<(Cow<'static, str>, ort::value::DynValue)> =
            Vec::with_capacity(inputs.len());
        for (name, tensor) in inputs {
            let value = match tensor {
                Tensor::F32 { dims, data } => {
                    let dims: Vec<i64> = dims.iter().map(|&d| d as i64).collect();
                    ort::value::Tensor::from_array((dims, data))
                        .map_err(|e| session_err(&self.name, e))?
                        .into_dyn()
                }
                Tensor::I64 { dims, data } => {
                    let dims: Vec<i64> = dims.iter().map(|&d| d as i64).collect();
                    ort::value::Tensor::from_array((dims, data))
                        .map_err(|e| session_err(&self.name, e))?
                        .into_dyn()
                }
            };
            feed.push((Cow::Owned(name), value));
        }

        let outputs = self
            .session
            .run(feed)
            .map_err(|e| session_err(&self.name, e))?;

        let mut result = HashMap::with_capacity(outputs.len());
        for (name, value) in outputs.iter() {
            if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
                let dims = shape.iter().map(|&d| d as usize).collect::<Vec<_>>();
                result.insert((*name).to_owned(), Tensor::f32(dims, data.to_vec()));
            } else if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
                let dims = shape.iter().map(|&d| d as usize).collect::<Vec<_>>();
                result.insert((*name).to_owned(), Tensor::i64(dims, data.to_vec()));
            } else {
                return Err(session_err(
                    &self.name,
                    format!("output '{name}' has unsupported dtype"),
                ));
            }
        }
        Ok(result)
    }
}

/// The five graph sessions the core threads audio synthesis through.
pub struct SessionHost {
    pub voice_encoder: Box<dyn SessionHandle>,
    pub text_conditioner: Box<dyn SessionHandle>,
    pub backbone: Box<dyn SessionHandle>,
    pub flow_refiner: Box<dyn SessionHandle>,
    pub audio_decoder: Box<dyn SessionHandle>,
}

/// Prefix used to recognize recurrent-state inputs on the backbone session.
pub const STATE_INPUT_PREFIX: &str = "state_";
/// Prefix used to recognize the corresponding propagated outputs.
pub const STATE_OUTPUT_PREFIX: &str = "out_state_";

impl SessionHost {
    /// Enumerate `state_i` input names declared by the backbone, in the
    /// order the session reports them. This must be done dynamically:
    /// different backbone builds expose different slot counts.
    pub fn discover_state_slots(&self) -> Vec<String> {
        self.backbone
            .input_names()
            .into_iter()
            .filter(|n| n.starts_with(STATE_INPUT_PREFIX))
            .collect()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    //! An in-memory [`SessionHandle`] for tests, returning deterministic
    //! tensors without any ONNX Runtime dependency.
    use super::{DType, HashMap, Result, SessionHandle, Tensor};

    type RunFn = Box<dyn Fn(&HashMap<String, Tensor>) -> HashMap<String, Tensor> + Send>;

    pub struct MockSessionHandle {
        pub inputs: Vec<(String, DType, Vec<i64>)>,
        pub outputs: Vec<String>,
        pub on_run: RunFn,
        pub call_count: usize,
    }

    impl MockSessionHandle {
        pub fn new(
            inputs: Vec<(String, DType, Vec<i64>)>,
            outputs: Vec<String>,
            on_run: RunFn,
        ) -> Self {
            Self {
                inputs,
                outputs,
                on_run,
                call_count: 0,
            }
        }
    }

    impl SessionHandle for MockSessionHandle {
        fn input_names(&self) -> Vec<String> {
            self.inputs.iter().map(|(n, _, _)| n.clone()).collect()
        }

        fn output_names(&self) -> Vec<String> {
            self.outputs.clone()
        }

        fn input_dtype(&self, name: &str) -> Option<DType> {
            self.inputs
                .iter()
                .find(|(n, _, _)| n == name)
                .map(|(_, dt, _)| *dt)
        }

        fn input_dims(&self, name: &str) -> Option<Vec<i64>> {
            self.inputs
                .iter()
                .find(|(n, _, _)| n == name)
                .map(|(_, _, d)| d.clone())
        }

        fn run(&mut self, inputs: HashMap<String, Tensor>) -> Result<HashMap<String, Tensor>> {
            self.call_count += 1;
            Ok((self.on_run)(&inputs))
        }
    }
}
