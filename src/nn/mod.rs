//! Neural Network inference.
//!
//! The detection pipeline only depends on the [`Model`] trait: a tensor goes in, a list of
//! tensors comes out. [`NeuralNetwork`] implements it on top of [`tract_onnx`].

pub mod tensor;

use std::{
    borrow::Cow,
    env,
    ops::Index,
    path::{Path, PathBuf},
    sync::Arc,
};

use tensor::Tensor;
use tract_onnx::prelude::{
    tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TVec, TypedFact, TypedOp,
};

use crate::params::ModelType;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Environment variable overriding the directory packaged models are loaded from.
pub const MODEL_DIR_VAR: &str = "HANDTRACK_MODEL_DIR";

/// Default directory containing the packaged models.
pub const DEFAULT_MODEL_DIR: &str = "models";

/// An opaque, loaded object detection network.
///
/// Dropping the model releases all resources it holds.
pub trait Model: Send {
    /// Returns the fixed `[N, H, W, C]` input shape of the network, if it has one.
    ///
    /// This is used for the warm-up inference pass after loading. Networks that accept
    /// arbitrarily sized inputs can return `None`, in which case a default shape is used.
    fn input_shape(&self) -> Option<[usize; 4]>;

    /// Runs the network on `input`.
    ///
    /// A detection network is expected to return the class scores of shape
    /// `[1, num_boxes, num_classes]` as its first output, and the box coordinates of shape
    /// `[1, num_boxes, 1, 4]` as its second.
    fn run(&self, input: &Tensor) -> anyhow::Result<Outputs>;
}

/// Acquires a [`Model`] for a given [`ModelType`].
pub trait ModelLoader {
    fn load(&self, model_type: &ModelType) -> anyhow::Result<Box<dyn Model>>;
}

impl<F> ModelLoader for F
where
    F: Fn(&ModelType) -> anyhow::Result<Box<dyn Model>>,
{
    fn load(&self, model_type: &ModelType) -> anyhow::Result<Box<dyn Model>> {
        self(model_type)
    }
}

/// Loads packaged ONNX models from a directory using [`tract_onnx`].
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    model_dir: PathBuf,
    outputs: Option<Vec<usize>>,
}

impl OnnxLoader {
    /// Creates a loader that looks for models in `model_dir`.
    pub fn new<P: Into<PathBuf>>(model_dir: P) -> Self {
        Self {
            model_dir: model_dir.into(),
            outputs: None,
        }
    }

    /// Selects and reorders the network outputs passed to the detector.
    ///
    /// The detector expects the class scores as the first output and the boxes as the second.
    /// Exported networks that emit additional outputs, or boxes before scores, can be adapted by
    /// listing the indices of the score and box outputs here. See
    /// [`Loader::with_output_selection`].
    pub fn with_output_selection<O: Into<Vec<usize>>>(mut self, outputs: O) -> Self {
        self.outputs = Some(outputs.into());
        self
    }

    /// Creates a loader for the directory named by `HANDTRACK_MODEL_DIR`, or [`DEFAULT_MODEL_DIR`]
    /// if the variable is unset.
    pub fn from_env() -> Self {
        let dir = env::var_os(MODEL_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR));
        log::debug!("loading models from '{}'", dir.display());
        Self::new(dir)
    }

    /// Returns the path the model for `model_type` is loaded from.
    ///
    /// Packaged models are looked up in the model directory, [`ModelType::Custom`] paths are used
    /// as given (relative ones resolve against the working directory).
    pub fn model_path(&self, model_type: &ModelType) -> PathBuf {
        match model_type {
            ModelType::Custom(path) => path.clone(),
            packaged => self.model_dir.join(packaged.file_name()),
        }
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self, model_type: &ModelType) -> anyhow::Result<Box<dyn Model>> {
        let path = self.model_path(model_type);
        log::debug!("loading {} from '{}'", model_type, path.display());
        let mut loader = NeuralNetwork::from_path(&path)?;
        if let Some(outputs) = &self.outputs {
            loader = loader.with_output_selection(outputs.clone());
        }
        Ok(Box::new(loader.load()?))
    }
}

/// Neural network loader.
pub struct Loader<'a> {
    model_data: Cow<'a, [u8]>,
    outputs: Option<Vec<usize>>,
}

impl<'a> Loader<'a> {
    fn new(data: Cow<'a, [u8]>) -> Self {
        Self {
            model_data: data,
            outputs: None,
        }
    }

    /// Only compute the specified outputs during inference.
    ///
    /// This takes a list of [`usize`]s corresponding to network output indices. When called, the
    /// [`Outputs`] returned from [`NeuralNetwork::estimate`] will only contain the chosen output
    /// tensors, in the given order.
    ///
    /// This can be used to adapt exported detection networks that produce additional outputs, or
    /// produce boxes before scores.
    pub fn with_output_selection<O>(mut self, outputs: O) -> Self
    where
        O: Into<Vec<usize>>,
    {
        self.outputs = Some(outputs.into());
        self
    }

    /// Loads and optimizes the network.
    ///
    /// Returns an error if the network data is malformed, if the network data is incomplete, or if
    /// the network uses unimplemented operations.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*self.model_data)?
            .into_optimized()?;
        let outputs = graph.output_outlets()?;
        let selected_outputs = match self.outputs {
            Some(indices) => indices
                .iter()
                .map(|&i| {
                    outputs.get(i).copied().ok_or_else(|| {
                        anyhow::anyhow!(
                            "output index {} out of range, network has {} outputs",
                            i,
                            outputs.len()
                        )
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => outputs.to_vec(),
        };
        let plan = SimplePlan::new_for_outputs(graph, &selected_outputs)?;

        let input_shape = input_shape(&plan)?;
        log::debug!(
            "loaded network with {} outputs, input shape {:?}",
            selected_outputs.len(),
            input_shape
        );

        Ok(NeuralNetwork(Arc::new(NeuralNetworkImpl {
            plan,
            input_shape,
        })))
    }
}

fn input_shape(plan: &Plan) -> anyhow::Result<Option<[usize; 4]>> {
    let model = plan.model();
    if model.inputs.len() != 1 {
        anyhow::bail!(
            "detection network has to take exactly 1 input, this one takes {}",
            model.inputs.len(),
        );
    }

    let fact = model.input_fact(0)?;
    Ok(match fact.shape.as_concrete() {
        Some(&[n, h, w, c]) => Some([n, h, w, c]),
        Some(shape) => anyhow::bail!("expected a 4-dimensional NHWC input, got {:?}", shape),
        None => None,
    })
}

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<NeuralNetworkImpl>);

struct NeuralNetworkImpl {
    plan: Plan,
    input_shape: Option<[usize; 4]>,
}

impl NeuralNetwork {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<'a, P: AsRef<Path>>(path: P) -> anyhow::Result<Loader<'a>> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl<'a>(path: &Path) -> anyhow::Result<Loader<'a>> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => anyhow::bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let model_data = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read '{}': {}", path.display(), e))?;
        Ok(Loader::new(model_data.into()))
    }

    /// Loads a pre-trained model from an in-memory ONNX file.
    pub fn from_onnx(raw: &[u8]) -> Loader<'_> {
        Loader::new(raw.into())
    }

    /// Runs the network on a set of [`Inputs`], returning the estimated [`Outputs`].
    #[doc(alias = "infer")]
    pub fn estimate(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let inputs = inputs
            .iter()
            .map(|t| Ok(TValue::from_const(Arc::new(t.to_tract()?))))
            .collect::<anyhow::Result<TVec<_>>>()?;
        let outputs = self.0.plan.run(inputs)?;
        let outputs = outputs
            .iter()
            .map(|tract| Tensor::from_tract(tract))
            .collect::<anyhow::Result<_>>()?;
        Ok(Outputs { inner: outputs })
    }
}

impl Model for NeuralNetwork {
    fn input_shape(&self) -> Option<[usize; 4]> {
        self.0.input_shape
    }

    fn run(&self, input: &Tensor) -> anyhow::Result<Outputs> {
        self.estimate(&Inputs::from(input.clone()))
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug)]
pub struct Outputs {
    inner: TVec<Tensor>,
}

impl Outputs {
    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over the output tensors.
    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.inner.iter()
    }

    /// Consumes `self`, returning the contained tensors.
    pub fn into_vec(self) -> Vec<Tensor> {
        self.inner.into_vec()
    }
}

impl Index<usize> for Outputs {
    type Output = Tensor;

    fn index(&self, index: usize) -> &Tensor {
        &self.inner[index]
    }
}

impl<'a> IntoIterator for &'a Outputs {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Tensor> for Outputs {
    fn from_iter<T: IntoIterator<Item = Tensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[Tensor; N]> for Outputs {
    fn from(tensors: [Tensor; N]) -> Self {
        tensors.into_iter().collect()
    }
}

/// List of input tensors for neural network inference.
#[derive(Debug)]
pub struct Inputs {
    inner: TVec<Tensor>,
}

impl Inputs {
    fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.inner.iter()
    }
}

impl From<Tensor> for Inputs {
    fn from(t: Tensor) -> Self {
        Self { inner: tvec![t] }
    }
}
