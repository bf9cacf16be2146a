//! Weight loading utilities for GPT models

use crate::error::{StoneError, StoneResult};
use anyhow::Result;
use half::{bf16, f16};
use ndarray::{Array1, Array2};
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::path::Path;

/// Prefix used by language-model state dicts for the transformer body.
const BODY_PREFIX: &str = "transformer.";

/// All tensors of one weight file, converted to f32.
pub struct ModelWeights {
    tensors: HashMap<String, Vec<f32>>,
    shapes: HashMap<String, Vec<usize>>,
}

impl ModelWeights {
    /// Read a safetensors file from disk.
    pub fn load(path: &Path) -> StoneResult<Self> {
        let data = std::fs::read(path).map_err(|e| StoneError::AssetLoad {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        Self::from_bytes(&data).map_err(|source| StoneError::AssetLoad {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let tensors = SafeTensors::deserialize(data)?;

        let mut tensor_data = HashMap::new();
        let mut shapes = HashMap::new();

        for (name, view) in tensors.tensors() {
            let data = decode_f32(view.dtype(), view.data())
                .map_err(|e| anyhow::anyhow!("tensor '{}': {}", name, e))?;
            shapes.insert(name.clone(), view.shape().to_vec());
            tensor_data.insert(name, data);
        }

        Ok(Self {
            tensors: tensor_data,
            shapes,
        })
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn shape(&self, name: &str) -> Option<&[usize]> {
        self.resolve(name)
            .and_then(|key| self.shapes.get(key))
            .map(Vec::as_slice)
    }

    /// Fetch a 1D tensor, checking it has exactly `len` elements.
    pub fn get_array1(&self, name: &str, len: usize) -> StoneResult<Array1<f32>> {
        let (data, shape) = self.lookup(name)?;
        if shape != [len] {
            return Err(StoneError::ShapeMismatch {
                tensor: name.to_string(),
                expected: vec![len],
                actual: shape.to_vec(),
            });
        }
        Ok(Array1::from_vec(data.clone()))
    }

    /// Fetch a 2D tensor, checking it has exactly `dim` shape.
    pub fn get_array2(&self, name: &str, dim: (usize, usize)) -> StoneResult<Array2<f32>> {
        let (data, shape) = self.lookup(name)?;
        if shape != [dim.0, dim.1] {
            return Err(StoneError::ShapeMismatch {
                tensor: name.to_string(),
                expected: vec![dim.0, dim.1],
                actual: shape.to_vec(),
            });
        }
        Array2::from_shape_vec(dim, data.clone())
            .map_err(|e| StoneError::Inference(anyhow::anyhow!("Shape error: {}", e)))
    }

    fn lookup(&self, name: &str) -> StoneResult<(&Vec<f32>, &[usize])> {
        let key = self
            .resolve(name)
            .ok_or_else(|| StoneError::MissingTensor(name.to_string()))?;
        Ok((&self.tensors[key], self.shapes[key].as_slice()))
    }

    /// Exact name first, then the name with the body prefix stripped.
    fn resolve<'a>(&self, name: &'a str) -> Option<&'a str> {
        if self.tensors.contains_key(name) {
            return Some(name);
        }
        name.strip_prefix(BODY_PREFIX)
            .filter(|short| self.tensors.contains_key(*short))
    }
}

/// Convert raw little-endian tensor bytes to f32.
fn decode_f32(dtype: Dtype, bytes: &[u8]) -> Result<Vec<f32>> {
    let data = match dtype {
        Dtype::F32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F16 => bytes
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::BF16 => bytes
            .chunks_exact(2)
            .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        other => anyhow::bail!("unsupported dtype {:?}", other),
    };
    Ok(data)
}
