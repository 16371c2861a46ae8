//! Observation and action spaces

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::{RLError, Result};

/// Shape of the observations an environment emits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationSpace {
    /// Flat vector of values
    FlatValues {
        /// Vector length
        dim: usize,
    },
    /// Image frames (height, width, channels)
    Image {
        /// Image height
        height: usize,
        /// Image width
        width: usize,
        /// Number of channels
        channels: usize,
    },
}

impl ObservationSpace {
    /// Dimension of a flat-valued space, or a config error for any other kind
    pub fn require_flat(&self) -> Result<usize> {
        match self {
            Self::FlatValues { dim } => Ok(*dim),
            other => Err(RLError::Config(format!(
                "Unsupported observation space: {other:?}"
            ))),
        }
    }
}

/// Shape and bounds of the actions an environment accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpace {
    /// Box of continuous values
    Continuous {
        /// Lower bounds for each dimension
        low: Vec<f32>,
        /// Upper bounds for each dimension
        high: Vec<f32>,
    },
    /// One of `n` discrete choices
    Discrete {
        /// Number of discrete actions
        n: usize,
    },
}

impl ActionSpace {
    /// Create a continuous space, checking that the bounds line up
    pub fn continuous(low: Vec<f32>, high: Vec<f32>) -> Result<Self> {
        if low.len() != high.len() {
            return Err(RLError::dim("action bounds", low.len(), high.len()));
        }
        if low.iter().zip(&high).any(|(l, h)| l > h) {
            return Err(RLError::Config(
                "action lower bound exceeds upper bound".to_string(),
            ));
        }
        Ok(Self::Continuous { low, high })
    }

    /// Symmetric continuous space `[-limit, limit]^dim`
    pub fn symmetric(dim: usize, limit: f32) -> Result<Self> {
        Self::continuous(vec![-limit; dim], vec![limit; dim])
    }

    /// Dimension of a continuous space, or a config error for any other kind
    pub fn require_continuous(&self) -> Result<usize> {
        match self {
            Self::Continuous { low, .. } => Ok(low.len()),
            other => Err(RLError::Config(format!(
                "Unsupported action space: {other:?}"
            ))),
        }
    }

    /// Clamp a continuous action into the box, leaving discrete actions as they are
    #[must_use]
    pub fn clip(&self, action: ArrayView1<f32>) -> Array1<f32> {
        match self {
            Self::Continuous { low, high } => action
                .iter()
                .zip(low.iter().zip(high))
                .map(|(&a, (&l, &h))| a.clamp(l, h))
                .collect(),
            Self::Discrete { .. } => action.to_owned(),
        }
    }
}
