//! Failure taxonomy of the viewer.
//!
//! Collaborators (file loading, glTF parsing, the render backend) report
//! `anyhow` errors. The render loop wraps them into a [`ViewerError`] at the
//! point where the failure is contained, so hosts can tell a broken model
//! apart from a transient frame hiccup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewerError {
    /// The scene file could not be fetched or parsed.
    #[error("failed to load {filename}: {source:#}")]
    LoadFailure {
        filename: String,
        #[source]
        source: anyhow::Error,
    },

    /// The scene parsed fine but produced no actors.
    #[error("{filename} loaded without error, but didn't add any actors")]
    EmptyScene { filename: String },

    /// A clip with a non-positive duration cannot be sampled.
    #[error("animation clip {name:?} has invalid duration {duration}")]
    InvalidClip { name: String, duration: f32 },

    #[error("could not resolve skeleton of skin {skin}: {reason}")]
    SkeletonResolution { skin: usize, reason: String },

    /// Draw submission failed, usually because the surface is gone.
    #[error("draw submission failed: {0:#}")]
    SubmissionFailure(anyhow::Error),

    #[error("frame failed: {0:#}")]
    TransientFrameFailure(anyhow::Error),

    #[error("dropped files but couldn't find a model to load")]
    NoModelFile,
}

impl ViewerError {
    pub fn load(filename: impl Into<String>, source: anyhow::Error) -> Self {
        Self::LoadFailure {
            filename: filename.into(),
            source,
        }
    }

    /// Failures of this kind are recovered inside the load cycle.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::LoadFailure { .. } | Self::EmptyScene { .. })
    }
}
