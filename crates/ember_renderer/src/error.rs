//! Error taxonomy for the render core.
//!
//! Nothing here aborts a render: configuration problems are reported
//! synchronously with no state change, bad handles make the operation a
//! no-op, and a failed acceleration-structure build leaves the mesh
//! unrenderable while the pass continues.

use ember_core::MeshError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An invalid preference value was rejected; the previous value is
    /// kept.
    #[error("configuration rejected: {0}")]
    ConfigRejected(&'static str),

    /// An out-of-range mesh/instance/camera/material index.
    #[error("invalid {kind} handle {index}")]
    InvalidHandle { kind: &'static str, index: usize },

    /// BVH construction failed for a mesh.
    #[error("acceleration structure build failed: {0}")]
    BuildFailed(#[from] MeshError),
}

impl Error {
    pub(crate) fn handle(kind: &'static str, index: usize) -> Self {
        Error::InvalidHandle { kind, index }
    }
}
