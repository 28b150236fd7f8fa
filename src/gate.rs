//! Result Cache Gate
//!
//! Every host-queued request carries an annotation: a force flag (true only
//! when the human pressed this node's own button), the last backend-computed
//! params hash, and the last preview references. The backend hashes the
//! incoming request and, when force is off and the hash matches, replays the
//! stored preview instead of invoking the remote provider. The client only
//! mirrors hashes the backend returns; it never computes one, so the two
//! sides cannot drift.

use crate::backend::{GenerateResult, NodeSettings};
use crate::host::{ImageRef, NodeInstance};
use crate::types::ParamsHash;
use serde::Serialize;
use tracing::debug;

/// Annotation attached to a host-queued generation request.
#[derive(Debug, Clone, Serialize)]
pub struct CacheAnnotation {
    pub force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_params_hash: Option<ParamsHash>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub last_previews: Vec<ImageRef>,
}

/// Build the annotation for an outgoing request from node-local state.
///
/// With `smart_cache_hash_check` disabled the hash is withheld, so the
/// backend always re-executes.
pub fn annotate(node: &NodeInstance, force: bool, settings: &NodeSettings) -> CacheAnnotation {
    let last_params_hash = if settings.smart_cache_hash_check {
        node.properties.last_params_hash.clone()
    } else {
        None
    };
    CacheAnnotation {
        force,
        last_params_hash,
        last_previews: node.properties.last_previews.clone(),
    }
}

/// Mirror a successful generation result into node-local persisted state.
///
/// `replayed` marks a cache-hit replay: the selected preview index survives
/// (clamped to the preview count); a freshly executed generation resets it
/// to 0. Failed results change nothing.
pub fn absorb(node: &mut NodeInstance, result: &GenerateResult, replayed: bool) {
    if !result.success {
        return;
    }

    if let Some(hash) = &result.params_hash {
        debug!(node = %node.id, hash = %hash, replayed, "mirroring backend params hash");
        node.properties.last_params_hash = Some(hash.clone());
    }
    if !result.preview_images.is_empty() {
        node.properties.last_previews = result.preview_images.clone();
    }

    if replayed {
        let count = node.properties.last_previews.len();
        if count > 0 && node.properties.image_selection >= count {
            node.properties.image_selection = count - 1;
        }
    } else {
        node.properties.image_selection = 0;
    }
}
