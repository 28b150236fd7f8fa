//! Execution Dispatcher
//!
//! Decides how a node's work reaches the backend. Three paths: host-queued
//! with default exclusion (these nodes make billed, slow remote calls that
//! must not fire as a side effect of unrelated graph runs), button-triggered
//! independent submission that bypasses the host queue entirely so multiple
//! nodes can run concurrently, and dependency-scoped submission that queues
//! only the target node and its upstream closure.

use crate::backend::{Backend, GenerateRequest, GenerateResult, NodeSettings};
use crate::error::EngineError;
use crate::gate::{self, CacheAnnotation};
use crate::host::{ConnectionTable, GraphHost, NodeInstance};
use crate::sync::ParameterWidgetSynchronizer;
use crate::types::{ModelId, NodeId};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// How a node participates in a whole-graph queue submission.
#[derive(Debug, Clone)]
pub enum QueueDecision {
    /// Left out of the batch entirely.
    Excluded,
    /// Participates, marked cache-first so the backend replays a matching
    /// preview instead of re-invoking the provider.
    CacheFirst(CacheAnnotation),
}

/// Per-node dispatcher state.
#[derive(Default)]
pub struct ExecutionDispatcher {
    in_flight: AtomicBool,
}

/// Clears the in-flight flag on drop, so an abandoned submission future
/// cannot leave the button dead.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ExecutionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Path 1: whole-graph submission. Excluded by default; when exclusion is
    /// disabled the request goes out cache-first, never forced.
    pub fn queue_decision(&self, node: &NodeInstance, settings: &NodeSettings) -> QueueDecision {
        if settings.bypass_queue_prompt {
            debug!(node = %node.id, "excluded from whole-graph submission");
            QueueDecision::Excluded
        } else {
            QueueDecision::CacheFirst(gate::annotate(node, false, settings))
        }
    }

    /// Path 2: button-triggered independent submission.
    ///
    /// Returns `Ok(None)` when a call for this node is already in flight; the
    /// press is ignored, not queued. Image resolution failures abort before
    /// the billed call; remote failures leave the prior preview untouched.
    pub async fn run_independent(
        &self,
        node: &mut NodeInstance,
        sync: &ParameterWidgetSynchronizer,
        host: &dyn GraphHost,
        backend: &dyn Backend,
    ) -> Result<Option<GenerateResult>, EngineError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            info!(node = %node.id, "generation already in flight, ignoring press");
            return Ok(None);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let request = build_request(node, sync, host).await?;
        let result = backend.generate_independent(&request).await?;
        if !result.success {
            let message = result
                .error
                .unwrap_or_else(|| "All providers failed".to_string());
            warn!(node = %node.id, error = %message, "independent generation failed");
            return Err(EngineError::Generation(message));
        }

        gate::absorb(node, &result, result.cached);
        Ok(Some(result))
    }

    /// Path 3: host-queued submission restricted to this node and its
    /// upstream dependency closure.
    pub async fn submit_scoped(
        &self,
        node: &NodeInstance,
        host: &dyn GraphHost,
    ) -> Result<Vec<NodeId>, EngineError> {
        let scope = submission_scope(node.id, &host.connections());
        debug!(node = %node.id, scope = scope.len(), "scoped submission");
        host.queue_prompt(Some(scope.clone())).await?;
        Ok(scope)
    }
}

/// Depth-first reachability over connection-based inputs, starting at the
/// target. Literals and disconnected inputs never appear in the table, so
/// they are ignored by construction.
pub fn submission_scope(target: NodeId, table: &ConnectionTable) -> Vec<NodeId> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut order: Vec<NodeId> = Vec::new();
    let mut stack = vec![target];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        order.push(id);
        if let Some(upstream) = table.get(&id) {
            for &dep in upstream.iter().rev() {
                if !visited.contains(&dep) {
                    stack.push(dep);
                }
            }
        }
    }
    order
}

async fn build_request(
    node: &NodeInstance,
    sync: &ParameterWidgetSynchronizer,
    host: &dyn GraphHost,
) -> Result<GenerateRequest, EngineError> {
    let model = sync
        .selected_model()
        .cloned()
        .or_else(|| {
            node.widget_value("model")
                .and_then(Value::as_str)
                .map(ModelId::from)
        })
        .ok_or_else(|| EngineError::InvalidParams("no model selected".to_string()))?;

    let prompt = node
        .widget_value("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let seed = node
        .widget_value("seed")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let batch_count = node
        .widget_value("batch_count")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;

    let mut extra_params = sync.collect_dynamic_params(node);
    let endpoint_override = extra_params
        .remove("endpoint_override")
        .and_then(|v| v.as_str().map(String::from));

    // Resolve images before anything billable happens.
    let images_base64 = resolve_images(node, host).await?;

    Ok(GenerateRequest {
        model,
        prompt,
        seed,
        batch_count,
        extra_params,
        images_base64,
        endpoint_override,
    })
}

/// Layered image resolution for each connected image input: the upstream
/// node's already-loaded output, then a raster cached from a prior execution,
/// then the asset store by recorded identifier. Anything still unresolved is
/// a user-facing error naming the upstream node.
async fn resolve_images(
    node: &NodeInstance,
    host: &dyn GraphHost,
) -> Result<Vec<String>, EngineError> {
    let mut images = Vec::new();

    for slot in node.image_inputs() {
        let Some(upstream) = slot.link else {
            continue;
        };

        if let Some(image) = host.upstream_image(upstream).await {
            images.push(image);
            continue;
        }
        if let Some(raster) = host.cached_raster(upstream).await {
            debug!(node = %node.id, upstream = %upstream, "using cached raster for {}", slot.name);
            images.push(raster);
            continue;
        }
        if let Some(asset_id) = &slot.asset_id {
            if let Ok(image) = host.fetch_asset(asset_id).await {
                images.push(image);
                continue;
            }
        }

        return Err(EngineError::ImageResolution {
            node: upstream,
            reason: format!("input '{}' has no loaded image, cached raster, or stored asset", slot.name),
        });
    }

    Ok(images)
}
