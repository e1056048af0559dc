// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Backend capabilities and execution target selection
//!
//! Build-time capability flags (GPU support, many-nodes capacity class) and
//! the GPU count are captured once in a [`BackendCapabilities`] descriptor
//! and passed to the orchestrator.

use crate::{BackendError, Result};
use tracing::{info, warn};

/// Node capacity of a regular backend build
pub const MAX_NODES_REGULAR: usize = 500;

/// Node capacity of a many-nodes backend build
pub const MAX_NODES_MANY: usize = 10_000;

/// What the native backend was built with and what hardware it can see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// GPU kernels were compiled in
    pub gpu_compiled: bool,
    /// Built for the many-nodes capacity class
    pub many_nodes_compiled: bool,
    /// GPUs visible at process start
    pub gpu_count: usize,
}

impl BackendCapabilities {
    pub fn cpu_only() -> Self {
        Self {
            gpu_compiled: false,
            many_nodes_compiled: false,
            gpu_count: 0,
        }
    }

    pub fn gpu(gpu_count: usize, many_nodes_compiled: bool) -> Self {
        Self {
            gpu_compiled: true,
            many_nodes_compiled,
            gpu_count,
        }
    }

    pub fn gpu_available(&self) -> bool {
        self.gpu_compiled && self.gpu_count > 0
    }

    /// Node capacity on the GPU path
    pub fn max_gpu_nodes(&self) -> usize {
        if self.many_nodes_compiled {
            MAX_NODES_MANY
        } else {
            MAX_NODES_REGULAR
        }
    }
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self::cpu_only()
    }
}

/// Where the batch is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionTarget {
    Cpu,
    Gpu,
}

impl ExecutionTarget {
    pub fn is_cpu(&self) -> bool {
        matches!(self, ExecutionTarget::Cpu)
    }
}

impl std::fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionTarget::Cpu => write!(f, "CPU"),
            ExecutionTarget::Gpu => write!(f, "GPU"),
        }
    }
}

/// Target selection with rationale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDecision {
    pub target: ExecutionTarget,
    pub reason: String,
}

/// Choose CPU or GPU.
///
/// The GPU is used unless CPU is forced, GPU support was not compiled in,
/// or no GPU is visible. An unavailable GPU is never an error.
pub fn resolve_target(force_cpu: bool, capabilities: &BackendCapabilities) -> TargetDecision {
    if force_cpu {
        return TargetDecision {
            target: ExecutionTarget::Cpu,
            reason: "Forced CPU via configuration".to_string(),
        };
    }
    if !capabilities.gpu_compiled {
        return TargetDecision {
            target: ExecutionTarget::Cpu,
            reason: "Backend built without GPU support, using CPU".to_string(),
        };
    }
    if capabilities.gpu_count == 0 {
        return TargetDecision {
            target: ExecutionTarget::Cpu,
            reason: "No GPU available, falling back to CPU".to_string(),
        };
    }
    TargetDecision {
        target: ExecutionTarget::Gpu,
        reason: format!("GPU selected ({} visible)", capabilities.gpu_count),
    }
}

/// Check node capacity and decide whether nodes are synced every 1 msec
/// instead of every 0.1 msec.
///
/// Inter-regional delay and large networks both force 1 msec syncing.
///
/// # Errors
///
/// [`BackendError::NodeCapacity`] when the GPU path cannot hold `nodes`.
pub fn plan_node_sync(
    nodes: usize,
    delay_enabled: bool,
    target: ExecutionTarget,
    capabilities: &BackendCapabilities,
) -> Result<bool> {
    let on_gpu = target == ExecutionTarget::Gpu;
    let mut sync_msec = delay_enabled;

    if nodes > MAX_NODES_REGULAR {
        if on_gpu && nodes > capabilities.max_gpu_nodes() {
            return Err(BackendError::NodeCapacity {
                nodes,
                capacity: capabilities.max_gpu_nodes(),
                many_nodes_compiled: capabilities.many_nodes_compiled,
            });
        }
        info!(
            nodes,
            "Given the large number of nodes, nodes will be synced every 1 msec to reduce \
             the simulation time"
        );
        sync_msec = true;
    } else if on_gpu && capabilities.many_nodes_compiled {
        info!(
            nodes,
            "Backend is built for many nodes but the network is small; a regular build \
             performs better"
        );
    }

    if delay_enabled {
        info!("Delay is enabled, nodes will be synced every 1 msec");
    }
    Ok(sync_msec)
}

/// Warn about GPU serial-node execution, an experimental mode that is
/// generally slower.
pub fn warn_serial_mode(serial_nodes: bool, target: ExecutionTarget) {
    if serial_nodes && target == ExecutionTarget::Gpu {
        warn!(
            "Running simulations serially on GPU is an experimental feature which is \
             generally not recommended and has significantly slower performance"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_cpu_wins() {
        let decision = resolve_target(true, &BackendCapabilities::gpu(2, false));
        assert_eq!(decision.target, ExecutionTarget::Cpu);
        assert!(decision.reason.contains("Forced"));
    }

    #[test]
    fn test_falls_back_without_gpu() {
        let decision = resolve_target(false, &BackendCapabilities::gpu(0, false));
        assert_eq!(decision.target, ExecutionTarget::Cpu);
        let decision = resolve_target(false, &BackendCapabilities::cpu_only());
        assert_eq!(decision.target, ExecutionTarget::Cpu);
        let decision = resolve_target(false, &BackendCapabilities::gpu(1, false));
        assert_eq!(decision.target, ExecutionTarget::Gpu);
    }

    #[test]
    fn test_small_network_no_delay_syncs_fine() {
        let caps = BackendCapabilities::gpu(1, false);
        assert!(!plan_node_sync(100, false, ExecutionTarget::Gpu, &caps).unwrap());
        assert!(plan_node_sync(100, true, ExecutionTarget::Gpu, &caps).unwrap());
    }

    #[test]
    fn test_large_network_on_regular_gpu_build_fails() {
        let caps = BackendCapabilities::gpu(1, false);
        let err = plan_node_sync(600, false, ExecutionTarget::Gpu, &caps).unwrap_err();
        assert_eq!(
            err,
            BackendError::NodeCapacity {
                nodes: 600,
                capacity: MAX_NODES_REGULAR,
                many_nodes_compiled: false
            }
        );
        let message = err.to_string();
        assert!(message.contains("600"));
        assert!(message.contains("500"));
    }

    #[test]
    fn test_large_network_on_many_nodes_build() {
        let caps = BackendCapabilities::gpu(1, true);
        assert!(plan_node_sync(600, false, ExecutionTarget::Gpu, &caps).unwrap());
        assert!(plan_node_sync(10_001, false, ExecutionTarget::Gpu, &caps).is_err());
    }

    #[test]
    fn test_large_network_on_cpu_is_allowed() {
        let caps = BackendCapabilities::cpu_only();
        assert!(plan_node_sync(600, false, ExecutionTarget::Cpu, &caps).unwrap());
    }
}
