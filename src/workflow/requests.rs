// src/workflow/requests.rs

//! Declarative resource requests.
//!
//! Requests are recorded on the phase that declares them. Nothing acts on
//! them yet: the resource scheduler grants resources through the
//! `resources_available` flag of the state document.

use tracing::info;

/// Request for buffer space, tagged with what the data is for.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferRequest {
    pub size_bytes: f64,
    pub tags: Vec<String>,
}

impl BufferRequest {
    pub fn new(size_bytes: f64, tags: &[&str]) -> Self {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        info!(?tags, size_bytes, "buffer requested");
        Self { size_bytes, tags }
    }
}

/// Request for compute nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeRequest {
    pub nodes: u32,
    pub tags: Vec<String>,
}

impl ComputeRequest {
    pub fn new(nodes: u32, tags: &[&str]) -> Self {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        info!(?tags, nodes, "compute requested");
        Self { nodes, tags }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceRequest {
    Buffer(BufferRequest),
    Compute(ComputeRequest),
}

impl From<BufferRequest> for ResourceRequest {
    fn from(req: BufferRequest) -> Self {
        ResourceRequest::Buffer(req)
    }
}

impl From<ComputeRequest> for ResourceRequest {
    fn from(req: ComputeRequest) -> Self {
        ResourceRequest::Compute(req)
    }
}
