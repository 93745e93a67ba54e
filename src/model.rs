//! Core data types: parts, file records, sidecar metadata, chunk plans.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One contiguous byte range of a file, uploaded and fetched as a single
/// HTTP body against exactly one storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub index: usize,
    pub size: u64,
    #[serde(rename = "sha256")]
    pub digest: String,
    pub storage: String,
}

/// Durable, per-file record committed to the meta store once an upload
/// completes. `parts` is keyed by index; at rest `parts.len() ==
/// total_parts` and `parts.values().map(|p| p.size).sum() == size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    #[serde(rename = "file_id")]
    pub id: String,
    #[serde(rename = "file_name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub size: u64,
    pub total_parts: usize,
    pub parts: BTreeMap<usize, Part>,
}

/// One entry in a storage node's sidecar metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarPart {
    pub index: usize,
    pub size: u64,
    pub sha256: String,
}

/// Per-node, per-file sidecar record living beside the payload files as
/// `meta.json`. Its `parts` map may legally be a strict subset of
/// `total_parts` while the upload is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarMeta {
    pub file_id: String,
    pub total_parts: usize,
    pub parts: BTreeMap<usize, SidecarPart>,
}

impl SidecarMeta {
    pub fn new(file_id: impl Into<String>, total_parts: usize) -> Self {
        Self {
            file_id: file_id.into(),
            total_parts,
            parts: BTreeMap::new(),
        }
    }
}

/// `{total parts, size per part}` derived from a declared total size and
/// a desired part count. The last part may be short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total: usize,
    pub size: u64,
}

/// Compute the chunk plan for a file of `size` bytes given a desired part
/// count `desired`. `size == 0` always yields a single zero-length part.
pub fn plan_chunks(size: u64, desired: usize) -> ChunkPlan {
    let desired = desired.max(1);
    if size == 0 {
        return ChunkPlan { total: 1, size: 0 };
    }
    let chunk_size = size.div_ceil(desired as u64).max(1);
    let total = size.div_ceil(chunk_size) as usize;
    ChunkPlan {
        total,
        size: chunk_size,
    }
}
