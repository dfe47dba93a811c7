//! Test fixtures for generating test data and requests.

use bytes::Bytes;
use depot_core::{Artifact, ArtifactHash, ArtifactKind, Identity};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Build an artifact record for `data` without storing anything.
#[allow(dead_code)]
pub fn test_artifact(name: &str, owner: &str, data: &[u8]) -> Artifact {
    Artifact {
        hash: ArtifactHash::compute(data),
        name: name.to_string(),
        owner: Identity::parse(owner).expect("valid identity"),
        kind: ArtifactKind::Raw,
        size: data.len() as u64,
        created_at: OffsetDateTime::now_utc(),
        attributes: BTreeMap::new(),
    }
}

/// Hand-rolled multipart/form-data body.
#[allow(dead_code)]
pub struct MultipartBody {
    boundary: String,
    buf: Vec<u8>,
}

#[allow(dead_code)]
impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: format!("depot-test-{}", uuid::Uuid::new_v4().simple()),
            buf: Vec::new(),
        }
    }

    /// Append a plain text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    /// Append a file field.
    pub fn file(mut self, name: &str, filename: &str, data: &[u8]) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    /// Close the body, returning its content type and bytes.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.buf
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.buf,
        )
    }
}
