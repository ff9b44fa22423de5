//! Latest-frame storage and the viewer gate.
//!
//! The hub keeps exactly one frame per device (no replay buffer): an
//! immutable `Arc` holding the bytes, MIME and arrival time, swapped on
//! every accepted frame. Viewers clone the `Arc` at tick time, so a
//! frame is never torn and replacement is a pointer swap.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

pub const DEFAULT_FRAME_MIME: &str = "image/jpeg";

#[derive(Debug)]
pub struct FrameData {
    pub bytes: Bytes,
    pub mime: String,
    pub at_ms: i64,
}

pub struct FrameRouter {
    latest: DashMap<String, Arc<FrameData>>,
    min_interval_ms: i64,
}

impl FrameRouter {
    pub fn new(min_interval_ms: u64) -> Self {
        FrameRouter {
            latest: DashMap::new(),
            min_interval_ms: min_interval_ms as i64,
        }
    }

    /// Store a frame unless it arrives inside the per-device minimum
    /// interval. Throttled frames are dropped, not queued.
    pub fn ingest(&self, device_id: &str, bytes: Bytes, mime: &str, now_ms: i64) -> bool {
        let frame = Arc::new(FrameData {
            bytes,
            mime: mime.to_string(),
            at_ms: now_ms,
        });
        match self.latest.entry(device_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if now_ms - occupied.get().at_ms < self.min_interval_ms {
                    return false;
                }
                occupied.insert(frame);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(frame);
                true
            }
        }
    }

    pub fn latest(&self, device_id: &str) -> Option<Arc<FrameData>> {
        self.latest.get(device_id).map(|f| f.clone())
    }
}

/// Decode the JSON-path frame carrier: either raw base64 or a
/// `data:<mime>;base64,` URL. Both yield the same stored bytes.
pub fn decode_frame_field(raw: &str) -> Option<(Bytes, String)> {
    if let Some(rest) = raw.strip_prefix("data:") {
        let (mime, b64) = rest.split_once(";base64,")?;
        let bytes = STANDARD.decode(b64.trim()).ok()?;
        let mime = if mime.is_empty() {
            DEFAULT_FRAME_MIME.to_string()
        } else {
            mime.to_string()
        };
        Some((Bytes::from(bytes), mime))
    } else {
        let bytes = STANDARD.decode(raw.trim()).ok()?;
        Some((Bytes::from(bytes), DEFAULT_FRAME_MIME.to_string()))
    }
}

// ── Viewer gate ──────────────────────────────────────────

/// Reference-counts open viewer attachments per device. The caller
/// signals the agent on the 0→1 and N→0 edges only.
pub struct ViewerGate {
    counts: DashMap<String, usize>,
}

impl ViewerGate {
    pub fn new() -> Self {
        ViewerGate {
            counts: DashMap::new(),
        }
    }

    /// Returns the count after attaching; 1 means this was the edge.
    pub fn attach(&self, device_id: &str) -> usize {
        let mut entry = self.counts.entry(device_id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Returns the count after detaching; 0 means this was the edge.
    pub fn detach(&self, device_id: &str) -> usize {
        match self.counts.entry(device_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let remaining = occupied.get().saturating_sub(1);
                if remaining == 0 {
                    occupied.remove();
                } else {
                    *occupied.get_mut() = remaining;
                }
                remaining
            }
            Entry::Vacant(_) => 0,
        }
    }

    pub fn count(&self, device_id: &str) -> usize {
        self.counts.get(device_id).map(|c| *c).unwrap_or(0)
    }
}

impl Default for ViewerGate {
    fn default() -> Self {
        Self::new()
    }
}
