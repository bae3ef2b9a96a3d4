//! Frozen store contents, addressable by binding index.

use crate::error::Diagnostics;
use crate::format::ImageFormat;
use crate::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub fixture: String,
    #[serde(default)]
    pub buffers: BTreeMap<u32, BufferSnapshot>,
    #[serde(default)]
    pub images: BTreeMap<u32, ImageSnapshot>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

/// Buffer contents as raw 32-bit lanes, `element.components()` per element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSnapshot {
    pub name: String,
    pub element: ValueType,
    pub lanes: Vec<u32>,
}

impl BufferSnapshot {
    pub fn len(&self) -> usize {
        self.lanes.len() / self.element.components()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn element(&self, index: usize) -> Option<Value> {
        let width = self.element.components();
        let start = index.checked_mul(width)?;
        let bits = self.lanes.get(start..start + width)?;
        Some(Value::from_bits(self.element, bits))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSnapshot {
    pub name: String,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub texels: Vec<u8>,
}

impl ImageSnapshot {
    pub fn texel_bytes(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let size = self.format.texel_size();
        let start = (y as usize * self.width as usize + x as usize) * size;
        self.texels.get(start..start + size)
    }

    /// The texel as `imageLoad` would return it.
    pub fn texel(&self, x: u32, y: u32) -> Option<Value> {
        self.texel_bytes(x, y).map(|bytes| self.format.decode(bytes))
    }
}

impl ResourceSnapshot {
    pub fn empty(fixture: impl Into<String>) -> Self {
        Self {
            fixture: fixture.into(),
            buffers: BTreeMap::new(),
            images: BTreeMap::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn buffer(&self, binding: u32) -> Option<&BufferSnapshot> {
        self.buffers.get(&binding)
    }

    pub fn image(&self, binding: u32) -> Option<&ImageSnapshot> {
        self.images.get(&binding)
    }

    pub fn read_buffer(&self, binding: u32, index: usize) -> Option<Value> {
        self.buffer(binding)?.element(index)
    }

    pub fn texel(&self, binding: u32, x: u32, y: u32) -> Option<Value> {
        self.image(binding)?.texel(x, y)
    }

    /// Canonical JSON encoding. Two snapshots are identical exactly when
    /// their bytes are.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Scalar, ScalarKind};

    fn snapshot() -> ResourceSnapshot {
        let mut snap = ResourceSnapshot::empty("0005");
        snap.buffers.insert(
            1,
            BufferSnapshot {
                name: "Out".into(),
                element: ValueType::Vector(ScalarKind::Uint, 2),
                lanes: vec![1, 2, 3, 4],
            },
        );
        snap.images.insert(
            0,
            ImageSnapshot {
                name: "dst".into(),
                format: ImageFormat::R32i,
                width: 2,
                height: 1,
                texels: [7i32, -1].iter().flat_map(|v| v.to_le_bytes()).collect(),
            },
        );
        snap
    }

    #[test]
    fn test_addressable_by_binding() {
        let snap = snapshot();
        let v = snap.read_buffer(1, 1).unwrap();
        assert_eq!(v.components(), vec![Scalar::Uint(3), Scalar::Uint(4)]);
        assert_eq!(snap.read_buffer(1, 2), None);
        assert_eq!(snap.buffer(1).unwrap().len(), 2);

        let t = snap.texel(0, 1, 0).unwrap();
        assert_eq!(t.components()[0], Scalar::Int(-1));
        assert_eq!(snap.texel(0, 2, 0), None);
    }

    #[test]
    fn test_json_round_trip_is_stable() {
        let snap = snapshot();
        let bytes = snap.to_bytes().unwrap();
        let back = ResourceSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.to_bytes().unwrap(), bytes);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"element\": \"uvec2\""));
        assert!(text.contains("\"format\": \"r32i\""));
    }
}
