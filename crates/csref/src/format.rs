use crate::value::{Scalar, ScalarKind, TypeError, Value, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image texel formats the fixtures declare through `layout(FORMAT)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Rgba8,
    Rgba8Snorm,
    Rgba32f,
    R32f,
    R32i,
    R32ui,
    Rgba32i,
    Rgba32ui,
}

impl ImageFormat {
    pub const ALL: [Self; 8] = [
        Self::Rgba8,
        Self::Rgba8Snorm,
        Self::Rgba32f,
        Self::R32f,
        Self::R32i,
        Self::R32ui,
        Self::Rgba32i,
        Self::Rgba32ui,
    ];

    pub fn from_layout(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rgba8 => "rgba8",
            Self::Rgba8Snorm => "rgba8_snorm",
            Self::Rgba32f => "rgba32f",
            Self::R32f => "r32f",
            Self::R32i => "r32i",
            Self::R32ui => "r32ui",
            Self::Rgba32i => "rgba32i",
            Self::Rgba32ui => "rgba32ui",
        }
    }

    pub fn channels(self) -> usize {
        match self {
            Self::R32f | Self::R32i | Self::R32ui => 1,
            _ => 4,
        }
    }

    pub fn texel_size(self) -> usize {
        match self {
            Self::Rgba8 | Self::Rgba8Snorm => 4,
            other => 4 * other.channels(),
        }
    }

    /// Scalar kind of the `vec4` family `imageLoad` returns.
    pub fn sample_kind(self) -> ScalarKind {
        match self {
            Self::R32i | Self::Rgba32i => ScalarKind::Int,
            Self::R32ui | Self::Rgba32ui => ScalarKind::Uint,
            _ => ScalarKind::Float,
        }
    }

    /// The GLSL image type a declaration with this format must use.
    pub fn image_type(self) -> &'static str {
        match self.sample_kind() {
            ScalarKind::Int => "iimage2D",
            ScalarKind::Uint => "uimage2D",
            _ => "image2D",
        }
    }

    pub fn load_type(self) -> ValueType {
        ValueType::Vector(self.sample_kind(), 4)
    }

    pub fn supports_atomics(self) -> bool {
        matches!(self, Self::R32i | Self::R32ui)
    }

    /// Texel bytes to the `vec4` `imageLoad` returns. Missing channels read
    /// as `(0, 0, 1)`.
    pub fn decode(self, bytes: &[u8]) -> Value {
        let kind = self.sample_kind();
        let one = Scalar::Bool(true).convert(kind);
        let mut lanes = [Scalar::zero(kind), Scalar::zero(kind), Scalar::zero(kind), one];
        for (c, lane) in lanes.iter_mut().enumerate().take(self.channels()) {
            *lane = match self {
                Self::Rgba8 => Scalar::Float(f32::from(bytes[c]) / 255.0),
                Self::Rgba8Snorm => {
                    Scalar::Float((f32::from(bytes[c] as i8) / 127.0).max(-1.0))
                }
                _ => Scalar::from_bits(kind, word(bytes, c)),
            };
        }
        Value::from_components(self.load_type(), &lanes)
    }

    /// `imageStore` value to texel bytes. Normalized formats clamp and round
    /// to nearest.
    pub fn encode(self, value: &Value) -> Result<Vec<u8>, TypeError> {
        if value.ty() != self.load_type() {
            return Err(TypeError::new(
                format!("{} for a {} image", self.load_type(), self.name()),
                value.ty(),
            ));
        }
        let lanes = value.components();
        let mut out = Vec::with_capacity(self.texel_size());
        for lane in lanes.iter().take(self.channels()) {
            let bits = lane.to_bits();
            match self {
                Self::Rgba8 => {
                    let f = f32::from_bits(bits);
                    out.push((f.clamp(0.0, 1.0) * 255.0).round() as u8);
                }
                Self::Rgba8Snorm => {
                    let f = f32::from_bits(bits);
                    out.push((f.clamp(-1.0, 1.0) * 127.0).round() as i8 as u8);
                }
                _ => out.extend_from_slice(&bits.to_le_bytes()),
            }
        }
        Ok(out)
    }

    /// Convert a seed scalar list to texel bytes (one value per channel).
    pub fn encode_channels(self, channels: &[Scalar]) -> Result<Vec<u8>, TypeError> {
        let kind = self.sample_kind();
        let mut lanes: Vec<Scalar> = channels.to_vec();
        if lanes.len() != 4 {
            if lanes.len() != self.channels() {
                return Err(TypeError::new(
                    format!("{} channels for {}", self.channels(), self.name()),
                    format!("{} values", lanes.len()),
                ));
            }
            lanes.resize(4, Scalar::zero(kind));
        }
        self.encode(&Value::from_components(self.load_type(), &lanes))
    }
}

fn word(bytes: &[u8], lane: usize) -> u32 {
    let start = lane * 4;
    bytemuck::pod_read_unaligned(&bytes[start..start + 4])
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_names() {
        for format in ImageFormat::ALL {
            assert_eq!(ImageFormat::from_layout(format.name()), Some(format));
        }
        assert_eq!(ImageFormat::from_layout("rgba16f"), None);
        assert_eq!(ImageFormat::R32i.image_type(), "iimage2D");
        assert_eq!(ImageFormat::Rgba8Snorm.image_type(), "image2D");
    }

    #[test]
    fn test_unorm_round_trip() {
        let texel = [0u8, 64, 128, 255];
        let v = ImageFormat::Rgba8.decode(&texel);
        assert_eq!(ImageFormat::Rgba8.encode(&v).unwrap(), texel.to_vec());
    }

    #[test]
    fn test_snorm_clamps() {
        let v = Value::from_components(
            ImageFormat::Rgba8Snorm.load_type(),
            &[2.0, -2.0, 0.5, 0.0].map(Scalar::Float),
        );
        let bytes = ImageFormat::Rgba8Snorm.encode(&v).unwrap();
        assert_eq!(bytes, vec![127, (-127i8) as u8, 64, 0]);
        // -128 decodes to -1.0, not below it
        let decoded = ImageFormat::Rgba8Snorm.decode(&[0x80, 0, 0, 0]);
        assert_eq!(decoded.components()[0], Scalar::Float(-1.0));
    }

    #[test]
    fn test_single_channel_expands() {
        let v = ImageFormat::R32i.decode(&(-7i32).to_le_bytes());
        assert_eq!(
            v.components(),
            vec![Scalar::Int(-7), Scalar::Int(0), Scalar::Int(0), Scalar::Int(1)]
        );
        assert_eq!(ImageFormat::R32i.encode(&v).unwrap(), (-7i32).to_le_bytes().to_vec());
    }

    #[test]
    fn test_encode_rejects_wrong_family() {
        let v = ImageFormat::Rgba8.decode(&[0; 4]);
        assert!(ImageFormat::Rgba32ui.encode(&v).is_err());
        assert!(ImageFormat::R32ui.encode_channels(&[Scalar::Uint(1), Scalar::Uint(2)]).is_err());
        assert_eq!(
            ImageFormat::R32ui.encode_channels(&[Scalar::Uint(9)]).unwrap(),
            9u32.to_le_bytes().to_vec()
        );
    }
}
