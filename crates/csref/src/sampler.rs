//! The sampler oracle seam. `texture()` is answered here rather than by the
//! executor, so a driver-equivalent filter can be plugged in without the
//! engine knowing filtering math.

use csref_types::case::TexturePattern;
use glam::Vec2;

/// Backing texels of a `sampler2D` binding: `rgba8`, row-major, level 0 only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<u8>,
}

impl Texture {
    pub fn new(width: u32, height: u32, pattern: TexturePattern) -> Self {
        let count = width as usize * height as usize;
        let texels = match pattern {
            TexturePattern::Zero => vec![0; count * 4],
            TexturePattern::Index => (0..count as u32).flat_map(u32::to_le_bytes).collect(),
        };
        Self {
            width,
            height,
            texels,
        }
    }

    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let mut out = [0; 4];
        out.copy_from_slice(&self.texels[i..i + 4]);
        out
    }
}

pub struct SampleRequest<'a> {
    pub binding: u32,
    pub texture: &'a Texture,
    pub coord: Vec2,
    pub bias: Option<f32>,
}

pub trait SamplerOracle: Send + Sync {
    /// Filtered `vec4` for one `texture()` call, or the reason the oracle
    /// cannot answer it.
    fn sample(&self, request: &SampleRequest<'_>) -> Result<[f32; 4], String>;
}

/// Stands in for an external oracle that was never attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl SamplerOracle for Unavailable {
    fn sample(&self, _: &SampleRequest<'_>) -> Result<[f32; 4], String> {
        Err("no external sampler oracle is attached".to_string())
    }
}

/// Exact point reads: `GL_NEAREST`, `GL_CLAMP_TO_EDGE`, base level.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestSampler;

impl SamplerOracle for NearestSampler {
    fn sample(&self, request: &SampleRequest<'_>) -> Result<[f32; 4], String> {
        let texture = request.texture;
        if texture.width == 0 || texture.height == 0 {
            return Err("texture has no texels".to_string());
        }
        if request.bias.is_some_and(|b| b != 0.0) {
            return Err("a level-of-detail bias needs mipmaps, which nearest sampling lacks".into());
        }
        let texel_index = |c: f32, extent: u32| {
            let i = (c * extent as f32).floor();
            // NaN clamps to the first texel
            if i.is_nan() || i < 0.0 {
                0
            } else {
                (i as u32).min(extent - 1)
            }
        };
        let x = texel_index(request.coord.x, texture.width);
        let y = texel_index(request.coord.y, texture.height);
        Ok(texture.texel(x, y).map(|b| f32::from(b) / 255.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(texture: &Texture, x: f32, y: f32) -> SampleRequest<'_> {
        SampleRequest {
            binding: 0,
            texture,
            coord: Vec2::new(x, y),
            bias: None,
        }
    }

    #[test]
    fn test_index_pattern_bytes() {
        let tex = Texture::new(200, 200, TexturePattern::Index);
        assert_eq!(tex.texel(0, 0), [0, 0, 0, 0]);
        assert_eq!(tex.texel(1, 1), 201u32.to_le_bytes());
        assert_eq!(tex.texel(199, 199), 39_999u32.to_le_bytes());
    }

    #[test]
    fn test_nearest_clamps_to_edge() {
        let tex = Texture::new(4, 4, TexturePattern::Index);
        let oracle = NearestSampler;
        // texel centers and beyond-the-edge coordinates
        assert_eq!(oracle.sample(&request(&tex, 0.125, 0.125)).unwrap(), [0.0; 4]);
        let last = oracle.sample(&request(&tex, 7.0, 7.0)).unwrap();
        assert_eq!(last[0], 15.0 / 255.0);
        let first = oracle.sample(&request(&tex, -3.0, f32::NAN)).unwrap();
        assert_eq!(first, [0.0; 4]);
    }

    #[test]
    fn test_bias_and_missing_oracle() {
        let tex = Texture::new(2, 2, TexturePattern::Zero);
        let mut req = request(&tex, 0.5, 0.5);
        req.bias = Some(1.0);
        assert!(NearestSampler.sample(&req).is_err());
        assert!(Unavailable.sample(&request(&tex, 0.5, 0.5)).is_err());
    }
}
