//! Resource Store: owns every buffer, image, texture and uniform of one
//! dispatch.
//!
//! Each accessor is one critical section when the store sits behind a
//! [`SharedStore`], so atomic read-modify-writes have a total order per
//! element. Every access is type-checked against the declaration and goes
//! through the dispatch's [`OobPolicy`].

use crate::error::{Diagnostics, EngineError, ErrorKind, InvocationId, Result};
use crate::format::ImageFormat;
use crate::loader::ShaderModel;
use crate::loader::ast::AtomicOp;
use crate::race::{Conflict, RaceTracker, Resource, Touch};
use crate::sampler::{SampleRequest, SamplerOracle, Texture};
use crate::snapshot::{BufferSnapshot, ImageSnapshot, ResourceSnapshot};
use crate::value::{Scalar, ScalarKind, Value, ValueType};
use csref_types::case::TexturePattern;
use csref_types::{EngineConfig, OobPolicy};
use glam::Vec2;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct BufferStorage {
    name: String,
    element: ValueType,
    lanes: Vec<u32>,
}

impl BufferStorage {
    fn len(&self) -> usize {
        self.lanes.len() / self.element.components()
    }

    fn lanes(&self, index: usize) -> &[u32] {
        let width = self.element.components();
        &self.lanes[index * width..(index + 1) * width]
    }

    fn lanes_mut(&mut self, index: usize) -> &mut [u32] {
        let width = self.element.components();
        &mut self.lanes[index * width..(index + 1) * width]
    }

    fn label(&self, binding: u32) -> String {
        format!("buffer `{}` (binding {binding})", self.name)
    }
}

#[derive(Debug)]
struct ImageStorage {
    name: String,
    format: ImageFormat,
    width: u32,
    height: u32,
    texels: Vec<u8>,
}

impl ImageStorage {
    fn range(&self, texel: usize) -> std::ops::Range<usize> {
        let size = self.format.texel_size();
        texel * size..(texel + 1) * size
    }

    fn words(&self, texel: usize) -> Vec<u32> {
        self.texels[self.range(texel)]
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<u32>)
            .collect()
    }

    fn label(&self, binding: u32) -> String {
        format!("image `{}` (binding {binding})", self.name)
    }
}

#[derive(Debug)]
struct UniformStorage {
    name: String,
    ty: ValueType,
    values: Vec<Value>,
    is_array: bool,
}

#[derive(Debug)]
pub struct ResourceStore {
    fixture: String,
    oob_policy: OobPolicy,
    buffers: BTreeMap<u32, BufferStorage>,
    images: BTreeMap<u32, ImageStorage>,
    textures: BTreeMap<u32, Texture>,
    uniforms: Vec<UniformStorage>,
    races: RaceTracker,
    conflicts: Vec<Conflict>,
    diagnostics: Diagnostics,
}

/// Map an index into `0..extent` under `policy`. `None` means the access is
/// dropped (writes discarded, reads return zero).
fn resolve(
    policy: OobPolicy,
    fixture: &str,
    diagnostics: &mut Diagnostics,
    resource: impl FnOnce() -> String,
    index: i64,
    extent: usize,
    invocation: InvocationId,
) -> Result<Option<usize>> {
    if usize::try_from(index).is_ok_and(|i| i < extent) {
        return Ok(Some(index as usize));
    }
    let resource = resource();
    if extent == 0 {
        diagnostics.record(
            ErrorKind::OutOfBounds,
            format!("access to empty {resource} discarded"),
            invocation,
        );
        return Ok(None);
    }
    match policy {
        OobPolicy::ClampAndReport => {
            let clamped = index.clamp(0, extent as i64 - 1) as usize;
            diagnostics.record(
                ErrorKind::OutOfBounds,
                format!("index {index} out of bounds for {resource} (extent {extent}), clamped to {clamped}"),
                invocation,
            );
            Ok(Some(clamped))
        }
        OobPolicy::DiscardAndReport => {
            diagnostics.record(
                ErrorKind::OutOfBounds,
                format!("index {index} out of bounds for {resource} (extent {extent}), discarded"),
                invocation,
            );
            Ok(None)
        }
        OobPolicy::Fault => Err(EngineError::OutOfBounds {
            fixture: fixture.to_string(),
            resource,
            index,
            extent,
        }),
    }
}

fn mismatch(
    fixture: &str,
    context: String,
    expected: impl Display,
    found: impl Display,
) -> EngineError {
    EngineError::TypeMismatch {
        fixture: fixture.to_string(),
        context,
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn unbound(fixture: &str, what: &str, binding: u32) -> EngineError {
    mismatch(
        fixture,
        format!("access to {what} binding {binding}"),
        format!("a declared {what}"),
        "nothing",
    )
}

fn atomic_result(op: AtomicOp, old: Scalar, compare: Option<Scalar>, data: Scalar) -> Scalar {
    let (a, b) = (old.to_bits(), data.to_bits());
    let signed = old.kind() == ScalarKind::Int;
    let bits = match op {
        AtomicOp::Add => a.wrapping_add(b),
        AtomicOp::And => a & b,
        AtomicOp::Or => a | b,
        AtomicOp::Xor => a ^ b,
        AtomicOp::Min if signed => (a as i32).min(b as i32) as u32,
        AtomicOp::Min => a.min(b),
        AtomicOp::Max if signed => (a as i32).max(b as i32) as u32,
        AtomicOp::Max => a.max(b),
        AtomicOp::Exchange => b,
        AtomicOp::CompSwap => {
            if compare.is_some_and(|c| c.to_bits() == a) {
                b
            } else {
                a
            }
        }
    };
    Scalar::from_bits(old.kind(), bits)
}

impl ResourceStore {
    /// Allocate every resource `model` declares, zero-filled at the default
    /// extents from `config`.
    pub fn new(model: &ShaderModel, config: &EngineConfig) -> Self {
        let [width, height] = config.default_image_extent;
        let buffers = model
            .buffers
            .iter()
            .map(|b| {
                let storage = BufferStorage {
                    name: b.display_name(),
                    element: b.element,
                    lanes: vec![0; config.default_buffer_len * b.element.components()],
                };
                (b.binding, storage)
            })
            .collect();
        let images = model
            .images
            .iter()
            .map(|i| {
                let storage = ImageStorage {
                    name: i.name.clone(),
                    format: i.format,
                    width,
                    height,
                    texels: vec![0; width as usize * height as usize * i.format.texel_size()],
                };
                (i.binding, storage)
            })
            .collect();
        let textures = model
            .samplers
            .iter()
            .map(|s| (s.binding, Texture::new(width, height, TexturePattern::Zero)))
            .collect();
        let uniforms = model
            .uniforms
            .iter()
            .map(|u| UniformStorage {
                name: u.name.clone(),
                ty: u.ty,
                values: vec![Value::zero(u.ty); u.array_len.unwrap_or(1)],
                is_array: u.array_len.is_some(),
            })
            .collect();
        Self {
            fixture: model.fixture.clone(),
            oob_policy: config.oob_policy,
            buffers,
            images,
            textures,
            uniforms,
            races: RaceTracker::default(),
            conflicts: Vec::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn fixture(&self) -> &str {
        &self.fixture
    }

    fn invalid_seed(&self, target: impl Into<String>, message: impl Into<String>) -> EngineError {
        EngineError::InvalidSeed {
            fixture: self.fixture.clone(),
            target: target.into(),
            message: message.into(),
        }
    }

    // Seeding. Errors here are `InvalidSeed`: the descriptor disagrees with
    // the fixture's declarations.

    pub fn buffer_element(&self, binding: u32) -> Option<ValueType> {
        self.buffers.get(&binding).map(|b| b.element)
    }

    pub fn buffer_len(&self, binding: u32) -> Option<usize> {
        self.buffers.get(&binding).map(BufferStorage::len)
    }

    pub fn image_format(&self, binding: u32) -> Option<ImageFormat> {
        self.images.get(&binding).map(|i| i.format)
    }

    pub fn image_extent(&self, binding: u32) -> Option<[u32; 2]> {
        self.images.get(&binding).map(|i| [i.width, i.height])
    }

    /// Position and type of the uniform called `name`.
    pub fn uniform_slot(&self, name: &str) -> Option<(usize, ValueType, Option<usize>)> {
        self.uniforms
            .iter()
            .position(|u| u.name == name)
            .map(|i| {
                let u = &self.uniforms[i];
                (i, u.ty, u.is_array.then_some(u.values.len()))
            })
    }

    /// Re-allocate a buffer with `len` zero elements.
    pub fn allocate_buffer(&mut self, binding: u32, len: usize) -> Result<()> {
        let Some(buffer) = self.buffers.get_mut(&binding) else {
            return Err(self.invalid_seed(
                format!("buffer binding {binding}"),
                "the fixture declares no buffer at this binding",
            ));
        };
        buffer.lanes = vec![0; len * buffer.element.components()];
        Ok(())
    }

    pub fn seed_element(&mut self, binding: u32, index: usize, value: Value) -> Result<()> {
        let Some(buffer) = self.buffers.get_mut(&binding) else {
            return Err(self.invalid_seed(
                format!("buffer binding {binding}"),
                "the fixture declares no buffer at this binding",
            ));
        };
        let target = format!("{}[{index}]", buffer.name);
        if value.ty() != buffer.element {
            let message = format!("expected {}, found {}", buffer.element, value.ty());
            return Err(self.invalid_seed(target, message));
        }
        if index >= buffer.len() {
            let message = format!("index is past the buffer length {}", buffer.len());
            return Err(self.invalid_seed(target, message));
        }
        let mut bits = Vec::with_capacity(buffer.element.components());
        value.write_bits(&mut bits);
        buffer.lanes_mut(index).copy_from_slice(&bits);
        Ok(())
    }

    /// Re-allocate an image with `width * height` zero texels.
    pub fn allocate_image(&mut self, binding: u32, width: u32, height: u32) -> Result<()> {
        let Some(image) = self.images.get_mut(&binding) else {
            return Err(self.invalid_seed(
                format!("image binding {binding}"),
                "the fixture declares no image at this binding",
            ));
        };
        image.width = width;
        image.height = height;
        image.texels = vec![0; width as usize * height as usize * image.format.texel_size()];
        Ok(())
    }

    pub fn seed_texel(&mut self, binding: u32, x: u32, y: u32, bytes: &[u8]) -> Result<()> {
        let Some(image) = self.images.get_mut(&binding) else {
            return Err(self.invalid_seed(
                format!("image binding {binding}"),
                "the fixture declares no image at this binding",
            ));
        };
        let target = format!("{}[{x}, {y}]", image.name);
        if x >= image.width || y >= image.height {
            let message = format!("texel is outside the {}x{} image", image.width, image.height);
            return Err(self.invalid_seed(target, message));
        }
        if bytes.len() != image.format.texel_size() {
            let message = format!(
                "{} texels are {} bytes, found {}",
                image.format,
                image.format.texel_size(),
                bytes.len()
            );
            return Err(self.invalid_seed(target, message));
        }
        let range = image.range(y as usize * image.width as usize + x as usize);
        image.texels[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn seed_texture(&mut self, binding: u32, texture: Texture) -> Result<()> {
        match self.textures.get_mut(&binding) {
            Some(slot) => {
                *slot = texture;
                Ok(())
            }
            None => Err(self.invalid_seed(
                format!("sampler binding {binding}"),
                "the fixture declares no sampler at this binding",
            )),
        }
    }

    pub fn seed_uniform(&mut self, slot: usize, values: Vec<Value>) -> Result<()> {
        let Some(uniform) = self.uniforms.get_mut(slot) else {
            return Err(self.invalid_seed(format!("uniform #{slot}"), "no such uniform"));
        };
        let expected = uniform.values.len();
        if values.len() != expected || values.iter().any(|v| v.ty() != uniform.ty) {
            let message = format!("expected {expected} value(s) of type {}", uniform.ty);
            let target = uniform.name.clone();
            return Err(self.invalid_seed(target, message));
        }
        uniform.values = values;
        Ok(())
    }

    // Invocation-time access.

    pub fn read(&mut self, binding: u32, index: i64, invocation: InvocationId) -> Result<Value> {
        let buffer = self
            .buffers
            .get(&binding)
            .ok_or_else(|| unbound(&self.fixture, "buffer", binding))?;
        let slot = resolve(
            self.oob_policy,
            &self.fixture,
            &mut self.diagnostics,
            || buffer.label(binding),
            index,
            buffer.len(),
            invocation,
        )?;
        let Some(i) = slot else {
            return Ok(Value::zero(buffer.element));
        };
        let bits = buffer.lanes(i);
        if let Some(c) = self.races.observe(Resource::Buffer(binding), i, bits, Touch::Read, invocation) {
            self.conflicts.push(c);
        }
        Ok(Value::from_bits(buffer.element, bits))
    }

    pub fn write(
        &mut self,
        binding: u32,
        index: i64,
        value: Value,
        invocation: InvocationId,
    ) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(&binding)
            .ok_or_else(|| unbound(&self.fixture, "buffer", binding))?;
        if value.ty() != buffer.element {
            return Err(mismatch(
                &self.fixture,
                format!("store to {}", buffer.label(binding)),
                buffer.element,
                value.ty(),
            ));
        }
        let slot = resolve(
            self.oob_policy,
            &self.fixture,
            &mut self.diagnostics,
            || buffer.label(binding),
            index,
            buffer.len(),
            invocation,
        )?;
        let Some(i) = slot else { return Ok(()) };
        let mut bits = Vec::with_capacity(buffer.element.components());
        value.write_bits(&mut bits);
        let touch = Touch::Write(&bits);
        if let Some(c) = self.races.observe(Resource::Buffer(binding), i, buffer.lanes(i), touch, invocation) {
            self.conflicts.push(c);
        }
        buffer.lanes_mut(i).copy_from_slice(&bits);
        Ok(())
    }

    /// Read-modify-write of one element for a projected store such as
    /// `Out[i].xy = v`. The element is logged as written, not read.
    pub fn update(
        &mut self,
        binding: u32,
        index: i64,
        invocation: InvocationId,
        modify: impl FnOnce(Value) -> Result<Value>,
    ) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(&binding)
            .ok_or_else(|| unbound(&self.fixture, "buffer", binding))?;
        let slot = resolve(
            self.oob_policy,
            &self.fixture,
            &mut self.diagnostics,
            || buffer.label(binding),
            index,
            buffer.len(),
            invocation,
        )?;
        let Some(i) = slot else { return Ok(()) };
        let value = modify(Value::from_bits(buffer.element, buffer.lanes(i)))?;
        if value.ty() != buffer.element {
            return Err(mismatch(
                &self.fixture,
                format!("store to {}", buffer.label(binding)),
                buffer.element,
                value.ty(),
            ));
        }
        let mut bits = Vec::with_capacity(buffer.element.components());
        value.write_bits(&mut bits);
        let touch = Touch::Write(&bits);
        if let Some(c) = self.races.observe(Resource::Buffer(binding), i, buffer.lanes(i), touch, invocation) {
            self.conflicts.push(c);
        }
        buffer.lanes_mut(i).copy_from_slice(&bits);
        Ok(())
    }

    /// Apply the dispatch's out-of-bounds policy to an index into something
    /// that is not a store resource, such as a vector lane.
    pub fn bound(
        &mut self,
        what: impl FnOnce() -> String,
        index: i64,
        extent: usize,
        invocation: InvocationId,
    ) -> Result<Option<usize>> {
        resolve(
            self.oob_policy,
            &self.fixture,
            &mut self.diagnostics,
            what,
            index,
            extent,
            invocation,
        )
    }

    /// Atomic read-modify-write on an `int` or `uint` element. `operands`
    /// follow the memory argument as in GLSL (`compare, data` for
    /// `atomicCompSwap`). Returns the value held before the operation.
    pub fn atomic(
        &mut self,
        op: AtomicOp,
        binding: u32,
        index: i64,
        operands: &[Value],
        invocation: InvocationId,
    ) -> Result<Value> {
        let buffer = self
            .buffers
            .get_mut(&binding)
            .ok_or_else(|| unbound(&self.fixture, "buffer", binding))?;
        let context = || format!("atomic on {}", buffer.label(binding));
        let kind = match buffer.element {
            ValueType::Scalar(k @ (ScalarKind::Int | ScalarKind::Uint)) => k,
            other => return Err(mismatch(&self.fixture, context(), "int or uint", other)),
        };
        let mut scalars = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand.as_scalar() {
                Some(s) if s.kind() == kind => scalars.push(s),
                _ => return Err(mismatch(&self.fixture, context(), kind.name(), operand.ty())),
            }
        }
        let (compare, data) = match (op, scalars.as_slice()) {
            (AtomicOp::CompSwap, &[compare, data]) => (Some(compare), data),
            (AtomicOp::CompSwap, _) => {
                return Err(mismatch(&self.fixture, context(), "2 operands", scalars.len()));
            }
            (_, &[data]) => (None, data),
            _ => return Err(mismatch(&self.fixture, context(), "1 operand", scalars.len())),
        };
        let slot = resolve(
            self.oob_policy,
            &self.fixture,
            &mut self.diagnostics,
            || buffer.label(binding),
            index,
            buffer.len(),
            invocation,
        )?;
        let Some(i) = slot else {
            return Ok(Value::zero(buffer.element));
        };
        if let Some(c) = self.races.observe(Resource::Buffer(binding), i, buffer.lanes(i), Touch::Atomic, invocation) {
            self.conflicts.push(c);
        }
        let old = Scalar::from_bits(kind, buffer.lanes[i]);
        buffer.lanes[i] = atomic_result(op, old, compare, data).to_bits();
        Ok(Value::Scalar(old))
    }

    pub fn atomic_add(
        &mut self,
        binding: u32,
        index: i64,
        delta: Value,
        invocation: InvocationId,
    ) -> Result<Value> {
        self.atomic(AtomicOp::Add, binding, index, &[delta], invocation)
    }

    pub fn atomic_compare_and_swap(
        &mut self,
        binding: u32,
        index: i64,
        expected: Value,
        new: Value,
        invocation: InvocationId,
    ) -> Result<Value> {
        self.atomic(AtomicOp::CompSwap, binding, index, &[expected, new], invocation)
    }

    /// Runtime length of a buffer, as `.length()` reports it.
    pub fn length(&self, binding: u32) -> Result<usize> {
        self.buffer_len(binding)
            .ok_or_else(|| unbound(&self.fixture, "buffer", binding))
    }

    fn texel_index(&mut self, binding: u32, coord: [i64; 2], invocation: InvocationId) -> Result<Option<usize>> {
        let image = self
            .images
            .get(&binding)
            .ok_or_else(|| unbound(&self.fixture, "image", binding))?;
        let mut resolved = [0; 2];
        for (axis, (&c, extent)) in coord.iter().zip([image.width, image.height]).enumerate() {
            let slot = resolve(
                self.oob_policy,
                &self.fixture,
                &mut self.diagnostics,
                || format!("{} coordinate of {}", ["x", "y"][axis], image.label(binding)),
                c,
                extent as usize,
                invocation,
            )?;
            let Some(slot) = slot else { return Ok(None) };
            resolved[axis] = slot;
        }
        Ok(Some(resolved[1] * image.width as usize + resolved[0]))
    }

    pub fn image_load(&mut self, binding: u32, coord: [i64; 2], invocation: InvocationId) -> Result<Value> {
        let texel = self.texel_index(binding, coord, invocation)?;
        let image = self
            .images
            .get(&binding)
            .ok_or_else(|| unbound(&self.fixture, "image", binding))?;
        let Some(t) = texel else {
            return Ok(Value::zero(image.format.load_type()));
        };
        if let Some(c) = self.races.observe(Resource::Image(binding), t, &image.words(t), Touch::Read, invocation) {
            self.conflicts.push(c);
        }
        Ok(image.format.decode(&image.texels[image.range(t)]))
    }

    pub fn image_store(
        &mut self,
        binding: u32,
        coord: [i64; 2],
        value: Value,
        invocation: InvocationId,
    ) -> Result<()> {
        let format = self
            .image_format(binding)
            .ok_or_else(|| unbound(&self.fixture, "image", binding))?;
        let bytes = format.encode(&value).map_err(|e| {
            let context = format!("imageStore to image binding {binding}");
            mismatch(&self.fixture, context, e.expected, e.found)
        })?;
        let Some(t) = self.texel_index(binding, coord, invocation)? else {
            return Ok(());
        };
        let Some(image) = self.images.get_mut(&binding) else {
            return Err(unbound(&self.fixture, "image", binding));
        };
        let words: Vec<u32> = bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned::<u32>).collect();
        if let Some(c) = self.races.observe(Resource::Image(binding), t, &image.words(t), Touch::Write(&words), invocation) {
            self.conflicts.push(c);
        }
        let range = image.range(t);
        image.texels[range].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn image_atomic_add(
        &mut self,
        binding: u32,
        coord: [i64; 2],
        value: Value,
        invocation: InvocationId,
    ) -> Result<Value> {
        let format = self
            .image_format(binding)
            .ok_or_else(|| unbound(&self.fixture, "image", binding))?;
        let context = || format!("imageAtomicAdd on image binding {binding}");
        if !format.supports_atomics() {
            return Err(mismatch(&self.fixture, context(), "an r32i or r32ui image", format));
        }
        let kind = format.sample_kind();
        let delta = match value.as_scalar() {
            Some(s) if s.kind() == kind => s,
            _ => return Err(mismatch(&self.fixture, context(), kind.name(), value.ty())),
        };
        let Some(t) = self.texel_index(binding, coord, invocation)? else {
            return Ok(Value::Scalar(Scalar::zero(kind)));
        };
        let Some(image) = self.images.get_mut(&binding) else {
            return Err(unbound(&self.fixture, "image", binding));
        };
        let words = image.words(t);
        if let Some(c) = self.races.observe(Resource::Image(binding), t, &words, Touch::Atomic, invocation) {
            self.conflicts.push(c);
        }
        let old = Scalar::from_bits(kind, words[0]);
        let new = atomic_result(AtomicOp::Add, old, None, delta);
        let range = image.range(t);
        image.texels[range].copy_from_slice(&new.to_bits().to_le_bytes());
        Ok(Value::Scalar(old))
    }

    pub fn image_size(&self, binding: u32) -> Result<[u32; 2]> {
        self.image_extent(binding)
            .ok_or_else(|| unbound(&self.fixture, "image", binding))
    }

    /// A uniform, or one element of a uniform array.
    pub fn uniform(&mut self, slot: usize, element: Option<i64>, invocation: InvocationId) -> Result<Value> {
        let Some(uniform) = self.uniforms.get(slot) else {
            return Err(unbound(&self.fixture, "uniform", slot as u32));
        };
        match element {
            None if uniform.is_array => Err(mismatch(
                &self.fixture,
                format!("use of uniform `{}`", uniform.name),
                "an indexed element",
                format!("{}[{}]", uniform.ty, uniform.values.len()),
            )),
            None => Ok(uniform.values[0]),
            Some(index) => {
                let slot = resolve(
                    self.oob_policy,
                    &self.fixture,
                    &mut self.diagnostics,
                    || format!("uniform `{}`", uniform.name),
                    index,
                    uniform.values.len(),
                    invocation,
                )?;
                Ok(slot.map_or_else(|| Value::zero(uniform.ty), |i| uniform.values[i]))
            }
        }
    }

    pub fn sample(
        &self,
        binding: u32,
        oracle: &dyn SamplerOracle,
        coord: Vec2,
        bias: Option<f32>,
    ) -> Result<[f32; 4]> {
        let texture = self
            .textures
            .get(&binding)
            .ok_or_else(|| unbound(&self.fixture, "sampler", binding))?;
        let request = SampleRequest {
            binding,
            texture,
            coord,
            bias,
        };
        oracle
            .sample(&request)
            .map_err(|reason| EngineError::SamplerUnavailable {
                fixture: self.fixture.clone(),
                binding,
                reason,
            })
    }

    // Dispatch bookkeeping.

    pub fn record_fault(&mut self, error: &EngineError, invocation: InvocationId) {
        self.diagnostics.record_error(error, invocation);
    }

    pub fn take_conflicts(&mut self) -> Vec<Conflict> {
        std::mem::take(&mut self.conflicts)
    }

    fn resource_label(&self, resource: Resource) -> String {
        let label = match resource {
            Resource::Buffer(b) => self.buffers.get(&b).map(|s| s.label(b)),
            Resource::Image(b) => self.images.get(&b).map(|s| s.label(b)),
        };
        label.unwrap_or_else(|| resource.to_string())
    }

    pub fn race_error(&self, conflict: &Conflict) -> EngineError {
        EngineError::RaceDetected {
            fixture: self.fixture.clone(),
            resource: self.resource_label(conflict.resource),
            index: conflict.index,
            first: conflict.first,
            second: conflict.second,
            detail: conflict.detail.to_string(),
        }
    }

    /// Record a race as a diagnostic. The message leaves out the invocation
    /// pair so repeated races on one element fold together.
    pub fn report_race(&mut self, conflict: &Conflict) {
        let message = format!(
            "race on {}[{}]: {}",
            self.resource_label(conflict.resource),
            conflict.index,
            conflict.detail
        );
        self.diagnostics
            .record(ErrorKind::RaceDetected, message, conflict.first);
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn freeze(self) -> ResourceSnapshot {
        let mut diagnostics = self.diagnostics;
        diagnostics.normalize();
        ResourceSnapshot {
            fixture: self.fixture,
            buffers: self
                .buffers
                .into_iter()
                .map(|(binding, b)| {
                    let snapshot = BufferSnapshot {
                        name: b.name,
                        element: b.element,
                        lanes: b.lanes,
                    };
                    (binding, snapshot)
                })
                .collect(),
            images: self
                .images
                .into_iter()
                .map(|(binding, i)| {
                    let snapshot = ImageSnapshot {
                        name: i.name,
                        format: i.format,
                        width: i.width,
                        height: i.height,
                        texels: i.texels,
                    };
                    (binding, snapshot)
                })
                .collect(),
            diagnostics,
        }
    }
}

/// The store as shared by the invocations of one dispatch.
#[derive(Debug)]
pub struct SharedStore(Mutex<ResourceStore>);

impl SharedStore {
    pub fn new(store: ResourceStore) -> Self {
        Self(Mutex::new(store))
    }

    /// A panicking invocation leaves the store consistent: every accessor
    /// finishes its mutation before it can fail.
    pub fn lock(&self) -> MutexGuard<'_, ResourceStore> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_inner(self) -> ResourceStore {
        self.0.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
