//! Conversion of descriptor literals to engine values, and seeding a fresh
//! store from a [`CaseDescriptor`].

use crate::error::{EngineError, Result};
use crate::format::ImageFormat;
use crate::loader::ShaderModel;
use crate::sampler::Texture;
use crate::store::ResourceStore;
use crate::value::{Scalar, ScalarKind, Value, ValueType};
use csref_types::case::{BufferSeed, ImageSeed, UniformSeed};
use csref_types::{CaseDescriptor, Literal};

fn describe(literal: &Literal) -> String {
    match literal {
        Literal::Bool(b) => format!("`{b}`"),
        Literal::Int(i) => format!("`{i}`"),
        Literal::Float(f) => format!("`{f:?}`"),
        Literal::List(items) => format!("a list of {}", items.len()),
    }
}

pub fn scalar(literal: &Literal, kind: ScalarKind) -> Result<Scalar, String> {
    let out_of_range = || format!("{} does not fit in {}", describe(literal), kind.name());
    match (literal, kind) {
        (Literal::Bool(b), ScalarKind::Bool) => Ok(Scalar::Bool(*b)),
        (Literal::Int(i), ScalarKind::Int) => i32::try_from(*i).map(Scalar::Int).map_err(|_| out_of_range()),
        (Literal::Int(i), ScalarKind::Uint) => u32::try_from(*i).map(Scalar::Uint).map_err(|_| out_of_range()),
        (Literal::Int(i), ScalarKind::Float) => Ok(Scalar::Float(*i as f32)),
        (Literal::Float(f), ScalarKind::Float) => Ok(Scalar::Float(*f as f32)),
        _ => Err(format!("expected a {} literal, found {}", kind.name(), describe(literal))),
    }
}

fn scalars(items: &[Literal], kind: ScalarKind) -> Result<Vec<Scalar>, String> {
    items.iter().map(|item| scalar(item, kind)).collect()
}

/// Convert `literal` to a value of `ty`. A bare scalar broadcasts over a
/// vector; a `mat3` is nine floats or three columns of three, column-major.
pub fn value(literal: &Literal, ty: ValueType) -> Result<Value, String> {
    let kind = ty.scalar_kind();
    let comps = match (ty, literal) {
        (ValueType::Scalar(_), Literal::List(_)) => {
            return Err(format!("expected a {ty} literal, found {}", describe(literal)));
        }
        (ValueType::Vector(_, n), Literal::Bool(_) | Literal::Int(_) | Literal::Float(_)) => {
            vec![scalar(literal, kind)?; usize::from(n)]
        }
        (ValueType::Mat3, Literal::List(cols))
            if cols.len() == 3 && cols.iter().all(|c| matches!(c, Literal::List(_))) =>
        {
            let mut comps = Vec::with_capacity(9);
            for col in cols {
                let Literal::List(items) = col else { continue };
                if items.len() != 3 {
                    return Err(format!("mat3 columns have 3 rows, found {}", items.len()));
                }
                comps.extend(scalars(items, kind)?);
            }
            comps
        }
        (_, Literal::List(items)) => scalars(items, kind)?,
        (ValueType::Mat3, _) => return Err(format!("expected a mat3 literal, found {}", describe(literal))),
        (ValueType::Scalar(_), _) => vec![scalar(literal, kind)?],
    };
    if comps.len() != ty.components() {
        return Err(format!(
            "{ty} has {} components, found {}",
            ty.components(),
            comps.len()
        ));
    }
    Ok(Value::from_components(ty, &comps))
}

/// Texel bytes for `literal` in `format`. A bare scalar fills a
/// single-channel texel or broadcasts over all four channels.
pub fn texel(literal: &Literal, format: ImageFormat) -> Result<Vec<u8>, String> {
    let kind = format.sample_kind();
    let channels = match literal {
        Literal::List(items) => scalars(items, kind)?,
        _ => vec![scalar(literal, kind)?; format.channels()],
    };
    format
        .encode_channels(&channels)
        .map_err(|err| err.to_string())
}

fn invalid(store: &ResourceStore, target: impl Into<String>, message: String) -> EngineError {
    EngineError::InvalidSeed {
        fixture: store.fixture().to_string(),
        target: target.into(),
        message,
    }
}

fn seed_buffer(store: &mut ResourceStore, seed: &BufferSeed) -> Result<()> {
    let target = format!("buffer binding {}", seed.binding);
    let Some(element) = store.buffer_element(seed.binding) else {
        return Err(invalid(store, target, "the fixture declares no buffer at this binding".into()));
    };
    let len = match seed.len {
        Some(len) if len < seed.data.len() => {
            let message = format!("{} data elements do not fit in length {len}", seed.data.len());
            return Err(invalid(store, target, message));
        }
        Some(len) => len,
        None if !seed.data.is_empty() => seed.data.len(),
        None => store.buffer_len(seed.binding).unwrap_or_default(),
    };
    store.allocate_buffer(seed.binding, len)?;

    let convert = |store: &ResourceStore, literal: &Literal| {
        value(literal, element).map_err(|message| invalid(store, target.clone(), message))
    };
    if let Some(fill) = &seed.fill {
        let fill = convert(store, fill)?;
        for index in 0..len {
            store.seed_element(seed.binding, index, fill)?;
        }
    }
    for (index, literal) in seed.data.iter().enumerate() {
        let v = convert(store, literal)?;
        store.seed_element(seed.binding, index, v)?;
    }
    for entry in &seed.set {
        let v = convert(store, &entry.value)?;
        store.seed_element(seed.binding, entry.index, v)?;
    }
    Ok(())
}

fn seed_image(store: &mut ResourceStore, seed: &ImageSeed) -> Result<()> {
    let target = format!("image binding {}", seed.binding);
    let Some(format) = store.image_format(seed.binding) else {
        return Err(invalid(store, target, "the fixture declares no image at this binding".into()));
    };
    let (width, height) = (seed.width, seed.height);
    let count = width as usize * height as usize;
    if seed.data.len() > count {
        let message = format!("{} texels do not fit in {width}x{height}", seed.data.len());
        return Err(invalid(store, target, message));
    }
    store.allocate_image(seed.binding, width, height)?;

    let convert = |store: &ResourceStore, literal: &Literal| {
        texel(literal, format).map_err(|message| invalid(store, target.clone(), message))
    };
    if let Some(fill) = &seed.fill {
        let bytes = convert(store, fill)?;
        for y in 0..height {
            for x in 0..width {
                store.seed_texel(seed.binding, x, y, &bytes)?;
            }
        }
    }
    for (i, literal) in seed.data.iter().enumerate() {
        let bytes = convert(store, literal)?;
        // count > 0 here, so width > 0
        let (x, y) = (i as u32 % width, i as u32 / width);
        store.seed_texel(seed.binding, x, y, &bytes)?;
    }
    for entry in &seed.texels {
        let bytes = convert(store, &entry.value)?;
        store.seed_texel(seed.binding, entry.x, entry.y, &bytes)?;
    }
    Ok(())
}

fn seed_uniform(store: &mut ResourceStore, seed: &UniformSeed) -> Result<()> {
    let Some((slot, ty, array_len)) = store.uniform_slot(&seed.name) else {
        return Err(invalid(
            store,
            seed.name.as_str(),
            "the fixture declares no uniform with this name".into(),
        ));
    };
    let values = match (array_len, &seed.value) {
        (None, literal) => value(literal, ty).map(|v| vec![v]),
        (Some(_), Literal::List(items)) => items.iter().map(|item| value(item, ty)).collect(),
        (Some(len), other) => Err(format!(
            "expected {len} elements of {ty}, found {}",
            describe(other)
        )),
    };
    let values = values.map_err(|message| invalid(store, seed.name.as_str(), message))?;
    store.seed_uniform(slot, values)
}

/// Apply every seed in `case` to `store`, in descriptor order: buffers,
/// images, samplers, uniforms.
pub fn apply(store: &mut ResourceStore, case: &CaseDescriptor) -> Result<()> {
    for seed in &case.buffers {
        seed_buffer(store, seed)?;
    }
    for seed in &case.images {
        seed_image(store, seed)?;
    }
    for seed in &case.samplers {
        store.seed_texture(seed.binding, Texture::new(seed.width, seed.height, seed.pattern))?;
    }
    for seed in &case.uniforms {
        seed_uniform(store, seed)?;
    }
    Ok(())
}

/// A store for `model`, allocated per the case's engine configuration and
/// seeded from the case.
pub fn seeded_store(model: &ShaderModel, case: &CaseDescriptor) -> Result<ResourceStore> {
    let mut store = ResourceStore::new(model, &case.engine);
    apply(&mut store, case)?;
    tracing::debug!(
        fixture = %model.fixture,
        buffers = case.buffers.len(),
        images = case.images.len(),
        samplers = case.samplers.len(),
        uniforms = case.uniforms.len(),
        "seeded store"
    );
    Ok(store)
}
