//! The GLSL value model: a closed set of scalar, vector and `mat3` values.
//!
//! GLSL ES has no implicit conversions, so every operation here checks that
//! its operands agree and reports a [`TypeError`] otherwise. Conversions only
//! happen through [`construct`], which implements constructor syntax such as
//! `uint(x)` or `vec4(v.xyz, 1.0)`.

use crate::loader::ast::{BinaryOp, MathFn, UnaryOp};
use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Float,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Float => "float",
        }
    }

    fn vector_prefix(self) -> &'static str {
        match self {
            Self::Bool => "b",
            Self::Int => "i",
            Self::Uint => "u",
            Self::Float => "",
        }
    }
}

/// The type of a [`Value`]. Serialized as its GLSL spelling (`"uvec3"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ValueType {
    Scalar(ScalarKind),
    Vector(ScalarKind, u8),
    Mat3,
}

impl ValueType {
    /// `vector(kind, 1)` is the scalar type.
    pub fn vector(kind: ScalarKind, len: usize) -> Self {
        match len {
            1 => Self::Scalar(kind),
            // lengths come from swizzles and constructors, both capped at 4
            n => Self::Vector(kind, n as u8),
        }
    }

    pub fn from_glsl(name: &str) -> Option<Self> {
        let scalar = match name {
            "bool" => Some(ScalarKind::Bool),
            "int" => Some(ScalarKind::Int),
            "uint" => Some(ScalarKind::Uint),
            "float" => Some(ScalarKind::Float),
            _ => None,
        };
        if let Some(kind) = scalar {
            return Some(Self::Scalar(kind));
        }
        if name == "mat3" || name == "mat3x3" {
            return Some(Self::Mat3);
        }
        let (kind, rest) = match name.as_bytes().first()? {
            b'b' => (ScalarKind::Bool, &name[1..]),
            b'i' => (ScalarKind::Int, &name[1..]),
            b'u' => (ScalarKind::Uint, &name[1..]),
            _ => (ScalarKind::Float, name),
        };
        match rest {
            "vec2" => Some(Self::Vector(kind, 2)),
            "vec3" => Some(Self::Vector(kind, 3)),
            "vec4" => Some(Self::Vector(kind, 4)),
            _ => None,
        }
    }

    /// Number of scalar components, 9 for `mat3`.
    pub fn components(self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Vector(_, n) => usize::from(n),
            Self::Mat3 => 9,
        }
    }

    pub fn scalar_kind(self) -> ScalarKind {
        match self {
            Self::Scalar(kind) | Self::Vector(kind, _) => kind,
            Self::Mat3 => ScalarKind::Float,
        }
    }

    /// Type of `value[i]` and the number of valid `i`; `None` for scalars.
    pub fn element_type(self) -> Option<(Self, usize)> {
        match self {
            Self::Scalar(_) => None,
            Self::Vector(kind, n) => Some((Self::Scalar(kind), usize::from(n))),
            Self::Mat3 => Some((Self::Vector(ScalarKind::Float, 3), 3)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => f.write_str(kind.name()),
            Self::Vector(kind, n) => write!(f, "{}vec{n}", kind.vector_prefix()),
            Self::Mat3 => f.write_str("mat3"),
        }
    }
}

impl From<ValueType> for String {
    fn from(ty: ValueType) -> Self {
        ty.to_string()
    }
}

impl TryFrom<String> for ValueType {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::from_glsl(&name).ok_or_else(|| format!("unknown GLSL type `{name}`"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
}

impl Scalar {
    pub fn kind(self) -> ScalarKind {
        match self {
            Self::Bool(_) => ScalarKind::Bool,
            Self::Int(_) => ScalarKind::Int,
            Self::Uint(_) => ScalarKind::Uint,
            Self::Float(_) => ScalarKind::Float,
        }
    }

    pub fn zero(kind: ScalarKind) -> Self {
        Self::from_bits(kind, 0)
    }

    pub fn to_bits(self) -> u32 {
        match self {
            Self::Bool(b) => u32::from(b),
            Self::Int(i) => i as u32,
            Self::Uint(u) => u,
            Self::Float(f) => f.to_bits(),
        }
    }

    pub fn from_bits(kind: ScalarKind, bits: u32) -> Self {
        match kind {
            ScalarKind::Bool => Self::Bool(bits != 0),
            ScalarKind::Int => Self::Int(bits as i32),
            ScalarKind::Uint => Self::Uint(bits),
            ScalarKind::Float => Self::Float(f32::from_bits(bits)),
        }
    }

    /// Constructor conversion (`int(x)`, `float(x)`, ...).
    ///
    /// Float to integer conversion truncates toward zero and saturates at the
    /// target range, NaN converts to zero.
    pub fn convert(self, kind: ScalarKind) -> Self {
        match (self, kind) {
            (s, k) if s.kind() == k => s,
            (Self::Bool(b), k) => Self::from_bits(k, 0).with_unit(b),
            (Self::Int(i), ScalarKind::Bool) => Self::Bool(i != 0),
            (Self::Uint(u), ScalarKind::Bool) => Self::Bool(u != 0),
            (Self::Float(f), ScalarKind::Bool) => Self::Bool(f != 0.0),
            (Self::Int(i), ScalarKind::Uint) => Self::Uint(i as u32),
            (Self::Int(i), ScalarKind::Float) => Self::Float(i as f32),
            (Self::Uint(u), ScalarKind::Int) => Self::Int(u as i32),
            (Self::Uint(u), ScalarKind::Float) => Self::Float(u as f32),
            (Self::Float(f), ScalarKind::Int) => Self::Int(f as i32),
            (Self::Float(f), ScalarKind::Uint) => Self::Uint(f as u32),
            (s, _) => s,
        }
    }

    fn with_unit(self, set: bool) -> Self {
        if !set {
            return self;
        }
        match self {
            Self::Bool(_) => Self::Bool(true),
            Self::Int(_) => Self::Int(1),
            Self::Uint(_) => Self::Uint(1),
            Self::Float(_) => Self::Float(1.0),
        }
    }

    pub fn as_index(self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(i64::from(i)),
            Self::Uint(u) => Some(i64::from(u)),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}u"),
            Self::Float(x) => write!(f, "{x:?}"),
        }
    }
}

/// A 2 to 4 lane vector; every lane has the same [`ScalarKind`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector {
    len: u8,
    lanes: [Scalar; 4],
}

impl Vector {
    fn from_lanes(lanes: &[Scalar]) -> Self {
        debug_assert!((2..=4).contains(&lanes.len()));
        let mut out = [lanes[0]; 4];
        out[..lanes.len()].copy_from_slice(lanes);
        Self {
            len: lanes.len() as u8,
            lanes: out,
        }
    }

    pub fn lanes(&self) -> &[Scalar] {
        &self.lanes[..usize::from(self.len)]
    }

    pub fn kind(&self) -> ScalarKind {
        self.lanes[0].kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Vector(Vector),
    Mat3(Mat3),
}

/// Operand types an operation cannot accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeError {
    pub expected: String,
    pub found: String,
}

impl TypeError {
    pub fn new(expected: impl Into<String>, found: impl fmt::Display) -> Self {
        Self {
            expected: expected.into(),
            found: found.to_string(),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

type TypeResult<T> = Result<T, TypeError>;

impl Value {
    pub fn ty(&self) -> ValueType {
        match self {
            Self::Scalar(s) => ValueType::Scalar(s.kind()),
            Self::Vector(v) => ValueType::Vector(v.kind(), v.len),
            Self::Mat3(_) => ValueType::Mat3,
        }
    }

    pub fn zero(ty: ValueType) -> Self {
        Self::from_components(ty, &vec![Scalar::zero(ty.scalar_kind()); ty.components()])
    }

    pub fn uvec3(v: glam::UVec3) -> Self {
        Self::Vector(Vector::from_lanes(&v.to_array().map(Scalar::Uint)))
    }

    /// Build a value of `ty` from exactly `ty.components()` scalars of the
    /// right kind, `mat3` in column-major order.
    pub fn from_components(ty: ValueType, comps: &[Scalar]) -> Self {
        debug_assert_eq!(comps.len(), ty.components());
        match ty {
            ValueType::Scalar(_) => Self::Scalar(comps[0]),
            ValueType::Vector(..) => Self::Vector(Vector::from_lanes(comps)),
            ValueType::Mat3 => {
                let mut cols = [0.0f32; 9];
                for (dst, src) in cols.iter_mut().zip(comps) {
                    *dst = f32::from_bits(src.to_bits());
                }
                Self::Mat3(Mat3::from_cols_array(&cols))
            }
        }
    }

    pub fn components(&self) -> Vec<Scalar> {
        match self {
            Self::Scalar(s) => vec![*s],
            Self::Vector(v) => v.lanes().to_vec(),
            Self::Mat3(m) => m.to_cols_array().into_iter().map(Scalar::Float).collect(),
        }
    }

    pub fn write_bits(&self, out: &mut Vec<u32>) {
        out.extend(self.components().into_iter().map(Scalar::to_bits));
    }

    pub fn from_bits(ty: ValueType, bits: &[u32]) -> Self {
        let kind = ty.scalar_kind();
        let comps: Vec<_> = bits.iter().map(|&b| Scalar::from_bits(kind, b)).collect();
        Self::from_components(ty, &comps)
    }

    /// Same type and identical bit patterns (unlike `==`, which follows
    /// IEEE-754 for float lanes).
    pub fn bit_eq(&self, other: &Self) -> bool {
        self.ty() == other.ty()
            && self
                .components()
                .iter()
                .zip(other.components())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<i64> {
        self.as_scalar().and_then(Scalar::as_index)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Number of elements reachable through `value[i]`.
    pub fn indexable_len(&self) -> usize {
        match self {
            Self::Scalar(_) => 0,
            Self::Vector(v) => usize::from(v.len),
            Self::Mat3(_) => 3,
        }
    }

    /// `value[i]`: a vector lane or a matrix column. `i` must be in range.
    pub fn element(&self, i: usize) -> TypeResult<Self> {
        match self {
            Self::Vector(v) if i < usize::from(v.len) => Ok(Self::Scalar(v.lanes[i])),
            Self::Mat3(m) if i < 3 => Ok(Self::from_vec3(m.col(i))),
            _ => Err(TypeError::new("an indexable vector or matrix", self.ty())),
        }
    }

    pub fn with_element(&self, i: usize, value: Self) -> TypeResult<Self> {
        match (self, value) {
            (Self::Vector(v), Self::Scalar(s)) if i < usize::from(v.len) && s.kind() == v.kind() => {
                let mut out = *v;
                out.lanes[i] = s;
                Ok(Self::Vector(out))
            }
            (Self::Mat3(m), Self::Vector(col))
                if i < 3 && col.len == 3 && col.kind() == ScalarKind::Float =>
            {
                let mut out = *m;
                *out.col_mut(i) = Self::Vector(col).to_vec3();
                Ok(Self::Mat3(out))
            }
            (Self::Mat3(_), other) => Err(TypeError::new("vec3", other.ty())),
            (Self::Vector(v), other) => Err(TypeError::new(v.kind().name(), other.ty())),
            (scalar, _) => Err(TypeError::new("an indexable vector or matrix", scalar.ty())),
        }
    }

    pub fn swizzle(&self, comps: &[u8]) -> TypeResult<Self> {
        let Self::Vector(v) = self else {
            return Err(TypeError::new("a vector to swizzle", self.ty()));
        };
        let lanes = comps
            .iter()
            .map(|&c| {
                v.lanes()
                    .get(usize::from(c))
                    .copied()
                    .ok_or_else(|| TypeError::new(format!("component {c} in range"), self.ty()))
            })
            .collect::<TypeResult<Vec<_>>>()?;
        Ok(Self::from_components(
            ValueType::vector(v.kind(), lanes.len()),
            &lanes,
        ))
    }

    pub fn with_swizzle(&self, comps: &[u8], value: Self) -> TypeResult<Self> {
        let Self::Vector(v) = self else {
            return Err(TypeError::new("a vector to swizzle", self.ty()));
        };
        let expected = ValueType::vector(v.kind(), comps.len());
        if value.ty() != expected {
            return Err(TypeError::new(expected.to_string(), value.ty()));
        }
        let mut out = *v;
        for (&c, lane) in comps.iter().zip(value.components()) {
            let slot = out
                .lanes
                .get_mut(usize::from(c))
                .filter(|_| c < v.len)
                .ok_or_else(|| TypeError::new(format!("component {c} in range"), self.ty()))?;
            *slot = lane;
        }
        Ok(Self::Vector(out))
    }

    fn from_vec3(v: Vec3) -> Self {
        Self::Vector(Vector::from_lanes(&v.to_array().map(Scalar::Float)))
    }

    fn to_vec3(self) -> Vec3 {
        let comps = self.components();
        let f = |i: usize| f32::from_bits(comps[i].to_bits());
        Vec3::new(f(0), f(1), f(2))
    }

    fn is_vec3(&self) -> bool {
        self.ty() == ValueType::Vector(ScalarKind::Float, 3)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let comps = self.components();
        if comps.len() == 1 {
            return write!(f, "{}", comps[0]);
        }
        write!(f, "{}(", self.ty())?;
        for (i, c) in comps.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{c}")?;
        }
        f.write_str(")")
    }
}

/// Constructor syntax: `T(args...)`.
pub fn construct(ty: ValueType, args: &[Value]) -> TypeResult<Value> {
    let kind = ty.scalar_kind();
    if let [single] = args {
        match (ty, single) {
            (ValueType::Mat3, Value::Mat3(m)) => return Ok(Value::Mat3(*m)),
            (ValueType::Mat3, Value::Scalar(s)) => {
                let Scalar::Float(d) = s.convert(ScalarKind::Float) else {
                    unreachable!()
                };
                return Ok(Value::Mat3(Mat3::from_diagonal(Vec3::splat(d))));
            }
            (ValueType::Vector(_, n), Value::Scalar(s)) => {
                return Ok(Value::from_components(
                    ty,
                    &vec![s.convert(kind); usize::from(n)],
                ));
            }
            (ValueType::Scalar(_), other) => {
                return Ok(Value::Scalar(other.components()[0].convert(kind)));
            }
            _ => {}
        }
    }

    let needed = ty.components();
    let Some(last) = args.last() else {
        return Err(TypeError::new(format!("arguments for {ty}"), "none"));
    };
    let comps: Vec<Scalar> = args.iter().flat_map(Value::components).collect();
    let before_last = comps.len() - last.components().len();
    let exact = matches!(ty, ValueType::Mat3 | ValueType::Scalar(_));
    if comps.len() < needed || before_last >= needed || (exact && comps.len() != needed) {
        return Err(TypeError::new(
            format!("{needed} components for {ty}"),
            format!("{} components", comps.len()),
        ));
    }
    let comps: Vec<Scalar> = comps[..needed].iter().map(|c| c.convert(kind)).collect();
    Ok(Value::from_components(ty, &comps))
}

pub fn unary(op: UnaryOp, value: Value) -> TypeResult<Value> {
    let comps = value.components();
    let out = comps
        .iter()
        .map(|&c| match (op, c) {
            (UnaryOp::Neg, Scalar::Int(i)) => Some(Scalar::Int(i.wrapping_neg())),
            (UnaryOp::Neg, Scalar::Uint(u)) => Some(Scalar::Uint(u.wrapping_neg())),
            (UnaryOp::Neg, Scalar::Float(f)) => Some(Scalar::Float(-f)),
            (UnaryOp::BitNot, Scalar::Int(i)) => Some(Scalar::Int(!i)),
            (UnaryOp::BitNot, Scalar::Uint(u)) => Some(Scalar::Uint(!u)),
            (UnaryOp::Not, Scalar::Bool(b)) if comps.len() == 1 => Some(Scalar::Bool(!b)),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| TypeError::new(format!("an operand of `{}`", op.symbol()), value.ty()))?;
    Ok(Value::from_components(value.ty(), &out))
}

pub fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> TypeResult<Value> {
    use BinaryOp::*;
    match op {
        Eq | Ne => {
            if lhs.ty() != rhs.ty() {
                return Err(TypeError::new(lhs.ty().to_string(), rhs.ty()));
            }
            Ok(Value::Scalar(Scalar::Bool((lhs == rhs) == (op == Eq))))
        }
        Lt | Le | Gt | Ge => compare(op, lhs, rhs),
        Shl | Shr => shift(op, lhs, rhs),
        Mul if matches!(lhs, Value::Mat3(_)) || matches!(rhs, Value::Mat3(_)) => {
            matrix_mul(lhs, rhs)
        }
        _ => componentwise(op, lhs, rhs),
    }
}

fn compare(op: BinaryOp, lhs: Value, rhs: Value) -> TypeResult<Value> {
    let mismatch = || TypeError::new("two int, uint or float scalars", format!("{} and {}", lhs.ty(), rhs.ty()));
    let (Some(a), Some(b)) = (lhs.as_scalar(), rhs.as_scalar()) else {
        return Err(mismatch());
    };
    let ordering = match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => x.partial_cmp(&y),
        (Scalar::Uint(x), Scalar::Uint(y)) => x.partial_cmp(&y),
        (Scalar::Float(x), Scalar::Float(y)) => x.partial_cmp(&y),
        _ => return Err(mismatch()),
    };
    let result = ordering.is_some_and(|o| match op {
        BinaryOp::Lt => o.is_lt(),
        BinaryOp::Le => o.is_le(),
        BinaryOp::Gt => o.is_gt(),
        _ => o.is_ge(),
    });
    Ok(Value::Scalar(Scalar::Bool(result)))
}

fn matrix_mul(lhs: Value, rhs: Value) -> TypeResult<Value> {
    match (lhs, rhs) {
        (Value::Mat3(a), Value::Mat3(b)) => Ok(Value::Mat3(a * b)),
        (Value::Mat3(m), v) if v.is_vec3() => Ok(Value::from_vec3(m * v.to_vec3())),
        (v, Value::Mat3(m)) if v.is_vec3() => Ok(Value::from_vec3(m.transpose() * v.to_vec3())),
        _ => componentwise(BinaryOp::Mul, lhs, rhs),
    }
}

fn shift(op: BinaryOp, lhs: Value, rhs: Value) -> TypeResult<Value> {
    let is_integer = |v: &Value| matches!(v.ty().scalar_kind(), ScalarKind::Int | ScalarKind::Uint);
    let shapes_ok = rhs.components().len() == 1 || rhs.components().len() == lhs.components().len();
    if !is_integer(&lhs) || !is_integer(&rhs) || matches!(lhs, Value::Mat3(_)) || !shapes_ok {
        return Err(TypeError::new(
            format!("integer operands of `{}`", op.symbol()),
            format!("{} and {}", lhs.ty(), rhs.ty()),
        ));
    }
    let amounts = rhs.components();
    let out: Vec<Scalar> = lhs
        .components()
        .into_iter()
        .enumerate()
        .map(|(i, a)| {
            let amount = amounts[if amounts.len() == 1 { 0 } else { i }].to_bits() & 31;
            match (op, a) {
                (BinaryOp::Shl, Scalar::Int(x)) => Scalar::Int(x << amount),
                (BinaryOp::Shl, Scalar::Uint(x)) => Scalar::Uint(x << amount),
                (_, Scalar::Int(x)) => Scalar::Int(x >> amount),
                (_, Scalar::Uint(x)) => Scalar::Uint(x >> amount),
                (_, other) => other,
            }
        })
        .collect();
    Ok(Value::from_components(lhs.ty(), &out))
}

fn componentwise(op: BinaryOp, lhs: Value, rhs: Value) -> TypeResult<Value> {
    let (lt, rt) = (lhs.ty(), rhs.ty());
    let ty = match (lt, rt) {
        (a, b) if a == b => a,
        (ValueType::Scalar(k), other) | (other, ValueType::Scalar(k)) if other.scalar_kind() == k => {
            other
        }
        _ => {
            return Err(TypeError::new(
                format!("matching operands of `{}`", op.symbol()),
                format!("{lt} and {rt}"),
            ));
        }
    };
    let (lc, rc) = (lhs.components(), rhs.components());
    let pick = |c: &[Scalar], i: usize| c[if c.len() == 1 { 0 } else { i }];
    let out = (0..ty.components())
        .map(|i| arith(op, pick(&lc, i), pick(&rc, i)))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            TypeError::new(
                format!("operands supported by `{}`", op.symbol()),
                format!("{lt} and {rt}"),
            )
        })?;
    Ok(Value::from_components(ty, &out))
}

/// Integer arithmetic wraps; integer division or remainder by zero yields 0.
fn arith(op: BinaryOp, a: Scalar, b: Scalar) -> Option<Scalar> {
    use BinaryOp::*;
    match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => Some(Scalar::Int(match op {
            Add => x.wrapping_add(y),
            Sub => x.wrapping_sub(y),
            Mul => x.wrapping_mul(y),
            Div => x.checked_div(y).unwrap_or(if y == 0 { 0 } else { x.wrapping_div(y) }),
            Mod => x.checked_rem(y).unwrap_or(0),
            BitAnd => x & y,
            BitOr => x | y,
            BitXor => x ^ y,
            _ => return None,
        })),
        (Scalar::Uint(x), Scalar::Uint(y)) => Some(Scalar::Uint(match op {
            Add => x.wrapping_add(y),
            Sub => x.wrapping_sub(y),
            Mul => x.wrapping_mul(y),
            Div => x.checked_div(y).unwrap_or(0),
            Mod => x.checked_rem(y).unwrap_or(0),
            BitAnd => x & y,
            BitOr => x | y,
            BitXor => x ^ y,
            _ => return None,
        })),
        (Scalar::Float(x), Scalar::Float(y)) => Some(Scalar::Float(match op {
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            Div => x / y,
            _ => return None,
        })),
        _ => None,
    }
}

/// `min`, `max`, `abs` and `clamp`. The trailing arguments of `min`, `max`
/// and `clamp` may be scalars of the first argument's kind.
pub fn math(func: MathFn, args: &[Value]) -> TypeResult<Value> {
    match (func, args) {
        (MathFn::Abs, &[x]) => {
            let out = match x {
                Value::Mat3(_) => None,
                _ => x
                    .components()
                    .into_iter()
                    .map(|c| match c {
                        Scalar::Int(i) => Some(Scalar::Int(i.wrapping_abs())),
                        Scalar::Float(f) => Some(Scalar::Float(f.abs())),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>(),
            };
            out.map(|lanes| Value::from_components(x.ty(), &lanes))
                .ok_or_else(|| TypeError::new("an int or float operand of `abs`", x.ty()))
        }
        (MathFn::Min | MathFn::Max, &[x, y]) => extremum(func, x, y),
        (MathFn::Clamp, &[x, lo, hi]) => extremum(MathFn::Min, extremum(MathFn::Max, x, lo)?, hi),
        _ => Err(TypeError::new(
            format!("{} arguments", func.arity()),
            format!("{} arguments", args.len()),
        )),
    }
}

fn extremum(func: MathFn, x: Value, y: Value) -> TypeResult<Value> {
    let kind = x.ty().scalar_kind();
    let shape_ok = !matches!(x, Value::Mat3(_))
        && kind != ScalarKind::Bool
        && (y.ty() == x.ty() || y.ty() == ValueType::Scalar(kind));
    if !shape_ok {
        return Err(TypeError::new(
            "int, uint or float operands of matching shape",
            format!("{} and {}", x.ty(), y.ty()),
        ));
    }
    let (xc, yc) = (x.components(), y.components());
    let out: Vec<Scalar> = xc
        .iter()
        .enumerate()
        .map(|(i, &a)| {
            let b = yc[if yc.len() == 1 { 0 } else { i }];
            let ordering = match (a, b) {
                (Scalar::Int(p), Scalar::Int(q)) => p.partial_cmp(&q),
                (Scalar::Uint(p), Scalar::Uint(q)) => p.partial_cmp(&q),
                (Scalar::Float(p), Scalar::Float(q)) => p.partial_cmp(&q),
                _ => None,
            };
            // min(a, b) = b < a ? b : a, max(a, b) = a < b ? b : a
            match (func, ordering) {
                (MathFn::Min, Some(Ordering::Greater)) | (MathFn::Max, Some(Ordering::Less)) => b,
                _ => a,
            }
        })
        .collect();
    Ok(Value::from_components(x.ty(), &out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec4(x: f32, y: f32, z: f32, w: f32) -> Value {
        construct(
            ValueType::Vector(ScalarKind::Float, 4),
            &[x, y, z, w].map(|f| Value::Scalar(Scalar::Float(f))),
        )
        .unwrap()
    }

    fn int(i: i32) -> Value {
        Value::Scalar(Scalar::Int(i))
    }

    fn uint(u: u32) -> Value {
        Value::Scalar(Scalar::Uint(u))
    }

    #[test]
    fn test_type_names_round_trip() {
        for name in ["bool", "int", "uint", "float", "vec2", "ivec3", "uvec4", "bvec2", "mat3"] {
            let ty = ValueType::from_glsl(name).unwrap();
            assert_eq!(ty.to_string(), name);
        }
        assert_eq!(ValueType::from_glsl("vec5"), None);
        assert_eq!(ValueType::from_glsl("image2D"), None);
    }

    #[test]
    fn test_vector_add_and_broadcast() {
        let sum = binary(BinaryOp::Add, vec4(1.0, 1.0, 1.0, 1.0), vec4(2.0, 2.0, 2.0, 2.0)).unwrap();
        let sum = binary(BinaryOp::Add, sum, Value::Scalar(Scalar::Float(3.0))).unwrap();
        assert_eq!(sum, vec4(6.0, 6.0, 6.0, 6.0));
    }

    #[test]
    fn test_no_implicit_conversion() {
        let err = binary(BinaryOp::Add, int(1), uint(1)).unwrap_err();
        assert_eq!(err.found, "int and uint");
        assert!(binary(BinaryOp::Lt, int(1), Value::Scalar(Scalar::Float(1.0))).is_err());
    }

    #[test]
    fn test_integer_edge_cases() {
        assert_eq!(binary(BinaryOp::Div, int(7), int(0)).unwrap(), int(0));
        assert_eq!(binary(BinaryOp::Mod, uint(7), uint(0)).unwrap(), uint(0));
        assert_eq!(binary(BinaryOp::Add, int(i32::MAX), int(1)).unwrap(), int(i32::MIN));
        assert_eq!(binary(BinaryOp::Div, int(i32::MIN), int(-1)).unwrap(), int(i32::MIN));
        assert_eq!(binary(BinaryOp::Shl, uint(1), int(33)).unwrap(), uint(2));
        assert_eq!(unary(UnaryOp::Neg, uint(1)).unwrap(), uint(u32::MAX));
    }

    #[test]
    fn test_constructors() {
        let uvec3 = ValueType::Vector(ScalarKind::Uint, 3);
        let v = construct(uvec3, &[vec4(1.9, 2.0, 3.0, 4.0)]).unwrap();
        assert_eq!(v.components(), vec![Scalar::Uint(1), Scalar::Uint(2), Scalar::Uint(3)]);

        let splat = construct(ValueType::Vector(ScalarKind::Float, 4), &[Value::Scalar(Scalar::Float(0.0))]).unwrap();
        assert_eq!(splat, vec4(0.0, 0.0, 0.0, 0.0));

        // every argument has to contribute
        assert!(construct(uvec3, &[vec4(1.0, 2.0, 3.0, 4.0), uint(1)]).is_err());
        assert!(construct(ValueType::Scalar(ScalarKind::Int), &[]).is_err());
    }

    #[test]
    fn test_matrix_vector_product() {
        let m = construct(ValueType::Mat3, &[Value::Scalar(Scalar::Float(2.0))]).unwrap();
        let v = construct(
            ValueType::Vector(ScalarKind::Float, 3),
            &[Value::Scalar(Scalar::Float(1.0)), Value::Scalar(Scalar::Float(2.0)), Value::Scalar(Scalar::Float(3.0))],
        )
        .unwrap();
        let product = binary(BinaryOp::Mul, m, v).unwrap();
        assert_eq!(product.components(), vec![Scalar::Float(2.0), Scalar::Float(4.0), Scalar::Float(6.0)]);
        assert_eq!(product, binary(BinaryOp::Mul, v, m).unwrap());
    }

    #[test]
    fn test_swizzle_read_and_write() {
        let v = vec4(1.0, 2.0, 3.0, 4.0);
        let wx = v.swizzle(&[3, 0]).unwrap();
        assert_eq!(wx.components(), vec![Scalar::Float(4.0), Scalar::Float(1.0)]);

        let written = v.with_swizzle(&[1], Value::Scalar(Scalar::Float(9.0))).unwrap();
        assert_eq!(written, vec4(1.0, 9.0, 3.0, 4.0));
        assert!(v.with_swizzle(&[0, 1], Value::Scalar(Scalar::Float(9.0))).is_err());

        let v2 = v.swizzle(&[0, 1]).unwrap();
        assert!(v2.swizzle(&[2]).is_err());
    }

    #[test]
    fn test_bit_eq_distinguishes_signed_zero() {
        let pos = Value::Scalar(Scalar::Float(0.0));
        let neg = Value::Scalar(Scalar::Float(-0.0));
        assert_eq!(pos, neg);
        assert!(!pos.bit_eq(&neg));
        assert!(pos.bit_eq(&Value::zero(pos.ty())));
    }

    #[test]
    fn test_bits_round_trip_through_value_type() {
        let v = vec4(1.5, -2.0, 0.25, 8.0);
        let mut bits = Vec::new();
        v.write_bits(&mut bits);
        assert_eq!(Value::from_bits(v.ty(), &bits), v);
        let ty: ValueType = serde_json::from_str("\"uvec3\"").unwrap();
        assert_eq!(ty, ValueType::Vector(ScalarKind::Uint, 3));
    }

    #[test]
    fn test_math_builtins() {
        assert_eq!(math(MathFn::Abs, &[int(i32::MIN)]).unwrap(), int(i32::MIN));
        assert_eq!(math(MathFn::Abs, &[int(-3)]).unwrap(), int(3));
        assert!(math(MathFn::Abs, &[uint(3)]).is_err());

        let v = vec4(-1.0, 0.5, 2.0, 9.0);
        let clamped = math(
            MathFn::Clamp,
            &[v, Value::Scalar(Scalar::Float(0.0)), Value::Scalar(Scalar::Float(1.0))],
        )
        .unwrap();
        assert_eq!(clamped, vec4(0.0, 0.5, 1.0, 1.0));
        assert_eq!(math(MathFn::Max, &[uint(3), uint(7)]).unwrap(), uint(7));
        assert_eq!(math(MathFn::Min, &[int(-3), int(7)]).unwrap(), int(-3));
        assert!(math(MathFn::Min, &[int(1), uint(1)]).is_err());
        assert!(math(MathFn::Min, &[int(1)]).is_err());
    }
}
