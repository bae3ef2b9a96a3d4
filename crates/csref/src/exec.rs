//! Invocation Executor: runs the body of `main` for one invocation against
//! the shared store.
//!
//! Right-hand sides are evaluated completely before anything is stored, and
//! an assignment chain stores one value into its targets right to left.
//! Locals live in the invocation; everything else goes through the store,
//! one lock per access.

use crate::error::{EngineError, InvocationId, Result};
use crate::loader::ShaderModel;
use crate::loader::ast::{
    Builtin, Expr, ExprKind, LValue, LogicalOp, Place, Projection, Stmt, StmtKind,
};
use crate::sampler::SamplerOracle;
use crate::store::SharedStore;
use crate::value::{self, Scalar, ScalarKind, TypeError, Value, ValueType};
use glam::{UVec3, Vec2};
use std::fmt::Display;

/// Where one invocation sits in the dispatch grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationContext {
    pub workgroup_id: UVec3,
    pub local_id: UVec3,
    pub num_workgroups: UVec3,
    pub local_size: UVec3,
}

fn widen(v: UVec3) -> [u64; 3] {
    v.to_array().map(u64::from)
}

impl InvocationContext {
    /// `gl_WorkGroupID * gl_WorkGroupSize + gl_LocalInvocationID`
    pub fn global_id(&self) -> UVec3 {
        self.workgroup_id * self.local_size + self.local_id
    }

    /// `lz * sx * sy + ly * sx + lx`
    pub fn local_index(&self) -> u32 {
        let (l, s) = (self.local_id, self.local_size);
        l.z * s.x * s.y + l.y * s.x + l.x
    }

    /// Position in the sequential order: workgroup-major, x fastest.
    pub fn flat_id(&self) -> InvocationId {
        let [wx, wy, wz] = widen(self.workgroup_id);
        let [nx, ny, _] = widen(self.num_workgroups);
        let per_group: u64 = widen(self.local_size).iter().product();
        ((wz * ny + wy) * nx + wx) * per_group + u64::from(self.local_index())
    }

    pub fn builtin(&self, builtin: Builtin) -> Value {
        match builtin {
            Builtin::LocalInvocationId => Value::uvec3(self.local_id),
            Builtin::GlobalInvocationId => Value::uvec3(self.global_id()),
            Builtin::LocalInvocationIndex => Value::Scalar(Scalar::Uint(self.local_index())),
            Builtin::WorkGroupId => Value::uvec3(self.workgroup_id),
            Builtin::NumWorkGroups => Value::uvec3(self.num_workgroups),
            Builtin::WorkGroupSize => Value::uvec3(self.local_size),
        }
    }
}

pub struct Executor<'a> {
    model: &'a ShaderModel,
    store: &'a SharedStore,
    oracle: &'a dyn SamplerOracle,
    step_budget: u64,
}

impl<'a> Executor<'a> {
    pub fn new(
        model: &'a ShaderModel,
        store: &'a SharedStore,
        oracle: &'a dyn SamplerOracle,
        step_budget: u64,
    ) -> Self {
        Self {
            model,
            store,
            oracle,
            step_budget,
        }
    }

    /// Run one invocation to completion. Stores it made before an error
    /// stay in the store.
    pub fn run(&self, ctx: &InvocationContext) -> Result<()> {
        let mut invocation = Invocation {
            exec: self,
            ctx,
            id: ctx.flat_id(),
            locals: self.model.locals.iter().map(|l| Value::zero(l.ty)).collect(),
            steps: 0,
        };
        invocation.block(&self.model.body)?;
        tracing::trace!(
            invocation = invocation.id,
            steps = invocation.steps,
            "invocation finished"
        );
        Ok(())
    }
}

enum Flow {
    Next,
    Return,
}

/// A projection with its subscripts evaluated and bounded.
enum Step {
    Index(usize),
    Swizzle(Vec<u8>),
}

enum Target {
    Local(usize, Vec<Step>),
    Buffer {
        binding: u32,
        index: i64,
        steps: Vec<Step>,
    },
}

fn get_path(value: Value, steps: &[Step]) -> Result<Value, TypeError> {
    steps.iter().try_fold(value, |v, step| match step {
        Step::Index(i) => v.element(*i),
        Step::Swizzle(c) => v.swizzle(c),
    })
}

fn set_path(value: Value, steps: &[Step], new: Value) -> Result<Value, TypeError> {
    match steps.split_first() {
        None if new.ty() == value.ty() => Ok(new),
        None => Err(TypeError::new(value.ty().to_string(), new.ty())),
        Some((Step::Index(i), rest)) => {
            let inner = set_path(value.element(*i)?, rest, new)?;
            value.with_element(*i, inner)
        }
        Some((Step::Swizzle(c), rest)) => {
            let inner = set_path(value.swizzle(c)?, rest, new)?;
            value.with_swizzle(c, inner)
        }
    }
}

struct Invocation<'e, 'a> {
    exec: &'e Executor<'a>,
    ctx: &'e InvocationContext,
    id: InvocationId,
    locals: Vec<Value>,
    steps: u64,
}

impl Invocation<'_, '_> {
    fn step(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.exec.step_budget {
            return Err(EngineError::StepBudgetExceeded {
                fixture: self.exec.model.fixture.clone(),
                invocation: self.id,
                budget: self.exec.step_budget,
            });
        }
        Ok(())
    }

    fn mismatch(&self, context: String, expected: impl Display, found: impl Display) -> EngineError {
        EngineError::TypeMismatch {
            fixture: self.exec.model.fixture.clone(),
            context,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    fn type_error(&self, what: &str, at: &Expr, e: TypeError) -> EngineError {
        self.mismatch(
            format!("{what} at {}:{}", at.line, at.column),
            e.expected,
            e.found,
        )
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            if let Flow::Return = self.stmt(stmt)? {
                return Ok(Flow::Return);
            }
        }
        Ok(Flow::Next)
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.step()?;
        match &stmt.kind {
            StmtKind::Declare { local, init } => {
                let model = self.exec.model;
                let decl = &model.locals[*local];
                let value = match init {
                    Some(e) => self.eval(e)?,
                    None => Value::zero(decl.ty),
                };
                if value.ty() != decl.ty {
                    let context = format!("initializer of `{}` at line {}", decl.name, stmt.line);
                    return Err(self.mismatch(context, decl.ty, value.ty()));
                }
                self.locals[*local] = value;
            }
            StmtKind::Assign { targets, op, value } => {
                let rhs = self.eval(value)?;
                match (op, targets.as_slice()) {
                    (Some(op), [target]) => {
                        let Some(target) = self.target(target, stmt.line)? else {
                            return Ok(Flow::Next);
                        };
                        let current = self.load(&target, stmt.line)?;
                        let new = value::binary(*op, current, rhs)
                            .map_err(|e| self.type_error(&format!("`{}=`", op.symbol()), value, e))?;
                        self.store(target, new, stmt.line)?;
                    }
                    _ => {
                        for lvalue in targets.iter().rev() {
                            if let Some(target) = self.target(lvalue, stmt.line)? {
                                self.store(target, rhs, stmt.line)?;
                            }
                        }
                    }
                }
            }
            StmtKind::ImageStore {
                binding,
                coord,
                value,
            } => {
                let coord = self.coord(coord)?;
                let value = self.eval(value)?;
                self.exec
                    .store
                    .lock()
                    .image_store(*binding, coord, value, self.id)?;
            }
            StmtKind::Expr(e) => {
                self.eval(e)?;
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                if self.condition(cond)? {
                    return self.stmt(then);
                }
                if let Some(otherwise) = otherwise {
                    return self.stmt(otherwise);
                }
            }
            StmtKind::Block(stmts) => return self.block(stmts),
            StmtKind::Return => return Ok(Flow::Return),
        }
        Ok(Flow::Next)
    }

    /// Evaluate the subscripts of an assignment target. `None` when the
    /// out-of-bounds policy drops the store.
    fn target(&mut self, lvalue: &LValue, line: u32) -> Result<Option<Target>> {
        match &lvalue.place {
            Place::Local(slot) => {
                let ty = self.exec.model.locals[*slot].ty;
                let steps = self.path(ty, &lvalue.path, line)?;
                Ok(steps.map(|steps| Target::Local(*slot, steps)))
            }
            Place::BufferElement { binding, index } => {
                let index = self.index(index)?;
                let Some(element) = self.exec.model.buffer(*binding).map(|b| b.element) else {
                    let context = format!("store at line {line}");
                    return Err(self.mismatch(context, "a declared buffer", format!("binding {binding}")));
                };
                let steps = self.path(element, &lvalue.path, line)?;
                Ok(steps.map(|steps| Target::Buffer {
                    binding: *binding,
                    index,
                    steps,
                }))
            }
        }
    }

    fn path(&mut self, mut ty: ValueType, path: &[Projection], line: u32) -> Result<Option<Vec<Step>>> {
        let mut steps = Vec::with_capacity(path.len());
        for projection in path {
            match projection {
                Projection::Index(e) => {
                    let i = self.index(e)?;
                    let Some((element, len)) = ty.element_type() else {
                        return Err(self.mismatch(
                            format!("subscript at {}:{}", e.line, e.column),
                            "a vector or matrix",
                            ty,
                        ));
                    };
                    let slot = self
                        .exec
                        .store
                        .lock()
                        .bound(|| format!("{ty} subscript at line {line}"), i, len, self.id)?;
                    let Some(slot) = slot else { return Ok(None) };
                    steps.push(Step::Index(slot));
                    ty = element;
                }
                Projection::Swizzle(components) => match ty {
                    ValueType::Vector(kind, n) if components.iter().all(|&c| c < n) => {
                        steps.push(Step::Swizzle(components.clone()));
                        ty = ValueType::vector(kind, components.len());
                    }
                    _ => {
                        return Err(self.mismatch(
                            format!("swizzle at line {line}"),
                            "a vector with the selected components",
                            ty,
                        ));
                    }
                },
            }
        }
        Ok(Some(steps))
    }

    fn load(&mut self, target: &Target, line: u32) -> Result<Value> {
        let (value, steps) = match target {
            Target::Local(slot, steps) => (self.locals[*slot], steps),
            Target::Buffer {
                binding,
                index,
                steps,
            } => {
                let value = self.exec.store.lock().read(*binding, *index, self.id)?;
                (value, steps)
            }
        };
        get_path(value, steps).map_err(|e| self.mismatch(format!("load at line {line}"), e.expected, e.found))
    }

    fn store(&mut self, target: Target, value: Value, line: u32) -> Result<()> {
        let context = || format!("store at line {line}");
        match target {
            Target::Local(slot, steps) => {
                let new = set_path(self.locals[slot], &steps, value)
                    .map_err(|e| self.mismatch(context(), e.expected, e.found))?;
                self.locals[slot] = new;
                Ok(())
            }
            Target::Buffer {
                binding,
                index,
                steps,
            } if steps.is_empty() => self.exec.store.lock().write(binding, index, value, self.id),
            Target::Buffer {
                binding,
                index,
                steps,
            } => {
                let this = &*self;
                this.exec.store.lock().update(binding, index, this.id, |current| {
                    set_path(current, &steps, value)
                        .map_err(|e| this.mismatch(context(), e.expected, e.found))
                })
            }
        }
    }

    fn condition(&mut self, e: &Expr) -> Result<bool> {
        let value = self.eval(e)?;
        value
            .as_bool()
            .ok_or_else(|| self.type_error("condition", e, TypeError::new("bool", value.ty())))
    }

    fn index(&mut self, e: &Expr) -> Result<i64> {
        let value = self.eval(e)?;
        value
            .as_index()
            .ok_or_else(|| self.type_error("index", e, TypeError::new("int or uint", value.ty())))
    }

    fn coord(&mut self, e: &Expr) -> Result<[i64; 2]> {
        let value = self.eval(e)?;
        match (value.ty(), value.components().as_slice()) {
            (ValueType::Vector(ScalarKind::Int, 2), &[Scalar::Int(x), Scalar::Int(y)]) => {
                Ok([i64::from(x), i64::from(y)])
            }
            (ty, _) => Err(self.type_error("image coordinate", e, TypeError::new("ivec2", ty))),
        }
    }

    fn eval(&mut self, e: &Expr) -> Result<Value> {
        self.step()?;
        let store = self.exec.store;
        match &e.kind {
            ExprKind::Literal(v) => Ok(*v),
            ExprKind::Local(slot) => Ok(self.locals[*slot]),
            ExprKind::Builtin(b) => Ok(self.ctx.builtin(*b)),
            ExprKind::Uniform(u) => store.lock().uniform(*u, None, self.id),
            ExprKind::UniformElement { uniform, index } => {
                let i = self.index(index)?;
                store.lock().uniform(*uniform, Some(i), self.id)
            }
            ExprKind::BufferElement { binding, index } => {
                let i = self.index(index)?;
                store.lock().read(*binding, i, self.id)
            }
            ExprKind::BufferLength { binding } => {
                let len = store.lock().length(*binding)?;
                Ok(Value::Scalar(Scalar::Int(i32::try_from(len).unwrap_or(i32::MAX))))
            }
            ExprKind::Index { base, index } => {
                let base_value = self.eval(base)?;
                let i = self.index(index)?;
                let ty = base_value.ty();
                let Some((element, len)) = ty.element_type() else {
                    let err = TypeError::new("a vector or matrix", ty);
                    return Err(self.type_error("subscript", e, err));
                };
                let slot = store.lock().bound(
                    || format!("{ty} subscript at {}:{}", e.line, e.column),
                    i,
                    len,
                    self.id,
                )?;
                match slot {
                    Some(i) => base_value.element(i).map_err(|err| self.type_error("subscript", e, err)),
                    None => Ok(Value::zero(element)),
                }
            }
            ExprKind::Swizzle { base, components } => {
                let v = self.eval(base)?;
                v.swizzle(components).map_err(|err| self.type_error("swizzle", e, err))
            }
            ExprKind::Construct { ty, args } => {
                let args = self.eval_all(args)?;
                value::construct(*ty, &args).map_err(|err| self.type_error(&format!("`{ty}` constructor"), e, err))
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand)?;
                value::unary(*op, v).map_err(|err| self.type_error(&format!("`{}`", op.symbol()), e, err))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                value::binary(*op, l, r).map_err(|err| self.type_error(&format!("`{}`", op.symbol()), e, err))
            }
            ExprKind::Logical { op, lhs, rhs } => {
                let l = self.condition(lhs)?;
                let result = match op {
                    LogicalOp::And => l && self.condition(rhs)?,
                    LogicalOp::Or => l || self.condition(rhs)?,
                };
                Ok(Value::Scalar(Scalar::Bool(result)))
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if self.condition(cond)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            ExprKind::Atomic {
                op,
                binding,
                index,
                args,
            } => {
                let i = self.index(index)?;
                let operands = self.eval_all(args)?;
                store.lock().atomic(*op, *binding, i, &operands, self.id)
            }
            ExprKind::ImageLoad { binding, coord } => {
                let coord = self.coord(coord)?;
                store.lock().image_load(*binding, coord, self.id)
            }
            ExprKind::ImageAtomicAdd {
                binding,
                coord,
                value,
            } => {
                let coord = self.coord(coord)?;
                let value = self.eval(value)?;
                store.lock().image_atomic_add(*binding, coord, value, self.id)
            }
            ExprKind::ImageSize { binding } => {
                let [w, h] = store.lock().image_size(*binding)?;
                let lanes = [w, h].map(|n| Scalar::Int(i32::try_from(n).unwrap_or(i32::MAX)));
                Ok(Value::from_components(ValueType::Vector(ScalarKind::Int, 2), &lanes))
            }
            ExprKind::Texture {
                binding,
                coord,
                bias,
            } => {
                let c = self.eval(coord)?;
                let coord = match c.components().as_slice() {
                    &[Scalar::Float(x), Scalar::Float(y)] => Vec2::new(x, y),
                    _ => return Err(self.type_error("texture coordinate", e, TypeError::new("vec2", c.ty()))),
                };
                let bias = match bias {
                    Some(b) => match self.eval(b)? {
                        Value::Scalar(Scalar::Float(f)) => Some(f),
                        other => {
                            return Err(self.type_error("texture bias", b, TypeError::new("float", other.ty())));
                        }
                    },
                    None => None,
                };
                let rgba = store.lock().sample(*binding, self.exec.oracle, coord, bias)?;
                let lanes = rgba.map(Scalar::Float);
                Ok(Value::from_components(ValueType::Vector(ScalarKind::Float, 4), &lanes))
            }
            ExprKind::Math { func, args } => {
                let args = self.eval_all(args)?;
                value::math(*func, &args).map_err(|err| self.type_error("built-in call", e, err))
            }
        }
    }

    fn eval_all(&mut self, args: &[Expr]) -> Result<Vec<Value>> {
        args.iter().map(|a| self.eval(a)).collect()
    }
}
