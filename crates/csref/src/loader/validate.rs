//! Checks that need the whole fixture: binding assignment and the contract
//! between declared access qualifiers and what the body does.

use super::ShaderModel;
use super::ast::*;
use crate::error::{EngineError, Result};
use crate::value::{ScalarKind, ValueType};
use std::collections::BTreeSet;

/// A declaration whose binding (or location) may still be implicit.
pub(super) struct Declared<T> {
    pub explicit: Option<u32>,
    pub line: u32,
    pub column: u32,
    pub decl: T,
}

/// Give every declaration its slot range. Explicit slots are claimed first;
/// implicit ones then take the lowest free range in declaration order.
pub(super) fn assign_slots<T>(
    fixture: &str,
    what: &str,
    decls: &mut [Declared<T>],
    width: impl Fn(&T) -> u32,
    mut set: impl FnMut(&mut T, u32),
) -> Result<()> {
    let mut taken = BTreeSet::new();
    for d in decls.iter_mut() {
        let Some(start) = d.explicit else { continue };
        let range = start..start.saturating_add(width(&d.decl));
        if let Some(clash) = range.clone().find(|slot| taken.contains(slot)) {
            return Err(EngineError::MalformedFixture {
                fixture: fixture.to_string(),
                line: d.line,
                column: d.column,
                message: format!("{what} {clash} is already in use"),
            });
        }
        taken.extend(range);
        set(&mut d.decl, start);
    }
    for d in decls.iter_mut().filter(|d| d.explicit.is_none()) {
        let w = width(&d.decl);
        let start = (0u32..)
            .find(|&s| (s..s + w).all(|slot| !taken.contains(&slot)))
            .unwrap_or_default();
        taken.extend(start..start + w);
        set(&mut d.decl, start);
    }
    Ok(())
}

pub(super) fn check_body(model: &ShaderModel) -> Result<()> {
    let checker = Checker { model };
    model.body.iter().try_for_each(|s| checker.stmt(s))
}

struct Checker<'a> {
    model: &'a ShaderModel,
}

impl Checker<'_> {
    fn stmt(&self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Declare { init, .. } => init.iter().try_for_each(|e| self.expr(e)),
            StmtKind::Assign { targets, op, value } => {
                for target in targets {
                    self.lvalue(target, op.is_some())?;
                }
                self.expr(value)
            }
            StmtKind::ImageStore {
                binding,
                coord,
                value,
            } => {
                let image = self.image(*binding);
                if !image.is_some_and(|i| i.access.can_write()) {
                    return Err(self.malformed(
                        coord,
                        format!("image binding {binding} is readonly and cannot be stored to"),
                    ));
                }
                self.expr(coord)?;
                self.expr(value)
            }
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond)?;
                self.stmt(then)?;
                otherwise.iter().try_for_each(|s| self.stmt(s))
            }
            StmtKind::Block(stmts) => stmts.iter().try_for_each(|s| self.stmt(s)),
            StmtKind::Return => Ok(()),
        }
    }

    fn lvalue(&self, target: &LValue, compound: bool) -> Result<()> {
        for projection in &target.path {
            if let Projection::Index(index) = projection {
                self.expr(index)?;
            }
        }
        let Place::BufferElement { binding, index } = &target.place else {
            return Ok(());
        };
        let access = self.buffer(*binding).map(|b| b.access).unwrap_or_default();
        if !access.can_write() {
            return Err(self.malformed(
                index,
                format!("{} is readonly and cannot be assigned", self.buffer_name(*binding)),
            ));
        }
        if compound && !access.can_read() {
            return Err(self.malformed(
                index,
                format!("{} is writeonly and cannot be read", self.buffer_name(*binding)),
            ));
        }
        self.expr(index)
    }

    fn expr(&self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Literal(_)
            | ExprKind::Local(_)
            | ExprKind::Builtin(_)
            | ExprKind::Uniform(_)
            | ExprKind::BufferLength { .. }
            | ExprKind::ImageSize { .. } => Ok(()),
            ExprKind::UniformElement { index, .. } => self.expr(index),
            ExprKind::BufferElement { binding, index } => {
                if !self.buffer(*binding).is_some_and(|b| b.access.can_read()) {
                    return Err(self.malformed(
                        expr,
                        format!("{} is writeonly and cannot be read", self.buffer_name(*binding)),
                    ));
                }
                self.expr(index)
            }
            ExprKind::Index { base, index } => {
                self.expr(base)?;
                self.expr(index)
            }
            ExprKind::Swizzle { base, .. } => self.expr(base),
            ExprKind::Construct { args, .. } | ExprKind::Math { args, .. } => {
                args.iter().try_for_each(|a| self.expr(a))
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                self.expr(lhs)?;
                self.expr(rhs)
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond)?;
                self.expr(then)?;
                self.expr(otherwise)
            }
            ExprKind::Atomic {
                binding,
                index,
                args,
                ..
            } => {
                let Some(buffer) = self.buffer(*binding) else {
                    return Err(self.malformed(expr, format!("no buffer at binding {binding}")));
                };
                if buffer.access != Access::ReadWrite {
                    return Err(self.malformed(
                        expr,
                        format!("atomics need {} to be readable and writable", buffer.display_name()),
                    ));
                }
                if !matches!(
                    buffer.element,
                    ValueType::Scalar(ScalarKind::Int | ScalarKind::Uint)
                ) {
                    return Err(self.malformed(
                        expr,
                        format!(
                            "atomics need an int or uint element, {} holds {}",
                            buffer.display_name(),
                            buffer.element
                        ),
                    ));
                }
                self.expr(index)?;
                args.iter().try_for_each(|a| self.expr(a))
            }
            ExprKind::ImageLoad { binding, coord } => {
                if !self.image(*binding).is_some_and(|i| i.access.can_read()) {
                    return Err(self.malformed(
                        expr,
                        format!("image binding {binding} is writeonly and cannot be loaded"),
                    ));
                }
                self.expr(coord)
            }
            ExprKind::ImageAtomicAdd {
                binding,
                coord,
                value,
            } => {
                match self.image(*binding) {
                    Some(i) if i.format.supports_atomics() && i.access == Access::ReadWrite => {}
                    Some(i) => {
                        return Err(self.malformed(
                            expr,
                            format!(
                                "image atomics need a read-write r32i or r32ui image, `{}` is {}",
                                i.name, i.format
                            ),
                        ));
                    }
                    None => {
                        return Err(self.malformed(expr, format!("no image at binding {binding}")));
                    }
                }
                self.expr(coord)?;
                self.expr(value)
            }
            ExprKind::Texture { coord, bias, .. } => {
                self.expr(coord)?;
                bias.iter().try_for_each(|b| self.expr(b))
            }
        }
    }

    fn buffer(&self, binding: u32) -> Option<&BufferDecl> {
        self.model.buffer(binding)
    }

    fn image(&self, binding: u32) -> Option<&ImageDecl> {
        self.model.image(binding)
    }

    fn buffer_name(&self, binding: u32) -> String {
        self.buffer(binding).map_or_else(
            || format!("buffer binding {binding}"),
            |b| format!("buffer `{}`", b.display_name()),
        )
    }

    fn malformed(&self, at: &Expr, message: String) -> EngineError {
        EngineError::MalformedFixture {
            fixture: self.model.fixture.clone(),
            line: at.line,
            column: at.column,
            message,
        }
    }
}
