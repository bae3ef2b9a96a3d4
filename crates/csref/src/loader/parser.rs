use super::ast::*;
use super::lexer::{SpannedToken, Token, tokenize};
use super::validate::{Declared, assign_slots};
use super::{Extension, ShaderModel};
use crate::error::{EngineError, Result};
use crate::format::ImageFormat;
use crate::value::{Scalar, Value, ValueType};
use glam::UVec3;
use std::collections::HashMap;

const PRECISION_QUALIFIERS: [&str; 3] = ["highp", "mediump", "lowp"];
const MEMORY_QUALIFIERS: [&str; 3] = ["coherent", "volatile", "restrict"];
const BLOCK_LAYOUTS: [&str; 4] = ["std430", "std140", "shared", "packed"];
const SWIZZLE_SETS: [&str; 3] = ["xyzw", "rgba", "stpq"];

#[derive(Debug, Clone, Copy)]
struct Pos {
    line: u32,
    column: u32,
}

impl Pos {
    fn of(token: &SpannedToken) -> Self {
        Self {
            line: token.line,
            column: token.column,
        }
    }

    fn of_expr(expr: &Expr) -> Self {
        Self {
            line: expr.line,
            column: expr.column,
        }
    }

    fn expr(self, kind: ExprKind) -> Expr {
        Expr {
            kind,
            line: self.line,
            column: self.column,
        }
    }
}

struct LayoutItem {
    name: String,
    value: Option<u32>,
    at: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    In,
    Buffer,
    Uniform,
}

#[derive(Default)]
struct Header {
    extensions: Vec<Extension>,
    local_size: Option<UVec3>,
    buffers: Vec<Declared<BufferDecl>>,
    images: Vec<Declared<ImageDecl>>,
    samplers: Vec<Declared<SamplerDecl>>,
    uniforms: Vec<Declared<UniformDecl>>,
}

#[derive(Debug, Clone, Copy)]
enum Name {
    BufferArray(u32),
    BufferInstance(u32),
    Image(u32),
    Sampler(u32),
    Uniform(usize),
    Local(usize),
}

/// What a name or postfix chain denotes before it is known to be a value.
enum Operand {
    Value(Expr),
    BufferArray { binding: u32, at: Pos },
    BufferInstance { binding: u32, at: Pos },
    UniformArray { uniform: usize, at: Pos },
    Image { binding: u32, at: Pos },
    Sampler { binding: u32, at: Pos },
}

impl Operand {
    fn describe(&self) -> &'static str {
        match self {
            Self::Value(_) => "a value",
            Self::BufferArray { .. } => "a buffer array",
            Self::BufferInstance { .. } => "a buffer block instance",
            Self::UniformArray { .. } => "a uniform array",
            Self::Image { .. } => "an image",
            Self::Sampler { .. } => "a sampler",
        }
    }

    fn at(&self) -> Pos {
        match self {
            Self::Value(expr) => Pos::of_expr(expr),
            Self::BufferArray { at, .. }
            | Self::BufferInstance { at, .. }
            | Self::UniformArray { at, .. }
            | Self::Image { at, .. }
            | Self::Sampler { at, .. } => *at,
        }
    }
}

fn declared<T>(explicit: Option<u32>, at: Pos, decl: T) -> Declared<T> {
    Declared {
        explicit,
        line: at.line,
        column: at.column,
        decl,
    }
}

pub(super) fn parse(fixture: &str, source: &str) -> Result<ShaderModel> {
    let tokens = tokenize(source).map_err(|e| EngineError::MalformedFixture {
        fixture: fixture.to_string(),
        line: e.line,
        column: e.column,
        message: format!("unexpected character `{}`", e.text),
    })?;
    let mut parser = Parser {
        fixture,
        tokens,
        pos: 0,
        names: HashMap::new(),
        buffers: Vec::new(),
        uniforms: Vec::new(),
        locals: Vec::new(),
    };
    parser.parse_translation_unit()
}

struct Parser<'a> {
    fixture: &'a str,
    tokens: Vec<SpannedToken>,
    pos: usize,
    names: HashMap<String, Name>,
    buffers: Vec<BufferDecl>,
    uniforms: Vec<UniformDecl>,
    locals: Vec<LocalDecl>,
}

impl Parser<'_> {
    fn parse_translation_unit(&mut self) -> Result<ShaderModel> {
        let version = self.parse_version()?;
        let mut header = Header::default();
        loop {
            match self.peek_token() {
                None => return Err(self.error("missing `void main(void)`")),
                Some(Token::Directive) => self.parse_directive(&mut header)?,
                Some(Token::Precision) => self.skip_precision_statement()?,
                Some(Token::Void) => break,
                Some(_) => self.parse_declaration(&mut header)?,
            }
        }
        let local_size = header.local_size.ok_or_else(|| {
            self.error("missing `layout(local_size_x = ...) in;` before `main`")
        })?;

        let Header {
            extensions,
            mut buffers,
            mut images,
            mut samplers,
            mut uniforms,
            ..
        } = header;
        assign_slots(self.fixture, "buffer binding", &mut buffers, |_| 1, |d, b| {
            d.binding = b
        })?;
        assign_slots(self.fixture, "image binding", &mut images, |_| 1, |d, b| {
            d.binding = b
        })?;
        assign_slots(self.fixture, "sampler binding", &mut samplers, |_| 1, |d, b| {
            d.binding = b
        })?;
        assign_slots(
            self.fixture,
            "uniform location",
            &mut uniforms,
            |u| u.array_len.map_or(1, |n| n as u32),
            |u, l| u.location = l,
        )?;

        for b in &buffers {
            let (name, entry) = match &b.decl.instance {
                Some(instance) => (instance, Name::BufferInstance(b.decl.binding)),
                None => (&b.decl.member, Name::BufferArray(b.decl.binding)),
            };
            self.declare_global(name, entry, b.line, b.column)?;
        }
        for i in &images {
            self.declare_global(&i.decl.name, Name::Image(i.decl.binding), i.line, i.column)?;
        }
        for s in &samplers {
            self.declare_global(&s.decl.name, Name::Sampler(s.decl.binding), s.line, s.column)?;
        }
        for (idx, u) in uniforms.iter().enumerate() {
            self.declare_global(&u.decl.name, Name::Uniform(idx), u.line, u.column)?;
        }
        self.buffers = buffers.into_iter().map(|d| d.decl).collect();
        self.uniforms = uniforms.into_iter().map(|d| d.decl).collect();

        let body = self.parse_main()?;
        if self.peek_token().is_some() {
            return Err(self.error("unexpected input after `main`"));
        }

        Ok(ShaderModel {
            fixture: self.fixture.to_string(),
            version,
            extensions,
            local_size,
            buffers: std::mem::take(&mut self.buffers),
            images: images.into_iter().map(|d| d.decl).collect(),
            samplers: samplers.into_iter().map(|d| d.decl).collect(),
            uniforms: std::mem::take(&mut self.uniforms),
            locals: std::mem::take(&mut self.locals),
            body,
        })
    }

    fn parse_version(&mut self) -> Result<u32> {
        let Some(tok) = self.next() else {
            return Err(self.error("empty fixture"));
        };
        let words: Vec<&str> = tok.lexeme[1..].split_whitespace().collect();
        match words.as_slice() {
            ["version", "310", "es"] => Ok(310),
            ["version", ..] => Err(self.error_at(
                Pos::of(&tok),
                format!("unsupported `{}`, expected `#version 310 es`", tok.lexeme),
            )),
            _ => Err(self.error_at(Pos::of(&tok), "fixture must start with `#version 310 es`")),
        }
    }

    fn parse_directive(&mut self, header: &mut Header) -> Result<()> {
        let Some(tok) = self.next() else {
            return Ok(());
        };
        let text = tok.lexeme[1..].trim();
        let Some(rest) = text.strip_prefix("extension") else {
            return Err(self.error_at(
                Pos::of(&tok),
                format!("unsupported preprocessor directive `{}`", tok.lexeme),
            ));
        };
        match rest.split_once(':') {
            Some((name, behavior))
                if !name.trim().is_empty()
                    && matches!(behavior.trim(), "require" | "enable" | "warn" | "disable") =>
            {
                header.extensions.push(Extension {
                    name: name.trim().to_string(),
                    behavior: behavior.trim().to_string(),
                });
                Ok(())
            }
            _ => Err(self.error_at(
                Pos::of(&tok),
                format!("malformed extension directive `{}`", tok.lexeme),
            )),
        }
    }

    fn skip_precision_statement(&mut self) -> Result<()> {
        self.expect(Token::Precision, "`precision`")?;
        let qualifier = self.expect_ident("a precision qualifier")?;
        if !PRECISION_QUALIFIERS.contains(&qualifier.lexeme.as_str()) {
            return Err(self.error_at(
                Pos::of(&qualifier),
                format!("unknown precision qualifier `{}`", qualifier.lexeme),
            ));
        }
        self.expect_ident("a type")?;
        self.expect(Token::Semicolon, "`;`")?;
        Ok(())
    }

    fn parse_declaration(&mut self, header: &mut Header) -> Result<()> {
        let start = self.here();
        let mut layout = Vec::new();
        let mut access = None;
        let mut storage = None;
        loop {
            match self.peek_token() {
                Some(Token::Layout) => layout.extend(self.parse_layout()?),
                Some(Token::In) if storage.is_none() => {
                    self.pos += 1;
                    storage = Some(Storage::In);
                }
                Some(Token::Buffer) if storage.is_none() => {
                    self.pos += 1;
                    storage = Some(Storage::Buffer);
                }
                Some(Token::Uniform) if storage.is_none() => {
                    self.pos += 1;
                    storage = Some(Storage::Uniform);
                }
                Some(Token::Ident) => {
                    let lexeme = self.tokens[self.pos].lexeme.as_str();
                    let qualifier = match lexeme {
                        "readonly" => Some(Access::ReadOnly),
                        "writeonly" => Some(Access::WriteOnly),
                        q if PRECISION_QUALIFIERS.contains(&q) || MEMORY_QUALIFIERS.contains(&q) => {
                            None
                        }
                        _ => break,
                    };
                    if let Some(q) = qualifier {
                        if access.is_some_and(|a| a != q) {
                            return Err(self.error("`readonly` and `writeonly` are exclusive"));
                        }
                        access = Some(q);
                    }
                    self.pos += 1;
                }
                _ => break,
            }
        }

        match storage {
            Some(Storage::In) => {
                if access.is_some() {
                    return Err(self.error_at(start, "memory qualifiers are not allowed on `in`"));
                }
                self.parse_local_size(&layout, header, start)
            }
            Some(Storage::Buffer) => self.parse_buffer_block(&layout, access, header, start),
            Some(Storage::Uniform) => self.parse_uniform(&layout, access, header, start),
            None => Err(self.error_at(start, "expected a declaration")),
        }
    }

    fn parse_layout(&mut self) -> Result<Vec<LayoutItem>> {
        self.expect(Token::Layout, "`layout`")?;
        self.expect(Token::LParen, "`(`")?;
        let mut items = Vec::new();
        loop {
            let name = self.expect_ident("a layout qualifier")?;
            let value = if self.consume(Token::Assign) {
                Some(self.expect_u32()?)
            } else {
                None
            };
            items.push(LayoutItem {
                name: name.lexeme.clone(),
                value,
                at: Pos::of(&name),
            });
            if !self.consume(Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, "`)`")?;
        Ok(items)
    }

    /// The `key = N` slot among `items`; bare names must satisfy `bare`.
    fn layout_slot(
        &self,
        items: &[LayoutItem],
        key: &str,
        bare: impl Fn(&str) -> bool,
        on: &str,
    ) -> Result<Option<u32>> {
        let mut slot = None;
        for item in items {
            match item.value {
                Some(v) if item.name == key => {
                    if slot.replace(v).is_some() {
                        return Err(self.error_at(item.at, format!("`{key}` given twice")));
                    }
                }
                None if bare(&item.name) => {}
                _ => {
                    return Err(self.error_at(
                        item.at,
                        format!("unexpected layout qualifier `{}` on {on}", item.name),
                    ));
                }
            }
        }
        Ok(slot)
    }

    fn parse_local_size(&mut self, layout: &[LayoutItem], header: &mut Header, start: Pos) -> Result<()> {
        if header.local_size.is_some() {
            return Err(self.error_at(start, "local size declared twice"));
        }
        let mut size = UVec3::ONE;
        for item in layout {
            let axis = match item.name.as_str() {
                "local_size_x" => 0,
                "local_size_y" => 1,
                "local_size_z" => 2,
                other => {
                    return Err(self.error_at(
                        item.at,
                        format!("unexpected layout qualifier `{other}` on `in`"),
                    ));
                }
            };
            match item.value {
                Some(0) | None => {
                    return Err(self.error_at(item.at, format!("`{}` needs a non-zero value", item.name)));
                }
                Some(v) => size[axis] = v,
            }
        }
        if layout.is_empty() {
            return Err(self.error_at(start, "`in` declaration without a local size"));
        }
        self.expect(Token::Semicolon, "`;`")?;
        header.local_size = Some(size);
        Ok(())
    }

    fn parse_buffer_block(
        &mut self,
        layout: &[LayoutItem],
        access: Option<Access>,
        header: &mut Header,
        start: Pos,
    ) -> Result<()> {
        let explicit = self.layout_slot(
            layout,
            "binding",
            |n| BLOCK_LAYOUTS.contains(&n),
            "a buffer block",
        )?;
        let block = self.expect_ident("a block name")?;
        self.expect(Token::LBrace, "`{`")?;
        self.skip_precision_qualifiers();
        let ty = self.expect_ident("a member type")?;
        let element = ValueType::from_glsl(&ty.lexeme)
            .filter(|t| *t != ValueType::Mat3)
            .ok_or_else(|| {
                self.error_at(
                    Pos::of(&ty),
                    format!("unsupported buffer element type `{}`", ty.lexeme),
                )
            })?;
        let member = self.expect_ident("a member name")?;
        self.expect(Token::LBracket, "`[`")?;
        if !self.consume(Token::RBracket) {
            return Err(self.error("buffer members must be runtime-sized arrays `T name[]`"));
        }
        self.expect(Token::Semicolon, "`;`")?;
        if !self.consume(Token::RBrace) {
            return Err(self.error("buffer blocks must hold exactly one member"));
        }
        let instance = match self.peek_token() {
            Some(Token::Ident) => self.next().map(|t| t.lexeme),
            _ => None,
        };
        self.expect(Token::Semicolon, "`;`")?;

        header.buffers.push(Declared {
            explicit,
            line: start.line,
            column: start.column,
            decl: BufferDecl {
                binding: 0,
                block: block.lexeme,
                instance,
                member: member.lexeme,
                element,
                access: access.unwrap_or_default(),
            },
        });
        Ok(())
    }

    fn parse_uniform(
        &mut self,
        layout: &[LayoutItem],
        access: Option<Access>,
        header: &mut Header,
        start: Pos,
    ) -> Result<()> {
        let ty = self.expect_ident("a uniform type")?;
        let name = self.expect_ident("a uniform name")?;

        match ty.lexeme.as_str() {
            image_type @ ("image2D" | "iimage2D" | "uimage2D") => {
                let mut formats = layout
                    .iter()
                    .filter(|i| i.value.is_none())
                    .filter_map(|i| ImageFormat::from_layout(&i.name));
                let format = formats.next().ok_or_else(|| {
                    self.error_at(start, format!("image `{}` needs a format qualifier", name.lexeme))
                })?;
                if formats.next().is_some() {
                    return Err(self.error_at(start, "image declares more than one format"));
                }
                let explicit = self.layout_slot(
                    layout,
                    "binding",
                    |n| ImageFormat::from_layout(n).is_some(),
                    "an image",
                )?;
                if format.image_type() != image_type {
                    return Err(self.error_at(
                        Pos::of(&ty),
                        format!("format `{format}` requires `{}`, found `{image_type}`", format.image_type()),
                    ));
                }
                if access.is_none() && !format.supports_atomics() && format != ImageFormat::R32f {
                    return Err(self.error_at(
                        start,
                        format!("image `{}` with format `{format}` must be `readonly` or `writeonly`", name.lexeme),
                    ));
                }
                self.expect(Token::Semicolon, "`;`")?;
                header.images.push(declared(
                    explicit,
                    start,
                    ImageDecl {
                        binding: 0,
                        name: name.lexeme,
                        format,
                        access: access.unwrap_or_default(),
                    },
                ));
            }
            "sampler2D" => {
                self.reject_access(access, start)?;
                let explicit = self.layout_slot(layout, "binding", |_| false, "a sampler")?;
                self.expect(Token::Semicolon, "`;`")?;
                header.samplers.push(declared(
                    explicit,
                    start,
                    SamplerDecl {
                        binding: 0,
                        name: name.lexeme,
                    },
                ));
            }
            other => {
                let value_ty = ValueType::from_glsl(other).ok_or_else(|| {
                    self.error_at(Pos::of(&ty), format!("unsupported uniform type `{other}`"))
                })?;
                self.reject_access(access, start)?;
                let explicit = self.layout_slot(layout, "location", |_| false, "a uniform")?;
                let array_len = if self.consume(Token::LBracket) {
                    let len = self.expect_u32()?;
                    self.expect(Token::RBracket, "`]`")?;
                    if len == 0 {
                        return Err(self.error_at(start, "uniform arrays need a non-zero length"));
                    }
                    Some(len as usize)
                } else {
                    None
                };
                self.expect(Token::Semicolon, "`;`")?;
                header.uniforms.push(declared(
                    explicit,
                    start,
                    UniformDecl {
                        location: 0,
                        name: name.lexeme,
                        ty: value_ty,
                        array_len,
                    },
                ));
            }
        }
        Ok(())
    }

    fn reject_access(&self, access: Option<Access>, at: Pos) -> Result<()> {
        match access {
            Some(_) => Err(self.error_at(at, "memory qualifiers only apply to buffers and images")),
            None => Ok(()),
        }
    }

    fn declare_global(&mut self, name: &str, entry: Name, line: u32, column: u32) -> Result<()> {
        if self.names.insert(name.to_string(), entry).is_some() {
            return Err(self.error_at(Pos { line, column }, format!("`{name}` is declared twice")));
        }
        Ok(())
    }

    fn declare_local(&mut self, name: &SpannedToken, ty: ValueType) -> Result<usize> {
        let slot = self.locals.len();
        if let Some(Name::Local(_)) = self.names.insert(name.lexeme.clone(), Name::Local(slot)) {
            return Err(self.error_at(
                Pos::of(name),
                format!("`{}` is already declared in `main`", name.lexeme),
            ));
        }
        self.locals.push(LocalDecl {
            name: name.lexeme.clone(),
            ty,
        });
        Ok(slot)
    }

    fn parse_main(&mut self) -> Result<Vec<Stmt>> {
        self.expect(Token::Void, "`void`")?;
        let name = self.expect_ident("`main`")?;
        if name.lexeme != "main" {
            return Err(self.error_at(Pos::of(&name), "only `void main(void)` may be defined"));
        }
        self.expect(Token::LParen, "`(`")?;
        self.consume(Token::Void);
        self.expect(Token::RParen, "`)`")?;
        self.expect(Token::LBrace, "`{`")?;
        self.parse_block_body()
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.consume(Token::RBrace) {
            if self.peek_token().is_none() {
                return Err(self.error("unterminated block"));
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let line = self.here().line;
        let kind = match self.peek_token() {
            Some(Token::LBrace) => {
                self.pos += 1;
                StmtKind::Block(self.parse_block_body()?)
            }
            Some(Token::Semicolon) => {
                self.pos += 1;
                StmtKind::Block(Vec::new())
            }
            Some(Token::If) => {
                self.pos += 1;
                self.expect(Token::LParen, "`(`")?;
                let cond = self.parse_expr()?;
                self.expect(Token::RParen, "`)`")?;
                let then = Box::new(self.parse_stmt()?);
                let otherwise = if self.consume(Token::Else) {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then,
                    otherwise,
                }
            }
            Some(Token::Return) => {
                self.pos += 1;
                if !self.consume(Token::Semicolon) {
                    return Err(self.error("`main` can only `return;`"));
                }
                StmtKind::Return
            }
            Some(Token::Ident) if self.at_local_declaration() => self.parse_local_declaration()?,
            _ => self.parse_expression_stmt()?,
        };
        Ok(Stmt { kind, line })
    }

    fn at_local_declaration(&self) -> bool {
        let mut offset = 0;
        while let Some(word) = self.ident_at(offset) {
            if word == "const" || PRECISION_QUALIFIERS.contains(&word) {
                offset += 1;
            } else {
                break;
            }
        }
        self.ident_at(offset)
            .is_some_and(|w| ValueType::from_glsl(w).is_some())
            && self.peek_at(offset + 1) == Some(Token::Ident)
    }

    fn parse_local_declaration(&mut self) -> Result<StmtKind> {
        while self
            .ident_at(0)
            .is_some_and(|w| w == "const" || PRECISION_QUALIFIERS.contains(&w))
        {
            self.pos += 1;
        }
        let ty_tok = self.expect_ident("a type")?;
        let ty = ValueType::from_glsl(&ty_tok.lexeme)
            .ok_or_else(|| self.error_at(Pos::of(&ty_tok), "expected a type"))?;

        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident("a variable name")?;
            if self.peek_token() == Some(Token::LBracket) {
                return Err(self.error("local arrays are not supported"));
            }
            let init = if self.consume(Token::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            let local = self.declare_local(&name, ty)?;
            decls.push(Stmt {
                kind: StmtKind::Declare { local, init },
                line: name.line,
            });
            if !self.consume(Token::Comma) {
                break;
            }
        }
        self.expect(Token::Semicolon, "`;`")?;

        Ok(match decls.len() {
            1 => decls.remove(0).kind,
            _ => StmtKind::Block(decls),
        })
    }

    fn parse_expression_stmt(&mut self) -> Result<StmtKind> {
        if self.ident_at(0) == Some("imageStore") && self.peek_at(1) == Some(Token::LParen) {
            return self.parse_image_store();
        }

        let first = self.parse_expr()?;
        let kind = match self.peek_token() {
            Some(Token::Assign) => {
                let mut targets = vec![self.to_lvalue(first)?];
                let value = loop {
                    self.pos += 1;
                    let next = self.parse_expr()?;
                    if self.peek_token() == Some(Token::Assign) {
                        targets.push(self.to_lvalue(next)?);
                    } else {
                        break next;
                    }
                };
                StmtKind::Assign {
                    targets,
                    op: None,
                    value,
                }
            }
            Some(tok @ (Token::PlusAssign | Token::MinusAssign | Token::StarAssign)) => {
                self.pos += 1;
                let op = match tok {
                    Token::PlusAssign => BinaryOp::Add,
                    Token::MinusAssign => BinaryOp::Sub,
                    _ => BinaryOp::Mul,
                };
                let target = self.to_lvalue(first)?;
                let value = self.parse_expr()?;
                StmtKind::Assign {
                    targets: vec![target],
                    op: Some(op),
                    value,
                }
            }
            _ => StmtKind::Expr(first),
        };
        self.expect(Token::Semicolon, "`;`")?;
        Ok(kind)
    }

    fn parse_image_store(&mut self) -> Result<StmtKind> {
        let Some(name) = self.next() else {
            return Err(self.error("expected `imageStore`"));
        };
        let mut args = self.parse_call_args()?;
        self.check_arity(Pos::of(&name), "imageStore", args.len(), 3)?;
        let value = self.into_value(args.pop())?;
        let coord = self.into_value(args.pop())?;
        let binding = self.image_arg(args.pop())?;
        self.expect(Token::Semicolon, "`;`")?;
        Ok(StmtKind::ImageStore {
            binding,
            coord,
            value,
        })
    }

    fn to_lvalue(&self, expr: Expr) -> Result<LValue> {
        let at = Pos::of_expr(&expr);
        let mut path = Vec::new();
        let mut current = expr;
        loop {
            match current.kind {
                ExprKind::Index { base, index } => {
                    path.push(Projection::Index(*index));
                    current = *base;
                }
                ExprKind::Swizzle { base, components } => {
                    let mut seen = [false; 4];
                    for &c in &components {
                        if std::mem::replace(&mut seen[usize::from(c)], true) {
                            return Err(self.error_at(at, "swizzle with repeated components cannot be assigned"));
                        }
                    }
                    path.push(Projection::Swizzle(components));
                    current = *base;
                }
                ExprKind::Local(slot) => {
                    path.reverse();
                    return Ok(LValue {
                        place: Place::Local(slot),
                        path,
                    });
                }
                ExprKind::BufferElement { binding, index } => {
                    path.reverse();
                    return Ok(LValue {
                        place: Place::BufferElement {
                            binding,
                            index: *index,
                        },
                        path,
                    });
                }
                ExprKind::Uniform(_) | ExprKind::UniformElement { .. } => {
                    return Err(self.error_at(at, "uniforms cannot be assigned"));
                }
                ExprKind::Builtin(_) => {
                    return Err(self.error_at(at, "built-in variables cannot be assigned"));
                }
                _ => return Err(self.error_at(at, "expression is not assignable")),
            }
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_logical(Token::OrOr, LogicalOp::Or)?;
        if !self.consume(Token::Question) {
            return Ok(cond);
        }
        let then = self.parse_expr()?;
        self.expect(Token::Colon, "`:`")?;
        let otherwise = self.parse_ternary()?;
        Ok(Pos::of_expr(&cond).expr(ExprKind::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }))
    }

    fn parse_logical(&mut self, token: Token, op: LogicalOp) -> Result<Expr> {
        let operand = |p: &mut Self| match op {
            LogicalOp::Or => p.parse_logical(Token::AndAnd, LogicalOp::And),
            LogicalOp::And => p.parse_bit_or(),
        };
        let mut lhs = operand(self)?;
        while self.consume(token) {
            let rhs = operand(self)?;
            lhs = Pos::of_expr(&lhs).expr(ExprKind::Logical {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_binary_level(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr>,
        ops: &[(Token, BinaryOp)],
    ) -> Result<Expr> {
        let mut lhs = operand(self)?;
        while let Some(op) = self
            .peek_token()
            .and_then(|t| ops.iter().find(|(tok, _)| *tok == t))
            .map(|&(_, op)| op)
        {
            self.pos += 1;
            let rhs = operand(self)?;
            lhs = Pos::of_expr(&lhs).expr(ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> Result<Expr> {
        self.parse_binary_level(Self::parse_bit_xor, &[(Token::Pipe, BinaryOp::BitOr)])
    }

    fn parse_bit_xor(&mut self) -> Result<Expr> {
        self.parse_binary_level(Self::parse_bit_and, &[(Token::Caret, BinaryOp::BitXor)])
    }

    fn parse_bit_and(&mut self) -> Result<Expr> {
        self.parse_binary_level(Self::parse_equality, &[(Token::Amp, BinaryOp::BitAnd)])
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            Self::parse_relational,
            &[(Token::Equal, BinaryOp::Eq), (Token::NotEqual, BinaryOp::Ne)],
        )
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            Self::parse_shift,
            &[
                (Token::Less, BinaryOp::Lt),
                (Token::LessEqual, BinaryOp::Le),
                (Token::Greater, BinaryOp::Gt),
                (Token::GreaterEqual, BinaryOp::Ge),
            ],
        )
    }

    fn parse_shift(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            Self::parse_additive,
            &[(Token::Shl, BinaryOp::Shl), (Token::Shr, BinaryOp::Shr)],
        )
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            Self::parse_multiplicative,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            Self::parse_unary,
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Mod),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let at = self.here();
        let op = match self.peek_token() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Tilde) => UnaryOp::BitNot,
            Some(Token::Plus) => {
                self.pos += 1;
                return self.parse_unary();
            }
            _ => {
                let operand = self.parse_postfix()?;
                return self.into_value(Some(operand));
            }
        };
        self.pos += 1;
        let operand = self.parse_unary()?;
        Ok(at.expr(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        }))
    }

    fn parse_postfix(&mut self) -> Result<Operand> {
        let mut operand = self.parse_primary()?;
        loop {
            match self.peek_token() {
                Some(Token::LBracket) => {
                    let bracket = self.here();
                    self.pos += 1;
                    let index = Box::new(self.parse_expr()?);
                    self.expect(Token::RBracket, "`]`")?;
                    operand = match operand {
                        Operand::BufferArray { binding, at } => {
                            Operand::Value(at.expr(ExprKind::BufferElement { binding, index }))
                        }
                        Operand::UniformArray { uniform, at } => {
                            Operand::Value(at.expr(ExprKind::UniformElement { uniform, index }))
                        }
                        Operand::Value(base) => Operand::Value(Pos::of_expr(&base).expr(
                            ExprKind::Index {
                                base: Box::new(base),
                                index,
                            },
                        )),
                        other => {
                            return Err(self.error_at(
                                bracket,
                                format!("{} cannot be indexed", other.describe()),
                            ));
                        }
                    };
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    let field = self.expect_ident("a member or swizzle")?;
                    operand = match operand {
                        Operand::BufferInstance { binding, at } => {
                            let member = self
                                .buffers
                                .iter()
                                .find(|b| b.binding == binding)
                                .map(|b| b.member.as_str());
                            if member != Some(field.lexeme.as_str()) {
                                return Err(self.error_at(
                                    Pos::of(&field),
                                    format!("buffer block has no member `{}`", field.lexeme),
                                ));
                            }
                            Operand::BufferArray { binding, at }
                        }
                        Operand::BufferArray { binding, at } if field.lexeme == "length" => {
                            self.expect(Token::LParen, "`(`")?;
                            self.expect(Token::RParen, "`)`")?;
                            Operand::Value(at.expr(ExprKind::BufferLength { binding }))
                        }
                        Operand::Value(base) => {
                            let components = self.parse_swizzle(&field)?;
                            Operand::Value(Pos::of_expr(&base).expr(ExprKind::Swizzle {
                                base: Box::new(base),
                                components,
                            }))
                        }
                        other => {
                            return Err(self.error_at(
                                Pos::of(&field),
                                format!("`.{}` is not defined on {}", field.lexeme, other.describe()),
                            ));
                        }
                    };
                }
                _ => return Ok(operand),
            }
        }
    }

    fn parse_swizzle(&self, field: &SpannedToken) -> Result<Vec<u8>> {
        let name = &field.lexeme;
        SWIZZLE_SETS
            .iter()
            .find_map(|set| {
                name.chars()
                    .map(|c| set.find(c).map(|i| i as u8))
                    .collect::<Option<Vec<u8>>>()
            })
            .filter(|c| (1..=4).contains(&c.len()))
            .ok_or_else(|| self.error_at(Pos::of(field), format!("invalid swizzle `.{name}`")))
    }

    fn parse_primary(&mut self) -> Result<Operand> {
        let Some(tok) = self.next() else {
            return Err(self.error("unexpected end of input in expression"));
        };
        let at = Pos::of(&tok);
        let literal = match tok.token {
            Token::IntLit => self.int_literal(&tok)?,
            Token::FloatLit => {
                let text = tok.lexeme.trim_end_matches(['f', 'F']);
                let f: f32 = text.parse().map_err(|_| {
                    self.error_at(at, format!("invalid float literal `{}`", tok.lexeme))
                })?;
                Value::Scalar(Scalar::Float(f))
            }
            Token::True => Value::Scalar(Scalar::Bool(true)),
            Token::False => Value::Scalar(Scalar::Bool(false)),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "`)`")?;
                return Ok(Operand::Value(inner));
            }
            Token::Ident if self.peek_token() == Some(Token::LParen) => {
                return self.parse_call(&tok).map(Operand::Value);
            }
            Token::Ident => return self.resolve_name(&tok),
            _ => {
                return Err(self.error_at(
                    at,
                    format!("expected an expression, found `{}`", tok.lexeme),
                ));
            }
        };
        Ok(Operand::Value(at.expr(ExprKind::Literal(literal))))
    }

    fn int_literal(&self, tok: &SpannedToken) -> Result<Value> {
        let text = tok.lexeme.as_str();
        let (digits, unsigned) = match text.strip_suffix(['u', 'U']) {
            Some(d) => (d, true),
            None => (text, false),
        };
        let parsed = if let Some(hex) = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            u64::from_str_radix(hex, 16)
        } else if digits.len() > 1 && digits.starts_with('0') {
            u64::from_str_radix(&digits[1..], 8)
        } else {
            digits.parse()
        };
        let value = parsed
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                self.error_at(
                    Pos::of(tok),
                    format!("integer literal `{text}` does not fit in 32 bits"),
                )
            })?;
        Ok(Value::Scalar(if unsigned {
            Scalar::Uint(value)
        } else {
            Scalar::Int(value as i32)
        }))
    }

    fn resolve_name(&self, tok: &SpannedToken) -> Result<Operand> {
        let at = Pos::of(tok);
        let name = tok.lexeme.as_str();
        if name.starts_with("gl_") {
            return Builtin::from_name(name)
                .map(|b| Operand::Value(at.expr(ExprKind::Builtin(b))))
                .ok_or_else(|| self.unsupported(at, name));
        }
        match self.names.get(name) {
            Some(&Name::Local(slot)) => Ok(Operand::Value(at.expr(ExprKind::Local(slot)))),
            Some(&Name::BufferArray(binding)) => Ok(Operand::BufferArray { binding, at }),
            Some(&Name::BufferInstance(binding)) => Ok(Operand::BufferInstance { binding, at }),
            Some(&Name::Image(binding)) => Ok(Operand::Image { binding, at }),
            Some(&Name::Sampler(binding)) => Ok(Operand::Sampler { binding, at }),
            Some(&Name::Uniform(uniform)) => Ok(match self.uniforms[uniform].array_len {
                Some(_) => Operand::UniformArray { uniform, at },
                None => Operand::Value(at.expr(ExprKind::Uniform(uniform))),
            }),
            None => Err(self.error_at(at, format!("unknown identifier `{name}`"))),
        }
    }

    fn parse_call(&mut self, callee: &SpannedToken) -> Result<Expr> {
        let at = Pos::of(callee);
        let name = callee.lexeme.as_str();
        let args = self.parse_call_args()?;

        if let Some(ty) = ValueType::from_glsl(name) {
            let args = args
                .into_iter()
                .map(|a| self.into_value(Some(a)))
                .collect::<Result<Vec<_>>>()?;
            if args.is_empty() {
                return Err(self.error_at(at, format!("`{name}` constructor needs arguments")));
            }
            return Ok(at.expr(ExprKind::Construct { ty, args }));
        }

        if let Some(op) = AtomicOp::from_name(name) {
            self.check_arity(at, name, args.len(), 1 + op.operand_count())?;
            let mut args = args.into_iter();
            let memory = self.into_value(args.next())?;
            let ExprKind::BufferElement { binding, index } = memory.kind else {
                return Err(self.error_at(
                    Pos::of_expr(&memory),
                    format!("first argument of `{name}` must be a buffer element"),
                ));
            };
            let args = args
                .map(|a| self.into_value(Some(a)))
                .collect::<Result<Vec<_>>>()?;
            return Ok(at.expr(ExprKind::Atomic {
                op,
                binding,
                index,
                args,
            }));
        }

        let mut args = args.into_iter();
        let kind = match name {
            "imageLoad" => {
                self.check_arity(at, name, args.len(), 2)?;
                ExprKind::ImageLoad {
                    binding: self.image_arg(args.next())?,
                    coord: Box::new(self.into_value(args.next())?),
                }
            }
            "imageAtomicAdd" => {
                self.check_arity(at, name, args.len(), 3)?;
                ExprKind::ImageAtomicAdd {
                    binding: self.image_arg(args.next())?,
                    coord: Box::new(self.into_value(args.next())?),
                    value: Box::new(self.into_value(args.next())?),
                }
            }
            "imageSize" => {
                self.check_arity(at, name, args.len(), 1)?;
                ExprKind::ImageSize {
                    binding: self.image_arg(args.next())?,
                }
            }
            "imageStore" => {
                return Err(self.error_at(at, "`imageStore` does not return a value"));
            }
            "texture" => {
                if !(2..=3).contains(&args.len()) {
                    return Err(self.error_at(at, "`texture` takes 2 or 3 arguments"));
                }
                let binding = match args.next() {
                    Some(Operand::Sampler { binding, .. }) => binding,
                    other => return Err(self.expected_arg(at, "a sampler", other)),
                };
                let coord = Box::new(self.into_value(args.next())?);
                let bias = args
                    .next()
                    .map(|a| self.into_value(Some(a)).map(Box::new))
                    .transpose()?;
                ExprKind::Texture {
                    binding,
                    coord,
                    bias,
                }
            }
            _ => {
                let func = MathFn::from_name(name).ok_or_else(|| self.unsupported(at, name))?;
                self.check_arity(at, name, args.len(), func.arity())?;
                ExprKind::Math {
                    func,
                    args: args
                        .map(|a| self.into_value(Some(a)))
                        .collect::<Result<Vec<_>>>()?,
                }
            }
        };
        Ok(at.expr(kind))
    }

    fn parse_call_args(&mut self) -> Result<Vec<Operand>> {
        self.expect(Token::LParen, "`(`")?;
        let mut args = Vec::new();
        if self.consume(Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_arg()?);
            if !self.consume(Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, "`)`")?;
        Ok(args)
    }

    /// Images and samplers are only meaningful as call arguments.
    fn parse_arg(&mut self) -> Result<Operand> {
        let is_opaque = self
            .ident_at(0)
            .and_then(|name| self.names.get(name))
            .is_some_and(|n| matches!(n, Name::Image(_) | Name::Sampler(_)));
        if is_opaque && matches!(self.peek_at(1), Some(Token::Comma | Token::RParen)) {
            let tok = self.tokens[self.pos].clone();
            self.pos += 1;
            return self.resolve_name(&tok);
        }
        Ok(Operand::Value(self.parse_expr()?))
    }

    fn check_arity(&self, at: Pos, name: &str, found: usize, expected: usize) -> Result<()> {
        if found != expected {
            return Err(self.error_at(
                at,
                format!("`{name}` takes {expected} arguments, found {found}"),
            ));
        }
        Ok(())
    }

    fn into_value(&self, operand: Option<Operand>) -> Result<Expr> {
        match operand {
            Some(Operand::Value(expr)) => Ok(expr),
            Some(other) => Err(self.error_at(
                other.at(),
                format!("{} cannot be used as a value", other.describe()),
            )),
            None => Err(self.error("missing argument")),
        }
    }

    fn image_arg(&self, operand: Option<Operand>) -> Result<u32> {
        match operand {
            Some(Operand::Image { binding, .. }) => Ok(binding),
            other => Err(self.expected_arg(self.here(), "an image", other)),
        }
    }

    fn expected_arg(&self, fallback: Pos, what: &str, found: Option<Operand>) -> EngineError {
        match found {
            Some(op) => self.error_at(op.at(), format!("expected {what}, found {}", op.describe())),
            None => self.error_at(fallback, format!("expected {what}")),
        }
    }

    fn skip_precision_qualifiers(&mut self) {
        while self
            .ident_at(0)
            .is_some_and(|w| PRECISION_QUALIFIERS.contains(&w))
        {
            self.pos += 1;
        }
    }

    fn peek_token(&self) -> Option<Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<Token> {
        self.tokens.get(self.pos + offset).map(|t| t.token)
    }

    fn ident_at(&self, offset: usize) -> Option<&str> {
        self.tokens
            .get(self.pos + offset)
            .filter(|t| t.token == Token::Ident)
            .map(|t| t.lexeme.as_str())
    }

    fn next(&mut self) -> Option<SpannedToken> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn consume(&mut self, t: Token) -> bool {
        if self.peek_token() == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: Token, what: &str) -> Result<SpannedToken> {
        match self.tokens.get(self.pos) {
            Some(tok) if tok.token == t => {
                let tok = tok.clone();
                self.pos += 1;
                Ok(tok)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<SpannedToken> {
        self.expect(Token::Ident, what)
    }

    fn expect_u32(&mut self) -> Result<u32> {
        let tok = self.expect(Token::IntLit, "an integer")?;
        match self.int_literal(&tok)? {
            Value::Scalar(Scalar::Int(i)) if i >= 0 => Ok(i as u32),
            Value::Scalar(Scalar::Uint(u)) => Ok(u),
            _ => Err(self.error_at(Pos::of(&tok), "expected a non-negative integer")),
        }
    }

    fn here(&self) -> Pos {
        self.tokens
            .get(self.pos)
            .or(self.tokens.last())
            .map_or(Pos { line: 1, column: 1 }, Pos::of)
    }

    fn error(&self, message: impl Into<String>) -> EngineError {
        let found = self
            .tokens
            .get(self.pos)
            .map_or_else(|| "end of input".to_string(), |t| format!("`{}`", t.lexeme));
        self.error_at(self.here(), format!("{}, found {found}", message.into()))
    }

    fn error_at(&self, at: Pos, message: impl Into<String>) -> EngineError {
        EngineError::MalformedFixture {
            fixture: self.fixture.to_string(),
            line: at.line,
            column: at.column,
            message: message.into(),
        }
    }

    fn unsupported(&self, at: Pos, name: &str) -> EngineError {
        EngineError::UnsupportedBuiltin {
            fixture: self.fixture.to_string(),
            line: at.line,
            column: at.column,
            name: name.to_string(),
        }
    }
}
