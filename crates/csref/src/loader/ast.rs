//! Resolved syntax tree of a fixture body and its declarations.
//!
//! Names are resolved while parsing: buffers, images and samplers are
//! referenced by binding index, uniforms by their position in
//! [`ShaderModel::uniforms`](super::ShaderModel::uniforms) and locals by slot.

use crate::format::ImageFormat;
use crate::value::{Value, ValueType};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

impl Access {
    pub fn can_read(self) -> bool {
        self != Self::WriteOnly
    }

    pub fn can_write(self) -> bool {
        self != Self::ReadOnly
    }
}

/// `layout(binding = N) buffer Block { T member[]; } instance;`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferDecl {
    pub binding: u32,
    pub block: String,
    pub instance: Option<String>,
    pub member: String,
    pub element: ValueType,
    pub access: Access,
}

impl BufferDecl {
    /// How the shader spells an element of this buffer.
    pub fn display_name(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{instance}.{}", self.member),
            None => self.member.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDecl {
    pub binding: u32,
    pub name: String,
    pub format: ImageFormat,
    pub access: Access,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplerDecl {
    pub binding: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniformDecl {
    pub location: u32,
    pub name: String,
    pub ty: ValueType,
    pub array_len: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalDecl {
    pub name: String,
    pub ty: ValueType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    LocalInvocationId,
    GlobalInvocationId,
    LocalInvocationIndex,
    WorkGroupId,
    NumWorkGroups,
    WorkGroupSize,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "gl_LocalInvocationID" => Self::LocalInvocationId,
            "gl_GlobalInvocationID" => Self::GlobalInvocationId,
            "gl_LocalInvocationIndex" => Self::LocalInvocationIndex,
            "gl_WorkGroupID" => Self::WorkGroupId,
            "gl_NumWorkGroups" => Self::NumWorkGroups,
            "gl_WorkGroupSize" => Self::WorkGroupSize,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Not => "!",
            Self::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    Min,
    Max,
    And,
    Or,
    Xor,
    Exchange,
    CompSwap,
}

impl AtomicOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "atomicAdd" => Self::Add,
            "atomicMin" => Self::Min,
            "atomicMax" => Self::Max,
            "atomicAnd" => Self::And,
            "atomicOr" => Self::Or,
            "atomicXor" => Self::Xor,
            "atomicExchange" => Self::Exchange,
            "atomicCompSwap" => Self::CompSwap,
            _ => return None,
        })
    }

    /// Operands after the memory argument.
    pub fn operand_count(self) -> usize {
        match self {
            Self::CompSwap => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Min,
    Max,
    Abs,
    Clamp,
}

impl MathFn {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "min" => Self::Min,
            "max" => Self::Max,
            "abs" => Self::Abs,
            "clamp" => Self::Clamp,
            _ => return None,
        })
    }

    pub fn arity(self) -> usize {
        match self {
            Self::Abs => 1,
            Self::Min | Self::Max => 2,
            Self::Clamp => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    Local(usize),
    Builtin(Builtin),
    Uniform(usize),
    UniformElement {
        uniform: usize,
        index: Box<Expr>,
    },
    BufferElement {
        binding: u32,
        index: Box<Expr>,
    },
    BufferLength {
        binding: u32,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Swizzle {
        base: Box<Expr>,
        components: Vec<u8>,
    },
    Construct {
        ty: ValueType,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Atomic {
        op: AtomicOp,
        binding: u32,
        index: Box<Expr>,
        args: Vec<Expr>,
    },
    ImageLoad {
        binding: u32,
        coord: Box<Expr>,
    },
    ImageAtomicAdd {
        binding: u32,
        coord: Box<Expr>,
        value: Box<Expr>,
    },
    ImageSize {
        binding: u32,
    },
    Texture {
        binding: u32,
        coord: Box<Expr>,
        bias: Option<Box<Expr>>,
    },
    Math {
        func: MathFn,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Local(usize),
    BufferElement { binding: u32, index: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Index(Expr),
    Swizzle(Vec<u8>),
}

/// Assignment target: a local or buffer element, optionally narrowed by
/// indexing and swizzles (`Out[i].xy`, `m[1][2]`).
#[derive(Debug, Clone, PartialEq)]
pub struct LValue {
    pub place: Place,
    pub path: Vec<Projection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Declare {
        local: usize,
        init: Option<Expr>,
    },
    /// `targets[0] = targets[1] = ... = value`, or a compound assignment
    /// (`op` set) with exactly one target.
    Assign {
        targets: Vec<LValue>,
        op: Option<BinaryOp>,
        value: Expr,
    },
    ImageStore {
        binding: u32,
        coord: Expr,
        value: Expr,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    Block(Vec<Stmt>),
    Return,
}
