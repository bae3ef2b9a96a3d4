//! Shader Model Loader: turns fixture text into a [`ShaderModel`].
//!
//! Loading is a pure parse. Declarations are collected first, bindings are
//! assigned once the header is complete, and the body of `main` is parsed
//! with every name already resolved. A final pass checks the body against
//! the declared access qualifiers.

pub mod ast;
mod lexer;
mod parser;
mod validate;

use crate::error::Result;
use ast::{BufferDecl, ImageDecl, LocalDecl, SamplerDecl, Stmt, UniformDecl};
use glam::UVec3;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    pub name: String,
    pub behavior: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderModel {
    pub fixture: String,
    pub version: u32,
    pub extensions: Vec<Extension>,
    pub local_size: UVec3,
    pub buffers: Vec<BufferDecl>,
    pub images: Vec<ImageDecl>,
    pub samplers: Vec<SamplerDecl>,
    pub uniforms: Vec<UniformDecl>,
    pub locals: Vec<LocalDecl>,
    pub body: Vec<Stmt>,
}

/// The declaration half of a [`ShaderModel`], as printed by `csref check`.
#[derive(Debug, Serialize)]
pub struct Manifest<'a> {
    pub fixture: &'a str,
    pub version: u32,
    pub extensions: &'a [Extension],
    pub local_size: [u32; 3],
    pub buffers: &'a [BufferDecl],
    pub images: &'a [ImageDecl],
    pub samplers: &'a [SamplerDecl],
    pub uniforms: &'a [UniformDecl],
}

impl ShaderModel {
    pub fn buffer(&self, binding: u32) -> Option<&BufferDecl> {
        self.buffers.iter().find(|b| b.binding == binding)
    }

    pub fn image(&self, binding: u32) -> Option<&ImageDecl> {
        self.images.iter().find(|i| i.binding == binding)
    }

    pub fn sampler(&self, binding: u32) -> Option<&SamplerDecl> {
        self.samplers.iter().find(|s| s.binding == binding)
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformDecl> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn invocations_per_workgroup(&self) -> u64 {
        self.local_size
            .to_array()
            .iter()
            .map(|&n| u64::from(n))
            .product()
    }

    pub fn manifest(&self) -> Manifest<'_> {
        Manifest {
            fixture: &self.fixture,
            version: self.version,
            extensions: &self.extensions,
            local_size: self.local_size.to_array(),
            buffers: &self.buffers,
            images: &self.images,
            samplers: &self.samplers,
            uniforms: &self.uniforms,
        }
    }
}

/// Parse and validate one fixture. `fixture` names it in every error.
pub fn load(fixture: &str, source: &str) -> Result<ShaderModel> {
    let model = parser::parse(fixture, source)?;
    validate::check_body(&model)?;
    tracing::debug!(
        fixture,
        local_size = ?model.local_size,
        buffers = model.buffers.len(),
        images = model.images.len(),
        samplers = model.samplers.len(),
        uniforms = model.uniforms.len(),
        statements = model.body.len(),
        "loaded fixture"
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::ast::*;
    use super::*;
    use crate::error::{EngineError, ErrorKind};
    use crate::format::ImageFormat;
    use crate::value::{ScalarKind, ValueType};

    const COMPUTE: &str = r#"#version 310 es
precision highp float;
precision highp int;
precision highp image2D;

layout(local_size_x=4, local_size_y=2, local_size_z=1) in;

layout(binding = 0) buffer buffer_In {
    uvec3 In[];
};

layout(binding = 1) buffer buffer_Out {
    uvec3 Out[];
};

layout(rgba8) readonly uniform image2D src0;
layout(rgba8) readonly uniform image2D src1;
uniform sampler2D uTex2D0;

uniform uint max;
uniform mat3 uMat[16];
uniform mat3 uMat0;

void main(void) {
    uint index = gl_LocalInvocationIndex;
    if (index > max)
        return;
    Out[index] = In[index] + gl_NumWorkGroups;
}
"#;

    fn load_err(src: &str) -> EngineError {
        load("t", src).unwrap_err()
    }

    fn wrap(decls: &str, body: &str) -> String {
        format!(
            "#version 310 es\nlayout(local_size_x = 1) in;\n{decls}\nvoid main() {{\n{body}\n}}\n"
        )
    }

    #[test]
    fn test_load_compute_template() {
        let model = load("compute", COMPUTE).unwrap();
        assert_eq!(model.version, 310);
        assert_eq!(model.local_size, UVec3::new(4, 2, 1));
        assert_eq!(model.invocations_per_workgroup(), 8);

        let out = model.buffer(1).unwrap();
        assert_eq!(out.member, "Out");
        assert_eq!(out.block, "buffer_Out");
        assert_eq!(out.element, ValueType::Vector(ScalarKind::Uint, 3));

        // images take bindings 0 and 1 in declaration order
        assert_eq!(model.image(0).unwrap().name, "src0");
        assert_eq!(model.image(1).unwrap().name, "src1");
        assert_eq!(model.image(1).unwrap().access, Access::ReadOnly);
        assert_eq!(model.sampler(0).unwrap().name, "uTex2D0");

        // `max` at location 0, the 16-element array at 1..17, then uMat0
        assert_eq!(model.uniform("max").unwrap().location, 0);
        assert_eq!(model.uniform("uMat").unwrap().location, 1);
        assert_eq!(model.uniform("uMat").unwrap().array_len, Some(16));
        assert_eq!(model.uniform("uMat0").unwrap().location, 17);

        assert_eq!(model.locals.len(), 1);
        assert_eq!(model.body.len(), 3);
        assert!(matches!(model.body[1].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_assignment_chain_targets_in_source_order() {
        let src = wrap(
            "layout(binding=0) buffer A { vec4 Out[]; };\n\
             layout(binding=1) buffer B { vec4 Out2[]; };\n\
             layout(binding=2) buffer C { vec4 Out3[]; };",
            "Out[3] = Out2[3] = Out3[3] = vec4(0.0);",
        );
        let model = load("0024", &src).unwrap();
        let StmtKind::Assign { targets, op, .. } = &model.body[0].kind else {
            panic!("expected an assignment");
        };
        assert!(op.is_none());
        let bindings: Vec<u32> = targets
            .iter()
            .map(|t| match t.place {
                Place::BufferElement { binding, .. } => binding,
                Place::Local(_) => u32::MAX,
            })
            .collect();
        assert_eq!(bindings, vec![0, 1, 2]);
    }

    #[test]
    fn test_block_comments_are_accepted() {
        let src = format!(
            "/* Copyright header */\n{}",
            wrap(
                "layout(binding=0) buffer A { uint Out[]; }; /** doc */",
                "Out[0] = 1u; /* store **/",
            )
        );
        let model = load("0005", &src).unwrap();
        assert_eq!(model.body.len(), 1);
    }

    #[test]
    fn test_instance_block_and_atomics() {
        let src = wrap(
            "layout(std430) buffer Counter { uint counter[]; } counter;",
            "atomicAdd(counter.counter[3], 1u); uint n = uint(counter.counter.length());",
        );
        let model = load("ssbo", &src).unwrap();
        let buffer = model.buffer(0).unwrap();
        assert_eq!(buffer.instance.as_deref(), Some("counter"));
        assert_eq!(buffer.display_name(), "counter.counter");
        let StmtKind::Expr(Expr {
            kind: ExprKind::Atomic { op, binding, .. },
            ..
        }) = &model.body[0].kind
        else {
            panic!("expected an atomic expression statement");
        };
        assert_eq!((*op, *binding), (AtomicOp::Add, 0));
    }

    #[test]
    fn test_image_declarations_in_either_order() {
        let src = wrap(
            "layout(r32i, binding = 2) uniform highp iimage2D counts;\n\
             uniform highp layout(rgba8) readonly image2D src;\n\
             writeonly layout(rgba32f) uniform image2D dst;",
            "imageAtomicAdd(counts, ivec2(0, 0), 1);\n\
             imageStore(dst, ivec2(1, 1), imageLoad(src, ivec2(0, 0)));",
        );
        let model = load("image", &src).unwrap();
        assert_eq!(model.image(2).unwrap().format, ImageFormat::R32i);
        assert_eq!(model.image(0).unwrap().name, "src");
        assert_eq!(model.image(1).unwrap().access, Access::WriteOnly);
        assert!(matches!(model.body[1].kind, StmtKind::ImageStore { binding: 1, .. }));
    }

    #[test]
    fn test_extensions_recorded() {
        let src = "#version 310 es\n#extension GL_OES_shader_image_atomic : require\n\
                   layout(local_size_x = 2) in;\nvoid main() {}\n";
        let model = load("ext", src).unwrap();
        assert_eq!(model.extensions[0].name, "GL_OES_shader_image_atomic");
        assert_eq!(model.extensions[0].behavior, "require");
        assert_eq!(model.local_size, UVec3::new(2, 1, 1));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let err = load_err("#version 300 es\nvoid main() {}\n");
        assert_eq!(err.kind(), ErrorKind::MalformedFixture);
        assert!(err.to_string().contains("#version 310 es"));
    }

    #[test]
    fn test_rejects_binding_collision() {
        let err = load_err(&wrap(
            "layout(binding=1) buffer A { int a[]; };\nlayout(binding=1) buffer B { int b[]; };",
            "",
        ));
        assert_eq!(err.kind(), ErrorKind::MalformedFixture);
        let EngineError::MalformedFixture { line, .. } = err else {
            unreachable!()
        };
        assert_eq!(line, 4);
    }

    #[test]
    fn test_unsupported_calls_and_builtins() {
        let err = load_err(&wrap("buffer A { int a[]; };", "a[0] = int(sin(1.0));"));
        assert_eq!(err.kind(), ErrorKind::UnsupportedBuiltin);
        let err = load_err(&wrap("buffer A { int a[]; };", "barrier();"));
        assert_eq!(err.kind(), ErrorKind::UnsupportedBuiltin);
        let err = load_err(&wrap("buffer A { uint a[]; };", "a[0] = gl_SubgroupSize;"));
        let EngineError::UnsupportedBuiltin { name, line, .. } = err else {
            panic!("expected UnsupportedBuiltin");
        };
        assert_eq!((name.as_str(), line), ("gl_SubgroupSize", 5));
    }

    #[test]
    fn test_access_qualifier_contract() {
        let err = load_err(&wrap(
            "layout(rgba8) writeonly uniform image2D dst;",
            "vec4 v = imageLoad(dst, ivec2(0));",
        ));
        assert!(err.to_string().contains("writeonly"));

        let err = load_err(&wrap("readonly buffer A { int a[]; };", "a[0] = 1;"));
        assert!(err.to_string().contains("readonly"));

        let err = load_err(&wrap("writeonly buffer A { int a[]; };", "a[0] += 1;"));
        assert!(err.to_string().contains("writeonly"));

        let err = load_err(&wrap("layout(rgba8) uniform image2D img;", ""));
        assert!(err.to_string().contains("must be `readonly` or `writeonly`"));
    }

    #[test]
    fn test_format_must_match_image_type() {
        let err = load_err(&wrap("layout(r32ui) uniform iimage2D img;", ""));
        assert!(err.to_string().contains("requires `uimage2D`"));
    }

    #[test]
    fn test_atomic_target_must_be_integer_element() {
        let err = load_err(&wrap("buffer A { float a[]; };", "atomicAdd(a[0], 1.0);"));
        assert!(err.to_string().contains("int or uint element"));
        let err = load_err(&wrap("buffer A { uint a[]; };", "uint x = 0u; atomicAdd(x, 1u);"));
        assert!(err.to_string().contains("must be a buffer element"));
    }

    #[test]
    fn test_uniforms_and_builtins_are_not_assignable() {
        let err = load_err(&wrap("uniform uint n;", "n = 1u;"));
        assert!(err.to_string().contains("uniforms cannot be assigned"));
        let err = load_err(&wrap("", "gl_LocalInvocationIndex = 1u;"));
        assert!(err.to_string().contains("built-in"));
    }

    #[test]
    fn test_unknown_identifier_and_redeclaration() {
        let err = load_err(&wrap("", "uint a = b;"));
        assert!(err.to_string().contains("unknown identifier `b`"));
        let err = load_err(&wrap("", "uint a = 1u; int a = 2;"));
        assert!(err.to_string().contains("already declared"));
    }

    #[test]
    fn test_missing_local_size() {
        let err = load_err("#version 310 es\nvoid main() {}\n");
        assert!(err.to_string().contains("local_size_x"));
        let err = load_err("#version 310 es\nlayout(local_size_x = 0) in;\nvoid main() {}\n");
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn test_operator_precedence() {
        let model = load("p", &wrap("buffer A { int a[]; };", "a[0] = 1 + 2 * 3 << 1;")).unwrap();
        let StmtKind::Assign { value, .. } = &model.body[0].kind else {
            panic!("expected an assignment");
        };
        let ExprKind::Binary { op, lhs, .. } = &value.kind else {
            panic!("expected a binary expression");
        };
        assert_eq!(*op, BinaryOp::Shl);
        assert!(matches!(lhs.kind, ExprKind::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn test_manifest_serializes() {
        let model = load("compute", COMPUTE).unwrap();
        let json = serde_json::to_value(model.manifest()).unwrap();
        assert_eq!(json["local_size"], serde_json::json!([4, 2, 1]));
        assert_eq!(json["buffers"][1]["element"], "uvec3");
        assert_eq!(json["images"][0]["format"], "rgba8");
        assert_eq!(json["images"][0]["access"], "read_only");
    }
}
