//! The template compiler.
//!
//! Pipeline: source → [`lexer`] → tokens → [`parser`] → AST →
//! [`transformer`] (async-filter lift) → [`codegen`] → typed IR, with
//! [`emit`] printing the IR as the precompile product.

pub mod ast;
pub mod codegen;
pub mod emit;
pub mod frame;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod syntax;
pub mod transformer;

use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::error::Result;
use codegen::CodegenOptions;
use ir::IrProgram;
use parser::Parser;

/// Everything the pipeline needs to know about its environment.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub autoescape: bool,
    pub throw_on_undefined: bool,
    /// Filter names registered as asynchronous.
    pub async_filters: FxHashSet<String>,
    /// `(tag, extension name, is_async)` for registered custom tags.
    pub extension_tags: Vec<(String, String, bool)>,
}

impl CompileOptions {
    fn codegen(&self) -> CodegenOptions {
        CodegenOptions {
            autoescape: self.autoescape,
            throw_on_undefined: self.throw_on_undefined,
        }
    }
}

/// Compiles template source into an IR program.
pub fn compile(source: &str, opts: &CompileOptions) -> Result<Rc<IrProgram>> {
    tracing::debug!(bytes = source.len(), "compiling template");
    let mut parser = Parser::try_from_source(source)?;
    for (tag, ext_name, is_async) in &opts.extension_tags {
        parser.register_tag(tag, ext_name, *is_async);
    }
    let mut root = parser.parse()?;
    transformer::transform(&mut root, &opts.async_filters);
    let program = codegen::generate(&root, opts.codegen())?;
    tracing::debug!(blocks = program.blocks.len(), "compiled template");
    Ok(Rc::new(program))
}

/// The precompile product: IR text plus the discovered block names.
#[derive(Debug, Clone)]
pub struct Precompiled {
    pub ir: String,
    pub blocks: Vec<String>,
}

/// Compiles and prints a template for ahead-of-time use.
pub fn precompile(source: &str, opts: &CompileOptions) -> Result<Precompiled> {
    let program = compile(source, opts)?;
    Ok(Precompiled {
        ir: emit::emit_program(&program),
        blocks: program.block_names(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_compiles_and_prints() {
        let opts = CompileOptions {
            autoescape: true,
            ..Default::default()
        };
        let out = precompile("Hello {{ name }}{% block b %}x{% endblock %}", &opts).unwrap();
        assert!(out.ir.contains("function root"));
        assert_eq!(out.blocks, vec!["b".to_string()]);
    }

    #[test]
    fn async_filter_names_drive_the_transformer() {
        let opts = CompileOptions {
            async_filters: ["fetch".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let out = precompile("{{ x | fetch }}", &opts).unwrap();
        assert!(out.ir.contains("function(err, t_await_1)"), "Got:\n{}", out.ir);
    }

    #[test]
    fn lex_errors_surface_from_compile() {
        let err = compile("{{ \"unterminated", &CompileOptions::default()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Lex);
    }
}
