//! WGSL composition and checked shader/pipeline creation.
//!
//! Passes are written as complete WGSL modules; `compose` injects extra
//! fragments (helpers, overrides, extra statements) at named anchors before
//! compilation. Compilation and pipeline creation run inside wgpu error
//! scopes so a broken shader disables one pass instead of aborting.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Where a chunk goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkAnchor {
    /// Top of the module, after any `enable` directives.
    Start,
    /// End of the module.
    End,
    /// First statement of the first function whose name ends in `main`.
    Main,
    /// Replace the first occurrence of this text.
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderChunk {
    pub anchor: ChunkAnchor,
    pub code: String,
}

impl ShaderChunk {
    pub fn start(code: impl Into<String>) -> Self {
        Self {
            anchor: ChunkAnchor::Start,
            code: code.into(),
        }
    }

    pub fn end(code: impl Into<String>) -> Self {
        Self {
            anchor: ChunkAnchor::End,
            code: code.into(),
        }
    }

    pub fn main(code: impl Into<String>) -> Self {
        Self {
            anchor: ChunkAnchor::Main,
            code: code.into(),
        }
    }

    pub fn replace(text: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            anchor: ChunkAnchor::Text(text.into()),
            code: code.into(),
        }
    }
}

fn directives_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:\s*(?://[^\n]*|enable\s+[^;]+;|requires\s+[^;]+;))*\s*").expect("static regex"))
}

fn main_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"fn\s+\w*main\s*\([^)]*\)[^{]*\{").expect("static regex"))
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":(\d+):(\d+)").expect("static regex"))
}

/// Apply `chunks` to `source` in order.
///
/// A chunk whose anchor is missing (no `main` function, text not found) is
/// skipped with a warning.
pub fn compose(source: &str, chunks: &[ShaderChunk]) -> String {
    let mut out = source.to_string();
    for chunk in chunks {
        match &chunk.anchor {
            ChunkAnchor::Start => {
                let at = directives_re().find(&out).map(|m| m.end()).unwrap_or(0);
                out.insert_str(at, &format!("{}\n", chunk.code));
            }
            ChunkAnchor::End => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&chunk.code);
                out.push('\n');
            }
            ChunkAnchor::Main => match main_fn_re().find(&out) {
                Some(m) => out.insert_str(m.end(), &format!("\n{}\n", chunk.code)),
                None => log::warn!("shader chunk skipped: no main function to inject into"),
            },
            ChunkAnchor::Text(text) => {
                if out.contains(text.as_str()) {
                    out = out.replacen(text.as_str(), &chunk.code, 1);
                } else {
                    log::warn!("shader chunk skipped: anchor text {:?} not found", text);
                }
            }
        }
    }
    out
}

/// Source line a compiler message points at, as `(line number, text)`.
pub fn offending_line(source: &str, message: &str) -> Option<(usize, String)> {
    let caps = location_re().captures(message)?;
    let line: usize = caps.get(1)?.as_str().parse().ok()?;
    let text = source.lines().nth(line.checked_sub(1)?)?;
    Some((line, text.trim().to_string()))
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader `{label}` failed to compile: {message}")]
    Compilation {
        label: String,
        message: String,
        line: Option<(usize, String)>,
    },

    #[error("pipeline `{label}` failed validation: {message}")]
    Validation { label: String, message: String },
}

impl ShaderError {
    /// Log the error, with the offending source line when known.
    pub fn log(&self) {
        match self {
            ShaderError::Compilation {
                line: Some((number, text)),
                ..
            } => log::error!("{self}\n  at line {number}: {text}"),
            _ => log::error!("{self}"),
        }
    }
}

/// Compile a WGSL module, capturing validation errors.
pub async fn create_shader_module(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> Result<wgpu::ShaderModule, ShaderError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    match device.pop_error_scope().await {
        Some(error) => {
            let message = error.to_string();
            let line = offending_line(source, &message);
            Err(ShaderError::Compilation {
                label: label.to_string(),
                message,
                line,
            })
        }
        None => Ok(module),
    }
}

/// Run a pipeline constructor inside a validation error scope.
pub async fn validated<T>(
    device: &wgpu::Device,
    label: &str,
    build: impl FnOnce() -> T,
) -> Result<T, ShaderError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match device.pop_error_scope().await {
        Some(error) => Err(ShaderError::Validation {
            label: label.to_string(),
            message: error.to_string(),
        }),
        None => Ok(value),
    }
}

/// Log a failed pass and turn it into a no-op.
pub fn or_disabled<T>(result: Result<T, ShaderError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            error.log();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "enable f16;\n\nstruct A { x: f32 }\n\n@fragment\nfn fs_main() -> @location(0) vec4<f32> {\n    return vec4<f32>(1.0);\n}\n";

    #[test]
    fn test_start_goes_after_directives() {
        let out = compose(SOURCE, &[ShaderChunk::start("fn helper() {}")]);
        assert!(out.starts_with("enable f16;"));
        let helper = out.find("fn helper").unwrap();
        assert!(helper > out.find("enable").unwrap());
        assert!(helper < out.find("struct A").unwrap());
    }

    #[test]
    fn test_start_without_directives_is_prepended() {
        let out = compose("fn vs_main() {}\n", &[ShaderChunk::start("const K: f32 = 1.0;")]);
        assert!(out.starts_with("const K: f32 = 1.0;\n"));
    }

    #[test]
    fn test_end_appends() {
        let out = compose("fn a() {}", &[ShaderChunk::end("fn b() {}")]);
        assert_eq!(out, "fn a() {}\nfn b() {}\n");
    }

    #[test]
    fn test_main_goes_into_entry_body() {
        let out = compose(SOURCE, &[ShaderChunk::main("    var scale = 2.0;")]);
        let body = out.find("fn fs_main").unwrap();
        let inserted = out.find("var scale").unwrap();
        let ret = out.find("return").unwrap();
        assert!(body < inserted && inserted < ret);
    }

    #[test]
    fn test_text_replaces_first_occurrence() {
        let out = compose("a = 1.0; b = 1.0;", &[ShaderChunk::replace("1.0", "2.0")]);
        assert_eq!(out, "a = 2.0; b = 1.0;");
    }

    #[test]
    fn test_missing_anchor_leaves_source_untouched() {
        let src = "struct A { x: f32 }";
        assert_eq!(compose(src, &[ShaderChunk::replace("nope", "x")]), src);
        assert_eq!(compose(src, &[ShaderChunk::main("x")]), src);
    }

    #[test]
    fn test_chunks_apply_in_order() {
        let out = compose(
            "fn vs_main() {\n}\n",
            &[ShaderChunk::main("first();"), ShaderChunk::replace("first", "second")],
        );
        assert!(out.contains("second();"));
        assert!(!out.contains("first"));
    }

    #[test]
    fn test_offending_line() {
        let message = "Shader validation error:\n   ┌─ wgsl:7:5\n  │\n7 │     return vec4<f32>(1.0);";
        let (number, text) = offending_line(SOURCE, message).unwrap();
        assert_eq!(number, 7);
        assert_eq!(text, "return vec4<f32>(1.0);");
        assert!(offending_line(SOURCE, "no location").is_none());
        assert!(offending_line(SOURCE, "wgsl:99:1").is_none());
    }
}
