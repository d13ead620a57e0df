//! Import specifier rewriting.
//!
//! Replaces relative specifiers in exactly four syntactic shapes with
//! fully-qualified virtual identifiers:
//!
//! 1. `import <bindings> from '<relative>'`
//! 2. `import '<relative>'`
//! 3. `export <bindings> from '<relative>'`
//! 4. `import('<relative>')`
//!
//! Matching runs over the token stream from [`lexer`], so specifiers inside
//! comments, unrelated strings, template text or regex literals are never
//! touched. Everything outside the matched string literal is preserved
//! byte-for-byte, including the literal's own quote character.

pub mod lexer;

use std::ops::Range;

use arcstr::ArcStr;
use thiserror::Error;

use crate::resolve::{self, is_relative, ModulePath, ResolveError};
use crate::utils::VirtualRoot;
use lexer::{tokenize, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    #[error("{path}: non-relative specifier '{specifier}' is not part of the bundled module set")]
    NonRelative { path: ModulePath, specifier: String },

    #[error("{path}: escape sequences in specifier {specifier} are not supported")]
    EscapedSpecifier { path: ModulePath, specifier: String },

    #[error("{path}: {source}")]
    Resolve {
        path: ModulePath,
        #[source]
        source: ResolveError,
    },
}

/// The syntactic form in which a specifier was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportShape {
    Static,
    SideEffect,
    ReExport,
    Dynamic,
}

/// One specifier string literal matched in a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpecifier {
    pub shape: ImportShape,
    /// Literal contents without quotes.
    pub value: String,
    /// Byte span of the literal, quotes included.
    pub span: Range<usize>,
}

/// A module's source with every relative specifier replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenSource {
    pub path: ModulePath,
    pub text: ArcStr,
    /// Modules this source imports, in order of first appearance.
    pub targets: Vec<ModulePath>,
}

/// Find every specifier literal in the four supported import shapes.
pub fn import_targets(source: &str) -> Vec<ImportSpecifier> {
    let tokens = tokenize(source);
    let mut found = Vec::new();

    for i in 0..tokens.len() {
        // `foo.import` / `foo.export` are property accesses.
        if i > 0 && tokens[i - 1].is_punct(b'.') {
            continue;
        }
        let matched = if tokens[i].is_ident(source, "import") {
            match_import(source, &tokens, i + 1)
        } else if tokens[i].is_ident(source, "export") {
            match_reexport(source, &tokens, i + 1)
        } else {
            None
        };

        if let Some((shape, literal)) = matched {
            let span = literal.span.clone();
            found.push(ImportSpecifier {
                shape,
                value: source[span.start + 1..span.end - 1].to_string(),
                span,
            });
        }
    }
    found
}

/// Rewrite `source` (the text of `path`) so every import targets a virtual identifier.
///
/// Specifiers already under `root` are kept as-is, which makes rewriting idempotent.
pub fn rewrite(
    path: &ModulePath,
    source: &str,
    root: &VirtualRoot,
) -> Result<RewrittenSource, RewriteError> {
    let mut out = String::with_capacity(source.len() + 64);
    let mut targets: Vec<ModulePath> = Vec::new();
    let mut cursor = 0;

    for spec in import_targets(source) {
        if spec.value.contains('\\') {
            return Err(RewriteError::EscapedSpecifier {
                path: path.clone(),
                specifier: source[spec.span].to_string(),
            });
        }

        let target = if is_relative(&spec.value) {
            let resolved = resolve::resolve(path, &spec.value).map_err(|source| {
                RewriteError::Resolve {
                    path: path.clone(),
                    source,
                }
            })?;
            let quote = &source[spec.span.start..spec.span.start + 1];
            out.push_str(&source[cursor..spec.span.start]);
            out.push_str(quote);
            out.push_str(&root.identifier(&resolved));
            out.push_str(quote);
            cursor = spec.span.end;
            resolved
        } else if let Some(existing) = root.strip(&spec.value) {
            existing
        } else {
            return Err(RewriteError::NonRelative {
                path: path.clone(),
                specifier: spec.value,
            });
        };

        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    out.push_str(&source[cursor..]);

    Ok(RewrittenSource {
        path: path.clone(),
        text: ArcStr::from(out),
        targets,
    })
}

// ---------------------------------------------------------------------------
// Shape matchers. Each returns the specifier literal token on success.
// ---------------------------------------------------------------------------

fn match_import<'t>(
    source: &str,
    tokens: &'t [Token],
    at: usize,
) -> Option<(ImportShape, &'t Token)> {
    let next = tokens.get(at)?;
    match next.kind {
        TokenKind::Str => Some((ImportShape::SideEffect, next)),
        TokenKind::Punct(b'(') => {
            let literal = tokens.get(at + 1).filter(|t| t.kind == TokenKind::Str)?;
            let close = tokens.get(at + 2)?;
            (close.is_punct(b')') || close.is_punct(b','))
                .then_some((ImportShape::Dynamic, literal))
        }
        _ => {
            let after = import_clause(source, tokens, at)?;
            from_clause(source, tokens, after).map(|lit| (ImportShape::Static, lit))
        }
    }
}

fn match_reexport<'t>(
    source: &str,
    tokens: &'t [Token],
    at: usize,
) -> Option<(ImportShape, &'t Token)> {
    let after = named_or_namespace(source, tokens, at)?;
    from_clause(source, tokens, after).map(|lit| (ImportShape::ReExport, lit))
}

/// `default`, `default, {..}`, `default, * as ns`, `{..}` or `* as ns`.
fn import_clause(source: &str, tokens: &[Token], at: usize) -> Option<usize> {
    let first = tokens.get(at)?;
    if first.kind == TokenKind::Ident {
        // `import from from './x'` binds a default named `from`.
        let next = tokens.get(at + 1)?;
        if next.is_punct(b',') {
            return named_or_namespace(source, tokens, at + 2);
        }
        return Some(at + 1);
    }
    named_or_namespace(source, tokens, at)
}

/// `{ a, b as c, "str" as d }`, `*`, `* as ns` or `* as "str"`.
fn named_or_namespace(source: &str, tokens: &[Token], at: usize) -> Option<usize> {
    let first = tokens.get(at)?;
    if first.is_punct(b'{') {
        let mut i = at + 1;
        loop {
            let tok = tokens.get(i)?;
            match tok.kind {
                TokenKind::Punct(b'}') => return Some(i + 1),
                TokenKind::Ident | TokenKind::Str | TokenKind::Punct(b',') => i += 1,
                _ => return None,
            }
        }
    }
    if first.is_punct(b'*') {
        let next = tokens.get(at + 1)?;
        if next.is_ident(source, "as") {
            let name = tokens.get(at + 2)?;
            return matches!(name.kind, TokenKind::Ident | TokenKind::Str).then_some(at + 3);
        }
        return Some(at + 1);
    }
    None
}

fn from_clause<'t>(source: &str, tokens: &'t [Token], at: usize) -> Option<&'t Token> {
    tokens.get(at).filter(|t| t.is_ident(source, "from"))?;
    tokens.get(at + 1).filter(|t| t.kind == TokenKind::Str)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
