//! Program source checks and build options.
//!
//! The emulated device does not compile kernel source. It scans it for the
//! mistakes a compiler front end reports first (unterminated statements and
//! unbalanced delimiters) and collects the `__kernel` entry points with
//! their parameter counts, so builds fail and kernels resolve the way they
//! would on a real device.

use std::collections::HashMap;

use clactor_core::status::Status;

/// Options accepted by a program build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Macros from `-D NAME[=VALUE]`; a bare name maps to `"1"`.
    pub defines: HashMap<String, String>,
    /// Directories from `-I DIR`.
    pub include_dirs: Vec<String>,
    /// `-cl-*` flags, kept verbatim.
    pub cl_flags: Vec<String>,
    /// `-w` was given.
    pub suppress_warnings: bool,
    /// `-Werror` was given.
    pub warnings_as_errors: bool,
}

impl BuildOptions {
    /// Parse an option string.
    ///
    /// Unknown options and missing operands fail with
    /// [`Status::INVALID_BUILD_OPTIONS`].
    pub fn parse(options: &str) -> Result<Self, Status> {
        let mut parsed = Self::default();
        let mut tokens = options.split_whitespace();

        while let Some(token) = tokens.next() {
            match token {
                "-D" => {
                    let operand = tokens.next().ok_or(Status::INVALID_BUILD_OPTIONS)?;
                    parsed.define(operand)?;
                }
                "-I" => {
                    let dir = tokens.next().ok_or(Status::INVALID_BUILD_OPTIONS)?;
                    parsed.include_dirs.push(dir.to_string());
                }
                "-w" => parsed.suppress_warnings = true,
                "-Werror" => parsed.warnings_as_errors = true,
                _ if token.starts_with("-D") => parsed.define(&token[2..])?,
                _ if token.starts_with("-I") => parsed.include_dirs.push(token[2..].to_string()),
                _ if token.starts_with("-cl-") => parsed.cl_flags.push(token.to_string()),
                _ => return Err(Status::INVALID_BUILD_OPTIONS),
            }
        }

        Ok(parsed)
    }

    fn define(&mut self, operand: &str) -> Result<(), Status> {
        let (name, value) = match operand.split_once('=') {
            Some((name, value)) => (name, value),
            None => (operand, "1"),
        };
        if !is_identifier(name) {
            return Err(Status::INVALID_BUILD_OPTIONS);
        }
        self.defines.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Kernel entry points found in a program source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelTable {
    arity: HashMap<String, usize>,
}

impl KernelTable {
    /// Parameter count of kernel `name`.
    pub fn arity(&self, name: &str) -> Option<usize> {
        self.arity.get(name).copied()
    }

    /// Check if the source declares kernel `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.arity.contains_key(name)
    }

    /// Names of all declared kernels.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.arity.keys().map(String::as_str)
    }

    /// Number of declared kernels.
    pub fn len(&self) -> usize {
        self.arity.len()
    }

    /// Check if the source declares no kernels.
    pub fn is_empty(&self) -> bool {
        self.arity.is_empty()
    }
}

/// Scan `source`, returning its kernels or the build log of the failure.
pub fn scan(source: &str) -> Result<KernelTable, String> {
    let clean = strip(source);
    let mut diagnostics = Vec::new();
    check_delimiters(&clean, &mut diagnostics);
    let table = collect_kernels(&clean, &mut diagnostics);

    if diagnostics.is_empty() {
        Ok(table)
    } else {
        Err(diagnostics.join("\n"))
    }
}

/// Blank out comments, string and char literals, and preprocessor lines.
/// Newlines are kept so line numbers stay valid.
fn strip(source: &str) -> Vec<char> {
    #[derive(PartialEq)]
    enum Mode {
        Code,
        LineComment,
        BlockComment,
        Literal(char),
        Directive,
    }

    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut mode = Mode::Code;
    let mut line_start = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match mode {
            Mode::Code => {
                if c == '/' && next == Some('/') {
                    mode = Mode::LineComment;
                    out.extend([' ', ' ']);
                    i += 2;
                    continue;
                }
                if c == '/' && next == Some('*') {
                    mode = Mode::BlockComment;
                    out.extend([' ', ' ']);
                    i += 2;
                    continue;
                }
                if c == '#' && line_start {
                    mode = Mode::Directive;
                    out.push(' ');
                } else if c == '"' || c == '\'' {
                    mode = Mode::Literal(c);
                    out.push('0');
                } else {
                    out.push(c);
                }
            }
            Mode::LineComment | Mode::Directive => {
                if c == '\\' && next == Some('\n') && mode == Mode::Directive {
                    out.extend([' ', '\n']);
                    i += 2;
                    continue;
                }
                if c == '\n' {
                    mode = Mode::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            Mode::BlockComment => {
                if c == '*' && next == Some('/') {
                    mode = Mode::Code;
                    out.extend([' ', ' ']);
                    i += 2;
                    continue;
                }
                out.push(if c == '\n' { '\n' } else { ' ' });
            }
            Mode::Literal(quote) => {
                if c == '\\' && next.is_some() {
                    out.extend([' ', ' ']);
                    i += 2;
                    continue;
                }
                if c == quote {
                    mode = Mode::Code;
                }
                out.push(if c == '\n' { '\n' } else { ' ' });
            }
        }

        if c == '\n' {
            line_start = true;
        } else if !c.is_whitespace() {
            line_start = false;
        }
        i += 1;
    }

    out
}

#[derive(Clone, Copy, PartialEq)]
enum Brace {
    Block,
    Initializer,
}

fn check_delimiters(clean: &[char], diagnostics: &mut Vec<String>) {
    let mut line = 1;
    let mut braces: Vec<(Brace, usize)> = Vec::new();
    let mut parens: Vec<usize> = Vec::new();
    let mut last = '\0';

    for &c in clean {
        match c {
            '\n' => line += 1,
            '{' => {
                let initializer = last == '='
                    || (matches!(last, ',' | '{')
                        && matches!(braces.last(), Some((Brace::Initializer, _))));
                let kind = if initializer {
                    Brace::Initializer
                } else {
                    Brace::Block
                };
                braces.push((kind, line));
            }
            '}' => match braces.pop() {
                Some((Brace::Block, _)) => {
                    if !matches!(last, ';' | '{' | '}' | ':') {
                        diagnostics.push(format!("line {line}: error: expected ';' before '}}' token"));
                    }
                }
                Some((Brace::Initializer, _)) => {}
                None => diagnostics.push(format!(
                    "line {line}: error: expected declaration before '}}' token"
                )),
            },
            '(' => parens.push(line),
            ')' => {
                if parens.pop().is_none() {
                    diagnostics.push(format!(
                        "line {line}: error: expected expression before ')' token"
                    ));
                }
            }
            _ => {}
        }
        if !c.is_whitespace() {
            last = c;
        }
    }

    if let Some(open) = parens.last() {
        diagnostics.push(format!(
            "line {line}: error: expected ')' at end of input (opened on line {open})"
        ));
    }
    if let Some((_, open)) = braces.last() {
        diagnostics.push(format!(
            "line {line}: error: expected '}}' at end of input (opened on line {open})"
        ));
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Punct(char),
}

fn tokenize(clean: &[char]) -> Vec<(Token, usize)> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < clean.len() {
        let c = clean[i];
        if c == '\n' {
            line += 1;
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c == '_' || c.is_ascii_alphanumeric() {
            let start = i;
            while i < clean.len() && (clean[i] == '_' || clean[i].is_ascii_alphanumeric()) {
                i += 1;
            }
            tokens.push((Token::Ident(clean[start..i].iter().collect()), line));
        } else {
            tokens.push((Token::Punct(c), line));
            i += 1;
        }
    }

    tokens
}

fn collect_kernels(clean: &[char], diagnostics: &mut Vec<String>) -> KernelTable {
    let tokens = tokenize(clean);
    let mut table = KernelTable::default();
    let mut i = 0;

    while i < tokens.len() {
        let is_qualifier = matches!(&tokens[i].0, Token::Ident(word) if word == "__kernel" || word == "kernel");
        if !is_qualifier {
            i += 1;
            continue;
        }
        let line = tokens[i].1;
        i += 1;
        i = skip_attributes(&tokens, i);

        if !matches!(tokens.get(i), Some((Token::Ident(word), _)) if word == "void") {
            diagnostics.push(format!("line {line}: error: kernel must return void"));
            continue;
        }
        let name = match tokens.get(i + 1) {
            Some((Token::Ident(name), _)) => name.clone(),
            _ => {
                diagnostics.push(format!("line {line}: error: expected kernel name"));
                i += 1;
                continue;
            }
        };
        if tokens.get(i + 2).map(|t| &t.0) != Some(&Token::Punct('(')) {
            diagnostics.push(format!("line {line}: error: expected '(' after '{name}'"));
            i += 2;
            continue;
        }

        let (arity, end) = count_parameters(&tokens, i + 3);
        if table.arity.insert(name.clone(), arity).is_some() {
            diagnostics.push(format!("line {line}: error: redefinition of '{name}'"));
        }
        i = end;
    }

    table
}

/// Skip `__attribute__((...))` groups starting at `i`.
fn skip_attributes(tokens: &[(Token, usize)], mut i: usize) -> usize {
    while matches!(tokens.get(i), Some((Token::Ident(word), _)) if word == "__attribute__") {
        i += 1;
        let mut depth = 0usize;
        while let Some((token, _)) = tokens.get(i) {
            i += 1;
            match token {
                Token::Punct('(') => depth += 1,
                Token::Punct(')') => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    i
}

/// Count parameters of the list whose first token is at `start`.
/// Returns the count and the index after the closing parenthesis.
fn count_parameters(tokens: &[(Token, usize)], start: usize) -> (usize, usize) {
    let mut depth = 0usize;
    let mut count = 0;
    let mut current: Vec<&Token> = Vec::new();
    let mut i = start;

    let finish = |current: &mut Vec<&Token>, count: &mut usize| {
        let only_void = matches!(current.as_slice(), [Token::Ident(word)] if word == "void");
        if !current.is_empty() && !only_void {
            *count += 1;
        }
        current.clear();
    };

    while let Some((token, _)) = tokens.get(i) {
        i += 1;
        match token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') if depth == 0 => break,
            Token::Punct(')') => depth -= 1,
            Token::Punct(',') if depth == 0 => {
                finish(&mut current, &mut count);
                continue;
            }
            _ => {}
        }
        current.push(token);
    }
    finish(&mut current, &mut count);

    (count, i)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"
        // square of a matrix
        #define IDX(x, y, n) ((y) * (n) + (x))
        __kernel void matrix_square(__global const float* in,
                                    __global float* out) {
            size_t x = get_global_id(0);
            size_t y = get_global_id(1);
            size_t n = get_global_size(0);
            float sum = 0;
            for (size_t k = 0; k < n; ++k) {
                sum += in[IDX(k, y, n)] * in[IDX(x, k, n)];
            }
            out[IDX(x, y, n)] = sum;
        }

        kernel void noop(void) { }
    "#;

    #[test]
    fn test_scan_collects_kernels() {
        let table = scan(SQUARE).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.arity("matrix_square"), Some(2));
        assert_eq!(table.arity("noop"), Some(0));
        assert!(!table.contains("IDX"));
    }

    #[test]
    fn test_missing_semicolon() {
        let source = "__kernel void broken(__global int* x) {\n    x[0] = 1\n}\n";
        let log = scan(source).unwrap_err();
        assert_eq!(log, "line 3: error: expected ';' before '}' token");
    }

    #[test]
    fn test_unbalanced() {
        let log = scan("__kernel void f(__global int* x) {\n x[0] = (1;\n").unwrap_err();
        assert!(log.contains("expected ')' at end of input"));
        assert!(log.contains("expected '}' at end of input"));
    }

    #[test]
    fn test_initializers_and_literals() {
        let source = r#"
            constant int table[3] = { 1, 2, 3 };
            __kernel void f(__global int* x) {
                int pair[2][2] = { {1, 2}, {3, 4} };
                char c = '}';
                /* } */ x[0] = table[0] + pair[1][1];
            }
        "#;
        assert_eq!(scan(source).unwrap().arity("f"), Some(1));
    }

    #[test]
    fn test_redefinition() {
        let source = "__kernel void f(void) { }\n__kernel void f(void) { }\n";
        assert!(scan(source).unwrap_err().contains("redefinition of 'f'"));
    }

    #[test]
    fn test_build_options() {
        let opts =
            BuildOptions::parse("-D COMPUTE_TEST_FLAG -DWIDTH=16 -I include -cl-fast-relaxed-math -Werror")
                .unwrap();
        assert_eq!(opts.defines.get("COMPUTE_TEST_FLAG").map(String::as_str), Some("1"));
        assert_eq!(opts.defines.get("WIDTH").map(String::as_str), Some("16"));
        assert_eq!(opts.include_dirs, vec!["include".to_string()]);
        assert_eq!(opts.cl_flags, vec!["-cl-fast-relaxed-math".to_string()]);
        assert!(opts.warnings_as_errors);
        assert!(!opts.suppress_warnings);
    }

    #[test]
    fn test_invalid_build_options() {
        assert_eq!(BuildOptions::parse("-O3"), Err(Status::INVALID_BUILD_OPTIONS));
        assert_eq!(BuildOptions::parse("-D"), Err(Status::INVALID_BUILD_OPTIONS));
        assert_eq!(BuildOptions::parse("-D9X"), Err(Status::INVALID_BUILD_OPTIONS));
        assert_eq!(BuildOptions::parse("").unwrap(), BuildOptions::default());
    }
}
