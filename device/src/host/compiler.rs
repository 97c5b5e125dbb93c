//! OpenCL C front end of the host backend.
//!
//! It does not generate code. It validates what a real driver's front end
//! would reject before code generation: unknown build options, preprocessor
//! errors (missing includes, `#error`, unbalanced conditionals), unterminated
//! comments and literals, and unbalanced delimiters. Accepted programs report
//! their kernel entry points. Rejections produce a clang-style build log.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Diagnostic file name of the top-level source.
pub(crate) const PROGRAM_SOURCE: &str = "<program source>";

const MAX_INCLUDE_DEPTH: usize = 64;

const PREDEFINED: [(&str, &str); 3] = [("__OPENCL_VERSION__", "120"), ("__OPENCL_C_VERSION__", "120"), ("__ENDIAN_LITTLE__", "1")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CompileError {
    /// An option token the compiler does not understand.
    InvalidOptions(String),
    /// The source was rejected; carries the build log.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Compiled {
    pub kernels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CompileOptions {
    include_dirs: Vec<PathBuf>,
    definitions: Vec<(String, String)>,
}

impl CompileOptions {
    /// Parse `-I`/`-D` options, accepting both `-Ifoo` and `-I foo`.
    ///
    /// `-w`, `-Werror` and `-cl-*` flags are accepted and ignored. The first
    /// unknown token is returned as the error.
    pub(crate) fn parse(options: &str) -> Result<Self, String> {
        let mut parsed = Self::default();
        let mut tokens = options.split_whitespace();

        while let Some(token) = tokens.next() {
            if let Some(rest) = token.strip_prefix("-I") {
                let dir = if rest.is_empty() { tokens.next().ok_or_else(|| token.to_string())? } else { rest };
                parsed.include_dirs.push(PathBuf::from(dir));
            } else if let Some(rest) = token.strip_prefix("-D") {
                let definition = if rest.is_empty() { tokens.next().ok_or_else(|| token.to_string())? } else { rest };
                let (name, value) = definition.split_once('=').unwrap_or((definition, "1"));
                if !is_identifier(name) {
                    return Err(token.to_string());
                }
                parsed.definitions.push((name.to_string(), value.to_string()));
            } else if token != "-w" && token != "-Werror" && !token.starts_with("-cl-") {
                return Err(token.to_string());
            }
        }

        Ok(parsed)
    }
}

pub(crate) fn compile(source: &str, options: &str) -> Result<Compiled, CompileError> {
    let options = CompileOptions::parse(options).map_err(CompileError::InvalidOptions)?;

    let mut preprocessor = Preprocessor::new(&options);
    preprocessor.run(Rc::from(PROGRAM_SOURCE), source, None, 0);
    let Preprocessor { lines, mut diagnostics, .. } = preprocessor;

    let tokens = lex(&lines, &mut diagnostics);

    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        return Err(CompileError::Rejected(render(&diagnostics)));
    }
    Ok(Compiled { kernels: kernel_names(&tokens) })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Error,
    Note,
}

#[derive(Debug, Clone)]
struct Diagnostic {
    severity: Severity,
    file: Rc<str>,
    line: usize,
    column: usize,
    message: String,
    snippet: String,
}

#[derive(Debug, Clone)]
struct SourceLine {
    file: Rc<str>,
    number: usize,
    text: String,
    /// `text` with comments blanked out, column positions preserved.
    code: String,
}

impl SourceLine {
    fn diagnostic(&self, severity: Severity, column: usize, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity,
            file: Rc::clone(&self.file),
            line: self.number,
            column,
            message: message.into(),
            snippet: self.text.clone(),
        }
    }
}

fn render(diagnostics: &[Diagnostic]) -> String {
    let mut log = String::new();
    for d in diagnostics {
        let severity = match d.severity {
            Severity::Error => "error",
            Severity::Note => "note",
        };
        let _ = writeln!(log, "{}:{}:{}: {severity}: {}", d.file, d.line, d.column, d.message);
        let _ = writeln!(log, "{}", d.snippet);
        let _ = writeln!(log, "{}^", " ".repeat(d.column.saturating_sub(1)));
    }

    let errors = diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
    let _ = writeln!(log, "{errors} error{} generated.", if errors == 1 { "" } else { "s" });
    log
}

#[derive(Debug)]
struct Condition {
    active: bool,
    parent_active: bool,
    taken: bool,
    seen_else: bool,
    opened_at: SourceLine,
    column: usize,
}

struct Preprocessor<'a> {
    include_dirs: &'a [PathBuf],
    macros: HashMap<String, String>,
    lines: Vec<SourceLine>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Preprocessor<'a> {
    fn new(options: &'a CompileOptions) -> Self {
        let mut macros: HashMap<String, String> =
            PREDEFINED.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect();
        macros.extend(options.definitions.iter().cloned());
        Self { include_dirs: &options.include_dirs, macros, lines: Vec::new(), diagnostics: Vec::new() }
    }

    fn error(&mut self, at: &SourceLine, column: usize, message: impl Into<String>) {
        self.diagnostics.push(at.diagnostic(Severity::Error, column, message));
    }

    fn run(&mut self, file: Rc<str>, text: &str, dir: Option<&Path>, depth: usize) {
        let mut conditions: Vec<Condition> = Vec::new();
        let mut in_comment = false;
        let mut comment_opened: Option<(SourceLine, usize)> = None;

        for (index, raw) in text.lines().enumerate() {
            let (code, opened) = blank_comments(raw, &mut in_comment);
            let line = SourceLine { file: Rc::clone(&file), number: index + 1, text: raw.to_string(), code };
            if let Some(column) = opened {
                comment_opened = Some((line.clone(), column));
            }
            let active = conditions.last().is_none_or(|c| c.active);

            let trimmed = line.code.trim_start();
            let Some(directive) = trimmed.strip_prefix('#') else {
                if active {
                    self.lines.push(line);
                }
                continue;
            };

            let column = line.code.len() - trimmed.len() + 1;
            let directive = directive.trim_start().to_string();
            let (name, rest) = split_word(&directive);
            let rest = rest.trim_start();

            match name {
                "if" | "ifdef" | "ifndef" => {
                    let taken = active && self.condition_holds(name, rest, &line, column);
                    conditions.push(Condition {
                        active: taken,
                        parent_active: active,
                        taken,
                        seen_else: false,
                        opened_at: line,
                        column,
                    });
                }
                "elif" => {
                    let Some(parent_active) = conditions.last().map(|c| c.parent_active && !c.taken) else {
                        self.error(&line, column, "#elif without #if");
                        continue;
                    };
                    let take = parent_active && self.condition_holds("if", rest, &line, column);
                    if conditions.last().is_some_and(|c| c.seen_else) {
                        self.error(&line, column, "#elif after #else");
                    }
                    if let Some(c) = conditions.last_mut() {
                        c.active = take;
                        c.taken |= take;
                    }
                }
                "else" => match conditions.last_mut() {
                    Some(c) if !c.seen_else => {
                        c.active = c.parent_active && !c.taken;
                        c.taken = true;
                        c.seen_else = true;
                    }
                    Some(_) => self.error(&line, column, "#else after #else"),
                    None => self.error(&line, column, "#else without #if"),
                },
                "endif" => {
                    if conditions.pop().is_none() {
                        self.error(&line, column, "#endif without #if");
                    }
                }
                _ if !active => {}
                "define" => self.define(rest, &line, column),
                "undef" => match split_word(rest).0 {
                    name if is_identifier(name) => {
                        self.macros.remove(name);
                    }
                    _ => self.error(&line, column, "macro name must be an identifier"),
                },
                "include" => self.include(rest, &line, column, dir, depth),
                "error" => self.error(&line, column, rest.trim().to_string()),
                "" | "pragma" | "warning" | "line" => {}
                _ => self.error(&line, column + 1, "invalid preprocessing directive"),
            }
        }

        for condition in conditions {
            self.error(&condition.opened_at, condition.column, "unterminated conditional directive");
        }
        if in_comment && let Some((line, column)) = comment_opened {
            self.error(&line, column, "unterminated /* comment");
        }
    }

    fn condition_holds(&mut self, directive: &str, rest: &str, line: &SourceLine, column: usize) -> bool {
        let outcome = match directive {
            "ifdef" | "ifndef" => match split_word(rest).0 {
                name if is_identifier(name) => Ok(self.macros.contains_key(name) == (directive == "ifdef")),
                "" => Err("macro name missing".to_string()),
                _ => Err("macro name must be an identifier".to_string()),
            },
            _ => self.evaluate(rest),
        };
        outcome.unwrap_or_else(|message| {
            self.error(line, column, message);
            false
        })
    }

    /// Evaluate an `#if` expression: integer literals, macros, `defined`,
    /// unary `! - + ~` and the C binary operators except `?:` and `,`.
    fn evaluate(&self, expr: &str) -> Result<bool, String> {
        let tokens = self.expand(tokenize_expr(expr)?, &mut Vec::new())?;
        let mut parser = ExprParser { tokens: &tokens, pos: 0 };
        let value = parser.binary(1)?;
        if parser.pos < tokens.len() {
            return Err("token is not a valid binary operator in a preprocessor subexpression".to_string());
        }
        Ok(value != 0)
    }

    /// Resolve `defined` and substitute macro values. Names that are undefined
    /// or already being expanded become 0.
    fn expand(&self, tokens: Vec<ExprToken>, expanding: &mut Vec<String>) -> Result<Vec<ExprToken>, String> {
        let mut expanded = Vec::with_capacity(tokens.len());
        let mut tokens = tokens.into_iter().peekable();

        while let Some(token) = tokens.next() {
            match token {
                ExprToken::Name(name) if name == "defined" => {
                    let parenthesized = tokens.next_if_eq(&ExprToken::Open).is_some();
                    let Some(ExprToken::Name(target)) = tokens.next() else {
                        return Err("macro name must be an identifier".to_string());
                    };
                    if parenthesized && tokens.next() != Some(ExprToken::Close) {
                        return Err("missing ')' after 'defined'".to_string());
                    }
                    expanded.push(ExprToken::Number(i64::from(self.macros.contains_key(&target))));
                }
                ExprToken::Name(name) => match self.macros.get(&name) {
                    Some(value) if !expanding.contains(&name) => {
                        let value = tokenize_expr(value)?;
                        expanding.push(name);
                        let inner = self.expand(value, expanding);
                        expanding.pop();
                        expanded.extend(inner?);
                    }
                    _ => expanded.push(ExprToken::Number(0)),
                },
                other => expanded.push(other),
            }
        }

        Ok(expanded)
    }

    fn define(&mut self, rest: &str, line: &SourceLine, column: usize) {
        let rest = rest.trim();
        let end = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        let name = &rest[..end];
        if !is_identifier(name) {
            self.error(line, column, "macro name must be an identifier");
            return;
        }
        self.macros.insert(name.to_string(), rest[end..].trim().to_string());
    }

    fn include(&mut self, rest: &str, line: &SourceLine, column: usize, dir: Option<&Path>, depth: usize) {
        let rest = rest.trim();
        let (name, quoted) = if let Some(r) = rest.strip_prefix('"') {
            (r.split_once('"').map(|(name, _)| name), true)
        } else if let Some(r) = rest.strip_prefix('<') {
            (r.split_once('>').map(|(name, _)| name), false)
        } else {
            (None, false)
        };
        let Some(name) = name else {
            self.error(line, column, "expected \"FILENAME\" or <FILENAME>");
            return;
        };
        if depth >= MAX_INCLUDE_DEPTH {
            self.error(line, column, "#include nested too deeply");
            return;
        }

        let local = quoted.then(|| dir.map_or_else(|| PathBuf::from(name), |d| d.join(name)));
        let found = local
            .into_iter()
            .chain(self.include_dirs.iter().map(|d| d.join(name)))
            .find_map(|path| std::fs::read_to_string(&path).ok().map(|text| (path, text)));

        match found {
            Some((path, text)) => {
                let parent = path.parent().map(Path::to_path_buf);
                self.run(Rc::from(path.display().to_string()), &text, parent.as_deref(), depth + 1);
            }
            None => self.error(line, column, format!("'{name}' file not found")),
        }
    }
}

const EXPR_OPERATORS: &[&str] =
    &["||", "&&", "==", "!=", "<=", ">=", "<<", ">>", "<", ">", "+", "-", "*", "/", "%", "!", "~", "&", "|", "^"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExprToken {
    Number(i64),
    Name(String),
    Op(&'static str),
    Open,
    Close,
}

fn tokenize_expr(expr: &str) -> Result<Vec<ExprToken>, String> {
    let mut tokens = Vec::new();
    let mut rest = expr.trim_start();

    while let Some(c) = rest.chars().next() {
        if c.is_ascii_digit() {
            let (literal, tail) = split_word(rest);
            tokens.push(ExprToken::Number(parse_integer(literal)?));
            rest = tail;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let (name, tail) = split_word(rest);
            tokens.push(ExprToken::Name(name.to_string()));
            rest = tail;
        } else if c == '(' || c == ')' {
            tokens.push(if c == '(' { ExprToken::Open } else { ExprToken::Close });
            rest = &rest[1..];
        } else {
            let Some(op) = EXPR_OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                return Err("invalid token at start of a preprocessor expression".to_string());
            };
            tokens.push(ExprToken::Op(*op));
            rest = &rest[op.len()..];
        }
        rest = rest.trim_start();
    }

    Ok(tokens)
}

fn parse_integer(literal: &str) -> Result<i64, String> {
    let digits = literal.trim_end_matches(['u', 'U', 'l', 'L']);
    let parsed = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None if digits.len() > 1 && digits.starts_with('0') => i64::from_str_radix(&digits[1..], 8),
        None => digits.parse(),
    };
    parsed.map_err(|_| format!("invalid integer literal '{literal}'"))
}

fn precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | "<=" | ">" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        _ => return None,
    })
}

fn apply(op: &str, lhs: i64, rhs: i64) -> Result<i64, String> {
    let shift = (rhs & 63) as u32;
    Ok(match op {
        "||" => i64::from(lhs != 0 || rhs != 0),
        "&&" => i64::from(lhs != 0 && rhs != 0),
        "|" => lhs | rhs,
        "^" => lhs ^ rhs,
        "&" => lhs & rhs,
        "==" => i64::from(lhs == rhs),
        "!=" => i64::from(lhs != rhs),
        "<" => i64::from(lhs < rhs),
        "<=" => i64::from(lhs <= rhs),
        ">" => i64::from(lhs > rhs),
        ">=" => i64::from(lhs >= rhs),
        "<<" => lhs.wrapping_shl(shift),
        ">>" => lhs.wrapping_shr(shift),
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" | "%" if rhs == 0 => return Err("division by zero in preprocessor expression".to_string()),
        "/" => lhs.wrapping_div(rhs),
        "%" => lhs.wrapping_rem(rhs),
        _ => return Err(format!("invalid operator '{op}' in preprocessor expression")),
    })
}

/// Precedence climbing over expanded `#if` tokens.
struct ExprParser<'t> {
    tokens: &'t [ExprToken],
    pos: usize,
}

impl ExprParser<'_> {
    fn binary(&mut self, min: u8) -> Result<i64, String> {
        let mut lhs = self.unary()?;
        while let Some(ExprToken::Op(op)) = self.tokens.get(self.pos)
            && let Some(level) = precedence(op).filter(|level| *level >= min)
        {
            let op = *op;
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        match token {
            Some(ExprToken::Number(value)) => Ok(value),
            Some(ExprToken::Op("!")) => Ok(i64::from(self.unary()? == 0)),
            Some(ExprToken::Op("-")) => Ok(self.unary()?.wrapping_neg()),
            Some(ExprToken::Op("+")) => self.unary(),
            Some(ExprToken::Op("~")) => Ok(!self.unary()?),
            Some(ExprToken::Open) => {
                let value = self.binary(1)?;
                if self.tokens.get(self.pos) != Some(&ExprToken::Close) {
                    return Err("expected ')' in preprocessor expression".to_string());
                }
                self.pos += 1;
                Ok(value)
            }
            None => Err("expected value in expression".to_string()),
            Some(_) => Err("invalid token at start of a preprocessor expression".to_string()),
        }
    }
}

/// Blank out comments in `text`, keeping every other character in its column.
///
/// `in_comment` carries an open block comment across lines. Returns the
/// blanked line and the column of a block comment opened here and still open
/// at the end of the line.
fn blank_comments(text: &str, in_comment: &mut bool) -> (String, Option<usize>) {
    let chars: Vec<char> = text.chars().collect();
    let mut code = String::with_capacity(text.len());
    let mut opened = None;
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if *in_comment {
            if c == '*' && next == Some('/') {
                *in_comment = false;
                opened = None;
                code.push_str("  ");
                i += 2;
            } else {
                code.push(' ');
                i += 1;
            }
            continue;
        }

        match quote {
            Some(_) if c == '\\' => {
                code.push(c);
                code.extend(next);
                i += 2;
                continue;
            }
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '/' && next == Some('/') => break,
            None if c == '/' && next == Some('*') => {
                *in_comment = true;
                opened = Some(i + 1);
                code.push_str("  ");
                i += 2;
                continue;
            }
            None => {}
        }
        code.push(c);
        i += 1;
    }

    (code, opened)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Punct(char),
}

fn closer(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Tokenize preprocessed lines, reporting unterminated literals and
/// unbalanced delimiters.
fn lex(lines: &[SourceLine], diagnostics: &mut Vec<Diagnostic>) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut open: Vec<(char, usize, usize)> = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let chars: Vec<char> = line.code.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match c {
                '"' | '\'' => {
                    let mut j = i + 1;
                    while j < chars.len() && chars[j] != c {
                        j += if chars[j] == '\\' { 2 } else { 1 };
                    }
                    if j >= chars.len() {
                        diagnostics.push(line.diagnostic(Severity::Error, i + 1, format!("missing terminating {c} character")));
                        break;
                    }
                    i = j;
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let start = i;
                    while i < chars.len() && is_ident_char(chars[i]) {
                        i += 1;
                    }
                    tokens.push(Token::Ident(chars[start..i].iter().collect()));
                    continue;
                }
                c if c.is_ascii_digit() => {
                    while i < chars.len() && (is_ident_char(chars[i]) || chars[i] == '.') {
                        i += 1;
                    }
                    continue;
                }
                '(' | '[' | '{' => {
                    open.push((c, index, i + 1));
                    tokens.push(Token::Punct(c));
                }
                ')' | ']' | '}' => {
                    match open.pop() {
                        Some((o, _, _)) if closer(o) == c => {}
                        Some((o, opened_line, opened_column)) => {
                            diagnostics.push(line.diagnostic(Severity::Error, i + 1, format!("expected '{}'", closer(o))));
                            diagnostics.push(lines[opened_line].diagnostic(
                                Severity::Note,
                                opened_column,
                                format!("to match this '{o}'"),
                            ));
                        }
                        None if c == '}' => {
                            diagnostics.push(line.diagnostic(Severity::Error, i + 1, "extraneous closing brace ('}')"))
                        }
                        None => diagnostics.push(line.diagnostic(Severity::Error, i + 1, format!("extraneous '{c}'"))),
                    }
                    tokens.push(Token::Punct(c));
                }
                c if !c.is_whitespace() => tokens.push(Token::Punct(c)),
                _ => {}
            }
            i += 1;
        }
    }

    if let Some(last) = lines.last() {
        let end = last.text.chars().count() + 1;
        for (o, opened_line, opened_column) in open.into_iter().rev() {
            diagnostics.push(last.diagnostic(Severity::Error, end, format!("expected '{}'", closer(o))));
            diagnostics.push(lines[opened_line].diagnostic(Severity::Note, opened_column, format!("to match this '{o}'")));
        }
    }

    tokens
}

/// Names of functions declared with `__kernel` or `kernel`.
fn kernel_names(tokens: &[Token]) -> Vec<String> {
    let mut names = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let is_kernel = matches!(&tokens[i], Token::Ident(word) if word == "__kernel" || word == "kernel");
        i += 1;
        if !is_kernel {
            continue;
        }

        while i < tokens.len() {
            match (&tokens[i], tokens.get(i + 1)) {
                (Token::Ident(word), Some(Token::Punct('('))) if word == "__attribute__" => {
                    i = skip_group(tokens, i + 1);
                }
                (Token::Ident(name), Some(Token::Punct('('))) => {
                    names.push(name.clone());
                    i += 1;
                    break;
                }
                (Token::Punct(';' | '{'), _) => break,
                _ => i += 1,
            }
        }
    }

    names
}

/// Index just past the parenthesized group starting at `start`.
fn skip_group(tokens: &[Token], start: usize) -> usize {
    let mut depth = 0usize;
    for (offset, token) in tokens[start..].iter().enumerate() {
        match token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return start + offset + 1;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

fn split_word(text: &str) -> (&str, &str) {
    let end = text.find(|c: char| !is_ident_char(c)).unwrap_or(text.len());
    (&text[..end], &text[end..])
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_identifier(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') && name.chars().all(is_ident_char)
}
