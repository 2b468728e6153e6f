use fxhash::FxHashMap;
use std::fmt;

use super::error::ExpressionError;

/// Plain substitutions applied before the structural rewrite
const TEXT_RULES: &[(&str, &str)] = &[
    ("\\left\\lvert", "abs("),
    ("\\right\\rvert", ")"),
    ("\\left|", "abs("),
    ("\\right|", ")"),
    ("\\lvert", "abs("),
    ("\\rvert", ")"),
    ("\\left(", "("),
    ("\\right)", ")"),
    ("\\left[", "("),
    ("\\right]", ")"),
    ("\\cdot", "*"),
    ("\\times", "*"),
    ("\\div", "/"),
];

/// LaTeX commands kept as plain words
const KEPT_COMMANDS: &[(&str, &str)] = &[
    ("pi", "pi"),
    ("sin", "sin"),
    ("cos", "cos"),
    ("tan", "tan"),
    ("arcsin", "asin"),
    ("arccos", "acos"),
    ("arctan", "atan"),
    ("exp", "exp"),
    ("log", "log"),
    ("ln", "ln"),
    ("min", "min"),
    ("max", "max"),
];

/// Read a `{...}` group starting at `pos`, returning its raw inner text and the position
/// after the closing brace
fn take_delimited(chars: &[char], pos: usize, open: char, close: char) -> Option<(String, usize)> {
    let mut idx = pos;
    while idx < chars.len() && chars[idx].is_whitespace() {
        idx += 1;
    }
    if chars.get(idx) != Some(&open) {
        return None;
    }
    let mut depth = 0;
    for (offset, &c) in chars[idx..].iter().enumerate() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                let inner: String = chars[idx + 1..idx + offset].iter().collect();
                return Some((inner, idx + offset + 1));
            }
        }
    }
    None
}

fn take_braced(chars: &[char], pos: usize) -> Result<(String, usize), ExpressionError> {
    take_delimited(chars, pos, '{', '}').ok_or(ExpressionError::UnexpectedEnd)
}

fn rewrite(src: &str) -> Result<String, ExpressionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut pos = 0;
    while pos < chars.len() {
        match chars[pos] {
            '\\' => {
                let start = pos + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_alphabetic() {
                    end += 1;
                }
                if end == start {
                    // Spacing commands such as "\," or "\ "
                    pos = (start + 1).min(chars.len());
                    continue;
                }
                let command: String = chars[start..end].iter().collect();
                pos = end;
                match command.as_str() {
                    "sqrt" => {
                        let root = take_delimited(&chars, pos, '[', ']');
                        if let Some((_, after)) = root {
                            pos = after;
                        }
                        let (body, after) = take_braced(&chars, pos)?;
                        pos = after;
                        match root {
                            Some((degree, _)) => out.push_str(&format!(
                                "({})^(1/({}))",
                                rewrite(&body)?,
                                rewrite(&degree)?
                            )),
                            None => out.push_str(&format!("sqrt({})", rewrite(&body)?)),
                        }
                    }
                    "frac" | "dfrac" | "tfrac" => {
                        let (num, after) = take_braced(&chars, pos)?;
                        let (den, after) = take_braced(&chars, after)?;
                        pos = after;
                        out.push_str(&format!("({})/({})", rewrite(&num)?, rewrite(&den)?));
                    }
                    "operatorname" => {
                        let (name, after) = take_braced(&chars, pos)?;
                        pos = after;
                        let name = name.trim().to_string();
                        match name.to_ascii_uppercase().as_str() {
                            "RMS" => match take_delimited(&chars, pos, '(', ')') {
                                Some((arg, after)) => {
                                    pos = after;
                                    out.push_str(&format!("sqrt(mean(({})^2))", rewrite(&arg)?));
                                }
                                None => out.push_str(&name),
                            },
                            "AVG" => out.push_str("mean"),
                            _ => out.push_str(&name),
                        }
                    }
                    other => {
                        if let Some((_, word)) = KEPT_COMMANDS.iter().find(|(cmd, _)| *cmd == other) {
                            out.push_str(word);
                        }
                    }
                }
            }
            '_' if chars.get(pos + 1) == Some(&'{') => {
                let (sub, after) = take_braced(&chars, pos + 1)?;
                pos = after;
                let sub = rewrite(&sub)?;
                out.extend(sub.chars().filter(|c| !c.is_whitespace()));
            }
            '^' if chars.get(pos + 1) == Some(&'{') => {
                let (exp, after) = take_braced(&chars, pos + 1)?;
                pos = after;
                out.push_str(&format!("^({})", rewrite(&exp)?));
            }
            '{' | '}' => pos += 1,
            c => {
                out.push(c);
                pos += 1;
            }
        }
    }
    Ok(out)
}

/// Rewrite an editor LaTeX expression into plain infix form.
///
/// `I_{A}` becomes `IA`, `\frac{a}{b}` becomes `(a)/(b)`, `\sqrt{x}` becomes `sqrt(x)`,
/// `\operatorname{RMS}(x)` becomes `sqrt(mean((x)^2))` and absolute value bars become
/// `abs(...)`. Unknown commands and leftover braces are dropped. Plain infix input passes
/// through unchanged.
pub fn normalize_latex(src: &str) -> Result<String, ExpressionError> {
    let mut text = src.to_string();
    for (from, to) in TEXT_RULES {
        text = text.replace(from, to);
    }
    let out = rewrite(&text)?;
    let out = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if out.is_empty() {
        return Err(ExpressionError::Empty);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Ident(s) => write!(f, "{s}"),
            Self::Op(c) => write!(f, "{c}"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::Comma => write!(f, ","),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(pos + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            // Exponent only when digits follow, so that "2e" stays 2 * e
            if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
                let mut look = pos + 1;
                if look < chars.len() && (chars[look] == '+' || chars[look] == '-') {
                    look += 1;
                }
                if look < chars.len() && chars[look].is_ascii_digit() {
                    pos = look;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
            }
            let text: String = chars[start..pos].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| ExpressionError::UnexpectedToken(text.clone(), start))?;
            tokens.push((Token::Number(value), start));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            tokens.push((Token::Ident(chars[start..pos].iter().collect()), start));
        } else {
            let token = match c {
                '+' | '-' | '*' | '/' | '^' => Token::Op(c),
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                _ => return Err(ExpressionError::UnexpectedChar(c, pos)),
            };
            tokens.push((token, pos));
            pos += 1;
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Sqrt,
    Abs,
    Mean,
    Min,
    Max,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Exp,
    Log,
    Ln,
    Log10,
    Pow,
    Floor,
    Ceil,
    Round,
    Sign,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        let func = match name {
            "sqrt" => Self::Sqrt,
            "abs" => Self::Abs,
            "mean" => Self::Mean,
            "min" => Self::Min,
            "max" => Self::Max,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            "atan2" => Self::Atan2,
            "exp" => Self::Exp,
            "log" => Self::Log,
            "ln" => Self::Ln,
            "log10" => Self::Log10,
            "pow" => Self::Pow,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "round" => Self::Round,
            "sign" => Self::Sign,
            _ => return None,
        };
        Some(func)
    }

    /// Accepted argument counts as (min, max, description)
    fn arity(&self) -> (usize, usize, &'static str) {
        match self {
            Self::Mean | Self::Min | Self::Max => (1, usize::MAX, "one or more"),
            Self::Atan2 | Self::Pow => (2, 2, "two"),
            Self::Log => (1, 2, "one or two"),
            _ => (1, 1, "one"),
        }
    }

    fn apply(&self, args: &[f64]) -> f64 {
        let x = args[0];
        match self {
            Self::Sqrt => x.sqrt(),
            Self::Abs => x.abs(),
            Self::Mean => args.iter().sum::<f64>() / args.len() as f64,
            Self::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Asin => x.asin(),
            Self::Acos => x.acos(),
            Self::Atan => x.atan(),
            Self::Atan2 => x.atan2(args[1]),
            Self::Exp => x.exp(),
            Self::Log => match args.get(1) {
                Some(base) => x.ln() / base.ln(),
                None => x.ln(),
            },
            Self::Ln => x.ln(),
            Self::Log10 => x.log10(),
            Self::Pow => x.powf(args[1]),
            Self::Floor => x.floor(),
            Self::Ceil => x.ceil(),
            Self::Round => x.round(),
            Self::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// What an identifier in an expression is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    Analog(usize),
    Digital(usize),
}

/// Source of per-sample channel values for evaluation. `None` is evaluated as zero
pub trait SampleSource {
    fn analog(&self, channel: usize, sample: usize) -> Option<f64>;
    fn digital(&self, channel: usize, sample: usize) -> Option<f64>;
}

/// Names visible to an expression: positional `a0..`/`d0..` plus channel identifiers.
///
/// Later bindings shadow earlier ones, in the order positional analog, analog ids,
/// positional digital, digital ids.
#[derive(Debug, Clone, Default)]
pub struct ChannelScope {
    names: FxHashMap<String, Binding>,
}

impl ChannelScope {
    pub fn new(analog_ids: &[String], digital_ids: &[String]) -> Self {
        let mut names = FxHashMap::default();
        for k in 0..analog_ids.len() {
            names.insert(format!("a{k}"), Binding::Analog(k));
        }
        for (k, id) in analog_ids.iter().enumerate() {
            names.insert(id.trim().to_string(), Binding::Analog(k));
        }
        for k in 0..digital_ids.len() {
            names.insert(format!("d{k}"), Binding::Digital(k));
        }
        for (k, id) in digital_ids.iter().enumerate() {
            names.insert(id.trim().to_string(), Binding::Digital(k));
        }
        Self { names }
    }

    pub fn resolve(&self, name: &str) -> Option<Binding> {
        self.names.get(name).copied()
    }
}

#[derive(Debug, Clone)]
enum Node {
    Number(f64),
    Channel(Binding),
    Negate(Box<Node>),
    Binary(char, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

impl Node {
    fn eval<S: SampleSource + ?Sized>(&self, source: &S, sample: usize) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Channel(Binding::Analog(k)) => source.analog(*k, sample).unwrap_or(0.0),
            Self::Channel(Binding::Digital(k)) => source.digital(*k, sample).unwrap_or(0.0),
            Self::Negate(inner) => -inner.eval(source, sample),
            Self::Binary(op, lhs, rhs) => {
                let l = lhs.eval(source, sample);
                let r = rhs.eval(source, sample);
                match op {
                    '+' => l + r,
                    '-' => l - r,
                    '*' => l * r,
                    '/' => l / r,
                    _ => l.powf(r),
                }
            }
            Self::Call(func, args) => {
                let values: Vec<f64> = args.iter().map(|a| a.eval(source, sample)).collect();
                func.apply(&values)
            }
        }
    }
}

struct Parser<'a> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    scope: &'a ChannelScope,
    references: Vec<Binding>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn unexpected(&self) -> ExpressionError {
        match self.tokens.get(self.pos) {
            Some((token, offset)) => ExpressionError::UnexpectedToken(token.to_string(), *offset),
            None => ExpressionError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expression(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Op(op @ ('*' | '/'))) => {
                    let op = *op;
                    self.pos += 1;
                    let rhs = self.unary()?;
                    lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
                }
                // Implicit multiplication: "2IA", "(a)(b)"
                Some(Token::Number(_) | Token::Ident(_) | Token::LParen) => {
                    let rhs = self.power()?;
                    lhs = Node::Binary('*', Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(Node::Negate(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Node, ExpressionError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Op('^')) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Node::Binary('^', Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        let offset = self.pos;
        match self.advance() {
            Some(Token::Number(n)) => Ok(Node::Number(n)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    if let Some(func) = Func::lookup(&name) {
                        self.pos += 1;
                        return self.call(name, func);
                    }
                    if self.scope.resolve(&name).is_none() {
                        return Err(ExpressionError::UnknownFunction(name));
                    }
                }
                if let Some(binding) = self.scope.resolve(&name) {
                    if !self.references.contains(&binding) {
                        self.references.push(binding);
                    }
                    return Ok(Node::Channel(binding));
                }
                match name.as_str() {
                    "pi" => Ok(Node::Number(std::f64::consts::PI)),
                    "e" => Ok(Node::Number(std::f64::consts::E)),
                    _ => Err(ExpressionError::UnknownIdentifier(name)),
                }
            }
            _ => {
                self.pos = offset;
                Err(self.unexpected())
            }
        }
    }

    fn call(&mut self, name: String, func: Func) -> Result<Node, ExpressionError> {
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            args.push(self.expression()?);
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                args.push(self.expression()?);
            }
        }
        self.expect(Token::RParen)?;
        let (min, max, described) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(ExpressionError::BadArity(name, described, args.len()));
        }
        Ok(Node::Call(func, args))
    }
}

/// An expression compiled against a channel scope, ready to evaluate per sample
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    root: Node,
    references: Vec<Binding>,
}

impl CompiledExpression {
    /// Compile a normalized (plain infix) expression
    pub fn compile(expression: &str, scope: &ChannelScope) -> Result<Self, ExpressionError> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            scope,
            references: Vec::new(),
        };
        let root = parser.expression()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.unexpected());
        }
        Ok(Self {
            root,
            references: parser.references,
        })
    }

    /// Channels used by the expression, in order of first use
    pub fn references(&self) -> &[Binding] {
        &self.references
    }

    /// Evaluate at one sample. Non-finite results come back as zero
    pub fn evaluate<S: SampleSource + ?Sized>(&self, source: &S, sample: usize) -> f64 {
        let value = self.root.eval(source, sample);
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        analog: Vec<Vec<f64>>,
        digital: Vec<Vec<f64>>,
    }

    impl SampleSource for Fixed {
        fn analog(&self, channel: usize, sample: usize) -> Option<f64> {
            self.analog.get(channel).and_then(|c| c.get(sample)).copied()
        }
        fn digital(&self, channel: usize, sample: usize) -> Option<f64> {
            self.digital.get(channel).and_then(|c| c.get(sample)).copied()
        }
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn eval(expr: &str, source: &Fixed, scope: &ChannelScope) -> f64 {
        match CompiledExpression::compile(expr, scope) {
            Ok(c) => c.evaluate(source, 0),
            Err(e) => panic!("{expr}: {e}"),
        }
    }

    #[test]
    fn test_normalize_latex() {
        let cases = [
            ("I_{A}+I_{B}", "IA+IB"),
            ("\\sqrt{I_{A}^{2}}", "sqrt(IA^(2))"),
            ("\\frac{V_{AB}}{2}", "(VAB)/(2)"),
            ("\\operatorname{RMS}\\left(I_{A}\\right)", "sqrt(mean((IA)^2))"),
            ("\\operatorname{AVG}(IA)", "mean(IA)"),
            ("\\operatorname{abs}(IA)", "abs(IA)"),
            ("2\\cdot IA\\times IB", "2* IA* IB"),
            ("\\left\\lvert IA \\right\\rvert", "abs( IA )"),
            ("\\mathrm{IA}", "IA"),
            ("sqrt(IA^2+IB^2+IC^2)", "sqrt(IA^2+IB^2+IC^2)"),
        ];
        for (input, expected) in cases {
            match normalize_latex(input) {
                Ok(out) => assert_eq!(out, expected, "{input}"),
                Err(e) => panic!("{input}: {e}"),
            }
        }
        assert_eq!(normalize_latex("  {} "), Err(ExpressionError::Empty));
    }

    #[test]
    fn test_evaluate_arithmetic() {
        let source = Fixed {
            analog: vec![vec![3.0], vec![4.0], vec![0.0]],
            digital: vec![vec![1.0]],
        };
        let scope = ChannelScope::new(&ids(&["IA", "IB", "IC"]), &ids(&["TRIP"]));
        assert_eq!(eval("sqrt(IA^2+IB^2+IC^2)", &source, &scope), 5.0);
        assert_eq!(eval("-2^2", &source, &scope), -4.0);
        assert_eq!(eval("2^3^2", &source, &scope), 512.0);
        assert_eq!(eval("2IA", &source, &scope), 6.0);
        assert_eq!(eval("(a0)(a1)", &source, &scope), 12.0);
        assert_eq!(eval("max(IA, IB, 1) * TRIP + d0", &source, &scope), 5.0);
        assert_eq!(eval("mean(IA, IB)", &source, &scope), 3.5);
        assert_eq!(eval("1/IC", &source, &scope), 0.0);
        assert_eq!(eval("1.5e1", &source, &scope), 15.0);
    }

    #[test]
    fn test_compile_errors() {
        let scope = ChannelScope::new(&ids(&["IA"]), &[]);
        match CompiledExpression::compile("IA + IZ", &scope) {
            Err(ExpressionError::UnknownIdentifier(name)) => assert_eq!(name, "IZ"),
            _ => panic!(),
        }
        match CompiledExpression::compile("foo(IA)", &scope) {
            Err(ExpressionError::UnknownFunction(name)) => assert_eq!(name, "foo"),
            _ => panic!(),
        }
        match CompiledExpression::compile("pow(IA)", &scope) {
            Err(ExpressionError::BadArity(..)) => (),
            _ => panic!(),
        }
        assert!(CompiledExpression::compile("(IA", &scope).is_err());
        assert!(CompiledExpression::compile("IA +", &scope).is_err());
        assert!(CompiledExpression::compile("IA $ 2", &scope).is_err());
    }

    #[test]
    fn test_references_in_order() {
        let scope = ChannelScope::new(&ids(&["IA", "IB"]), &ids(&["TRIP"]));
        let compiled = match CompiledExpression::compile("IB + IA * IB + TRIP", &scope) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(
            compiled.references(),
            &[Binding::Analog(1), Binding::Analog(0), Binding::Digital(0)]
        );
    }
}
