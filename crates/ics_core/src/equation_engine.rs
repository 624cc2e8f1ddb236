use crate::error::IcError;
use crate::symbolic::Symbol;
use crate::traits::{Dimensions, Scalar, VectorFunction};
use anyhow::Result;
use std::collections::HashMap;
use std::fmt;

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Scalar` values (f64 or Dual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the input at the given position of the compiled layout.
    LoadInput(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes a^n for a literal integer exponent.
    PowI(i32),
    /// Pops top value (a), pushes -a.
    Neg,
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
    /// Deepest stack the program reaches; sizes the VM buffer.
    pub max_depth: usize,
}

/// Stack-based Virtual Machine for evaluating equations.
///
/// The VM is stateless; `execute` takes all necessary context and returns
/// the value left on the stack.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, inputs: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::lift(val)),
                OpCode::LoadInput(idx) => stack.push(inputs[idx]),
                OpCode::Add => binary(stack, |a, b| a + b),
                OpCode::Sub => binary(stack, |a, b| a - b),
                OpCode::Mul => binary(stack, |a, b| a * b),
                OpCode::Div => binary(stack, |a, b| a / b),
                OpCode::Pow => binary(stack, |a, b| a.powf(b)),
                OpCode::PowI(n) => unary(stack, |a| a.powi(n)),
                OpCode::Neg => unary(stack, |a| -a),
                OpCode::Sin => unary(stack, T::sin),
                OpCode::Cos => unary(stack, T::cos),
                OpCode::Tan => unary(stack, T::tan),
                OpCode::Exp => unary(stack, T::exp),
                OpCode::Ln => unary(stack, T::ln),
                OpCode::Sqrt => unary(stack, T::sqrt),
            }
        }

        // Compiled programs always leave exactly one value behind.
        stack.pop().unwrap_or_else(T::nan)
    }
}

fn unary<T: Scalar>(stack: &mut Vec<T>, f: impl Fn(T) -> T) {
    if let Some(a) = stack.pop() {
        stack.push(f(a));
    }
}

fn binary<T: Scalar>(stack: &mut Vec<T>, f: impl Fn(T, T) -> T) {
    if let (Some(b), Some(a)) = (stack.pop(), stack.pop()) {
        stack.push(f(a, b));
    }
}

// --- AST ---

/// Abstract Syntax Tree nodes for expressions. An equation is an `Expr`
/// implicitly equated to zero.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Symbol(Symbol),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),             // only '-'
    Call(String, Box<Expr>),            // sin, cos, tan, exp, ln, sqrt
}

const FUNCTIONS: [&str; 6] = ["sin", "cos", "tan", "exp", "ln", "sqrt"];

impl Expr {
    pub fn var(name: &str) -> Self {
        Expr::Symbol(Symbol::var(name))
    }

    /// Visits every symbol in the tree, left to right.
    pub fn for_each_symbol(&self, visit: &mut impl FnMut(&Symbol)) {
        match self {
            Expr::Number(_) => {}
            Expr::Symbol(sym) => visit(sym),
            Expr::Binary(left, _, right) => {
                left.for_each_symbol(visit);
                right.for_each_symbol(visit);
            }
            Expr::Unary(_, operand) | Expr::Call(_, operand) => operand.for_each_symbol(visit),
        }
    }

    /// Symbols matching `keep`, deduplicated in first-appearance order.
    pub fn atoms(&self, keep: impl Fn(&Symbol) -> bool) -> Vec<Symbol> {
        let mut found: Vec<Symbol> = Vec::new();
        self.for_each_symbol(&mut |sym| {
            if keep(sym) && !found.contains(sym) {
                found.push(sym.clone());
            }
        });
        found
    }

    /// Structural replacement of symbols. Unmapped symbols are kept.
    pub fn substitute(&self, map: &HashMap<Symbol, Expr>) -> Expr {
        match self {
            Expr::Number(n) => Expr::Number(*n),
            Expr::Symbol(sym) => map.get(sym).cloned().unwrap_or_else(|| self.clone()),
            Expr::Binary(left, op, right) => Expr::Binary(
                Box::new(left.substitute(map)),
                *op,
                Box::new(right.substitute(map)),
            ),
            Expr::Unary(op, operand) => Expr::Unary(*op, Box::new(operand.substitute(map))),
            Expr::Call(func, arg) => Expr::Call(func.clone(), Box::new(arg.substitute(map))),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) if n.is_sign_negative() => write!(f, "({})", n),
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Symbol(sym) => write!(f, "{}", sym),
            Expr::Binary(left, op, right) => write!(f, "({} {} {})", left, op, right),
            Expr::Unary(op, operand) => write!(f, "{}{}", op, operand),
            Expr::Call(func, arg) => write!(f, "{}({})", func, arg),
        }
    }
}

// --- Compiler ---

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves symbols to their positions in the input layout.
pub struct Compiler {
    pub input_map: HashMap<Symbol, usize>,
}

impl Compiler {
    pub fn new(inputs: &[Symbol]) -> Self {
        let mut input_map = HashMap::new();
        for (i, sym) in inputs.iter().enumerate() {
            input_map.entry(sym.clone()).or_insert(i);
        }
        Self { input_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut bytecode = Bytecode::default();
        let mut depth = 0usize;
        self.compile_recursive(expr, &mut bytecode, &mut depth)?;
        Ok(bytecode)
    }

    fn compile_recursive(
        &self,
        expr: &Expr,
        code: &mut Bytecode,
        depth: &mut usize,
    ) -> Result<()> {
        match expr {
            Expr::Number(n) => code.push(OpCode::LoadConst(*n), depth, 1),
            Expr::Symbol(sym) => {
                let idx = self
                    .input_map
                    .get(sym)
                    .ok_or_else(|| IcError::UnboundSymbol(sym.to_string()))?;
                code.push(OpCode::LoadInput(*idx), depth, 1);
            }
            Expr::Binary(left, '^', right) if integer_exponent(right).is_some() => {
                self.compile_recursive(left, code, depth)?;
                if let Some(n) = integer_exponent(right) {
                    code.push(OpCode::PowI(n), depth, 0);
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, code, depth)?;
                self.compile_recursive(right, code, depth)?;
                let opcode = match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    _ => return Err(IcError::Parse(format!("unknown binary operator `{}`", op)).into()),
                };
                code.push(opcode, depth, -1);
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, code, depth)?;
                match op {
                    '-' => code.push(OpCode::Neg, depth, 0),
                    _ => return Err(IcError::Parse(format!("unknown unary operator `{}`", op)).into()),
                }
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, code, depth)?;
                let opcode = match func.as_str() {
                    "sin" => OpCode::Sin,
                    "cos" => OpCode::Cos,
                    "tan" => OpCode::Tan,
                    "exp" => OpCode::Exp,
                    "ln" => OpCode::Ln,
                    "sqrt" => OpCode::Sqrt,
                    _ => return Err(IcError::Parse(format!("unknown function `{}`", func)).into()),
                };
                code.push(opcode, depth, 0);
            }
        }
        Ok(())
    }
}

impl Bytecode {
    fn push(&mut self, op: OpCode, depth: &mut usize, delta: isize) {
        self.ops.push(op);
        *depth = depth.saturating_add_signed(delta);
        self.max_depth = self.max_depth.max(*depth);
    }
}

fn integer_exponent(expr: &Expr) -> Option<i32> {
    match expr {
        Expr::Number(n) if n.fract() == 0.0 && n.abs() <= i32::MAX as f64 => Some(*n as i32),
        _ => None,
    }
}

// --- Compiled systems ---

/// One bytecode program per equation, all sharing the same input layout.
#[derive(Debug, Clone)]
pub struct CompiledSystem {
    pub equations: Vec<Bytecode>,
    pub inputs: Vec<Symbol>,
    stack_depth: usize,
}

impl CompiledSystem {
    pub fn compile(exprs: &[Expr], inputs: &[Symbol]) -> Result<Self> {
        let compiler = Compiler::new(inputs);
        let equations = exprs
            .iter()
            .map(|expr| compiler.compile(expr))
            .collect::<Result<Vec<_>>>()?;
        let stack_depth = equations.iter().map(|b| b.max_depth).max().unwrap_or(0);
        Ok(Self {
            equations,
            inputs: inputs.to_vec(),
            stack_depth,
        })
    }
}

impl Dimensions for CompiledSystem {
    fn input_dim(&self) -> usize {
        self.inputs.len()
    }

    fn output_dim(&self) -> usize {
        self.equations.len()
    }
}

impl<T: Scalar> VectorFunction<T> for CompiledSystem {
    fn apply(&self, x: &[T], out: &mut [T]) {
        let mut stack = Vec::with_capacity(self.stack_depth);
        for (i, eq) in self.equations.iter().enumerate() {
            out[i] = VM::execute(eq, x, &mut stack);
        }
    }
}

// --- Simple Parser ---

/// Parses an expression, or an equation `lhs = rhs` into `lhs - rhs`.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let lhs = parser.parse_expression()?;
    let expr = if parser.peek() == Some(&Token::Equals) {
        parser.consume();
        let rhs = parser.parse_expression()?;
        Expr::Binary(Box::new(lhs), '-', Box::new(rhs))
    } else {
        lhs
    };
    if let Some(token) = parser.peek() {
        return Err(IcError::Parse(format!("unexpected trailing token {:?} in `{}`", token, input)).into());
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
    Equals,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Exponent: 1e-3, 2.5E4
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let value = literal
                .parse()
                .map_err(|_| IcError::Parse(format!("invalid number `{}`", literal)))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Identifier(chars[start..i].iter().collect()));
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                '=' => Token::Equals,
                _ => return Err(IcError::Parse(format!("unexpected character `{}`", c)).into()),
            };
            tokens.push(token);
            i += 1;
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.consume() {
            Some(token) if token == expected => Ok(()),
            other => Err(IcError::Parse(format!("expected {:?}, found {:?}", expected, other)).into()),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;

        loop {
            let op = match self.peek() {
                Some(Token::Plus) => '+',
                Some(Token::Minus) => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.peek() {
                Some(Token::Star) => '*',
                Some(Token::Slash) => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        self.parse_power()
    }

    /// Right-associative: a^b^c = a^(b^c), and -x^2 = -(x^2).
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    if name == "der" {
                        return self.parse_derivative();
                    }
                    if !FUNCTIONS.contains(&name.as_str()) {
                        return Err(IcError::Parse(format!("unknown function `{}`", name)).into());
                    }
                    let arg = self.parse_expression()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Symbol(Symbol::Var(name)))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                // `(-2)` is how negative literals print.
                match expr {
                    Expr::Unary('-', operand) => match *operand {
                        Expr::Number(n) => Ok(Expr::Number(-n)),
                        other => Ok(Expr::Unary('-', Box::new(other))),
                    },
                    other => Ok(other),
                }
            }
            other => Err(IcError::Parse(format!("unexpected token {:?}", other)).into()),
        }
    }

    /// `der(x)`, `der(x, n)` and nested `der(der(x))`, after the opening paren.
    fn parse_derivative(&mut self) -> Result<Expr> {
        let inner = self.parse_expression()?;
        let extra = if let Some(Token::Comma) = self.peek() {
            self.consume();
            match self.consume() {
                Some(Token::Number(n))
                    if n >= 1.0 && n.fract() == 0.0 && n <= u32::MAX as f64 =>
                {
                    n as u32
                }
                other => {
                    return Err(IcError::Parse(format!(
                        "derivative order must be a positive integer, found {:?}",
                        other
                    ))
                    .into())
                }
            }
        } else {
            1
        };
        self.expect(Token::RParen)?;

        match inner {
            Expr::Symbol(Symbol::Var(base)) => Ok(Expr::Symbol(Symbol::Der { base, order: extra })),
            Expr::Symbol(Symbol::Der { base, order }) => {
                let order = order.checked_add(extra).ok_or_else(|| {
                    IcError::Parse(format!("derivative order of `{}` overflows", base))
                })?;
                Ok(Expr::Symbol(Symbol::Der { base, order }))
            }
            other => Err(IcError::Parse(format!("der() expects a variable, found `{}`", other)).into()),
        }
    }
}
