// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The structural equation tree attached to components.
//!
//! Equations are kept as operator/operand trees rather than markup text, so
//! classification and synthesis never round-trip through a serializer.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MathOp {
    Plus,
    Minus,
    Times,
    Divide,
    Power,
    Root,
    Exp,
    Ln,
    Log,
    Abs,
    Floor,
    Ceiling,
    Eq,
    Neq,
    Gt,
    Lt,
    Geq,
    Leq,
    And,
    Or,
    Not,
}

impl MathOp {
    pub fn name(&self) -> &'static str {
        use MathOp::*;
        match self {
            Plus => "plus",
            Minus => "minus",
            Times => "times",
            Divide => "divide",
            Power => "power",
            Root => "root",
            Exp => "exp",
            Ln => "ln",
            Log => "log",
            Abs => "abs",
            Floor => "floor",
            Ceiling => "ceiling",
            Eq => "eq",
            Neq => "neq",
            Gt => "gt",
            Lt => "lt",
            Geq => "geq",
            Leq => "leq",
            And => "and",
            Or => "or",
            Not => "not",
        }
    }

    pub fn parse(name: &str) -> Option<MathOp> {
        use MathOp::*;
        let op = match name {
            "plus" => Plus,
            "minus" => Minus,
            "times" => Times,
            "divide" => Divide,
            "power" => Power,
            "root" => Root,
            "exp" => Exp,
            "ln" => Ln,
            "log" => Log,
            "abs" => Abs,
            "floor" => Floor,
            "ceiling" => Ceiling,
            "eq" => Eq,
            "neq" => Neq,
            "gt" => Gt,
            "lt" => Lt,
            "geq" => Geq,
            "leq" => Leq,
            "and" => And,
            "or" => Or,
            "not" => Not,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A numeric literal, optionally carrying a units designation.
    Const { value: f64, units: Option<String> },
    /// A variable reference.
    Var(String),
    /// An operator applied to one or more operands.
    Op(MathOp, Vec<Expr>),
    /// A first-order derivative of `operand` with respect to the bound
    /// variable `bound`.
    Diff { bound: String, operand: Box<Expr> },
    /// Piecewise cases: each piece is (value, condition).
    Piecewise {
        pieces: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Expr::Var(name) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<(f64, Option<&str>)> {
        match self {
            Expr::Const { value, units } => Some((*value, units.as_deref())),
            _ => None,
        }
    }

    /// A compound expression is anything other than a bare literal or a bare
    /// variable reference.
    pub fn is_compound(&self) -> bool {
        matches!(self, Expr::Op(_, _) | Expr::Piecewise { .. } | Expr::Diff { .. })
    }
}

/// A top-level equality.
#[derive(Clone, Debug, PartialEq)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
}

/// One math block attached to a component; a component may carry several.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MathBlock {
    pub equations: Vec<Equation>,
}

#[test]
fn test_math_op_names_roundtrip() {
    use MathOp::*;
    for op in [
        Plus, Minus, Times, Divide, Power, Root, Exp, Ln, Log, Abs, Floor, Ceiling, Eq, Neq, Gt,
        Lt, Geq, Leq, And, Or, Not,
    ] {
        assert_eq!(Some(op), MathOp::parse(op.name()));
    }
    assert_eq!(None, MathOp::parse("integral"));
}

#[test]
fn test_expr_predicates() {
    let v = Expr::Var("x".to_owned());
    assert_eq!(Some("x"), v.as_var());
    assert!(!v.is_compound());

    let c = Expr::Const {
        value: 5.0,
        units: Some("volt".to_owned()),
    };
    assert_eq!(Some((5.0, Some("volt"))), c.as_const());

    let sum = Expr::Op(MathOp::Plus, vec![v, c]);
    assert!(sum.is_compound());
}
