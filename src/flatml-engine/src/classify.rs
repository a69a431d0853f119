// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Equation classification: given a variable, decide what role its defining
//! equation plays, operating on equation trees directly.

use crate::ast::{Equation, Expr};
use crate::datamodel::Component;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// d(var)/d(bound) appears on the left-hand side.
    Differential,
    /// The variable is the bound variable of some derivative.
    VariableOfIntegration,
    /// The variable alone on the left, a compound expression on the right.
    AlgebraicLhs,
    /// The variable equated to a bare numeric literal.
    ConstantParameterEquation,
    /// The variable equated to another bare variable.
    SimpleEquality,
    /// No equation mentions the variable in a recognized position.
    Unknown,
}

/// Locates an equation within a component: block index plus equation index
/// within the block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EquationHandle {
    pub block: usize,
    pub equation: usize,
}

/// If `eq` assigns a constant to a variable, the constant's value and units.
pub fn constant_parameter(eq: &Equation) -> Option<(f64, Option<&str>)> {
    if eq.lhs.as_var().is_some() {
        return eq.rhs.as_const();
    }
    None
}

/// If `eq` equates two bare variables, the pair in written order.
pub fn simple_equality(eq: &Equation) -> Option<(&str, &str)> {
    match (eq.lhs.as_var(), eq.rhs.as_var()) {
        (Some(l), Some(r)) => Some((l, r)),
        _ => None,
    }
}

fn classify_in(eq: &Equation, variable: &str) -> Option<Classification> {
    // constant and simple-equality shapes take precedence over the looser
    // structural matches below
    if constant_parameter(eq).is_some() && eq.lhs.as_var() == Some(variable) {
        return Some(Classification::ConstantParameterEquation);
    }
    if let Some((l, r)) = simple_equality(eq) {
        if l == variable || r == variable {
            return Some(Classification::SimpleEquality);
        }
    }
    if eq.lhs.as_var() == Some(variable) && eq.rhs.is_compound() {
        return Some(Classification::AlgebraicLhs);
    }
    if let Expr::Diff { bound, operand } = &eq.lhs {
        if operand.as_var() == Some(variable) {
            return Some(Classification::Differential);
        }
        if bound == variable {
            return Some(Classification::VariableOfIntegration);
        }
    }
    // a bound variable may also appear inside right-hand-side derivatives
    if mentions_as_bound(&eq.rhs, variable) {
        return Some(Classification::VariableOfIntegration);
    }
    None
}

fn mentions_as_bound(expr: &Expr, variable: &str) -> bool {
    match expr {
        Expr::Diff { bound, operand } => {
            bound == variable || mentions_as_bound(operand, variable)
        }
        Expr::Op(_, args) => args.iter().any(|a| mentions_as_bound(a, variable)),
        Expr::Piecewise { pieces, otherwise } => {
            pieces
                .iter()
                .any(|(v, c)| mentions_as_bound(v, variable) || mentions_as_bound(c, variable))
                || otherwise
                    .as_deref()
                    .is_some_and(|o| mentions_as_bound(o, variable))
        }
        _ => false,
    }
}

/// Classify `variable` against the math in `component`.  Each block is
/// scanned in order; the first block containing any matching equation
/// decides, and within a block the strongest match wins.
pub fn classify(component: &Component, variable: &str) -> (Classification, Option<EquationHandle>) {
    for (bi, block) in component.math.iter().enumerate() {
        let mut best: Option<(Classification, EquationHandle)> = None;
        for (ei, eq) in block.equations.iter().enumerate() {
            if let Some(class) = classify_in(eq, variable) {
                let handle = EquationHandle {
                    block: bi,
                    equation: ei,
                };
                let rank = priority(class);
                match best {
                    Some((prev, _)) if priority(prev) <= rank => {}
                    _ => best = Some((class, handle)),
                }
            }
        }
        if let Some((class, handle)) = best {
            return (class, Some(handle));
        }
    }
    (Classification::Unknown, None)
}

fn priority(c: Classification) -> u8 {
    match c {
        Classification::ConstantParameterEquation => 0,
        Classification::SimpleEquality => 1,
        Classification::AlgebraicLhs => 2,
        Classification::Differential => 3,
        Classification::VariableOfIntegration => 4,
        Classification::Unknown => 5,
    }
}
