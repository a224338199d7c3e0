//! Condition AST.
//!
//! A condition is a conjunction of `factor <op> literal` comparisons. The
//! empty conjunction is always true.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
        }
    }

    /// IEEE-754 comparison; anything involving NaN is false.
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => left == right,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Canonical factor name.
    pub factor: String,
    pub op: CompareOp,
    pub value: f64,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.factor, self.op, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Condition {
    pub comparisons: Vec<Comparison>,
}

impl Condition {
    /// The empty conjunction.
    pub fn always() -> Self {
        Self::default()
    }

    pub fn is_always(&self) -> bool {
        self.comparisons.is_empty()
    }

    /// Factor names referenced, in order of first appearance.
    pub fn factors(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for c in &self.comparisons {
            if !names.contains(&c.factor.as_str()) {
                names.push(&c.factor);
            }
        }
        names
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.comparisons.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}
