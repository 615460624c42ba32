//! Rule tree data structures.
//!
//! A strategy's buy and sell conditions form a tree of nodes:
//! - `Leaf`: one indicator compared against a value
//! - `Group`: a boolean combination of child nodes
//!
//! Every node also carries the `Combinator` it uses to join its siblings.

use std::fmt;
use std::str::FromStr;

/// Indicator settings exactly as submitted (`indicatorSettings`).
pub type Settings = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combinator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Equal,
    NotEqual,
    CrossesAbove,
    CrossesBelow,
    IsAbove,
    IsBelow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub id: String,
    pub name: String,
    pub operator: ComparisonOperator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub combinator: Combinator,
    pub indicator: IndicatorRef,
    pub condition: Condition,
    pub value: String,
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub combinator: Combinator,
    pub children: Vec<RuleNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleNode {
    Leaf(Leaf),
    Group(Group),
}

impl Combinator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }
}

impl FromStr for Combinator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AND" => Ok(Combinator::And),
            "OR" => Ok(Combinator::Or),
            other => Err(format!("invalid operator: {other}")),
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ComparisonOperator {
    pub const ALL: [ComparisonOperator; 10] = [
        ComparisonOperator::GreaterThan,
        ComparisonOperator::LessThan,
        ComparisonOperator::GreaterOrEqual,
        ComparisonOperator::LessOrEqual,
        ComparisonOperator::Equal,
        ComparisonOperator::NotEqual,
        ComparisonOperator::CrossesAbove,
        ComparisonOperator::CrossesBelow,
        ComparisonOperator::IsAbove,
        ComparisonOperator::IsBelow,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::Equal => "==",
            ComparisonOperator::NotEqual => "!=",
            ComparisonOperator::CrossesAbove => "crosses_above",
            ComparisonOperator::CrossesBelow => "crosses_below",
            ComparisonOperator::IsAbove => "is_above",
            ComparisonOperator::IsBelow => "is_below",
        }
    }

    /// Equality operators may compare against arbitrary strings; all others
    /// need a numeric right-hand side.
    pub fn requires_numeric_value(&self) -> bool {
        !matches!(
            self,
            ComparisonOperator::Equal | ComparisonOperator::NotEqual
        )
    }
}

impl FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComparisonOperator::ALL
            .iter()
            .find(|op| op.symbol() == s)
            .copied()
            .ok_or_else(|| format!("invalid comparison symbol: {s}"))
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl RuleNode {
    pub fn combinator(&self) -> Combinator {
        match self {
            RuleNode::Leaf(leaf) => leaf.combinator,
            RuleNode::Group(group) => group.combinator,
        }
    }

    /// Depth of the subtree rooted here; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            RuleNode::Leaf(_) => 1,
            RuleNode::Group(group) => {
                1 + group.children.iter().map(RuleNode::depth).max().unwrap_or(0)
            }
        }
    }

    /// Number of leaves in the subtree.
    pub fn leaf_count(&self) -> usize {
        match self {
            RuleNode::Leaf(_) => 1,
            RuleNode::Group(group) => group.children.iter().map(RuleNode::leaf_count).sum(),
        }
    }
}

/// Collect every indicator referenced by the given nodes, in pre-order.
/// Duplicates are kept; the same indicator may legitimately appear twice.
pub fn extract_indicators(nodes: &[RuleNode]) -> Vec<&IndicatorRef> {
    let mut out = Vec::new();
    for node in nodes {
        collect_indicators(node, &mut out);
    }
    out
}

fn collect_indicators<'a>(node: &'a RuleNode, out: &mut Vec<&'a IndicatorRef>) {
    match node {
        RuleNode::Leaf(leaf) => out.push(&leaf.indicator),
        RuleNode::Group(group) => {
            for child in &group.children {
                collect_indicators(child, out);
            }
        }
    }
}
