//! In-memory program representation
//!
//! A `Module` is an arena of operations addressed by `OpId`. Every operation
//! owns an optional single-block region holding the ids of its children, so
//! the nesting is a tree over the arena. Forking a module duplicates the
//! arena; the copy shares nothing with its source, so each downstream
//! branch can lower its own copy destructively.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Index of an operation in its module's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub usize);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Operand or attribute value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attribute {
    Int(i64),
    Str(String),
    Ident(String),
    Symbol(String),
    /// SSA value reference, only meaningful as an operand
    Value(String),
    Array(Vec<Attribute>),
}

impl Attribute {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload of a string or bare identifier
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(s) | Attribute::Ident(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Attribute::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            Attribute::Value(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Int(n) => write!(f, "{}", n),
            Attribute::Str(s) => write!(f, "{:?}", s),
            Attribute::Ident(s) => write!(f, "{}", s),
            Attribute::Symbol(s) => write!(f, "@{}", s),
            Attribute::Value(s) => write!(f, "%{}", s),
            Attribute::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A single operation
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Fully qualified name, e.g. `aie.tile`
    pub name: String,
    /// Result value name without the `%` sigil
    pub result: Option<String>,
    pub operands: Vec<Attribute>,
    pub attributes: BTreeMap<String, Attribute>,
    /// Child operations, `None` when the op has no region
    pub region: Option<Vec<OpId>>,
    pub parent: Option<OpId>,
    erased: bool,
}

impl Operation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: None,
            operands: Vec::new(),
            attributes: BTreeMap::new(),
            region: None,
            parent: None,
            erased: false,
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_operand(mut self, operand: Attribute) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn with_operands(mut self, operands: impl IntoIterator<Item = Attribute>) -> Self {
        self.operands.extend(operands);
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Attribute) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_region(mut self) -> Self {
        self.region = Some(Vec::new());
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn dialect(&self) -> &str {
        self.name.split('.').next().unwrap_or("")
    }

    pub fn attr(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    pub fn int_attr(&self, key: &str) -> Option<i64> {
        self.attr(key).and_then(Attribute::as_int)
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(Attribute::as_str)
    }

    pub fn operand_value(&self, index: usize) -> Option<&str> {
        self.operands.get(index).and_then(Attribute::as_value)
    }

    pub fn operand_int(&self, index: usize) -> Option<i64> {
        self.operands.get(index).and_then(Attribute::as_int)
    }

    pub fn operand_str(&self, index: usize) -> Option<&str> {
        self.operands.get(index).and_then(Attribute::as_str)
    }

    pub fn operand_symbol(&self, index: usize) -> Option<&str> {
        self.operands.get(index).and_then(Attribute::as_symbol)
    }

    /// Symbol name from `sym_name`, falling back to the result name
    pub fn symbol_name(&self) -> Option<&str> {
        self.str_attr("sym_name").or(self.result.as_deref())
    }
}

/// A program: the operation arena plus its top-level op list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    ops: Vec<Operation>,
    body: Vec<OpId>,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent copy for a downstream branch
    pub fn fork(&self) -> Module {
        self.clone()
    }

    pub fn body(&self) -> &[OpId] {
        &self.body
    }

    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id.0]
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Operation {
        &mut self.ops[id.0]
    }

    pub fn is_live(&self, id: OpId) -> bool {
        !self.ops[id.0].erased
    }

    /// Children of `parent`, or the top-level ops for `None`
    pub fn children(&self, parent: Option<OpId>) -> &[OpId] {
        match parent {
            Some(id) => self.ops[id.0].region.as_deref().unwrap_or(&[]),
            None => &self.body,
        }
    }

    fn block_mut(&mut self, parent: Option<OpId>) -> &mut Vec<OpId> {
        match parent {
            Some(id) => self.ops[id.0].region.get_or_insert_with(Vec::new),
            None => &mut self.body,
        }
    }

    /// Append `op` at the end of `parent`'s region (top level for `None`)
    pub fn append(&mut self, parent: Option<OpId>, op: Operation) -> OpId {
        let index = self.children(parent).len();
        self.insert_at(parent, index, op)
    }

    pub fn insert_at(&mut self, parent: Option<OpId>, index: usize, mut op: Operation) -> OpId {
        let id = OpId(self.ops.len());
        op.parent = parent;
        op.erased = false;
        self.ops.push(op);
        self.block_mut(parent).insert(index, id);
        id
    }

    /// Parent and index of a live op
    pub fn position(&self, id: OpId) -> Option<(Option<OpId>, usize)> {
        let parent = self.ops[id.0].parent;
        self.children(parent)
            .iter()
            .position(|&child| child == id)
            .map(|index| (parent, index))
    }

    pub fn insert_before(&mut self, anchor: OpId, op: Operation) -> OpId {
        let (parent, index) = self.position(anchor).unwrap_or((None, self.body.len()));
        self.insert_at(parent, index, op)
    }

    pub fn insert_after(&mut self, anchor: OpId, op: Operation) -> OpId {
        let (parent, index) = self
            .position(anchor)
            .map(|(p, i)| (p, i + 1))
            .unwrap_or((None, self.body.len()));
        self.insert_at(parent, index, op)
    }

    fn unlink(&mut self, id: OpId) {
        let parent = self.ops[id.0].parent;
        self.block_mut(parent).retain(|&child| child != id);
    }

    /// Remove an op and everything nested in it
    pub fn erase(&mut self, id: OpId) {
        self.unlink(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let op = &mut self.ops[current.0];
            op.erased = true;
            if let Some(children) = &op.region {
                stack.extend(children.iter().copied());
            }
        }
    }

    /// Move a live op to the end of another region
    pub fn move_to(&mut self, id: OpId, new_parent: Option<OpId>) {
        self.unlink(id);
        self.ops[id.0].parent = new_parent;
        self.block_mut(new_parent).push(id);
    }

    /// Pre-order walk of every live op
    pub fn walk(&self) -> Vec<OpId> {
        let mut out = Vec::new();
        for &id in &self.body {
            self.walk_into(id, &mut out);
        }
        out
    }

    /// Pre-order walk of the ops nested under `root`, excluding `root`
    pub fn walk_in(&self, root: OpId) -> Vec<OpId> {
        let mut out = Vec::new();
        for &id in self.children(Some(root)) {
            self.walk_into(id, &mut out);
        }
        out
    }

    fn walk_into(&self, id: OpId, out: &mut Vec<OpId>) {
        out.push(id);
        for &child in self.children(Some(id)) {
            self.walk_into(child, out);
        }
    }

    pub fn find_all(&self, name: &str) -> Vec<OpId> {
        self.walk()
            .into_iter()
            .filter(|&id| self.op(id).is(name))
            .collect()
    }

    pub fn find_in(&self, root: OpId, name: &str) -> Vec<OpId> {
        self.walk_in(root)
            .into_iter()
            .filter(|&id| self.op(id).is(name))
            .collect()
    }

    /// Top-level `aie.device` ops
    pub fn devices(&self) -> Vec<OpId> {
        self.body
            .iter()
            .copied()
            .filter(|&id| self.op(id).is("aie.device"))
            .collect()
    }

    /// Live op defining `%value`
    pub fn defining_op(&self, value: &str) -> Option<OpId> {
        self.walk()
            .into_iter()
            .find(|&id| self.op(id).result.as_deref() == Some(value))
    }

    /// Live op whose `sym_name` is `symbol`
    pub fn lookup_symbol(&self, symbol: &str) -> Option<OpId> {
        self.walk()
            .into_iter()
            .find(|&id| self.op(id).str_attr("sym_name") == Some(symbol))
    }

    /// Result name derived from `base` that no live op uses yet
    pub fn fresh_value(&self, base: &str) -> String {
        let taken: HashSet<&str> = self
            .walk()
            .into_iter()
            .filter_map(|id| self.op(id).result.as_deref())
            .collect();
        if !taken.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}_{}", base, n))
            .find(|name| !taken.contains(name.as_str()))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn live_count(&self) -> usize {
        self.walk().len()
    }

    fn fmt_op(&self, f: &mut fmt::Formatter<'_>, id: OpId, depth: usize) -> fmt::Result {
        let op = self.op(id);
        let indent = "  ".repeat(depth);
        write!(f, "{}", indent)?;
        if let Some(result) = &op.result {
            write!(f, "%{} = ", result)?;
        }
        write!(f, "{}", op.name)?;
        if !op.operands.is_empty() {
            write!(f, "(")?;
            for (i, operand) in op.operands.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", operand)?;
            }
            write!(f, ")")?;
        }
        if !op.attributes.is_empty() {
            write!(f, " {{")?;
            for (i, (key, value)) in op.attributes.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} = {}", key, value)?;
            }
            write!(f, "}}")?;
        }
        if let Some(children) = &op.region {
            writeln!(f, " {{")?;
            for &child in children {
                self.fmt_op(f, child, depth + 1)?;
            }
            write!(f, "{}}}", indent)?;
        }
        writeln!(f)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module")?;
        if !self.attributes.is_empty() {
            write!(f, " {{")?;
            for (i, (key, value)) in self.attributes.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} = {}", key, value)?;
            }
            write!(f, "}}")?;
        }
        writeln!(f, " {{")?;
        for &id in &self.body {
            self.fmt_op(f, id, 1)?;
        }
        writeln!(f, "}}")
    }
}
