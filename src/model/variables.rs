//! Variable scopes with lazily expanded children.
//!
//! Expanded children are addressed by [`VariableKey`], the pair of scope index
//! and variables reference, never by node identity.

use serde::Serialize;

use crate::protocol::Variable;

/// Stable address of an expandable variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VariableKey {
    pub scope_index: usize,
    pub variables_reference: i64,
}

impl VariableKey {
    pub fn new(scope_index: usize, variables_reference: i64) -> Self {
        Self {
            scope_index,
            variables_reference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableNode {
    pub variable: Variable,
    pub expanded: bool,
    pub children: Vec<VariableNode>,
}

impl VariableNode {
    pub fn is_expandable(&self) -> bool {
        self.variable.variables_reference > 0
    }

    /// Replace the children of every node carrying `reference`. Matching
    /// nodes are not searched below, so a container holding itself stops at
    /// the outermost occurrence.
    fn expand_matching(&mut self, reference: i64, children: &[Variable]) -> usize {
        if self.variable.variables_reference == reference {
            self.children = children.iter().cloned().map(VariableNode::from).collect();
            self.expanded = true;
            return 1;
        }
        self.children
            .iter_mut()
            .map(|child| child.expand_matching(reference, children))
            .sum()
    }
}

impl From<Variable> for VariableNode {
    fn from(variable: Variable) -> Self {
        Self {
            variable,
            expanded: false,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeEntry {
    pub name: String,
    pub variables_reference: i64,
    pub variables: Vec<VariableNode>,
}

impl ScopeEntry {
    pub fn new(name: impl Into<String>, variables_reference: i64, variables: Vec<Variable>) -> Self {
        Self {
            name: name.into(),
            variables_reference,
            variables: variables.into_iter().map(VariableNode::from).collect(),
        }
    }

    pub fn variable(&self, name: &str) -> Option<&VariableNode> {
        self.variables.iter().find(|node| node.variable.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariablesModel {
    scopes: Vec<ScopeEntry>,
}

impl VariablesModel {
    pub fn scopes(&self) -> &[ScopeEntry] {
        &self.scopes
    }

    pub(super) fn set_scopes(&mut self, scopes: Vec<ScopeEntry>) {
        self.scopes = scopes;
    }

    /// Splice `children` under the nodes addressed by `key`, replacing any
    /// previous children. A reference names one container on the kernel, so
    /// every node in the scope that shares it gets the same children. Returns
    /// false when no such node exists.
    pub(super) fn expand(&mut self, key: VariableKey, children: Vec<Variable>) -> bool {
        if key.variables_reference <= 0 {
            return false;
        }
        let Some(scope) = self.scopes.get_mut(key.scope_index) else {
            return false;
        };
        let expanded: usize = scope
            .variables
            .iter_mut()
            .map(|node| node.expand_matching(key.variables_reference, &children))
            .sum();
        expanded > 0
    }

    pub(super) fn clear(&mut self) {
        self.scopes.clear();
    }
}
