//! Matching state for a compiled expectation.
//!
//! The expectation tree is flattened in post-order: every node comes after
//! its children, and a node's subtree is the contiguous range
//! `start..=index`. State lives in a parallel vector so a repetition can
//! snapshot and reset its subtree with a slice copy.

use std::any::{Any, TypeId};
use std::sync::Arc;

use tracing::debug;

use crate::mock::expectation::{ErasedCall, Node};
use crate::mock::{MethodId, MockError, Rejection, Repetitions};

#[derive(Clone)]
enum Kind {
    Call {
        method: MethodId,
        call: Arc<dyn ErasedCall>,
    },
    And,
    Or,
    Chain,
    Repeated(Repetitions),
}

struct NodeShape {
    kind: Kind,
    children: Vec<usize>,
    start: usize,
}

#[derive(Debug, Clone, Default)]
struct NodeState {
    satisfied: bool,
    saturated: bool,
    // Set when a chain moves past this node.
    closed: bool,
    invocations: Vec<usize>,
    started: usize,
    completed: usize,
}

struct Invocation<'a> {
    method: MethodId,
    signature: TypeId,
    input: &'a dyn Any,
    index: usize,
}

pub(crate) struct Arena {
    shapes: Vec<NodeShape>,
    states: Vec<NodeState>,
    initial: Vec<NodeState>,
    calls: usize,
}

impl Arena {
    pub(crate) fn compile(root: &Node) -> Self {
        let mut arena = Arena {
            shapes: Vec::new(),
            states: Vec::new(),
            initial: Vec::new(),
            calls: 0,
        };
        arena.push(root);
        arena.initial = arena.states.clone();
        for idx in 0..arena.shapes.len() {
            arena.refresh(idx);
            arena.initial[idx] = arena.states[idx].clone();
        }
        arena
    }

    fn push(&mut self, node: &Node) -> usize {
        let start = self.shapes.len();
        let (kind, children) = match node {
            Node::Call { method, call } => (
                Kind::Call {
                    method: *method,
                    call: Arc::clone(call),
                },
                Vec::new(),
            ),
            Node::And(nodes) => (Kind::And, nodes.iter().map(|node| self.push(node)).collect()),
            Node::Or(nodes) => (Kind::Or, nodes.iter().map(|node| self.push(node)).collect()),
            Node::Chain(nodes) => (Kind::Chain, nodes.iter().map(|node| self.push(node)).collect()),
            Node::Repeated(node, repetitions) => (Kind::Repeated(*repetitions), vec![self.push(node)]),
        };
        self.shapes.push(NodeShape { kind, children, start });
        self.states.push(NodeState::default());
        self.shapes.len() - 1
    }

    pub(crate) fn root(&self) -> usize {
        self.shapes.len() - 1
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        self.states[self.root()].satisfied
    }

    fn flags(&self, idx: usize) -> (bool, bool) {
        let shape = &self.shapes[idx];
        let state = &self.states[idx];
        let children = || shape.children.iter().map(|&child| &self.states[child]);
        match &shape.kind {
            Kind::Call { .. } => {
                let done = !state.invocations.is_empty();
                (done, done)
            }
            Kind::And | Kind::Chain => (
                children().all(|child| child.satisfied),
                children().all(|child| child.saturated),
            ),
            Kind::Or => (
                children().any(|child| child.satisfied),
                children().all(|child| child.saturated),
            ),
            Kind::Repeated(repetitions) => {
                let child = shape.children[0];
                let fresh = &self.initial[child];
                // A script that takes no calls can never start a repetition.
                if fresh.saturated {
                    return (fresh.satisfied, true);
                }
                if state.started == state.completed {
                    (
                        repetitions.contains(state.completed),
                        !repetitions.allows_more(state.completed),
                    )
                } else {
                    (
                        self.states[child].satisfied && repetitions.contains(state.completed + 1),
                        false,
                    )
                }
            }
        }
    }

    fn refresh(&mut self, idx: usize) {
        let (satisfied, saturated) = self.flags(idx);
        let state = &mut self.states[idx];
        state.satisfied = satisfied;
        state.saturated = saturated || state.closed;
    }

    /// Offer a call to the subtree at `idx`. A refused call leaves the
    /// state untouched.
    fn try_match(
        &mut self,
        idx: usize,
        call: &Invocation<'_>,
        rejected: &mut Vec<Rejection>,
    ) -> Option<Arc<dyn ErasedCall>> {
        if self.states[idx].saturated {
            return None;
        }
        let matched = match self.shapes[idx].kind.clone() {
            Kind::Call { method, call: expected } => self.match_call(idx, method, expected, call, rejected),
            Kind::And | Kind::Or => self.match_any(idx, call, rejected),
            Kind::Chain => self.match_chain(idx, call, rejected),
            Kind::Repeated(repetitions) => self.match_repeated(idx, repetitions, call, rejected),
        }?;
        self.refresh(idx);
        Some(matched)
    }

    fn match_call(
        &mut self,
        idx: usize,
        method: MethodId,
        expected: Arc<dyn ErasedCall>,
        call: &Invocation<'_>,
        rejected: &mut Vec<Rejection>,
    ) -> Option<Arc<dyn ErasedCall>> {
        if method != call.method {
            rejected.push(Rejection::InvalidMethod {
                expected: method.to_string(),
                actual: call.method.to_string(),
            });
            return None;
        }
        if expected.signature() != call.signature {
            rejected.push(Rejection::InvalidSignature {
                method: method.to_string(),
            });
            return None;
        }
        if !expected.accepts(call.input) {
            rejected.push(Rejection::InvalidArguments {
                method: method.to_string(),
                assertion: expected.assertion().to_owned(),
            });
            return None;
        }
        self.states[idx].invocations.push(call.index);
        Some(expected)
    }

    fn match_any(
        &mut self,
        idx: usize,
        call: &Invocation<'_>,
        rejected: &mut Vec<Rejection>,
    ) -> Option<Arc<dyn ErasedCall>> {
        let children = self.shapes[idx].children.clone();
        children
            .into_iter()
            .find_map(|child| self.try_match(child, call, rejected))
    }

    fn match_chain(
        &mut self,
        idx: usize,
        call: &Invocation<'_>,
        rejected: &mut Vec<Rejection>,
    ) -> Option<Arc<dyn ErasedCall>> {
        let children = self.shapes[idx].children.clone();
        let mut passed = Vec::new();
        for child in children {
            let state = &self.states[child];
            if state.saturated {
                if !state.satisfied {
                    return None;
                }
                continue;
            }
            if let Some(matched) = self.try_match(child, call, rejected) {
                for earlier in passed {
                    self.close(earlier);
                }
                return Some(matched);
            }
            if !self.states[child].satisfied {
                return None;
            }
            passed.push(child);
        }
        None
    }

    fn match_repeated(
        &mut self,
        idx: usize,
        repetitions: Repetitions,
        call: &Invocation<'_>,
        rejected: &mut Vec<Rejection>,
    ) -> Option<Arc<dyn ErasedCall>> {
        let child = self.shapes[idx].children[0];
        let start = self.shapes[child].start;
        let NodeState { started, completed, .. } = self.states[idx];

        if started > completed {
            if let Some(matched) = self.try_match(child, call, rejected) {
                if self.states[child].saturated {
                    self.states[idx].completed += 1;
                }
                return Some(matched);
            }
            if !self.states[child].satisfied {
                return None;
            }
            // The running repetition is complete enough; try a new one.
            self.states[idx].completed += 1;
        }

        if repetitions.allows_more(self.states[idx].completed) {
            let snapshot = self.states[start..=child].to_vec();
            self.states[start..=child].clone_from_slice(&self.initial[start..=child]);
            if let Some(matched) = self.try_match(child, call, rejected) {
                let saturated = self.states[child].saturated;
                let state = &mut self.states[idx];
                state.started += 1;
                if saturated {
                    state.completed += 1;
                }
                return Some(matched);
            }
            self.states[start..=child].clone_from_slice(&snapshot);
        }

        let state = &mut self.states[idx];
        state.started = started;
        state.completed = completed;
        None
    }

    fn close(&mut self, idx: usize) {
        let state = &mut self.states[idx];
        state.closed = true;
        state.saturated = true;
    }

    /// Find the expected call that accepts `input`, consuming it.
    ///
    /// `signature` identifies the caller's input and answer types. `render` formats the input and is only called
    /// when nothing matches.
    pub(crate) fn dispatch(
        &mut self,
        method: MethodId,
        signature: TypeId,
        input: &dyn Any,
        render: impl FnOnce() -> String,
    ) -> Result<Arc<dyn ErasedCall>, MockError> {
        let call = Invocation {
            method,
            signature,
            input,
            index: self.calls,
        };
        let mut rejected = Vec::new();
        match self.try_match(self.root(), &call, &mut rejected) {
            Some(matched) => {
                self.calls += 1;
                debug!(%method, call = call.index, "mock call matched");
                Ok(matched)
            }
            None => {
                let mut unique: Vec<Rejection> = Vec::with_capacity(rejected.len());
                for rejection in rejected {
                    if !unique.contains(&rejection) {
                        unique.push(rejection);
                    }
                }
                debug!(%method, rejections = unique.len(), "unexpected mock call");
                if unique
                    .iter()
                    .any(|rejection| matches!(rejection, Rejection::InvalidSignature { .. }))
                {
                    return Err(MockError::TypeMismatch {
                        method: method.to_string(),
                    });
                }
                Err(MockError::UnexpectedCall {
                    method: method.to_string(),
                    input: render(),
                    rejected: unique,
                })
            }
        }
    }

    pub(crate) fn describe(&self, idx: usize) -> String {
        let shape = &self.shapes[idx];
        match &shape.kind {
            Kind::Call { method, call } => format!("{method}({})", call.assertion()),
            Kind::And => self.join(&shape.children, " and "),
            Kind::Or => self.join(&shape.children, " or "),
            Kind::Chain => self.join(&shape.children, " then "),
            Kind::Repeated(repetitions) => {
                format!("{} repeated {repetitions}", self.describe(shape.children[0]))
            }
        }
    }

    fn join(&self, children: &[usize], separator: &str) -> String {
        match children {
            [] => "nothing".to_owned(),
            [only] => self.describe(*only),
            _ => {
                let parts: Vec<String> = children.iter().map(|&child| self.describe(child)).collect();
                format!("({})", parts.join(separator))
            }
        }
    }

    /// Descriptions of the branches keeping the root from being satisfied.
    pub(crate) fn unmet(&self) -> Vec<String> {
        let mut unmet = Vec::new();
        self.collect_unmet(self.root(), &mut unmet);
        unmet
    }

    fn collect_unmet(&self, idx: usize, unmet: &mut Vec<String>) {
        let state = &self.states[idx];
        if state.satisfied {
            return;
        }
        let shape = &self.shapes[idx];
        match shape.kind {
            Kind::Call { .. } => unmet.push(self.describe(idx)),
            Kind::And | Kind::Chain => {
                for &child in &shape.children {
                    self.collect_unmet(child, unmet);
                }
            }
            Kind::Or => unmet.push(format!("any of {}", self.describe(idx))),
            Kind::Repeated(_) => {
                let mut line = format!("{}, completed {} times", self.describe(idx), state.completed);
                if state.started > state.completed {
                    line.push_str(" with one repetition unfinished");
                }
                unmet.push(line);
            }
        }
    }
}
