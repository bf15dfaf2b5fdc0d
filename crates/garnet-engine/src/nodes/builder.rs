//! Node tree construction
//!
//! Children are pushed before their parents, so every constructor takes the
//! ids of already-built nodes and returns the id of the new one.

use super::arena::{NodeArena, NodeId};
use super::body::NodeBody;
use super::node::{ConditionProfile, LoopKind, Node};
use crate::config::SpecializationPolicy;
use crate::ir::CallType;
use crate::runtime::{Arity, BinaryOp, Symbol, Value};
use crate::signal::EscapeTarget;
use std::sync::Arc;

/// Bottom-up tree construction; children are built before parents
#[derive(Default)]
pub struct NodeBuilder {
    arena: NodeArena,
}

impl NodeBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.arena.push(node)
    }

    /// Constant
    pub fn literal(&mut self, value: Value) -> NodeId {
        self.push(Node::Literal(value))
    }

    /// Integer constant
    pub fn fixnum(&mut self, n: i64) -> NodeId {
        self.literal(Value::Fixnum(n))
    }

    /// `nil` constant
    pub fn nil(&mut self) -> NodeId {
        self.literal(Value::Nil)
    }

    /// `self`
    pub fn self_value(&mut self) -> NodeId {
        self.push(Node::SelfValue)
    }

    /// Read a local slot
    pub fn read_local(&mut self, slot: u32) -> NodeId {
        self.push(Node::ReadLocal(slot))
    }

    /// Write a local slot
    pub fn write_local(&mut self, slot: u32, value: NodeId) -> NodeId {
        self.push(Node::WriteLocal { slot, value })
    }

    /// Read a positional argument
    pub fn read_arg(&mut self, index: u32) -> NodeId {
        self.push(Node::ReadArg(index))
    }

    /// Run children in order
    pub fn seq(&mut self, children: Vec<NodeId>) -> NodeId {
        self.push(Node::Sequence(children))
    }

    /// Profiled conditional
    pub fn if_(&mut self, cond: NodeId, then: NodeId, otherwise: Option<NodeId>) -> NodeId {
        self.push(Node::If {
            cond,
            then,
            otherwise,
            profile: Arc::new(ConditionProfile::default()),
        })
    }

    /// Logical negation
    pub fn not(&mut self, inner: NodeId) -> NodeId {
        self.push(Node::Not(inner))
    }

    /// Short-circuit `&&`
    pub fn and(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.push(Node::And(left, right))
    }

    /// Short-circuit `||`
    pub fn or(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.push(Node::Or(left, right))
    }

    /// Operator node; starts uninitialized and specializes on first use
    pub fn binary(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> NodeId {
        self.push(Node::binary(op, left, right))
    }

    /// Method call through a polymorphic inline cache
    pub fn call(&mut self, receiver: NodeId, name: &str, args: Vec<NodeId>) -> NodeId {
        self.push(Node::dispatch(
            Symbol::intern(name),
            CallType::Normal,
            receiver,
            args,
        ))
    }

    /// Call with an implicit `self` receiver; private methods are reachable
    pub fn call_self(&mut self, name: &str, args: Vec<NodeId>) -> NodeId {
        let receiver = self.self_value();
        self.push(Node::dispatch(
            Symbol::intern(name),
            CallType::Functional,
            receiver,
            args,
        ))
    }

    /// Token for a loop's `break`/`next`/`redo`; allocate it before building
    /// the loop body so escapes inside the body can aim at it
    pub fn loop_target(&mut self) -> EscapeTarget {
        EscapeTarget::fresh()
    }

    /// Loop testing `cond` first
    pub fn while_(&mut self, target: EscapeTarget, cond: NodeId, body: NodeId) -> NodeId {
        self.push(Node::While {
            kind: LoopKind::While,
            cond,
            body,
            target,
        })
    }

    /// Loop running `body` once before the first test
    pub fn do_while(&mut self, target: EscapeTarget, cond: NodeId, body: NodeId) -> NodeId {
        self.push(Node::While {
            kind: LoopKind::DoWhile,
            cond,
            body,
            target,
        })
    }

    /// Leave the loop `target`
    pub fn break_(&mut self, target: EscapeTarget, value: Option<NodeId>) -> NodeId {
        self.push(Node::Break { target, value })
    }

    /// Next iteration of the loop `target`
    pub fn next_(&mut self, target: EscapeTarget, value: Option<NodeId>) -> NodeId {
        self.push(Node::Next { target, value })
    }

    /// Rerun the body of the loop `target`
    pub fn redo(&mut self, target: EscapeTarget) -> NodeId {
        self.push(Node::Redo(target))
    }

    /// Return from the method
    pub fn ret(&mut self, value: NodeId) -> NodeId {
        self.push(Node::Return(value))
    }

    /// `catch(tag) { body }`
    pub fn catch(&mut self, tag: NodeId, body: NodeId) -> NodeId {
        self.push(Node::Catch { tag, body })
    }

    /// `throw tag, value`
    pub fn throw(&mut self, tag: NodeId, value: Option<NodeId>) -> NodeId {
        self.push(Node::Throw { tag, value })
    }

    /// `begin body rescue classes => binding; handler end`
    pub fn rescue(
        &mut self,
        body: NodeId,
        classes: Vec<NodeId>,
        binding: Option<u32>,
        handler: NodeId,
    ) -> NodeId {
        self.push(Node::Rescue {
            body,
            classes,
            binding,
            handler,
        })
    }

    /// `begin body ensure ensure end`
    pub fn ensure(&mut self, body: NodeId, ensure: NodeId) -> NodeId {
        self.push(Node::Ensure { body, ensure })
    }

    /// Call the activation's block
    pub fn yield_(&mut self, args: Vec<NodeId>) -> NodeId {
        self.push(Node::Yield(args))
    }

    /// Seal the tree; host errors escaping `root` are translated at the top
    pub fn finish(
        mut self,
        name: &str,
        arity: Arity,
        local_count: u32,
        root: NodeId,
        policy: SpecializationPolicy,
    ) -> NodeBody {
        let root = self.push(Node::Translate(root));
        NodeBody::new(name, arity, local_count, self.arena, root, policy)
    }
}
