use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ChannelHandlerContext;
use crate::error::{Error, Result};
use crate::event::{EventKind, EventSet};
use crate::handler::UserEvent;

/// Identity of a context within its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ContextId(pub(crate) u64);

/// Where a dispatch starts looking for its target.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Cursor {
    /// The upstream head (inbound) or the downstream head at the tail (outbound).
    Start,
    /// Strictly past the given context in the direction of travel.
    After(ContextId),
    /// The given context itself, then onwards.
    At(ContextId),
}

/// Where a new context is spliced in.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Position<'a> {
    First,
    Last,
    Before(&'a str),
    After(&'a str),
}

pub(crate) enum InboundEvent {
    ChannelOpen,
    ChannelActive,
    ChannelInactive,
    ExceptionCaught(Error),
    UserEventTriggered(UserEvent),
    MessageUpdated,
}

impl InboundEvent {
    pub(crate) fn kind(&self) -> EventKind {
        match self {
            InboundEvent::ChannelOpen => EventKind::ChannelOpen,
            InboundEvent::ChannelActive => EventKind::ChannelActive,
            InboundEvent::ChannelInactive => EventKind::ChannelInactive,
            InboundEvent::ExceptionCaught(_) => EventKind::ExceptionCaught,
            InboundEvent::UserEventTriggered(_) => EventKind::UserEventTriggered,
            InboundEvent::MessageUpdated => EventKind::MessageUpdated,
        }
    }
}

struct Node {
    ctx: Arc<ChannelHandlerContext>,
    prev: Option<ContextId>,
    next: Option<ContextId>,
    /// First inbound-capable context after this one.
    next_upstream: Option<ContextId>,
    /// First outbound-capable context before this one.
    next_downstream: Option<ContextId>,
}

/// The doubly linked list of contexts plus the two capability-filtered views.
///
/// # Layout
///
/// ```text
/// head                                              tail
///  [A: in] <-> [B: in+out] <-> [C: out] <-> [D: in]
///
/// upstream view   (next_upstream):    A -> B -> D          upstream_head = A
/// downstream view (next_downstream):  C -> B               downstream_head = C
/// ```
///
/// Links are context ids into `nodes`, so removing a context never leaves a
/// dangling pointer behind. The views are rebuilt on every structural change that
/// touches a context of the matching direction, which keeps event dispatch to a
/// walk over capable contexts only.
#[derive(Default)]
pub(crate) struct Chain {
    nodes: HashMap<ContextId, Node>,
    names: HashMap<String, ContextId>,
    head: Option<ContextId>,
    tail: Option<ContextId>,
    upstream_head: Option<ContextId>,
    downstream_head: Option<ContextId>,
}

impl Chain {
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn has_upstream(&self) -> bool {
        self.upstream_head.is_some()
    }

    pub(crate) fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Arc<ChannelHandlerContext>> {
        let id = self.names.get(name)?;
        self.nodes.get(id).map(|node| &node.ctx)
    }

    pub(crate) fn first(&self) -> Option<&Arc<ChannelHandlerContext>> {
        self.head.and_then(|id| self.nodes.get(&id)).map(|node| &node.ctx)
    }

    pub(crate) fn last(&self) -> Option<&Arc<ChannelHandlerContext>> {
        self.tail.and_then(|id| self.nodes.get(&id)).map(|node| &node.ctx)
    }

    pub(crate) fn is_first(&self, id: ContextId) -> bool {
        self.head == Some(id)
    }

    pub(crate) fn is_last(&self, id: ContextId) -> bool {
        self.tail == Some(id)
    }

    /// Contexts from head to tail.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<ChannelHandlerContext>> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.nodes.get(&cursor?)?;
            cursor = node.next;
            Some(&node.ctx)
        })
    }

    /// Fails with the error `insert` would produce for `name` at `position`.
    pub(crate) fn check_insert(&self, name: &str, position: Position<'_>) -> Result<()> {
        if self.names.contains_key(name) {
            return Err(Error::argument(format!("Duplicate handler name: {}", name)));
        }
        self.neighbours(position).map(|_| ())
    }

    fn neighbours(&self, position: Position<'_>) -> Result<(Option<ContextId>, Option<ContextId>)> {
        Ok(match position {
            Position::First => (None, self.head),
            Position::Last => (self.tail, None),
            Position::Before(base) => {
                let id = self.id_of(base)?;
                (self.nodes[&id].prev, Some(id))
            }
            Position::After(base) => {
                let id = self.id_of(base)?;
                (Some(id), self.nodes[&id].next)
            }
        })
    }

    fn id_of(&self, name: &str) -> Result<ContextId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::no_such_element(name.to_owned()))
    }

    pub(crate) fn insert(&mut self, ctx: Arc<ChannelHandlerContext>, position: Position<'_>) -> Result<()> {
        self.check_insert(ctx.name(), position)?;
        let (prev, next) = self.neighbours(position)?;
        let id = ctx.id();
        let events = ctx.events();

        self.names.insert(ctx.name().to_owned(), id);
        self.nodes.insert(
            id,
            Node {
                ctx,
                prev,
                next,
                next_upstream: None,
                next_downstream: None,
            },
        );
        self.splice(id, prev, next);
        self.link_shortcuts(id);
        self.refresh(events);
        Ok(())
    }

    /// Unlinks `id`, returning its context if it was still linked.
    pub(crate) fn unlink(&mut self, id: ContextId) -> Option<Arc<ChannelHandlerContext>> {
        let node = self.nodes.remove(&id)?;
        self.names.remove(node.ctx.name());

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }

        if self.nodes.is_empty() {
            self.names.clear();
            self.head = None;
            self.tail = None;
            self.upstream_head = None;
            self.downstream_head = None;
        } else {
            self.refresh(node.ctx.events());
        }
        Some(node.ctx)
    }

    /// Puts `ctx` where `old` was. `ctx` must not share a name with any other context.
    pub(crate) fn replace(&mut self, old: ContextId, ctx: Arc<ChannelHandlerContext>) -> Result<Arc<ChannelHandlerContext>> {
        let (prev, next, old_ctx) = {
            let node = self
                .nodes
                .get(&old)
                .ok_or_else(|| Error::no_such_element(ctx.name().to_owned()))?;
            (node.prev, node.next, Arc::clone(&node.ctx))
        };
        if old_ctx.name() != ctx.name() && self.names.contains_key(ctx.name()) {
            return Err(Error::argument(format!("Duplicate handler name: {}", ctx.name())));
        }

        let id = ctx.id();
        let events = old_ctx.events() | ctx.events();
        self.nodes.remove(&old);
        self.names.remove(old_ctx.name());
        self.names.insert(ctx.name().to_owned(), id);
        self.nodes.insert(
            id,
            Node {
                ctx,
                prev,
                next,
                next_upstream: None,
                next_downstream: None,
            },
        );
        self.splice(id, prev, next);
        self.link_shortcuts(id);
        self.refresh(events);
        Ok(old_ctx)
    }

    fn node_mut(&mut self, id: ContextId) -> &mut Node {
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| unreachable!("context {:?} is linked but has no node", id))
    }

    fn splice(&mut self, id: ContextId, prev: Option<ContextId>, next: Option<ContextId>) {
        match prev {
            Some(prev) => self.node_mut(prev).next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(next) => self.node_mut(next).prev = Some(id),
            None => self.tail = Some(id),
        }
    }

    /// Sets the shortcuts of `id` from its neighbours' already valid shortcuts.
    fn link_shortcuts(&mut self, id: ContextId) {
        let (prev, next) = {
            let node = &self.nodes[&id];
            (node.prev, node.next)
        };
        let next_upstream = next.and_then(|n| {
            let node = &self.nodes[&n];
            if node.ctx.events().is_inbound() { Some(n) } else { node.next_upstream }
        });
        let next_downstream = prev.and_then(|p| {
            let node = &self.nodes[&p];
            if node.ctx.events().is_outbound() { Some(p) } else { node.next_downstream }
        });
        let node = self.node_mut(id);
        node.next_upstream = next_upstream;
        node.next_downstream = next_downstream;
    }

    fn refresh(&mut self, touched: EventSet) {
        if touched.is_inbound() {
            self.recompute_upstream();
        }
        if touched.is_outbound() {
            self.recompute_downstream();
        }
    }

    fn recompute_upstream(&mut self) {
        let mut next_inbound = None;
        let mut cursor = self.tail;
        while let Some(id) = cursor {
            let node = self.node_mut(id);
            node.next_upstream = next_inbound;
            if node.ctx.events().is_inbound() {
                next_inbound = Some(id);
            }
            cursor = node.prev;
        }
        self.upstream_head = next_inbound;
    }

    fn recompute_downstream(&mut self) {
        let mut prev_outbound = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let node = self.node_mut(id);
            node.next_downstream = prev_outbound;
            if node.ctx.events().is_outbound() {
                prev_outbound = Some(id);
            }
            cursor = node.next;
        }
        self.downstream_head = prev_outbound;
    }

    /// The first context from `from` (towards the tail) that handles `kind`.
    pub(crate) fn find_inbound(&self, from: Cursor, kind: EventKind) -> Option<Arc<ChannelHandlerContext>> {
        let mut cursor = match from {
            Cursor::Start => self.upstream_head,
            Cursor::After(id) => self.nodes.get(&id)?.next_upstream,
            Cursor::At(id) => {
                let node = self.nodes.get(&id)?;
                if node.ctx.events().is_inbound() { Some(id) } else { node.next_upstream }
            }
        };
        while let Some(id) = cursor {
            let node = self.nodes.get(&id)?;
            if node.ctx.events().handles(kind) {
                return Some(Arc::clone(&node.ctx));
            }
            cursor = node.next_upstream;
        }
        None
    }

    /// The first context from `from` (towards the head) that handles `kind`.
    pub(crate) fn find_outbound(&self, from: Cursor, kind: EventKind) -> Option<Arc<ChannelHandlerContext>> {
        let mut cursor = match from {
            Cursor::Start => self.downstream_head,
            Cursor::After(id) => self.nodes.get(&id)?.next_downstream,
            Cursor::At(id) => {
                let node = self.nodes.get(&id)?;
                if node.ctx.events().is_outbound() { Some(id) } else { node.next_downstream }
            }
        };
        while let Some(id) = cursor {
            let node = self.nodes.get(&id)?;
            if node.ctx.events().handles(kind) {
                return Some(Arc::clone(&node.ctx));
            }
            cursor = node.next_downstream;
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn upstream_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = self.upstream_head;
        while let Some(id) = cursor {
            let node = &self.nodes[&id];
            names.push(node.ctx.name().to_owned());
            cursor = node.next_upstream;
        }
        names
    }

    #[cfg(test)]
    pub(crate) fn downstream_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = self.downstream_head;
        while let Some(id) = cursor {
            let node = &self.nodes[&id];
            names.push(node.ctx.name().to_owned());
            cursor = node.next_downstream;
        }
        names
    }
}
