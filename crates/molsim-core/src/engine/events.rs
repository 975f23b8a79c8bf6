use crate::core::models::entity::EntityRecord;
use std::any::Any;
use std::fmt;
use tracing::trace;

/// Which index space an index event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexSpace {
    /// Allocator-issued indices shared by every entity.
    Global,
    /// Dense leaf indices, `0..leaf_count`.
    Leaf,
}

/// A change to the entity population or its index spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The entity was attached and holds its indices.
    EntityAdded(EntityRecord),
    /// The entity is about to be deleted; the record still carries its indices.
    EntityRemoved(EntityRecord),
    /// The entity moved from `old_index` to the index carried in its record.
    IndexChanged {
        entity: EntityRecord,
        old_index: usize,
        space: IndexSpace,
    },
    /// Every index in `space` is now below `bound`, or soon will be when the
    /// event announces a preallocation.
    BoundChanged { space: IndexSpace, bound: usize },
}

/// Receives lifecycle events in registration order.
///
/// Listeners get the event by shared reference and have no access to the
/// system that fired it, so they cannot mutate the tree mid-dispatch.
pub trait LifecycleListener: 'static {
    fn on_event(&mut self, event: &LifecycleEvent);
}

/// Adapts a closure into a [`LifecycleListener`].
pub struct FnListener<G>(G);

impl<G> FnListener<G>
where
    G: FnMut(&LifecycleEvent) + 'static,
{
    pub fn new(callback: G) -> Self {
        Self(callback)
    }
}

impl<G> LifecycleListener for FnListener<G>
where
    G: FnMut(&LifecycleEvent) + 'static,
{
    fn on_event(&mut self, event: &LifecycleEvent) {
        (self.0)(event)
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

trait ErasedListener {
    fn dispatch(&mut self, event: &LifecycleEvent);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<L: LifecycleListener> ErasedListener for L {
    fn dispatch(&mut self, event: &LifecycleEvent) {
        self.on_event(event)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Ordered list of listeners owned by the entity system.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(ListenerId, Box<dyn ErasedListener>)>,
    next_id: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field(
                "listeners",
                &self.listeners.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn subscribe<L: LifecycleListener>(&mut self, listener: L) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn subscribe_fn<G>(&mut self, callback: G) -> ListenerId
    where
        G: FnMut(&LifecycleEvent) + 'static,
    {
        self.subscribe(FnListener::new(callback))
    }

    /// Drops the listener. Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        match self.position(id) {
            Some(position) => {
                self.listeners.remove(position);
                true
            }
            None => false,
        }
    }

    /// Detaches the listener and hands it back, if it has type `L`.
    ///
    /// A listener of another type stays subscribed.
    pub fn take<L: LifecycleListener>(&mut self, id: ListenerId) -> Option<L> {
        let position = self.position(id)?;
        if !self.listeners[position].1.as_any().is::<L>() {
            return None;
        }
        let (_, listener) = self.listeners.remove(position);
        listener.into_any().downcast::<L>().ok().map(|boxed| *boxed)
    }

    pub fn get<L: LifecycleListener>(&self, id: ListenerId) -> Option<&L> {
        let position = self.position(id)?;
        self.listeners[position].1.as_any().downcast_ref::<L>()
    }

    pub fn get_mut<L: LifecycleListener>(&mut self, id: ListenerId) -> Option<&mut L> {
        let position = self.position(id)?;
        self.listeners[position].1.as_any_mut().downcast_mut::<L>()
    }

    /// Delivers `event` to every listener, in registration order.
    pub fn fire(&mut self, event: &LifecycleEvent) {
        trace!(?event, listeners = self.listeners.len(), "dispatching");
        for (_, listener) in self.listeners.iter_mut() {
            listener.dispatch(event);
        }
    }

    fn position(&self, id: ListenerId) -> Option<usize> {
        self.listeners.iter().position(|(candidate, _)| *candidate == id)
    }
}
