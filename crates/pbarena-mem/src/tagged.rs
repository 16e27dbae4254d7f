//! The lifetime node: one atomic word per arena that is either a parent
//! pointer or, at a group root, the group's live-reference count.
//!
//! ```text
//! ...ppppppp0   Parent(ptr)   ptr is at least 2-aligned, so bit 0 is clear
//! ...ccccccc1   Root(count)   count << 1 | 1
//! ```
//!
//! The two states are only observed and changed through [`LifetimeNode`],
//! which exposes load and compare-and-swap on decoded [`NodeState`] values.

use std::fmt;
use std::ptr::NonNull;

use crate::sync::{AtomicUsize, Ordering};

const COUNT_TAG: usize = 1;

/// Largest representable reference count.
pub(crate) const MAX_REFS: usize = usize::MAX >> 1;

/// Decoded view of a lifetime word.
pub(crate) enum NodeState<T> {
    /// Not a root: points one step closer to the group root.
    Parent(NonNull<T>),
    /// Group root holding the number of live references to the group.
    Root(usize),
}

impl<T> NodeState<T> {
    fn encode(self) -> usize {
        match self {
            Self::Parent(ptr) => {
                let word = ptr.as_ptr() as usize;
                assert_eq!(word & COUNT_TAG, 0, "lifetime parent pointer is not 2-aligned");
                word
            }
            Self::Root(refs) => {
                assert!(refs <= MAX_REFS, "arena reference count overflow");
                (refs << 1) | COUNT_TAG
            }
        }
    }

    fn decode(word: usize) -> Self {
        if word & COUNT_TAG == COUNT_TAG {
            Self::Root(word >> 1)
        } else {
            match NonNull::new(word as *mut T) {
                Some(ptr) => Self::Parent(ptr),
                None => panic!("corrupt lifetime word: null parent pointer"),
            }
        }
    }
}

impl<T> Clone for NodeState<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeState<T> {}

impl<T> PartialEq for NodeState<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Parent(a), Self::Parent(b)) => a == b,
            (Self::Root(a), Self::Root(b)) => a == b,
            _ => false,
        }
    }
}

impl<T> Eq for NodeState<T> {}

impl<T> fmt::Debug for NodeState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parent(ptr) => f.debug_tuple("Parent").field(ptr).finish(),
            Self::Root(refs) => f.debug_tuple("Root").field(refs).finish(),
        }
    }
}

/// Atomic tagged word.
pub(crate) struct LifetimeNode<T> {
    word: AtomicUsize,
    _node: std::marker::PhantomData<*mut T>,
}

impl<T> LifetimeNode<T> {
    /// A fresh root holding `refs` references.
    pub(crate) fn root(refs: usize) -> Self {
        Self {
            word: AtomicUsize::new(NodeState::<T>::Root(refs).encode()),
            _node: std::marker::PhantomData,
        }
    }

    pub(crate) fn load(&self) -> NodeState<T> {
        NodeState::decode(self.word.load(Ordering::Acquire))
    }

    /// Replace `current` with `new` if the word still holds `current`.
    ///
    /// On failure returns the state actually observed.
    pub(crate) fn compare_exchange(
        &self,
        current: NodeState<T>,
        new: NodeState<T>,
    ) -> Result<(), NodeState<T>> {
        self.word
            .compare_exchange(
                current.encode(),
                new.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(NodeState::decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Dummy(#[allow(dead_code)] u64);

    #[test]
    fn root_round_trips() {
        let node = LifetimeNode::<Dummy>::root(7);
        assert_eq!(node.load(), NodeState::Root(7));
    }

    #[test]
    fn tags_are_distinguishable() {
        let target = Dummy(0);
        let ptr = NonNull::from(&target);
        assert_eq!(NodeState::Parent(ptr).encode() & COUNT_TAG, 0);
        assert_eq!(NodeState::<Dummy>::Root(0).encode() & COUNT_TAG, COUNT_TAG);
        assert_eq!(NodeState::<Dummy>::Root(1).encode(), 0b11);
    }

    #[test]
    fn cas_from_root_to_parent() {
        let target = Dummy(0);
        let ptr = NonNull::from(&target);
        let node = LifetimeNode::<Dummy>::root(1);
        node.compare_exchange(NodeState::Root(1), NodeState::Parent(ptr))
            .unwrap();
        assert_eq!(node.load(), NodeState::Parent(ptr));
    }

    #[test]
    fn failed_cas_reports_observed_state() {
        let node = LifetimeNode::<Dummy>::root(3);
        let err = node
            .compare_exchange(NodeState::Root(2), NodeState::Root(4))
            .unwrap_err();
        assert_eq!(err, NodeState::Root(3));
        assert_eq!(node.load(), NodeState::Root(3));
    }

    #[test]
    fn max_refs_encodes() {
        let node = LifetimeNode::<Dummy>::root(MAX_REFS);
        assert_eq!(node.load(), NodeState::Root(MAX_REFS));
    }

    #[test]
    #[should_panic(expected = "reference count overflow")]
    fn count_beyond_max_is_fatal() {
        let _ = NodeState::<Dummy>::Root(MAX_REFS + 1).encode();
    }

    #[test]
    #[should_panic(expected = "corrupt lifetime word")]
    fn null_parent_is_fatal() {
        let _ = NodeState::<Dummy>::decode(0);
    }
}
