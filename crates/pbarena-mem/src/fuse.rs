//! Concurrent union-find over arena lifetime nodes.
//!
//! Every arena starts as the root of its own group with one reference.
//! Fusing two arenas points one group's root at the other's and moves its
//! references across; releasing the last reference to a root tears down
//! every member of the group. All transitions are compare-and-swap on the
//! lifetime words, so unrelated groups never contend.
//!
//! # Invariants
//!
//! - Exactly one member of a group holds `Root(count)`; every other member
//!   reaches it by following `Parent` links.
//! - A node only ever becomes the child of a root with a lower
//!   [`ArenaId`]. Ids never change, so parent chains
//!   are acyclic no matter how fuses interleave.
//! - A root's count never drops to zero while a fuse is in flight: the
//!   fusing thread holds references to both sides.

use std::ptr::NonNull;

use pbarena_core::ArenaId;
use smallvec::SmallVec;

use crate::node::ArenaInner;
use crate::sync::{spin_hint, Ordering};
use crate::tagged::{LifetimeNode, NodeState, MAX_REFS};

/// A root observed during a walk, with the count it held at that moment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Root {
    pub(crate) node: NonNull<ArenaInner>,
    pub(crate) refs: usize,
}

fn lifetime<'a>(node: NonNull<ArenaInner>) -> &'a LifetimeNode<ArenaInner> {
    // SAFETY: callers only pass nodes of groups they hold a reference to,
    // so the node outlives the returned borrow's actual use.
    unsafe { &(*node.as_ptr()).lifetime }
}

fn id_of(node: NonNull<ArenaInner>) -> ArenaId {
    // SAFETY: as for `lifetime`; the id is immutable.
    unsafe { (*node.as_ptr()).id }
}

/// Find the current root of `start`'s group, compressing the path walked.
///
/// Every visited non-root node is repointed at the discovered root. A
/// compression CAS that loses a race is dropped: the node has already been
/// moved by someone else and still leads to a root.
pub(crate) fn find_root(start: NonNull<ArenaInner>) -> Root {
    let mut path: SmallVec<[(NonNull<ArenaInner>, NonNull<ArenaInner>); 8]> = SmallVec::new();
    let mut current = start;
    loop {
        match lifetime(current).load() {
            NodeState::Root(refs) => {
                for &(node, parent) in &path {
                    if parent != current {
                        let _ = lifetime(node)
                            .compare_exchange(NodeState::Parent(parent), NodeState::Parent(current));
                    }
                }
                return Root {
                    node: current,
                    refs,
                };
            }
            NodeState::Parent(parent) => {
                path.push((current, parent));
                current = parent;
            }
        }
    }
}

/// Add one reference to the group containing `node`.
pub(crate) fn retain(node: NonNull<ArenaInner>) {
    loop {
        let root = find_root(node);
        if root.refs >= MAX_REFS {
            // Same policy as `Arc`: a leak this large cannot be unwound safely.
            std::process::abort();
        }
        if lifetime(root.node)
            .compare_exchange(NodeState::Root(root.refs), NodeState::Root(root.refs + 1))
            .is_ok()
        {
            return;
        }
        spin_hint();
    }
}

/// Drop one reference to the group containing `node`.
///
/// Returns `true` if this was the last reference and the group has been
/// torn down. `node` must not be used after that.
pub(crate) fn release(node: NonNull<ArenaInner>) -> bool {
    loop {
        let root = find_root(node);
        assert!(
            root.refs > 0,
            "released an arena group that was already torn down"
        );
        if root.refs == 1 {
            // We hold the only reference; nobody else can fuse or retain.
            // SAFETY: count reached zero with no other holders.
            unsafe { teardown(root.node) };
            return true;
        }
        if lifetime(root.node)
            .compare_exchange(NodeState::Root(root.refs), NodeState::Root(root.refs - 1))
            .is_ok()
        {
            return false;
        }
        spin_hint();
    }
}

/// Merge the groups of `a` and `b`. A no-op if they already share a root.
pub(crate) fn fuse(a: NonNull<ArenaInner>, b: NonNull<ArenaInner>) {
    if a == b {
        return;
    }
    // References added to a would-be parent whose child then slipped away.
    // They stay in whatever group that parent ends up in, which is the
    // fused group, and are subtracted from its root once the fuse lands.
    let mut excess = 0;
    loop {
        if let Some(root) = try_fuse(a, b, &mut excess) {
            if remove_excess(root, excess) {
                return;
            }
        }
        spin_hint();
    }
}

fn try_fuse(
    a: NonNull<ArenaInner>,
    b: NonNull<ArenaInner>,
    excess: &mut usize,
) -> Option<NonNull<ArenaInner>> {
    let mut parent = find_root(a);
    let mut child = find_root(b);
    if parent.node == child.node {
        return Some(parent.node);
    }
    if id_of(parent.node) > id_of(child.node) {
        std::mem::swap(&mut parent, &mut child);
    }

    // Give the parent the child's references before the child is linked,
    // so releases racing in through the child can never underflow it.
    let combined = parent.refs + child.refs;
    if combined > MAX_REFS {
        std::process::abort();
    }
    lifetime(parent.node)
        .compare_exchange(NodeState::Root(parent.refs), NodeState::Root(combined))
        .ok()?;

    // Only link the child if its count is unchanged since we read it.
    if lifetime(child.node)
        .compare_exchange(NodeState::Root(child.refs), NodeState::Parent(parent.node))
        .is_err()
    {
        *excess += child.refs;
        return None;
    }

    append_members(parent.node, child.node);
    tracing::debug!(
        parent = %id_of(parent.node),
        child = %id_of(child.node),
        refs = child.refs,
        "fused arena groups"
    );
    Some(parent.node)
}

fn remove_excess(root: NonNull<ArenaInner>, excess: usize) -> bool {
    if excess == 0 {
        return true;
    }
    match lifetime(root).load() {
        NodeState::Parent(_) => false,
        NodeState::Root(refs) => {
            assert!(refs > excess, "fuse excess exceeds the group's live count");
            lifetime(root)
                .compare_exchange(NodeState::Root(refs), NodeState::Root(refs - excess))
                .is_ok()
        }
    }
}

/// Splice the member list headed by `child` onto the end of `parent`'s.
///
/// Concurrent appends to the same tail are resolved by swapping: whatever
/// suffix we displace is re-appended after our own.
fn append_members(parent: NonNull<ArenaInner>, child: NonNull<ArenaInner>) {
    // SAFETY: both nodes belong to groups we hold references to.
    let parent_ref = unsafe { parent.as_ref() };
    let mut tail = parent_ref.tail.load(Ordering::Acquire);
    let mut pending = child.as_ptr();
    while !pending.is_null() {
        // The hint may be stale; walk to the real end.
        loop {
            // SAFETY: list members live as long as the group.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            tail = next;
        }
        // SAFETY: as above.
        let displaced = unsafe { (*tail).next.swap(pending, Ordering::AcqRel) };
        // SAFETY: `pending` is a live member of the group being spliced.
        tail = unsafe { (*pending).tail.load(Ordering::Acquire) };
        pending = displaced;
    }
    parent_ref.tail.store(tail, Ordering::Release);
}

/// Members of the group rooted at `root`, root first.
fn members(root: NonNull<ArenaInner>) -> SmallVec<[NonNull<ArenaInner>; 8]> {
    let mut out = SmallVec::new();
    let mut current = root.as_ptr();
    while let Some(node) = NonNull::new(current) {
        out.push(node);
        // SAFETY: members are freed only after this walk completes.
        current = unsafe { node.as_ref() }.next.load(Ordering::Acquire);
    }
    out
}

/// Run every member's cleanups, then free every member's blocks.
///
/// # Safety
///
/// `root` must be the root of a group whose last reference was just
/// dropped by the calling thread.
unsafe fn teardown(root: NonNull<ArenaInner>) {
    // SAFETY: no other thread holds a reference to any member.
    let root_ref = unsafe { root.as_ref() };
    if root_ref.next.load(Ordering::Acquire).is_null() {
        // Never fused: skip the member walk.
        // SAFETY: sole owner; cleanups run before blocks are released.
        unsafe {
            (*root_ref.cleanups.get()).run();
            ArenaInner::destroy(root);
        }
        return;
    }

    let group = members(root);
    let mut cleanups = 0;
    let mut blocks = 0;
    for member in &group {
        // SAFETY: sole owner of every member.
        unsafe {
            cleanups += (*member.as_ref().cleanups.get()).run();
            blocks += (*member.as_ref().store.get()).block_count();
        }
    }
    tracing::debug!(
        root = %root_ref.id,
        members = group.len(),
        cleanups,
        blocks,
        "tearing down fused arena group"
    );
    for member in group {
        // SAFETY: cleanups for every member have run; nothing refers to the
        // members any more.
        unsafe { ArenaInner::destroy(member) };
    }
}

/// Whether `a` and `b` currently share a root.
///
/// Stable once true: there is no unfuse.
pub(crate) fn same_group(a: NonNull<ArenaInner>, b: NonNull<ArenaInner>) -> bool {
    loop {
        let ra = find_root(a);
        let rb = find_root(b);
        if ra.node == rb.node {
            return true;
        }
        // `a`'s root may have been fused away between the two walks.
        if matches!(lifetime(ra.node).load(), NodeState::Root(_)) {
            return false;
        }
        spin_hint();
    }
}

#[cfg(test)]
pub(crate) fn member_count(node: NonNull<ArenaInner>) -> usize {
    members(find_root(node).node).len()
}

#[cfg(test)]
pub(crate) fn is_root(node: NonNull<ArenaInner>) -> bool {
    matches!(lifetime(node).load(), NodeState::Root(_))
}

#[cfg(test)]
pub(crate) fn parent_of(node: NonNull<ArenaInner>) -> Option<NonNull<ArenaInner>> {
    match lifetime(node).load() {
        NodeState::Parent(parent) => Some(parent),
        NodeState::Root(_) => None,
    }
}

// Parent pointers need bit 0 free for the count tag.
const _: () = assert!(std::mem::align_of::<ArenaInner>() >= 2);
