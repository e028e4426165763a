use super::NodeId;
use std::fmt;

/// Handle to a tree top in a `TreeTops` arena
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct TreeTopId(pub u32);

impl fmt::Display for TreeTopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tt{}", self.0)
    }
}

#[derive(Clone, Debug)]
struct TreeTop {
    node: NodeId,
    prev: Option<TreeTopId>,
    next: Option<TreeTopId>,
}

/// Doubly linked lists of tree tops
///
/// Each block owns the list running from its `BBStart` tree top to its `BBEnd` tree top. Tree
/// tops are never freed, only unlinked.
#[derive(Default, Debug)]
pub struct TreeTops {
    tops: Vec<TreeTop>,
}

impl TreeTops {
    pub fn new() -> TreeTops {
        TreeTops { tops: vec![] }
    }

    fn alloc(&mut self, node: NodeId) -> TreeTopId {
        let id = TreeTopId(self.tops.len() as u32);
        self.tops.push(TreeTop {
            node,
            prev: None,
            next: None,
        });
        id
    }

    fn top(&self, id: TreeTopId) -> &TreeTop {
        &self.tops[id.0 as usize]
    }

    fn top_mut(&mut self, id: TreeTopId) -> &mut TreeTop {
        &mut self.tops[id.0 as usize]
    }

    /// New two element list (used for the `BBStart`/`BBEnd` pair of a block)
    pub fn create_pair(&mut self, first: NodeId, last: NodeId) -> (TreeTopId, TreeTopId) {
        let first = self.alloc(first);
        let last = self.alloc(last);
        self.top_mut(first).next = Some(last);
        self.top_mut(last).prev = Some(first);
        (first, last)
    }

    pub fn node(&self, id: TreeTopId) -> NodeId {
        self.top(id).node
    }

    pub fn set_node(&mut self, id: TreeTopId, node: NodeId) {
        self.top_mut(id).node = node;
    }

    pub fn next(&self, id: TreeTopId) -> Option<TreeTopId> {
        self.top(id).next
    }

    pub fn prev(&self, id: TreeTopId) -> Option<TreeTopId> {
        self.top(id).prev
    }

    /// Insert a new tree top for `node` right before `anchor`
    pub fn insert_before(&mut self, anchor: TreeTopId, node: NodeId) -> TreeTopId {
        let id = self.alloc(node);
        let prev = self.top(anchor).prev;
        self.top_mut(id).prev = prev;
        self.top_mut(id).next = Some(anchor);
        self.top_mut(anchor).prev = Some(id);
        if let Some(prev) = prev {
            self.top_mut(prev).next = Some(id);
        }
        id
    }

    /// Insert a new tree top for `node` right after `anchor`
    pub fn insert_after(&mut self, anchor: TreeTopId, node: NodeId) -> TreeTopId {
        let id = self.alloc(node);
        let next = self.top(anchor).next;
        self.top_mut(id).next = next;
        self.top_mut(id).prev = Some(anchor);
        self.top_mut(anchor).next = Some(id);
        if let Some(next) = next {
            self.top_mut(next).prev = Some(id);
        }
        id
    }

    /// Detach the run `first..=last` and splice it back in right before `anchor`
    pub fn move_before(&mut self, first: TreeTopId, last: TreeTopId, anchor: TreeTopId) {
        let before = self.top(first).prev;
        let after = self.top(last).next;
        if let Some(before) = before {
            self.top_mut(before).next = after;
        }
        if let Some(after) = after {
            self.top_mut(after).prev = before;
        }

        let prev = self.top(anchor).prev;
        self.top_mut(first).prev = prev;
        self.top_mut(last).next = Some(anchor);
        self.top_mut(anchor).prev = Some(last);
        if let Some(prev) = prev {
            self.top_mut(prev).next = Some(first);
        }
    }

    /// Tree tops strictly between `first` and `last`
    pub fn between(&self, first: TreeTopId, last: TreeTopId) -> Vec<TreeTopId> {
        let mut ids = vec![];
        let mut current = self.next(first);
        while let Some(id) = current {
            if id == last {
                break;
            }
            ids.push(id);
            current = self.next(id);
        }
        ids
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insertion_and_moves() {
        let mut tops = TreeTops::new();
        let (start, end) = tops.create_pair(NodeId(0), NodeId(1));
        let a = tops.insert_before(end, NodeId(2));
        let c = tops.insert_before(end, NodeId(4));
        let b = tops.insert_after(a, NodeId(3));
        assert_eq!(tops.between(start, end), vec![a, b, c]);

        let (start2, end2) = tops.create_pair(NodeId(5), NodeId(6));
        tops.move_before(b, c, end2);
        assert_eq!(tops.between(start, end), vec![a]);
        assert_eq!(tops.between(start2, end2), vec![b, c]);
        assert_eq!(tops.next(a), Some(end));
        assert_eq!(tops.prev(b), Some(start2));
    }
}
