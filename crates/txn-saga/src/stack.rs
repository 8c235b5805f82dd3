use std::sync::Arc;

use arc_swap::ArcSwapOption;

struct Node<T> {
    value: Arc<T>,
    next: Option<Arc<Node<T>>>,
    len: usize,
}

impl<T> Drop for Node<T> {
    // Unlink iteratively so long stacks do not recurse on drop.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// Lock-free LIFO stack of immutable snapshots.
///
/// Every push reads the current head, builds a new head node pointing at it
/// and publishes it with compare-and-swap, retrying when a concurrent push
/// won the race. Readers always see a consistent snapshot.
pub(crate) struct AtomicStack<T> {
    head: ArcSwapOption<Node<T>>,
}

impl<T> AtomicStack<T> {
    pub(crate) fn new() -> Self {
        Self {
            head: ArcSwapOption::empty(),
        }
    }

    pub(crate) fn push(&self, value: T) {
        self.push_shared(Arc::new(value));
    }

    pub(crate) fn push_shared(&self, value: Arc<T>) {
        self.head.rcu(|head| {
            Some(Arc::new(Node {
                value: Arc::clone(&value),
                next: head.clone(),
                len: head.as_ref().map_or(0, |node| node.len) + 1,
            }))
        });
    }

    /// Atomically take every entry, most recent first.
    pub(crate) fn drain(&self) -> Vec<Arc<T>> {
        collect(self.head.swap(None))
    }

    pub(crate) fn len(&self) -> usize {
        match &*self.head.load() {
            Some(node) => node.len,
            None => 0,
        }
    }
}

impl<T> Default for AtomicStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn collect<T>(mut cursor: Option<Arc<Node<T>>>) -> Vec<Arc<T>> {
    let mut values = Vec::with_capacity(cursor.as_ref().map_or(0, |node| node.len));
    while let Some(node) = cursor {
        values.push(Arc::clone(&node.value));
        cursor = node.next.clone();
    }
    values
}
