use std::sync::Arc;

use crate::db::{Entry, Footprint};
use crate::Result;

// Node corresponds to a single entry in the tree.
pub struct Node<K, V> {
    pub entry: Arc<Entry<K, V>>,
    pub black: bool,                    // store: black or red
    pub left: Option<Arc<Node<K, V>>>,  // store: left child
    pub right: Option<Arc<Node<K, V>>>, // store: right child
}

impl<K, V> Node<K, V> {
    pub fn set(&mut self, value: V, seqno: u64)
    where
        K: Clone,
        V: Clone,
    {
        let mut entry = self.entry.as_ref().clone();
        entry.value = value;
        entry.seqno = seqno;
        self.entry = Arc::new(entry);
    }

    #[inline]
    pub fn set_red(&mut self) {
        self.black = false
    }

    #[inline]
    pub fn set_black(&mut self) {
        self.black = true
    }

    #[inline]
    pub fn toggle_link(&mut self) {
        self.black = !self.black
    }
}

impl<K, V> Node<K, V> {
    #[inline]
    pub fn as_left_ref(&self) -> Option<&Node<K, V>> {
        self.left.as_deref()
    }

    #[inline]
    pub fn as_right_ref(&self) -> Option<&Node<K, V>> {
        self.right.as_deref()
    }

    #[inline]
    pub fn is_black(&self) -> bool {
        self.black
    }

    pub fn as_key(&self) -> &K {
        self.entry.as_key()
    }

    pub fn to_seqno(&self) -> u64 {
        self.entry.to_seqno()
    }
}

impl<K, V> Footprint for Node<K, V>
where
    K: Footprint,
    V: Footprint,
{
    fn footprint(&self) -> Result<isize> {
        self.entry.footprint()
    }
}

impl<K, V> From<Entry<K, V>> for Node<K, V> {
    fn from(entry: Entry<K, V>) -> Node<K, V> {
        Node {
            entry: Arc::new(entry),
            black: false,
            left: None,
            right: None,
        }
    }
}

// Nodes share entries and children across snapshots, clone is shallow.
impl<K, V> Clone for Node<K, V> {
    fn clone(&self) -> Node<K, V> {
        Node {
            entry: Arc::clone(&self.entry),
            black: self.black,
            left: self.left.as_ref().map(Arc::clone),
            right: self.right.as_ref().map(Arc::clone),
        }
    }
}
