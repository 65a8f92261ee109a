//! Tagged child slots.
//!
//! A freshly linked child is just a `(move, policy)` pair; most children
//! are never visited and never deserve a full node allocation. A slot is a
//! single atomic word that is either that compact pair (tag bit set) or an
//! owning pointer to an inflated [`UctNode`]. Inflation happens at most
//! once, via compare-exchange; losers drop their allocation and adopt the
//! winner's.

use std::sync::atomic::{AtomicU64, Ordering};

use tengen_core::{Color, Vertex};

use crate::config::SearchConfig;
use crate::node::{ExpandState, UctNode};

const COMPACT_TAG: u64 = 1;

/// One slot in a node's child vector.
pub struct UctNodePointer {
    data: AtomicU64,
}

// An inflated slot owns its node; the compact form is plain data. All
// mutation goes through atomics.
unsafe impl Send for UctNodePointer {}
unsafe impl Sync for UctNodePointer {}

#[inline]
fn encode(mv: Vertex, policy: f32) -> u64 {
    ((policy.to_bits() as u64) << 32) | (((mv as u16) as u64) << 16) | COMPACT_TAG
}

#[inline]
fn decode_move(data: u64) -> Vertex {
    ((data >> 16) & 0xFFFF) as u16 as i16
}

#[inline]
fn decode_policy(data: u64) -> f32 {
    f32::from_bits((data >> 32) as u32)
}

impl UctNodePointer {
    pub fn new(mv: Vertex, policy: f32) -> Self {
        Self {
            data: AtomicU64::new(encode(mv, policy)),
        }
    }

    #[inline]
    fn raw(&self) -> u64 {
        self.data.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_inflated(&self) -> bool {
        self.raw() & COMPACT_TAG == 0
    }

    /// The inflated node, if any.
    #[inline]
    pub fn node(&self) -> Option<&UctNode> {
        let data = self.raw();
        if data & COMPACT_TAG == 0 {
            // Safety: a cleared tag bit means `data` is the Box pointer we
            // (or a racing inflate) published; it stays valid until Drop.
            Some(unsafe { &*(data as *const UctNode) })
        } else {
            None
        }
    }

    /// Convert the compact pair into a full node; idempotent and safe to
    /// race. Returns the live node either way.
    pub fn inflate(&self) -> &UctNode {
        loop {
            let data = self.raw();
            if data & COMPACT_TAG == 0 {
                return unsafe { &*(data as *const UctNode) };
            }
            let boxed = Box::new(UctNode::new(decode_move(data), decode_policy(data)));
            let raw = Box::into_raw(boxed);
            debug_assert_eq!(raw as u64 & COMPACT_TAG, 0, "node allocation misaligned");
            match self.data.compare_exchange(
                data,
                raw as u64,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return unsafe { &*raw },
                Err(_) => {
                    // Someone else inflated first; discard ours.
                    drop(unsafe { Box::from_raw(raw) });
                }
            }
        }
    }

    #[inline]
    pub fn mv(&self) -> Vertex {
        let data = self.raw();
        if data & COMPACT_TAG == 0 {
            unsafe { &*(data as *const UctNode) }.mv()
        } else {
            decode_move(data)
        }
    }

    #[inline]
    pub fn policy(&self) -> f32 {
        let data = self.raw();
        if data & COMPACT_TAG == 0 {
            unsafe { &*(data as *const UctNode) }.policy()
        } else {
            decode_policy(data)
        }
    }

    #[inline]
    pub fn visits(&self) -> u32 {
        self.node().map_or(0, |n| n.visits())
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.node().map_or(true, |n| n.valid())
    }

    #[inline]
    pub fn active(&self) -> bool {
        self.node().map_or(true, |n| n.active())
    }

    /// Whether another thread currently holds this child in EXPANDING.
    #[inline]
    pub fn is_expanding(&self) -> bool {
        self.node()
            .is_some_and(|n| n.expand_state() == ExpandState::Expanding)
    }

    #[inline]
    pub fn eval(&self, color: Color) -> f32 {
        self.node().map_or(0.0, |n| n.eval(color))
    }

    #[inline]
    pub fn raw_eval(&self, color: Color) -> f32 {
        self.node().map_or(0.0, |n| n.raw_eval(color, 0))
    }

    #[inline]
    pub fn eval_variance(&self, default_var: f32) -> f32 {
        self.node().map_or(default_var, |n| n.eval_variance(default_var))
    }

    #[inline]
    pub fn eval_lcb(&self, color: Color) -> f32 {
        self.node().map_or(-1e6, |n| n.eval_lcb(color))
    }

    /// PUCT denominator (1 for an unvisited compact slot).
    #[inline]
    pub fn denom(&self, cfg: &SearchConfig) -> u32 {
        self.node().map_or(1, |n| n.denom(cfg))
    }
}

impl Drop for UctNodePointer {
    fn drop(&mut self) {
        let data = *self.data.get_mut();
        if data & COMPACT_TAG == 0 && data != 0 {
            drop(unsafe { Box::from_raw(data as *mut UctNode) });
        }
    }
}

impl std::fmt::Debug for UctNodePointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UctNodePointer")
            .field("move", &self.mv())
            .field("policy", &self.policy())
            .field("inflated", &self.is_inflated())
            .finish()
    }
}
