//! Identity hashes for host values.
//!
//! Values with identity (objects, functions, symbols) get a hash drawn from a
//! single xorshift32 sequence the first time they are hashed; the assignment
//! is cached in a weak map and stays stable for the value's lifetime.
//! Primitives hash directly.

use std::cell::{Cell, RefCell};

use ahash::AHashMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::value::{HostValue, WeakIdentity};

/// Seed of the hash sequence (Marsaglia's reference xorshift32 seed).
pub const DEFAULT_HASH_SEED: u32 = 2_463_534_242;

struct Assigned {
    target: WeakIdentity,
    hash: i32,
}

/// Lazily assigns stable 32-bit identity hashes.
pub struct IdentityHasher {
    state: Cell<u32>,
    assigned: RefCell<AHashMap<usize, Assigned>>,
}

impl Default for IdentityHasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_SEED)
    }
}

impl IdentityHasher {
    /// Creates a hasher. xorshift has a fixed point at zero, so a zero seed
    /// falls back to [`DEFAULT_HASH_SEED`].
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self {
            state: Cell::new(if seed == 0 { DEFAULT_HASH_SEED } else { seed }),
            assigned: RefCell::new(AHashMap::new()),
        }
    }

    /// Returns the identity hash of `value`.
    pub fn hash_code(&self, value: &HostValue) -> i32 {
        match value {
            HostValue::Number(n) => number_hash(*n),
            HostValue::BigInt(b) => bigint_hash(b),
            HostValue::Bool(b) => i32::from(*b),
            HostValue::Object(_) | HostValue::Symbol(_) => self.identity_hash(value),
            HostValue::Undefined | HostValue::Null | HostValue::String(_) => 0,
        }
    }

    fn identity_hash(&self, value: &HostValue) -> i32 {
        let Some((key, target)) = WeakIdentity::of(value) else {
            return 0;
        };
        let mut assigned = self.assigned.borrow_mut();
        if let Some(entry) = assigned.get(&key)
            && entry.target.is_alive()
        {
            return entry.hash;
        }
        let hash = self.next_hash();
        assigned.insert(key, Assigned { target, hash });
        hash
    }

    fn next_hash(&self) -> i32 {
        let mut x = self.state.get();
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state.set(x);
        i32::from_ne_bytes(x.to_ne_bytes())
    }

    /// Drops assignments whose value has been collected.
    pub fn sweep(&self) -> usize {
        let mut assigned = self.assigned.borrow_mut();
        let before = assigned.len();
        assigned.retain(|_, entry| entry.target.is_alive());
        before - assigned.len()
    }

    /// Number of cached assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assigned.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assigned.borrow().is_empty()
    }
}

/// 32-bit truncation with host `ToInt32` semantics.
#[must_use]
#[expect(clippy::cast_possible_truncation, reason = "value is reduced modulo 2^32 first")]
pub fn number_hash(n: f64) -> i32 {
    const TWO_32: f64 = 4_294_967_296.0;
    if !n.is_finite() {
        return 0;
    }
    let modulo = n.trunc().rem_euclid(TWO_32);
    let wrapped = if modulo >= TWO_32 / 2.0 { modulo - TWO_32 } else { modulo };
    wrapped as i32
}

/// Low 32 bits of the two's-complement representation.
#[must_use]
pub fn bigint_hash(value: &BigInt) -> i32 {
    let low = value & &BigInt::from(u32::MAX);
    let low = low.to_u32().unwrap_or_default();
    i32::from_ne_bytes(low.to_ne_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::HostObject;

    #[test]
    fn repeated_hashes_are_stable() {
        let hasher = IdentityHasher::default();
        let object = HostValue::Object(HostObject::new());
        let first = hasher.hash_code(&object);
        assert_eq!(hasher.hash_code(&object), first);
        assert_eq!(hasher.len(), 1);
    }

    #[test]
    fn sequence_advances_once_per_assignment() {
        let hasher = IdentityHasher::new(1);
        let a = HostValue::Object(HostObject::new());
        let b = HostValue::symbol(Some("b"));
        // xorshift32 from 1: 270369, then 67634689
        assert_eq!(hasher.hash_code(&a), 270_369);
        assert_eq!(hasher.hash_code(&a), 270_369);
        assert_eq!(hasher.hash_code(&b), 67_634_689);
    }

    #[test]
    fn primitives_hash_directly() {
        let hasher = IdentityHasher::default();
        assert_eq!(hasher.hash_code(&HostValue::Number(42.9)), 42);
        assert_eq!(hasher.hash_code(&HostValue::Number(-1.5)), -1);
        assert_eq!(hasher.hash_code(&HostValue::Number(4_294_967_297.0)), 1);
        assert_eq!(hasher.hash_code(&HostValue::Number(2_147_483_648.0)), i32::MIN);
        assert_eq!(hasher.hash_code(&HostValue::Number(f64::NAN)), 0);
        assert_eq!(hasher.hash_code(&HostValue::Bool(true)), 1);
        assert_eq!(hasher.hash_code(&HostValue::Bool(false)), 0);
        assert_eq!(hasher.hash_code(&HostValue::bigint(-1)), -1);
        assert_eq!(hasher.hash_code(&HostValue::bigint((1_i64 << 32) | 7)), 7);
        assert_eq!(hasher.hash_code(&HostValue::string("abc")), 0);
        assert_eq!(hasher.hash_code(&HostValue::Undefined), 0);
        assert!(hasher.is_empty());
    }

    #[test]
    fn sweep_drops_collected_assignments() {
        let hasher = IdentityHasher::default();
        let kept = HostValue::Object(HostObject::new());
        hasher.hash_code(&kept);
        hasher.hash_code(&HostValue::Object(HostObject::new()));
        assert_eq!(hasher.sweep(), 1);
        assert_eq!(hasher.len(), 1);
    }

    #[test]
    fn zero_seed_falls_back_to_default() {
        let zero = IdentityHasher::new(0);
        let default = IdentityHasher::default();
        let object = HostValue::Object(HostObject::new());
        assert_eq!(zero.hash_code(&object), default.hash_code(&object));
    }
}
