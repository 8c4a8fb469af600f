//! Liveness oracle: the explicit form of finalization.
//!
//! Values are registered together with a token. When the host drops the last
//! strong reference to a registered value, the next [`LivenessOracle::poll`]
//! yields its token exactly once. Nothing is promised about when that poll
//! happens or in which order collected tokens come out; callers treat the
//! result as an unordered stream of after-the-fact notices.

use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Weak,
};

use strum::Display;

use crate::{
    guest::GuestValue,
    value::{HostString, HostValue, WeakIdentity},
};

/// Which guest export a collection notice is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ReportChannel {
    Value,
    String,
}

/// Weak referent of a weak reference or a registration.
#[derive(Clone)]
pub(crate) enum WeakTarget {
    Value(WeakIdentity),
    String(Weak<str>),
}

impl WeakTarget {
    pub(crate) fn string(value: &HostString) -> Self {
        Self::String(std::rc::Rc::downgrade(value))
    }

    pub(crate) fn is_alive(&self) -> bool {
        match self {
            Self::Value(identity) => identity.is_alive(),
            Self::String(weak) => weak.strong_count() > 0,
        }
    }

    pub(crate) fn upgrade(&self) -> Option<HostValue> {
        match self {
            Self::Value(identity) => identity.upgrade(),
            Self::String(weak) => weak.upgrade().map(HostValue::String),
        }
    }
}

struct Watch {
    target: WeakTarget,
    token: GuestValue,
    channel: ReportChannel,
}

/// A collection notice.
#[derive(Debug, Clone)]
pub struct Collected {
    pub channel: ReportChannel,
    pub token: GuestValue,
}

/// Tracks registered values and reports their collection.
#[derive(Default)]
pub struct LivenessOracle {
    watched: RefCell<Vec<Watch>>,
    pending: RefCell<VecDeque<Collected>>,
}

impl LivenessOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, target: WeakTarget, token: GuestValue, channel: ReportChannel) {
        self.watched.borrow_mut().push(Watch { target, token, channel });
    }

    /// Moves every registration whose value is gone to the pending queue and
    /// drains it.
    pub fn poll(&self) -> Vec<Collected> {
        let watched = std::mem::take(&mut *self.watched.borrow_mut());
        let (dead, live): (Vec<_>, Vec<_>) = watched.into_iter().partition(|w| !w.target.is_alive());
        // registrations made while the old list was taken out are kept too
        self.watched.borrow_mut().extend(live);
        let mut pending = self.pending.borrow_mut();
        pending.extend(dead.into_iter().map(|w| Collected {
            channel: w.channel,
            token: w.token,
        }));
        pending.drain(..).collect()
    }

    /// Number of registrations not yet reported.
    #[must_use]
    pub fn watched(&self) -> usize {
        self.watched.borrow().len()
    }
}
