//! Legacy payment flags: two client-persisted markers recording a prior
//! successful guest checkout. The store is injected so the decision logic
//! stays pure; the flags are only ever set (payment success) or cleared
//! (sign-out), never updated in place.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Key holding the literal string "true" after a successful payment.
pub const PAYMENT_SUCCESS_KEY: &str = "paymentSuccess";
/// Key holding the email the payment was made under.
pub const PAID_EMAIL_KEY: &str = "paidUserEmail";

pub trait FlagStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn clear(&self, key: &str);
}

/// Snapshot of the legacy flag pair as read from a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyFlags {
    pub payment_success: Option<String>,
    pub paid_user_email: Option<String>,
}

impl LegacyFlags {
    pub fn read<F: FlagStore + ?Sized>(store: &F) -> Self {
        Self {
            payment_success: store.get(PAYMENT_SUCCESS_KEY),
            paid_user_email: store.get(PAID_EMAIL_KEY),
        }
    }

    /// The success marker must be the literal string "true"; anything else
    /// (absent, "1", "TRUE") does not count.
    pub fn marker_set(&self) -> bool {
        self.payment_success.as_deref() == Some("true")
    }

    /// Guest path: marker set and a non-empty stored email, no match required.
    pub fn grants_guest_access(&self) -> bool {
        self.marker_set() && self.paid_user_email.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Signed-in fallback path: marker set and the stored email equals the
    /// session email exactly.
    pub fn matches_email(&self, email: &str) -> bool {
        self.marker_set() && self.paid_user_email.as_deref() == Some(email)
    }
}

/// Written once by the payment-success handler.
pub fn record_payment_success<F: FlagStore + ?Sized>(store: &F, email: &str) {
    store.set(PAYMENT_SUCCESS_KEY, "true");
    store.set(PAID_EMAIL_KEY, email);
}

/// Cleared on sign-out.
pub fn clear_payment_flags<F: FlagStore + ?Sized>(store: &F) {
    store.clear(PAYMENT_SUCCESS_KEY);
    store.clear(PAID_EMAIL_KEY);
}

/// In-memory store used by tests and by embedders that manage persistence
/// themselves.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self { Self::default() }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.write().insert(key.to_string(), value.to_string());
    }

    fn clear(&self, key: &str) {
        self.entries.write().remove(key);
    }
}
