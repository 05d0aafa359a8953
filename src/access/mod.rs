//! Access-determination policy: who gets the paid chat feature.
//! Keep the public surface thin and split implementation across sub-modules.

mod browser;
mod decision;
mod entitlements;
mod flags;
mod session;

pub use browser::{is_restrictive_in_app_browser, is_short_video_browser};
pub use decision::{check_user_access, AccessReason, AccessVerdict};
pub use entitlements::{EntitlementError, EntitlementLookup, EntitlementRecord, RestEntitlementLookup};
pub use flags::{
    clear_payment_flags, record_payment_success, FlagStore, LegacyFlags, MemoryFlagStore,
    PAID_EMAIL_KEY, PAYMENT_SUCCESS_KEY,
};
pub use session::{resolve_valid_session, Session, SessionProvider};

/// Navigation-visibility gate. Inside a restrictive in-app browser the
/// client-persisted flags cannot be trusted (storage may be partitioned or
/// forged), so the decision comes from the server-side re-check; in a normal
/// browser the local flag pair is consulted directly.
pub fn paid_nav_access<F: FlagStore + ?Sized>(
    flags: &F,
    restrictive_browser: bool,
    server_verdict: Option<&AccessVerdict>,
) -> bool {
    if restrictive_browser {
        return server_verdict.map(|v| v.has_access).unwrap_or(false);
    }
    LegacyFlags::read(flags).grants_guest_access()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restrictive_browser_defers_to_server_verdict() {
        let flags = MemoryFlagStore::new();
        record_payment_success(&flags, "a@x.com");

        // Local flags say yes, but in an untrusted context only the server
        // answer counts.
        assert!(!paid_nav_access(&flags, true, None));
        assert!(!paid_nav_access(&flags, true, Some(&AccessVerdict::denied())));
        let granted = AccessVerdict::paid("a@x.com".into(), "guest_paid");
        assert!(paid_nav_access(&flags, true, Some(&granted)));
    }

    #[test]
    fn normal_browser_trusts_local_flags() {
        let flags = MemoryFlagStore::new();
        assert!(!paid_nav_access(&flags, false, None));
        record_payment_success(&flags, "a@x.com");
        assert!(paid_nav_access(&flags, false, None));
    }
}
