//! Shared-storage key constants.

/// Storage keys used by the handshake.
///
/// None of these live under an auth-storage prefix, so clearing auth
/// storage on logout leaves them in place.
pub struct StorageKeys;

impl StorageKeys {
    /// Prefix shared by the handshake's own bookkeeping keys
    pub const PREFIX: &'static str = "pett-login:";

    /// Parent-side reset sequence, incremented on every logout
    pub const RESET_SEQ: &'static str = "pett-login:reset-seq";

    /// Parent-side flag: the next popup must drop its identity session
    pub const FORCE_LOGOUT_PENDING: &'static str = "pett-login:force-logout";

    /// Popup-side: last reset sequence that already forced an identity logout
    pub const HANDLED_RESET_SEQ: &'static str = "pett-login:handled-reset-seq";

    /// Identity provider session kept by the in-memory provider
    pub const IDENTITY_SESSION: &'static str = "privy:token";

    /// True for the handshake's bookkeeping keys, which never hold credentials.
    pub fn is_handshake_key(key: &str) -> bool {
        key.starts_with(Self::PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bookkeeping_keys_share_prefix() {
        assert!(StorageKeys::is_handshake_key(StorageKeys::RESET_SEQ));
        assert!(StorageKeys::is_handshake_key(StorageKeys::FORCE_LOGOUT_PENDING));
        assert!(StorageKeys::is_handshake_key(StorageKeys::HANDLED_RESET_SEQ));
        assert!(!StorageKeys::is_handshake_key(StorageKeys::IDENTITY_SESSION));
    }
}
