//! Session Key Manager: the one in-memory slot for the derived key.
//!
//! Being authenticated (holding a backend token) and holding the key are
//! tracked separately. A restored token never implies a key, so a restart
//! always lands in [`SessionState::Authenticated`] at best.
//!
//! Transitions (login, unlock, lock, logout, invalidate) are serialized by
//! an async mutex. Every transition starts a new epoch and cancels the
//! previous one, so batch decrypts started under an old key are discarded
//! instead of being delivered into a signed-out view.
//!
//! With an idle timeout configured, every installed key gets a watcher task
//! that drops it from the slot once it has gone unused for the timeout.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use trustme_core::config::{SessionConfig, TrustmeConfig};
use trustme_core::types::{BatchCreatePasswordRequest, UpdatePasswordRequest};
use trustme_core::{TrustmeError, TrustmeResult};
use trustme_crypto::{
    filter_for_domain, CredentialRecord, CryptoEngine, DecryptedRecord, DerivedKey,
    Pbkdf2AesGcm, PlainCredential, PlainRecord, RecordChanges, Salt, SealedRecord,
};

use crate::credentials::{MasterCredential, SessionGrant};
use crate::token_store::{token_store_from_config, SessionToken, TokenStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No token, no key
    SignedOut,
    /// Backend session held, no key: the master password must be entered
    /// again before any record can be opened
    Authenticated,
    /// Token and key both held
    Unlocked,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SignedOut => "signed-out",
            Self::Authenticated => "authenticated",
            Self::Unlocked => "unlocked",
        })
    }
}

struct Slot {
    username: Option<String>,
    token: Option<SessionToken>,
    key: Option<Arc<DerivedKey>>,
    last_used: Instant,
    epoch: u64,
    cancel: CancellationToken,
}

impl Slot {
    fn new() -> Self {
        Self {
            username: None,
            token: None,
            key: None,
            last_used: Instant::now(),
            epoch: 0,
            cancel: CancellationToken::new(),
        }
    }

    fn idle_expired(&self, timeout: Option<Duration>) -> bool {
        self.key.is_some() && timeout.is_some_and(|t| self.last_used.elapsed() >= t)
    }

    fn state(&self, timeout: Option<Duration>) -> SessionState {
        if self.key.is_some() && !self.idle_expired(timeout) {
            SessionState::Unlocked
        } else if self.token.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::SignedOut
        }
    }

    /// New epoch; batches running under the old one are cancelled.
    fn advance(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }

    fn install_key(&mut self, key: DerivedKey) {
        self.advance();
        self.key = Some(Arc::new(key));
        self.last_used = Instant::now();
    }

    fn drop_key(&mut self) {
        self.advance();
        self.key = None;
    }

    fn clear(&mut self) {
        self.advance();
        self.key = None;
        self.token = None;
        self.username = None;
    }
}

/// A checked-out key and the epoch it belongs to.
struct Lease {
    key: Arc<DerivedKey>,
    epoch: u64,
    cancel: CancellationToken,
}

pub struct SessionKeyManager<E = Pbkdf2AesGcm> {
    engine: Arc<E>,
    tokens: Arc<dyn TokenStore>,
    idle_timeout: Option<Duration>,
    pool: Option<Arc<rayon::ThreadPool>>,
    slot: Arc<RwLock<Slot>>,
    transition: tokio::sync::Mutex<()>,
}

impl SessionKeyManager<Pbkdf2AesGcm> {
    /// Production scheme with the token store and pool size from config.
    pub fn from_config(config: &TrustmeConfig) -> TrustmeResult<Self> {
        config.validate()?;
        let tokens = token_store_from_config(&config.session)?;
        Self::new(Arc::new(Pbkdf2AesGcm::new()), tokens, &config.session)
            .with_decrypt_concurrency(config.crypto.decrypt_concurrency)
    }
}

impl<E: CryptoEngine + 'static> SessionKeyManager<E> {
    pub fn new(engine: Arc<E>, tokens: Arc<dyn TokenStore>, config: &SessionConfig) -> Self {
        Self {
            engine,
            tokens,
            idle_timeout: config.idle_timeout(),
            pool: None,
            slot: Arc::new(RwLock::new(Slot::new())),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Override the idle timeout (`None` = never expire).
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Decrypt batches on a dedicated pool of `threads` workers
    /// (0 = the global rayon pool).
    pub fn with_decrypt_concurrency(mut self, threads: usize) -> TrustmeResult<Self> {
        if threads == 0 {
            self.pool = None;
            return Ok(self);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("trustme-decrypt-{i}"))
            .build()
            .map_err(|e| TrustmeError::Config(format!("decrypt pool: {e}")))?;
        self.pool = Some(Arc::new(pool));
        Ok(self)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.read_slot().state(self.idle_timeout)
    }

    /// True only while a key is held and has not idled out.
    pub fn has_key(&self) -> bool {
        self.state() == SessionState::Unlocked
    }

    /// True while a backend token is held, with or without a key.
    pub fn is_authenticated(&self) -> bool {
        self.read_slot().token.is_some()
    }

    pub fn username(&self) -> Option<String> {
        self.read_slot().username.clone()
    }

    /// Run `f` with the raw session token, e.g. to build an
    /// `Authorization: Bearer` header.
    pub fn with_token<R>(&self, f: impl FnOnce(&str) -> R) -> Option<R> {
        self.read_slot().token.as_ref().map(|t| f(t.expose()))
    }

    /// Pick up a token persisted by an earlier process. Never yields a key.
    pub async fn restore(&self) -> TrustmeResult<SessionState> {
        let _transition = self.transition.lock().await;
        let current = self.state();
        if current != SessionState::SignedOut {
            return Ok(current);
        }

        let Some(persisted) = self.tokens.load()? else {
            tracing::debug!("no persisted session");
            return Ok(SessionState::SignedOut);
        };

        let mut slot = self.write_slot();
        slot.clear();
        tracing::info!(
            username = %persisted.username,
            "session restored, master password required"
        );
        slot.username = Some(persisted.username);
        slot.token = Some(persisted.token);
        Ok(SessionState::Authenticated)
    }

    /// Derive the key for `credential` and install it together with `token`.
    /// Any previous session is replaced in one step.
    ///
    /// Only the token is persisted. On failure nothing of the previous
    /// session survives.
    pub async fn login(
        &self,
        credential: MasterCredential,
        salt: &Salt,
        token: SessionToken,
    ) -> TrustmeResult<()> {
        let _transition = self.transition.lock().await;
        let MasterCredential {
            username,
            master_password,
        } = credential;

        let key = match self.derive(master_password, *salt).await {
            Ok(key) => key,
            Err(e) => {
                self.write_slot().clear();
                self.forget_persisted();
                tracing::warn!(username = %username, error = %e, "login failed, session cleared");
                return Err(e);
            }
        };

        if let Err(e) = self.tokens.save(&username, &token) {
            tracing::warn!(error = %e, "session token not persisted, session ends with the process");
        }

        let mut slot = self.write_slot();
        slot.install_key(key);
        slot.token = Some(token);
        tracing::info!(username = %username, epoch = slot.epoch, "logged in");
        slot.username = Some(username);
        self.watch_idle(&slot);
        Ok(())
    }

    /// `login` from the backend's login or 2FA-verify response.
    pub async fn login_with_grant(
        &self,
        username: impl Into<String>,
        master_password: SecretString,
        grant: SessionGrant,
    ) -> TrustmeResult<()> {
        let SessionGrant { token, salt } = grant;
        self.login(MasterCredential::new(username, master_password), &salt, token)
            .await
    }

    /// Re-enter the master password for a session that is authenticated
    /// but holds no key (after restart, lock, or idle timeout).
    pub async fn unlock(&self, master_password: SecretString, salt: &Salt) -> TrustmeResult<()> {
        let _transition = self.transition.lock().await;
        if !self.is_authenticated() {
            return Err(TrustmeError::invalid_input(
                "no authenticated session to unlock, log in instead",
            ));
        }

        match self.derive(master_password, *salt).await {
            Ok(key) => {
                let mut slot = self.write_slot();
                slot.install_key(key);
                tracing::info!(epoch = slot.epoch, "session unlocked");
                self.watch_idle(&slot);
                Ok(())
            }
            Err(e) => {
                let mut slot = self.write_slot();
                if slot.key.is_some() {
                    slot.drop_key();
                }
                tracing::warn!(error = %e, "unlock failed");
                Err(e)
            }
        }
    }

    /// Drop the key, keep the backend session.
    pub async fn lock(&self) {
        let _transition = self.transition.lock().await;
        let mut slot = self.write_slot();
        if slot.key.is_some() {
            slot.drop_key();
            tracing::info!("session locked");
        }
    }

    pub async fn logout(&self) {
        let _transition = self.transition.lock().await;
        self.write_slot().clear();
        self.forget_persisted();
        tracing::info!("logged out");
    }

    /// The backend rejected the token. Same effect as [`Self::logout`].
    pub async fn session_invalidated(&self) {
        let _transition = self.transition.lock().await;
        self.write_slot().clear();
        self.forget_persisted();
        tracing::warn!("session rejected by backend, signed out");
    }

    /// The current key. Touching it resets the idle clock; an idled-out
    /// key is dropped here. The returned `Arc` must not outlive the call
    /// that needed it.
    pub(crate) fn key(&self) -> TrustmeResult<Arc<DerivedKey>> {
        self.checkout().map(|lease| lease.key)
    }

    fn checkout(&self) -> TrustmeResult<Lease> {
        let mut slot = self.write_slot();
        if slot.idle_expired(self.idle_timeout) {
            slot.drop_key();
            tracing::info!("idle timeout reached, key dropped");
            return Err(TrustmeError::KeyUnavailable);
        }
        let key = slot.key.clone().ok_or(TrustmeError::KeyUnavailable)?;
        slot.last_used = Instant::now();
        Ok(Lease {
            key,
            epoch: slot.epoch,
            cancel: slot.cancel.clone(),
        })
    }

    pub fn encrypt_record(&self, record: &PlainRecord) -> TrustmeResult<SealedRecord> {
        let key = self.key()?;
        self.engine.encrypt_record(record, &key)
    }

    pub fn seal_changes(&self, changes: &RecordChanges) -> TrustmeResult<UpdatePasswordRequest> {
        let key = self.key()?;
        self.engine.seal_changes(changes, &key)
    }

    pub fn seal_batch(&self, records: &[PlainRecord]) -> TrustmeResult<BatchCreatePasswordRequest> {
        let key = self.key()?;
        self.engine.seal_batch(records, &key)
    }

    pub fn decrypt_record(&self, record: &CredentialRecord) -> TrustmeResult<PlainCredential> {
        let key = self.key()?;
        self.engine.decrypt_record(record, &key)
    }

    pub async fn decrypt_all(
        &self,
        records: Vec<CredentialRecord>,
    ) -> TrustmeResult<Vec<DecryptedRecord>> {
        self.decrypt_all_cancellable(records, CancellationToken::new())
            .await
    }

    /// Decrypt a fetched list off the async runtime.
    ///
    /// Returns `Cancelled` if `cancel` fires first, and `KeyUnavailable` if
    /// the session moved on (logout, lock, re-login) before the batch
    /// finished. Individual bad records come back as
    /// [`DecryptedRecord::Failed`].
    ///
    /// An abandoned batch keeps running on its blocking thread and releases
    /// its reference to the key when it ends; its results are never returned.
    pub async fn decrypt_all_cancellable(
        &self,
        records: Vec<CredentialRecord>,
        cancel: CancellationToken,
    ) -> TrustmeResult<Vec<DecryptedRecord>> {
        let lease = self.checkout()?;
        let count = records.len();
        let engine = Arc::clone(&self.engine);
        let pool = self.pool.clone();
        let key = Arc::clone(&lease.key);

        let task = tokio::task::spawn_blocking(move || match pool {
            Some(pool) => pool.install(|| engine.decrypt_records(&records, &key)),
            None => engine.decrypt_records(&records, &key),
        });

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(records = count, "batch decrypt abandoned by caller");
                return Err(TrustmeError::Cancelled);
            }
            _ = lease.cancel.cancelled() => {
                tracing::info!(records = count, "session changed during batch decrypt, results discarded");
                return Err(TrustmeError::KeyUnavailable);
            }
            joined = task => joined
                .map_err(|e| anyhow::anyhow!("decrypt task failed: {e}"))?,
        };

        if self.read_slot().epoch != lease.epoch {
            tracing::info!(records = count, "session changed during batch decrypt, results discarded");
            return Err(TrustmeError::KeyUnavailable);
        }
        Ok(opened)
    }

    /// Decrypt only the records that belong to `page_url`.
    pub async fn decrypt_for_page(
        &self,
        records: &[CredentialRecord],
        page_url: &str,
    ) -> TrustmeResult<Vec<DecryptedRecord>> {
        let matching: Vec<CredentialRecord> = filter_for_domain(records, page_url)
            .into_iter()
            .cloned()
            .collect();
        tracing::debug!(matching = matching.len(), total = records.len(), "autofill candidates");
        self.decrypt_all(matching).await
    }

    async fn derive(&self, master_password: SecretString, salt: Salt) -> TrustmeResult<DerivedKey> {
        let engine = Arc::clone(&self.engine);
        let started = Instant::now();
        let key = tokio::task::spawn_blocking(move || engine.derive_key(&master_password, &salt))
            .await
            .map_err(|e| anyhow::anyhow!("key derivation task failed: {e}"))??;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "derived session key"
        );
        Ok(key)
    }

    /// Spawn the idle watcher for the key just installed in `slot`.
    ///
    /// The watcher sleeps until `last_used + timeout`, re-reading `last_used`
    /// on every wake since checkouts push it forward. It exits when the epoch
    /// it was armed for ends or the manager is dropped.
    fn watch_idle(&self, slot: &Slot) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime, idle key is only dropped on next use");
            return;
        };
        let weak: Weak<RwLock<Slot>> = Arc::downgrade(&self.slot);
        let epoch = slot.epoch;
        let ended = slot.cancel.clone();

        runtime.spawn(async move {
            loop {
                let deadline = {
                    let Some(slot) = weak.upgrade() else { return };
                    let slot = slot.read().unwrap_or_else(PoisonError::into_inner);
                    if slot.epoch != epoch {
                        return;
                    }
                    slot.last_used + timeout
                };

                tokio::select! {
                    _ = ended.cancelled() => return,
                    _ = tokio::time::sleep_until(deadline.into()) => {}
                }

                let done = {
                    let Some(slot) = weak.upgrade() else { return };
                    let mut slot = slot.write().unwrap_or_else(PoisonError::into_inner);
                    if slot.epoch == epoch && slot.idle_expired(Some(timeout)) {
                        slot.drop_key();
                        tracing::info!("idle timeout reached, key dropped");
                    }
                    slot.epoch != epoch
                };
                if done {
                    return;
                }
            }
        });
    }

    fn forget_persisted(&self) {
        if let Err(e) = self.tokens.clear() {
            tracing::warn!(error = %e, "persisted session token not cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_store::MemoryTokenStore;
    use secrecy::ExposeSecret;
    use trustme_crypto::KdfParams;

    fn manager() -> SessionKeyManager {
        SessionKeyManager::new(
            Arc::new(Pbkdf2AesGcm::with_params(KdfParams { iterations: 1_000 })),
            Arc::new(MemoryTokenStore::new()),
            &SessionConfig::default(),
        )
    }

    fn credential() -> MasterCredential {
        MasterCredential::new("alice", SecretString::from("CorrectHorse1!"))
    }

    #[tokio::test]
    async fn test_starts_signed_out() {
        let m = manager();
        assert_eq!(m.state(), SessionState::SignedOut);
        assert!(!m.has_key());
        assert!(matches!(m.key(), Err(TrustmeError::KeyUnavailable)));
        assert!(m.with_token(str::len).is_none());
    }

    #[tokio::test]
    async fn test_login_holds_key_and_token() {
        let m = manager();
        m.login(credential(), &Salt::generate(), SessionToken::new("tok"))
            .await
            .unwrap();

        assert_eq!(m.state(), SessionState::Unlocked);
        assert_eq!(m.username().as_deref(), Some("alice"));
        assert_eq!(m.with_token(str::to_string).as_deref(), Some("tok"));
        assert!(m.key().is_ok());
    }

    #[tokio::test]
    async fn test_failed_login_clears_previous_session() {
        let m = manager();
        m.login(credential(), &Salt::generate(), SessionToken::new("tok"))
            .await
            .unwrap();

        let empty = MasterCredential::new("alice", SecretString::from(""));
        let err = m
            .login(empty, &Salt::generate(), SessionToken::new("tok-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrustmeError::InvalidInput(_)));
        assert_eq!(m.state(), SessionState::SignedOut);
        assert!(m.tokens.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relogin_replaces_key() {
        let m = manager();
        m.login(credential(), &Salt::from_bytes([1; 16]), SessionToken::new("a"))
            .await
            .unwrap();
        let first = m.key().unwrap();
        m.login(credential(), &Salt::from_bytes([2; 16]), SessionToken::new("b"))
            .await
            .unwrap();
        let second = m.key().unwrap();
        assert_ne!(first.as_bytes(), second.as_bytes());
        assert_eq!(m.with_token(str::to_string).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_lock_keeps_session() {
        let m = manager();
        let salt = Salt::generate();
        m.login(credential(), &salt, SessionToken::new("tok")).await.unwrap();
        m.lock().await;

        assert_eq!(m.state(), SessionState::Authenticated);
        assert!(m.is_authenticated());
        assert!(matches!(m.key(), Err(TrustmeError::KeyUnavailable)));

        m.unlock(SecretString::from("CorrectHorse1!"), &salt).await.unwrap();
        assert!(m.has_key());
    }

    #[tokio::test]
    async fn test_unlock_requires_session() {
        let m = manager();
        let err = m
            .unlock(SecretString::from("CorrectHorse1!"), &Salt::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, TrustmeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_record_ops_need_key() {
        let m = manager();
        let record = PlainRecord::new("https://example.com", "alice", "pw");
        assert!(matches!(m.encrypt_record(&record), Err(TrustmeError::KeyUnavailable)));

        m.login(credential(), &Salt::generate(), SessionToken::new("tok"))
            .await
            .unwrap();
        let stored = m.encrypt_record(&record).unwrap().with_id(1);
        let plain = m.decrypt_record(&stored).unwrap();
        assert_eq!(plain.password.expose_secret(), "pw");

        m.logout().await;
        assert!(matches!(m.decrypt_record(&stored), Err(TrustmeError::KeyUnavailable)));
    }

    #[tokio::test]
    async fn test_idle_timeout_drops_key() {
        let m = manager().with_idle_timeout(Some(Duration::from_millis(50)));
        m.login(credential(), &Salt::generate(), SessionToken::new("tok"))
            .await
            .unwrap();
        assert!(m.key().is_ok());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(m.state(), SessionState::Authenticated);
        assert!(matches!(m.key(), Err(TrustmeError::KeyUnavailable)));
        assert!(m.is_authenticated());
    }

    #[tokio::test]
    async fn test_idle_key_released_without_access() {
        let m = manager().with_idle_timeout(Some(Duration::from_millis(20)));
        m.login(credential(), &Salt::generate(), SessionToken::new("tok"))
            .await
            .unwrap();
        assert!(m.read_slot().key.is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(m.read_slot().key.is_none());
        assert!(m.is_authenticated());
    }

    #[tokio::test]
    async fn test_use_pushes_idle_deadline_back() {
        let m = manager().with_idle_timeout(Some(Duration::from_millis(120)));
        m.login(credential(), &Salt::generate(), SessionToken::new("tok"))
            .await
            .unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert!(m.key().is_ok());
        }
        assert!(m.read_slot().key.is_some());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(m.read_slot().key.is_none());
    }

    #[tokio::test]
    async fn test_dedicated_decrypt_pool() {
        let m = manager().with_decrypt_concurrency(2).unwrap();
        m.login(credential(), &Salt::generate(), SessionToken::new("tok"))
            .await
            .unwrap();
        let records: Vec<_> = (0..8)
            .map(|i| {
                m.encrypt_record(&PlainRecord::new("https://example.com", format!("u{i}"), "pw"))
                    .unwrap()
                    .with_id(i)
            })
            .collect();
        let opened = m.decrypt_all(records).await.unwrap();
        assert_eq!(opened.len(), 8);
        assert!(opened.iter().all(|r| !r.is_failed()));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Authenticated.to_string(), "authenticated");
    }
}
