use std::sync::Arc;

use core_types::{
    AuthResponse, BackendApi, ClientError, ClientResult, Credentials, Session, SessionState,
    SessionStorage, TOKEN_SLOT, USER_SLOT, UserRecord,
};
use parking_lot::RwLock;
use tracing::{info, warn};

/// Holds the signed-in identity and mirrors it into two durable slots.
///
/// After every successful transition the persisted slots describe the same
/// session as memory: both present for `Authenticated`, both absent for
/// `Unauthenticated`.
pub struct SessionStore {
    api: Arc<dyn BackendApi>,
    storage: Arc<dyn SessionStorage>,
    state: RwLock<SessionState>,
}

impl SessionStore {
    /// Startup path. Never fails: unreadable or corrupt slots are cleared and
    /// the store starts signed out.
    pub fn restore(api: Arc<dyn BackendApi>, storage: Arc<dyn SessionStorage>) -> Self {
        let state = match load_persisted(storage.as_ref()) {
            Some(session) => {
                info!(user_id = %session.user.id, "restored persisted session");
                SessionState::Authenticated(session)
            }
            None => SessionState::Unauthenticated,
        };
        Self {
            api,
            storage,
            state: RwLock::new(state),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        self.state.read().token().map(str::to_string)
    }

    pub fn user(&self) -> Option<UserRecord> {
        self.state.read().user().cloned()
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<UserRecord> {
        let credentials = self.check_credentials(email, password)?;
        let response = self.api.login(&credentials).await?;
        self.establish(response, "login")
    }

    pub async fn signup(&self, email: &str, password: &str) -> ClientResult<UserRecord> {
        let credentials = self.check_credentials(email, password)?;
        let response = self.api.register(&credentials).await?;
        self.establish(response, "register")
    }

    /// Ends the session, explicit or forced. Returns whether one was active.
    pub fn logout(&self) -> bool {
        let previous = std::mem::take(&mut *self.state.write());
        clear_slots(self.storage.as_ref());
        match previous {
            SessionState::Authenticated(session) => {
                info!(user_id = %session.user.id, "session ended");
                true
            }
            SessionState::Unauthenticated => false,
        }
    }

    fn check_credentials(&self, email: &str, password: &str) -> ClientResult<Credentials> {
        if self.is_authenticated() {
            return Err(ClientError::validation("already signed in; log out first"));
        }
        let email = email.trim();
        if email.is_empty() {
            return Err(ClientError::validation("email is required"));
        }
        if password.is_empty() {
            return Err(ClientError::validation("password is required"));
        }
        Ok(Credentials::new(email, password))
    }

    fn establish(&self, response: AuthResponse, call: &str) -> ClientResult<UserRecord> {
        let token = response
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                ClientError::MalformedResponse(format!("{call} response has no access_token"))
            })?;
        let user = response.user;
        let user_json = serde_json::to_string(&user).map_err(ClientError::storage)?;

        let persisted = self
            .storage
            .set(TOKEN_SLOT, &token)
            .and_then(|()| self.storage.set(USER_SLOT, &user_json));
        if let Err(err) = persisted {
            warn!(error = %err, "failed to persist session");
            clear_slots(self.storage.as_ref());
            return Err(err);
        }

        *self.state.write() = SessionState::Authenticated(Session {
            user: user.clone(),
            token,
        });
        info!(user_id = %user.id, call, "session established");
        Ok(user)
    }
}

fn load_persisted(storage: &dyn SessionStorage) -> Option<Session> {
    let slots = storage
        .get(TOKEN_SLOT)
        .and_then(|token| Ok((token, storage.get(USER_SLOT)?)));
    let (token, user) = match slots {
        Ok(slots) => slots,
        Err(err) => {
            warn!(error = %err, "persisted session unreadable; clearing");
            clear_slots(storage);
            return None;
        }
    };

    match (token, user) {
        (None, None) => None,
        (Some(token), Some(raw_user)) if !token.trim().is_empty() => {
            match serde_json::from_str::<UserRecord>(&raw_user) {
                Ok(user) => Some(Session { user, token }),
                Err(err) => {
                    warn!(error = %err, "persisted user record is corrupt; clearing");
                    clear_slots(storage);
                    None
                }
            }
        }
        _ => {
            warn!("persisted session is incomplete; clearing");
            clear_slots(storage);
            None
        }
    }
}

fn clear_slots(storage: &dyn SessionStorage) {
    for slot in [TOKEN_SLOT, USER_SLOT] {
        if let Err(err) = storage.remove(slot) {
            warn!(slot, error = %err, "failed to clear persisted session slot");
        }
    }
}

#[cfg(test)]
mod tests {
    use core_types::testing::{Call, ScriptedBackend, auth_response};
    use secrets::{MemoryStorage, SecretStore};

    use super::*;

    fn store_with(
        backend: Arc<ScriptedBackend>,
        storage: Arc<dyn SessionStorage>,
    ) -> SessionStore {
        SessionStore::restore(backend, storage)
    }

    fn assert_persisted_matches(store: &SessionStore, storage: &dyn SessionStorage) {
        let token = storage.get(TOKEN_SLOT).expect("token slot");
        let user = storage
            .get(USER_SLOT)
            .expect("user slot")
            .map(|raw| serde_json::from_str::<UserRecord>(&raw).expect("user json"));
        assert_eq!(token, store.token());
        assert_eq!(user, store.user());
    }

    #[tokio::test]
    async fn login_persists_token_and_user() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_login(Ok(auth_response("u1", "a@b.c", "tok")));
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone(), storage.clone());

        let user = store.login(" a@b.c ", "secret1").await.expect("login");

        assert_eq!(user.id, "u1");
        assert!(store.is_authenticated());
        assert_persisted_matches(&store, &*storage);
        assert_eq!(
            backend.calls(),
            vec![Call::Login {
                email: "a@b.c".into()
            }]
        );
    }

    #[tokio::test]
    async fn login_logout_sequences_keep_storage_in_step() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_login(Ok(auth_response("u1", "a@b.c", "t1")))
            .push_register(Ok(auth_response("u2", "d@e.f", "t2")))
            .push_login(Err(ClientError::Http {
                status: 400,
                message: "Invalid credentials".into(),
            }));
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(backend, storage.clone());

        store.login("a@b.c", "pw").await.expect("login");
        assert_persisted_matches(&store, &*storage);
        assert!(store.logout());
        assert_persisted_matches(&store, &*storage);
        store.signup("d@e.f", "pw").await.expect("signup");
        assert_persisted_matches(&store, &*storage);
        assert!(store.logout());
        assert!(store.login("a@b.c", "bad").await.is_err());
        assert_persisted_matches(&store, &*storage);
        assert!(storage.snapshot().is_empty());
    }

    #[tokio::test]
    async fn failed_login_surfaces_error_unchanged() {
        let backend = Arc::new(ScriptedBackend::new());
        let failure = ClientError::Http {
            status: 400,
            message: "Registration failed".into(),
        };
        backend.push_register(Err(failure.clone()));
        let store = store_with(backend, Arc::new(MemoryStorage::new()));

        let err = store.signup("a@b.c", "pw").await.expect_err("must fail");
        assert_eq!(err, failure);
        assert_eq!(store.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn empty_credentials_never_reach_backend() {
        let backend = Arc::new(ScriptedBackend::new());
        let store = store_with(backend.clone(), Arc::new(MemoryStorage::new()));

        assert!(matches!(
            store.login("  ", "pw").await,
            Err(ClientError::Validation(_))
        ));
        assert!(matches!(
            store.signup("a@b.c", "").await,
            Err(ClientError::Validation(_))
        ));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn signup_without_token_is_malformed() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut response = auth_response("u1", "a@b.c", "");
        response.access_token = None;
        backend.push_register(Ok(response));
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(backend, storage.clone());

        let err = store.signup("a@b.c", "pw").await.expect_err("must fail");
        assert!(matches!(err, ClientError::MalformedResponse(_)));
        assert!(!store.is_authenticated());
        assert!(storage.snapshot().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_leaves_nothing_behind() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_login(Ok(auth_response("u1", "a@b.c", "tok")));
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_writes(true);
        let store = store_with(backend, storage.clone());

        let err = store.login("a@b.c", "pw").await.expect_err("must fail");
        assert!(matches!(err, ClientError::Storage(_)));
        assert!(!store.is_authenticated());
        assert!(storage.snapshot().is_empty());
    }

    #[tokio::test]
    async fn login_while_signed_in_is_rejected() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_login(Ok(auth_response("u1", "a@b.c", "tok")));
        let store = store_with(backend.clone(), Arc::new(MemoryStorage::new()));
        store.login("a@b.c", "pw").await.expect("login");

        assert!(matches!(
            store.login("a@b.c", "pw").await,
            Err(ClientError::Validation(_))
        ));
        assert_eq!(backend.call_count(), 1);
        assert_eq!(store.token().as_deref(), Some("tok"));
    }

    #[test]
    fn restores_session_from_slots() {
        let storage = Arc::new(MemoryStorage::with_entries([
            (TOKEN_SLOT, "tok"),
            (USER_SLOT, r#"{"id":"u1","email":"a@b.c"}"#),
        ]));
        let store = store_with(Arc::new(ScriptedBackend::new()), storage);

        assert_eq!(store.token().as_deref(), Some("tok"));
        assert_eq!(
            store.user().and_then(|user| user.email).as_deref(),
            Some("a@b.c")
        );
    }

    #[test]
    fn corrupt_user_slot_degrades_and_is_cleared() {
        let storage = Arc::new(MemoryStorage::with_entries([
            (TOKEN_SLOT, "tok"),
            (USER_SLOT, "{not json"),
        ]));
        let store = store_with(Arc::new(ScriptedBackend::new()), storage.clone());

        assert_eq!(store.state(), SessionState::Unauthenticated);
        assert!(storage.snapshot().is_empty());
    }

    #[test]
    fn half_written_session_is_cleared() {
        let storage = Arc::new(MemoryStorage::with_entries([(USER_SLOT, r#"{"id":"u1"}"#)]));
        let store = store_with(Arc::new(ScriptedBackend::new()), storage.clone());

        assert!(!store.is_authenticated());
        assert!(storage.snapshot().is_empty());
    }

    #[tokio::test]
    async fn unreadable_secret_file_does_not_block_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let secrets_file = dir.path().join("secrets.json");
        std::fs::write(&secrets_file, "garbage").expect("seed");
        let storage = Arc::new(SecretStore::new(dir.path()));
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_login(Ok(auth_response("u1", "a@b.c", "tok")));

        let store = store_with(backend, storage.clone());
        assert!(!store.is_authenticated());
        assert_ne!(
            std::fs::read_to_string(&secrets_file).ok().as_deref(),
            Some("garbage")
        );

        store.login("a@b.c", "pw").await.expect("login after recovery");
        assert_persisted_matches(&store, &*storage);
        let reopened = store_with(Arc::new(ScriptedBackend::new()), storage);
        assert_eq!(reopened.token().as_deref(), Some("tok"));
    }

    #[test]
    fn logout_when_signed_out_reports_nothing_ended() {
        let store = store_with(
            Arc::new(ScriptedBackend::new()),
            Arc::new(MemoryStorage::new()),
        );
        assert!(!store.logout());
    }
}
