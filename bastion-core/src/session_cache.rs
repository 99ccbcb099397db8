use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bastion_common::{BastionError, Secret};
use tokio::sync::{OnceCell, RwLock};
use tracing::*;

use crate::{AccessChecker, AppResolver, ApplicationRecord, Identity, IdentitySource};

const MAX_TOKEN_LENGTH: usize = 4096;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// An authenticated application session bound to one token.
pub struct Session {
    pub token: Secret<String>,
    pub identity: Identity,
    pub app: ApplicationRecord,
    pub created_at: Instant,
    checker: Arc<dyn AccessChecker>,
    clock: Arc<dyn Clock>,
    last_validated_millis: AtomicU64,
}

impl Session {
    fn new(
        token: &str,
        identity: Identity,
        checker: Arc<dyn AccessChecker>,
        app: ApplicationRecord,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            token: Secret::new(token.to_owned()),
            identity,
            app,
            created_at: clock.now(),
            checker,
            clock,
            last_validated_millis: AtomicU64::new(0),
        }
    }

    /// Asks the principal's checker about this session's application.
    ///
    /// Never answered from a previous call, so policy changes apply to the next request.
    pub async fn check_access(&self) -> Result<(), BastionError> {
        self.checker.check_access_to_app(&self.app).await?;
        let since_creation = self.clock.now().saturating_duration_since(self.created_at);
        self.last_validated_millis.store(
            u64::try_from(since_creation.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        Ok(())
    }

    pub fn last_validated_at(&self) -> Instant {
        self.created_at
            + Duration::from_millis(self.last_validated_millis.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.identity.username)
            .field("app", &self.app.name)
            .finish()
    }
}

type CreationResult = Result<Arc<Session>, BastionError>;

#[derive(Default)]
struct Slot {
    cell: OnceCell<CreationResult>,
}

/// Token-keyed application sessions.
///
/// A token that is not cached is turned into a session at most once at a time:
/// concurrent callers share one creation and its outcome. Failed creations are
/// not remembered.
pub struct SessionCache {
    identity_source: Arc<dyn IdentitySource>,
    resolver: AppResolver,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl SessionCache {
    pub fn new(
        identity_source: Arc<dyn IdentitySource>,
        resolver: AppResolver,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            identity_source,
            resolver,
            clock,
            ttl,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, token: &str) -> Result<Arc<Session>, BastionError> {
        validate_token(token)?;
        let now = self.clock.now();

        {
            let slots = self.slots.read().await;
            if let Some(Ok(session)) = slots.get(token).and_then(|slot| slot.cell.get()) {
                if !self.is_expired(session, now) {
                    return Ok(session.clone());
                }
            }
        }

        let slot = {
            let mut slots = self.slots.write().await;
            let existing = slots
                .get(token)
                .filter(|slot| self.is_reusable(slot, now))
                .cloned();
            match existing {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(Slot::default());
                    slots.insert(token.to_owned(), slot.clone());
                    slot
                }
            }
        };

        let result = slot.cell.get_or_init(|| self.create(token)).await.clone();

        if result.is_err() {
            let mut slots = self.slots.write().await;
            if slots
                .get(token)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                slots.remove(token);
            }
        }
        result
    }

    /// Drops the session for `token`. Returns whether there was one.
    pub async fn invalidate(&self, token: &str) -> bool {
        let removed = self.slots.write().await.remove(token).is_some();
        if removed {
            debug!("Invalidated application session");
        }
        removed
    }

    /// Removes expired and failed entries. Creations in flight are kept.
    pub async fn vacuum(&self) {
        let now = self.clock.now();
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot.cell.get() {
            None => true,
            Some(Ok(session)) => !self.is_expired(session, now),
            Some(Err(_)) => false,
        });
        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, "Vacuumed application sessions");
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.saturating_duration_since(session.created_at) >= self.ttl
    }

    fn is_reusable(&self, slot: &Slot, now: Instant) -> bool {
        match slot.cell.get() {
            None => true,
            Some(Ok(session)) => !self.is_expired(session, now),
            Some(Err(_)) => false,
        }
    }

    async fn create(&self, token: &str) -> CreationResult {
        let (identity, checker) = self.identity_source.authenticate(token).await?;
        let app = self.resolver.resolve(&identity.app_host).await?;
        info!(user=%identity.username, app=%app.name, "Created application session");
        Ok(Arc::new(Session::new(
            token,
            identity,
            checker,
            app,
            self.clock.clone(),
        )))
    }
}

fn validate_token(token: &str) -> Result<(), BastionError> {
    if token.is_empty()
        || token.len() > MAX_TOKEN_LENGTH
        || !token.bytes().all(|b| b.is_ascii_graphic())
    {
        return Err(BastionError::AuthenticationFailed);
    }
    Ok(())
}
