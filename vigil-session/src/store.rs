use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use vigil_core::{AuthEvent, AuthProvider, ProviderError, Session, SessionState};

/// What produced a session transition. Lets the navigation layer tell a
/// silent token refresh from a sign-in, and a clean sign-out from an
/// erroring initial check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionCause {
    /// The one-shot startup check resolved.
    InitialCheck,
    /// The one-shot startup check failed; treated as unauthenticated.
    CheckFailed,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// One serialized change of the session slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub state: SessionState,
    pub cause: TransitionCause,
}

impl Transition {
    /// A token refresh with an unchanged principal carries no navigation
    /// side effects.
    pub fn is_silent(&self) -> bool {
        self.cause == TransitionCause::TokenRefreshed
    }
}

/// Process-wide, single-writer holder of the current session.
///
/// Two concurrent entry points populate the slot: the one-shot startup check
/// and the provider's push subscription. Both are funneled through one worker
/// task so every write is serialized. The race is resolved by event recency:
/// once any push event has been applied, a later-resolving startup check is
/// discarded rather than allowed to clobber newer state (last-event-wins).
///
/// [`SessionStore::shutdown`] (or dropping the store) cancels the worker,
/// which releases the push subscription; a check result that arrives after
/// teardown is discarded, never applied.
pub struct SessionStore {
    provider: Arc<dyn AuthProvider>,
    state_rx: watch::Receiver<SessionState>,
    token: CancellationToken,
}

impl SessionStore {
    /// Start the store: arms the push subscription, issues the startup check,
    /// and spawns the single worker loop. Returns the store plus the
    /// transition feed consumed by the navigation coordinator.
    pub fn spawn(
        provider: Arc<dyn AuthProvider>,
    ) -> (SessionStore, mpsc::UnboundedReceiver<Transition>) {
        let (state_tx, state_rx) = watch::channel(SessionState::Uninitialized);
        let (transitions_tx, transitions_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let worker_token = token.clone();
        let worker_provider = provider.clone();
        tokio::spawn(async move {
            run(worker_provider, state_tx, transitions_tx, worker_token).await;
        });

        (
            SessionStore {
                provider,
                state_rx,
                token,
            },
            transitions_rx,
        )
    }

    /// Ask the provider to end the current session. The state change itself
    /// arrives as a `SignedOut` push event and is applied by the worker like
    /// any other.
    pub async fn sign_out(&self) -> Result<(), ProviderError> {
        self.provider.sign_out().await
    }

    /// Snapshot of the current session slot.
    pub fn current(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch the session slot for changes (read-only snapshots).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Stop the worker and release the push subscription.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    provider: Arc<dyn AuthProvider>,
    state_tx: watch::Sender<SessionState>,
    transitions_tx: mpsc::UnboundedSender<Transition>,
    token: CancellationToken,
) {
    let mut events = provider.subscribe();
    state_tx.send_replace(SessionState::Checking);

    // Phase 1: the startup check races the push feed. Push events are always
    // at least as recent as the startup snapshot, so once one has been
    // applied the check result is stale.
    let mut push_applied = false;
    {
        let mut check = provider.current_session();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("session store torn down before initial check resolved");
                    return;
                }
                result = &mut check => {
                    if push_applied {
                        tracing::debug!("discarding initial check superseded by a push event");
                    } else {
                        apply_initial(result, &state_tx, &transitions_tx);
                    }
                    break;
                }
                maybe = events.recv() => match maybe {
                    Some(event) => {
                        push_applied = true;
                        apply_event(event, &state_tx, &transitions_tx);
                    }
                    None => {
                        tracing::debug!("auth event feed closed during initial check");
                        return;
                    }
                }
            }
        }
    }

    // Phase 2: serialized push event handling, in delivery order.
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("session store torn down");
                return;
            }
            maybe = events.recv() => match maybe {
                Some(event) => apply_event(event, &state_tx, &transitions_tx),
                None => {
                    tracing::debug!("auth event feed closed");
                    return;
                }
            }
        }
    }
}

fn apply_initial(
    result: Result<Option<Session>, ProviderError>,
    state_tx: &watch::Sender<SessionState>,
    transitions_tx: &mpsc::UnboundedSender<Transition>,
) {
    let (state, cause) = match result {
        Ok(Some(session)) if session.valid => {
            tracing::debug!(principal = %session.principal_id, "initial check found a session");
            (SessionState::Authenticated(session), TransitionCause::InitialCheck)
        }
        Ok(Some(session)) => {
            // Expired or revoked per the provider; same as no session.
            tracing::debug!(principal = %session.principal_id, "initial check found an invalid session");
            (SessionState::Unauthenticated, TransitionCause::InitialCheck)
        }
        Ok(None) => {
            tracing::debug!("initial check found no session");
            (SessionState::Unauthenticated, TransitionCause::InitialCheck)
        }
        Err(err) => {
            tracing::error!(error = %err, "initial session check failed");
            (SessionState::Unauthenticated, TransitionCause::CheckFailed)
        }
    };
    publish(state, cause, state_tx, transitions_tx);
}

fn apply_event(
    event: AuthEvent,
    state_tx: &watch::Sender<SessionState>,
    transitions_tx: &mpsc::UnboundedSender<Transition>,
) {
    let current = state_tx.borrow().clone();
    let (state, cause) = match event {
        // A session the provider marks expired or revoked never becomes
        // Authenticated, whatever event carried it.
        AuthEvent::SignedIn(session)
        | AuthEvent::UserUpdated(session)
        | AuthEvent::TokenRefreshed(session)
            if !session.valid =>
        {
            tracing::debug!(principal = %session.principal_id, "event carried an invalid session");
            (SessionState::Unauthenticated, TransitionCause::SignedOut)
        }
        AuthEvent::SignedIn(session) => {
            (SessionState::Authenticated(session), TransitionCause::SignedIn)
        }
        AuthEvent::SignedOut => (SessionState::Unauthenticated, TransitionCause::SignedOut),
        AuthEvent::UserUpdated(session) => {
            (SessionState::Authenticated(session), TransitionCause::UserUpdated)
        }
        AuthEvent::TokenRefreshed(session) => {
            // Unchanged principal: metadata-only update, no navigation.
            // A refresh that switches principals is handled as a sign-in.
            let cause = match current.session() {
                Some(existing) if existing.same_principal(&session) => {
                    TransitionCause::TokenRefreshed
                }
                _ => TransitionCause::SignedIn,
            };
            (SessionState::Authenticated(session), cause)
        }
    };
    publish(state, cause, state_tx, transitions_tx);
}

fn publish(
    state: SessionState,
    cause: TransitionCause,
    state_tx: &watch::Sender<SessionState>,
    transitions_tx: &mpsc::UnboundedSender<Transition>,
) {
    tracing::debug!(?cause, "session transition");
    state_tx.send_replace(state.clone());
    // The receiver may be gone during shutdown; nothing to do about it here.
    let _ = transitions_tx.send(Transition { state, cause });
}
