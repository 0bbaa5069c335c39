use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vigil_core::{Navigator, NoticeKind, Notifier, Role, SessionScoped, SessionState};

use crate::guard::{Access, DenyReason, RouteGuard};
use crate::resolver::RoleResolver;
use crate::store::{Transition, TransitionCause};

/// What the UI shell may render right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewState {
    /// First session determination still pending: render nothing. Never show
    /// a flash of unauthenticated or wrong-role content.
    Indeterminate,
    /// Determination complete; routing decisions are live.
    Ready,
}

#[derive(Debug, Default)]
struct NavState {
    determined: bool,
    role: Option<Role>,
}

/// Drives navigation from session transitions and route-guard decisions.
///
/// Consumes the [`SessionStore`](crate::store::SessionStore) transition feed
/// serially. Decisions are idempotent under duplicate events: a redirect is
/// skipped when the navigator already sits on the target, so firing the same
/// decision twice never double-navigates or double-notifies.
pub struct NavigationCoordinator {
    resolver: RoleResolver,
    guard: RouteGuard,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    session_scope: Option<Arc<dyn SessionScoped>>,
    state: Mutex<NavState>,
}

impl NavigationCoordinator {
    pub fn new(
        resolver: RoleResolver,
        guard: RouteGuard,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            resolver,
            guard,
            navigator,
            notifier,
            session_scope: None,
            state: Mutex::new(NavState::default()),
        }
    }

    /// Attach session-scoped storage (the cache) to be wiped on sign-out.
    pub fn with_session_scope(mut self, scope: Arc<dyn SessionScoped>) -> Self {
        self.session_scope = Some(scope);
        self
    }

    /// Worker loop: apply transitions in arrival order until the feed closes
    /// or the token is cancelled.
    pub async fn run(
        self: Arc<Self>,
        mut transitions: mpsc::UnboundedReceiver<Transition>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("navigation coordinator torn down");
                    return;
                }
                maybe = transitions.recv() => match maybe {
                    Some(transition) => self.apply(&transition),
                    None => {
                        tracing::debug!("transition feed closed");
                        return;
                    }
                }
            }
        }
    }

    /// Apply one session transition.
    pub fn apply(&self, transition: &Transition) {
        if transition.is_silent() {
            // Token refresh, principal unchanged: metadata only.
            self.state.lock().expect("nav state poisoned").determined = true;
            return;
        }
        match &transition.state {
            SessionState::Unauthenticated => self.on_unauthenticated(transition.cause),
            SessionState::Authenticated(session) => {
                let role = self.resolver.resolve(&session.identifier);
                self.on_authenticated(role);
            }
            // Checking/Uninitialized never reach the transition feed.
            _ => {}
        }
    }

    fn on_unauthenticated(&self, cause: TransitionCause) {
        {
            let mut state = self.state.lock().expect("nav state poisoned");
            state.determined = true;
            state.role = None;
        }
        if let Some(scope) = &self.session_scope {
            scope.clear_session_scope();
        }
        if cause == TransitionCause::CheckFailed {
            self.notifier.notify(
                NoticeKind::Error,
                "There was a problem with your session. Please log in again.",
            );
        }
        let login = self.guard.policy().login_path().to_string();
        self.redirect_once(&login);
    }

    fn on_authenticated(&self, role: Role) {
        {
            let mut state = self.state.lock().expect("nav state poisoned");
            state.determined = true;
            state.role = Some(role);
        }
        let path = self.navigator.current_path();
        match self.guard.evaluate(Some(role), &path) {
            Access::Allow => {}
            Access::Deny {
                redirect_to,
                reason,
            } => {
                let navigated = self.redirect_once(&redirect_to);
                // Login-page-or-root redirects are silent; only a genuine
                // wrong-area attempt gets the unauthorized notice.
                if navigated && reason == DenyReason::OutsideRoleArea {
                    self.notifier.notify(
                        NoticeKind::Error,
                        "You don't have permission to access this area.",
                    );
                }
            }
        }
    }

    /// Navigate unless already on the target. Returns whether a navigation
    /// was actually performed.
    fn redirect_once(&self, target: &str) -> bool {
        if self.navigator.current_path() == target {
            tracing::debug!(target, "redirect suppressed, already there");
            return false;
        }
        tracing::info!(target, "redirecting");
        self.navigator.navigate(target);
        true
    }

    /// Whether protected content may be rendered yet.
    pub fn view_state(&self) -> ViewState {
        if self.state.lock().expect("nav state poisoned").determined {
            ViewState::Ready
        } else {
            ViewState::Indeterminate
        }
    }

    /// The current role snapshot, if authenticated.
    pub fn current_role(&self) -> Option<Role> {
        self.state.lock().expect("nav state poisoned").role
    }

    /// Whether the current caller may visit `path`. UI collaborators call
    /// this instead of re-implementing prefix logic.
    pub fn can_access(&self, path: &str) -> bool {
        let role = self.current_role();
        self.guard.evaluate(role, path).is_allow()
    }

    /// Evaluate `path` for the current caller and redirect if denied.
    /// Returns whether the path was allowed.
    pub fn navigate_if_unauthorized(&self, path: &str) -> bool {
        let role = self.current_role();
        match self.guard.evaluate(role, path) {
            Access::Allow => true,
            Access::Deny {
                redirect_to,
                reason,
            } => {
                let navigated = self.redirect_once(&redirect_to);
                if navigated && reason == DenyReason::OutsideRoleArea {
                    self.notifier.notify(
                        NoticeKind::Error,
                        "You don't have permission to access this area.",
                    );
                }
                false
            }
        }
    }
}
