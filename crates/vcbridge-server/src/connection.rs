//! Connection resilience loop.
//!
//! The supervisor owns the target channel, the `want_connected` intent and
//! the current [`CallSession`]. Every connect and every leave bumps a
//! generation counter; link watchers and in-flight connects compare their
//! generation before acting, so a stale watcher never reconnects over an
//! intentional leave or a newer connection.

use crate::config::ConnectionConfig;
use crate::platform::{ChatPlatform, PlatformError};
use crate::session::{CallSession, SessionFactory};
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use vcbridge_types::{ChannelId, LinkState};

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("no voice channel to join")]
    NoTarget,

    #[error("connect was superseded by a leave or a newer connect")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: PlatformError },
}

/// How [`CallSupervisor::establish`] treats an existing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Establish {
    /// Keep a live session that is already on the target.
    Reuse,
    /// Always build a new session.
    Replace,
    /// Rebuild the session watched under this generation, unless a newer
    /// connect or a leave happened since.
    Recover(u64),
}

#[derive(Debug, Clone, Default)]
struct Link {
    target: Option<ChannelId>,
    want_connected: bool,
    generation: u64,
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub target: Option<ChannelId>,
    pub want_connected: bool,
    /// Channel of the live session, if any.
    pub connected_to: Option<ChannelId>,
}

pub struct CallSupervisor {
    platform: Arc<dyn ChatPlatform>,
    factory: SessionFactory,
    settings: ConnectionConfig,
    link: Mutex<Link>,
    session: Mutex<Option<Arc<CallSession>>>,
    /// Serializes connects; never held by `leave`.
    connecting: tokio::sync::Mutex<()>,
}

impl CallSupervisor {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        factory: SessionFactory,
        settings: ConnectionConfig,
        initial_target: Option<ChannelId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            platform,
            factory,
            settings,
            link: Mutex::new(Link {
                target: initial_target,
                ..Link::default()
            }),
            session: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        let link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        LinkSnapshot {
            target: link.target.clone(),
            want_connected: link.want_connected,
            connected_to: self.current().map(|s| s.channel().to_string()),
        }
    }

    /// The live session, if connected.
    pub fn current(&self) -> Option<Arc<CallSession>> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Connects to the current target. A live session already on the
    /// target is returned as is, including one built by a connect that was
    /// in flight when this call started.
    pub async fn connect(self: &Arc<Self>) -> Result<Arc<CallSession>, ConnectError> {
        self.link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .want_connected = true;
        self.establish(Establish::Reuse).await
    }

    /// Moves to `channel`. The old connection is destroyed, not migrated.
    pub async fn switch_to(self: &Arc<Self>, channel: &str) -> Result<Arc<CallSession>, ConnectError> {
        self.retarget(channel);
        self.establish(Establish::Replace).await
    }

    /// The live session for `channel`, switching there first if needed.
    pub async fn ensure_in(self: &Arc<Self>, channel: &str) -> Result<Arc<CallSession>, ConnectError> {
        if let Some(session) = self.current() {
            if session.channel() == channel && !session.has_ended() {
                return Ok(session);
            }
        }
        self.retarget(channel);
        self.establish(Establish::Reuse).await
    }

    fn retarget(&self, channel: &str) {
        let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        link.target = Some(channel.to_string());
        link.want_connected = true;
    }

    /// The live session, connecting first when intent says connected.
    pub async fn session_if_wanted(self: &Arc<Self>) -> Option<Arc<CallSession>> {
        if let Some(session) = self.current() {
            return Some(session);
        }
        if !self.snapshot().want_connected {
            return None;
        }
        match self.connect().await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "connect for playback failed");
                None
            }
        }
    }

    /// Intentional leave. Clears intent before tearing down so the link
    /// watcher does not reconnect.
    pub async fn leave(&self, reason: &str) {
        {
            let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
            link.want_connected = false;
            link.generation += 1;
        }
        let session = self.take_session();
        if let Some(session) = session {
            tracing::info!(channel = session.channel(), reason, "leaving voice channel");
            session.shutdown().await;
        }
    }

    fn take_session(&self) -> Option<Arc<CallSession>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// True while `generation` is current and intent is on.
    fn still_wanted(&self, generation: u64) -> bool {
        let link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        link.generation == generation && link.want_connected
    }

    /// The live session, if it is on the target and intent is on.
    fn live_on_target(&self) -> Option<Arc<CallSession>> {
        let session = self.current()?;
        let link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        let on_target = link.target.as_deref() == Some(session.channel());
        (link.want_connected && on_target && !session.has_ended()).then_some(session)
    }

    async fn establish(self: &Arc<Self>, mode: Establish) -> Result<Arc<CallSession>, ConnectError> {
        let _connecting = self.connecting.lock().await;

        if mode == Establish::Reuse {
            if let Some(session) = self.live_on_target() {
                return Ok(session);
            }
        }

        let (target, generation) = {
            let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
            if !link.want_connected {
                return Err(ConnectError::Cancelled);
            }
            if let Establish::Recover(watched) = mode {
                if link.generation != watched {
                    return Err(ConnectError::Cancelled);
                }
            }
            link.generation += 1;
            (link.target.clone(), link.generation)
        };
        let Some(target) = target else {
            return Err(ConnectError::NoTarget);
        };

        if let Some(old) = self.take_session() {
            old.shutdown().await;
        }

        let attempts = self.settings.max_connect_attempts.max(1);
        let mut last = PlatformError::NotConnected;
        for attempt in 1..=attempts {
            if !self.still_wanted(generation) {
                return Err(ConnectError::Cancelled);
            }
            match self.platform.join(&target).await {
                Ok(joined) => {
                    let session = self.factory.start(joined);
                    let accepted = {
                        let link = self.link.lock().unwrap_or_else(|e| e.into_inner());
                        let current = link.generation == generation && link.want_connected;
                        if current {
                            *self.session.lock().unwrap_or_else(|e| e.into_inner()) =
                                Some(Arc::clone(&session));
                        }
                        current
                    };
                    if !accepted {
                        session.shutdown().await;
                        return Err(ConnectError::Cancelled);
                    }
                    tokio::spawn(Arc::clone(self).watch_link(
                        generation,
                        Arc::clone(&session),
                        session.connection().state(),
                    ));
                    tracing::info!(channel = %target, attempt, generation, "joined voice channel");
                    return Ok(session);
                }
                Err(e) => {
                    tracing::warn!(channel = %target, attempt, error = %e, "join failed");
                    last = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_backoff()).await;
                    }
                }
            }
        }

        {
            let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
            if link.generation == generation {
                link.want_connected = false;
            }
        }
        tracing::error!(channel = %target, attempts, "giving up on voice connection");
        Err(ConnectError::Exhausted { attempts, last })
    }

    /// Follows one session's link state until it ends.
    ///
    /// A disconnect gets `self_heal_timeout` to start renegotiating. If it
    /// does not, or the platform reports failure, the session is torn down
    /// and rebuilt from scratch while intent still says connected.
    fn watch_link(
        self: Arc<Self>,
        generation: u64,
        session: Arc<CallSession>,
        mut state: watch::Receiver<LinkState>,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            loop {
                if state.changed().await.is_err() {
                    tracing::debug!(generation, "link state closed");
                    return;
                }
                let current = state.borrow_and_update().clone();
                match current {
                    LinkState::Disconnected => {
                        if !self.still_wanted(generation) {
                            return;
                        }
                        let healed = tokio::time::timeout(
                            self.settings.self_heal_timeout(),
                            state.wait_for(LinkState::is_self_healing),
                        )
                        .await
                        .is_ok_and(|waited| waited.is_ok());
                        if !healed {
                            tracing::warn!(channel = session.channel(), "link did not recover, reconnecting");
                            self.recover(generation).await;
                            return;
                        }
                        tracing::info!(channel = session.channel(), "link recovering on its own");
                    }
                    LinkState::Failed(reason) => {
                        tracing::error!(channel = session.channel(), %reason, "link failed, reconnecting");
                        self.recover(generation).await;
                        return;
                    }
                    LinkState::Destroyed => return,
                    other => {
                        tracing::debug!(channel = session.channel(), state = %other, "link state");
                    }
                }
            }
        })
    }

    async fn recover(self: &Arc<Self>, generation: u64) {
        if !self.still_wanted(generation) {
            return;
        }
        match self.establish(Establish::Recover(generation)).await {
            Ok(_) => {}
            Err(ConnectError::Cancelled) => {
                tracing::debug!(generation, "reconnect superseded");
            }
            Err(e) => tracing::error!(error = %e, "reconnect failed"),
        }
    }
}
