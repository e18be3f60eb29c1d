//! Session harness.
//!
//! Spawns a `SessionControllerActor` wired to a [`MockSignalingGate`] and a
//! [`FakeEngine`], with timings short enough for paused-clock tests.

use crate::fake_engine::FakeEngine;
use crate::mock_signaling::MockSignalingGate;
use common::types::PeerId;
use session_controller::actors::{SessionControllerActor, SessionControllerHandle};
use session_controller::config::SessionSettings;
use session_controller::signaling::Signaling;
use session_controller::view::SessionView;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Poll interval used by the harness.
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Upper bound for `wait_for_*` helpers.
const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A running session plus the fakes it talks to.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test(start_paused = true)]
/// async fn test_join() {
///     let session = TestSession::spawn("peer-a");
///     session.handle.join().await.unwrap();
///     assert_eq!(session.gate.count(Endpoint::JoinAsNewPeer), 1);
/// }
/// ```
pub struct TestSession {
    pub handle: SessionControllerHandle,
    pub gate: MockSignalingGate,
    pub engine: FakeEngine,
    pub cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TestSession {
    /// Default settings and an auto-connecting engine.
    #[must_use]
    pub fn spawn(peer_id: &str) -> Self {
        Self::spawn_with(peer_id, FakeEngine::new(), |_| {})
    }

    /// Custom engine; `configure` may adjust the settings before spawning.
    #[must_use]
    pub fn spawn_with(
        peer_id: &str,
        engine: FakeEngine,
        configure: impl FnOnce(&mut SessionSettings),
    ) -> Self {
        let mut settings = SessionSettings::new(PeerId::from(peer_id));
        settings.poll_interval = TEST_POLL_INTERVAL;
        configure(&mut settings);

        let gate = MockSignalingGate::new(peer_id);
        let cancel_token = CancellationToken::new();
        let (handle, task) = SessionControllerActor::spawn(
            settings,
            Signaling::new(Arc::new(gate.clone())),
            Arc::new(engine.clone()),
            cancel_token.clone(),
        );

        Self {
            handle,
            gate,
            engine,
            cancel_token,
            task: Some(task),
        }
    }

    /// Latest published view.
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.handle.view().borrow().clone()
    }

    /// Wait until a published view satisfies `predicate`; panics after a
    /// generous (virtual) timeout.
    pub async fn wait_for_view(&self, predicate: impl Fn(&SessionView) -> bool) -> SessionView {
        let mut rx = self.handle.view();
        let waited = tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                {
                    let view = rx.borrow_and_update();
                    if predicate(&view) {
                        return view.clone();
                    }
                }
                rx.changed().await.expect("session actor exited");
            }
        })
        .await;
        waited.expect("view condition not reached")
    }

    /// Wait until the roster holds `count` peers.
    pub async fn wait_for_roster(&self, count: usize) -> SessionView {
        self.wait_for_view(|view| view.roster.len() == count).await
    }

    /// Let exactly one more poll interval elapse and the actor settle.
    pub async fn tick(&self) {
        tokio::time::sleep(TEST_POLL_INTERVAL).await;
        settle().await;
    }

    /// Cancel the actor and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.task.take() {
            task.await.expect("session actor panicked");
        }
    }
}

/// Yield enough times for queued messages to be processed.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
