//! `SessionControllerActor` - single owner of one participant session.
//!
//! The actor holds everything mutable about the session:
//!
//! - the send/recv transport pair
//! - local producers (one per media tag) and remote consumers (one per
//!   `(peer, tag)`)
//! - the last applied room snapshot, roster and active speaker
//! - the sync poller for the current join
//!
//! Commands from [`SessionControllerHandle`], poll results and engine
//! connection-state events all arrive over channels and are handled one at
//! a time, so no two operations ever interleave on session state.
//!
//! # Session epochs
//!
//! Every `leave` bumps the epoch. Poll results tagged with an older epoch,
//! or with a sequence number not newer than the last applied one, are
//! discarded.
//!
//! # Teardown
//!
//! `leave` is the only teardown path. It runs on explicit request, when a
//! current transport reports `disconnected`/`failed`/`closed`, and when the
//! actor shuts down.

use super::messages::{SessionMessage, SubscribeOutcome, TeardownTrigger};
use super::poller::{spawn_sync_loop, PollEvent};
use crate::config::SessionSettings;
use crate::consumers::{CloseReason, ConsumerKey, ConsumerRegistry, RemoteConsumer};
use crate::engine::{
    ConsumeOptions, ConsumerAppData, MediaEngine, MediaTrack, ProduceOptions, ProducerAppData,
    TransportDirection,
};
use crate::errors::SessionError;
use crate::observability::metrics;
use crate::producers::{encodings_for, LocalMediaPrefs, LocalProducer, ProducerRegistry};
use crate::signaling::Signaling;
use crate::snapshot::{plan_consumer_closures, PeerTable, RosterDiff, RosterEntry, SyncResponse};
use crate::transport::{await_connected, TransportManager, TransportStateEvent};
use crate::view::{consumer_views, producer_views, PollStatus, SessionView};
use common::types::{MediaTag, PeerId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Handle to a `SessionControllerActor`.
///
/// Cheap to clone. Every method sends one message and waits for the reply;
/// if the actor is gone the call fails with [`SessionError::Internal`].
#[derive(Clone)]
pub struct SessionControllerHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    signaling: Signaling,
    view_rx: watch::Receiver<SessionView>,
    peer_id: PeerId,
}

impl SessionControllerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Join the room and start polling. Idempotent.
    pub async fn join(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::Join { respond_to })
            .await?
    }

    /// Start sending camera video and microphone audio, joining first if
    /// needed.
    pub async fn send_camera(&self, video: MediaTrack, audio: MediaTrack) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::SendCamera {
            video,
            audio,
            respond_to,
        })
        .await?
    }

    pub async fn start_screen_share(
        &self,
        video: MediaTrack,
        audio: Option<MediaTrack>,
    ) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::StartScreenShare {
            video,
            audio,
            respond_to,
        })
        .await?
    }

    /// Close the screen producers, e.g. when the capture track ended.
    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::StopScreenShare { respond_to })
            .await
    }

    /// Swap the source tracks of both camera producers.
    pub async fn replace_camera_tracks(
        &self,
        video: MediaTrack,
        audio: MediaTrack,
    ) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::ReplaceCameraTracks {
            video,
            audio,
            respond_to,
        })
        .await?
    }

    /// Close the send transport and forget every local producer.
    pub async fn stop_streams(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::StopStreams { respond_to })
            .await
    }

    /// Record a pause preference for `media_tag` and apply it to the live
    /// producer in that slot, if any.
    pub async fn set_media_paused(&self, media_tag: MediaTag, paused: bool) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::SetMediaPaused {
            media_tag,
            paused,
            respond_to,
        })
        .await
    }

    pub async fn pause_producer(&self, media_tag: MediaTag) -> Result<(), SessionError> {
        self.set_media_paused(media_tag, true).await
    }

    pub async fn resume_producer(&self, media_tag: MediaTag) -> Result<(), SessionError> {
        self.set_media_paused(media_tag, false).await
    }

    pub async fn set_producer_max_layer(
        &self,
        media_tag: MediaTag,
        spatial_layer: u8,
    ) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::SetProducerMaxLayer {
            media_tag,
            spatial_layer,
            respond_to,
        })
        .await?
    }

    /// Consume `media_tag` from `peer_id`.
    ///
    /// Returns [`SubscribeOutcome::AlreadySubscribed`] without side effects
    /// when a consumer for the pair exists.
    pub async fn subscribe(
        &self,
        peer_id: impl Into<PeerId>,
        media_tag: MediaTag,
    ) -> Result<SubscribeOutcome, SessionError> {
        let key = ConsumerKey::new(peer_id, media_tag);
        self.request(|respond_to| SessionMessage::Subscribe { key, respond_to })
            .await?
    }

    pub async fn unsubscribe(
        &self,
        peer_id: impl Into<PeerId>,
        media_tag: MediaTag,
    ) -> Result<(), SessionError> {
        let key = ConsumerKey::new(peer_id, media_tag);
        self.request(|respond_to| SessionMessage::Unsubscribe { key, respond_to })
            .await
    }

    pub async fn set_consumer_paused(
        &self,
        peer_id: impl Into<PeerId>,
        media_tag: MediaTag,
        paused: bool,
    ) -> Result<(), SessionError> {
        let key = ConsumerKey::new(peer_id, media_tag);
        self.request(|respond_to| SessionMessage::SetConsumerPaused {
            key,
            paused,
            respond_to,
        })
        .await?
    }

    pub async fn pause_consumer(
        &self,
        peer_id: impl Into<PeerId>,
        media_tag: MediaTag,
    ) -> Result<(), SessionError> {
        self.set_consumer_paused(peer_id, media_tag, true).await
    }

    pub async fn resume_consumer(
        &self,
        peer_id: impl Into<PeerId>,
        media_tag: MediaTag,
    ) -> Result<(), SessionError> {
        self.set_consumer_paused(peer_id, media_tag, false).await
    }

    /// Ask the server to forward `spatial_layer` of a consumed track.
    pub async fn set_consumer_layer(
        &self,
        peer_id: impl Into<PeerId>,
        media_tag: MediaTag,
        spatial_layer: u8,
    ) -> Result<(), SessionError> {
        let key = ConsumerKey::new(peer_id, media_tag);
        self.request(|respond_to| SessionMessage::SetConsumerLayer {
            key,
            spatial_layer,
            respond_to,
        })
        .await?
    }

    /// Tear the session down. No-op when not joined.
    pub async fn leave(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::Leave { respond_to })
            .await
    }

    /// Fire-and-forget `leave` for process exit. Local state is untouched.
    pub fn leave_on_unload(&self) {
        self.signaling.beacon_leave();
    }

    /// Subscribe to view updates. The receiver always holds the latest
    /// published view.
    #[must_use]
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Stop the actor. It leaves the room on its way out.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Poller for the current join.
struct ActivePoller {
    cancel: CancellationToken,
    events: mpsc::Receiver<PollEvent>,
}

/// The `SessionControllerActor` implementation.
pub struct SessionControllerActor {
    settings: SessionSettings,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    signaling: Signaling,
    engine: Arc<dyn MediaEngine>,
    transports: TransportManager,
    transport_events: mpsc::UnboundedReceiver<TransportStateEvent>,
    producers: ProducerRegistry,
    consumers: ConsumerRegistry,
    /// Pause preferences survive `stop_streams` and `leave`.
    prefs: LocalMediaPrefs,
    joined: bool,
    epoch: u64,
    last_applied_seq: u64,
    last_snapshot: PeerTable,
    roster: Vec<RosterEntry>,
    active_speaker: Option<PeerId>,
    poll_status: PollStatus,
    poller: Option<ActivePoller>,
    view_tx: watch::Sender<SessionView>,
}

impl SessionControllerActor {
    /// Spawn the actor and return its handle and task.
    ///
    /// Cancelling `cancel_token` (or dropping every handle) makes the actor
    /// leave the room and exit.
    pub fn spawn(
        settings: SessionSettings,
        signaling: Signaling,
        engine: Arc<dyn MediaEngine>,
        cancel_token: CancellationToken,
    ) -> (SessionControllerHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (state_tx, transport_events) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(SessionView::new(settings.peer_id.clone()));

        let prefs = LocalMediaPrefs::new();
        let transports = TransportManager::new(
            Arc::clone(&engine),
            signaling.clone(),
            prefs.clone(),
            state_tx,
        );

        let handle = SessionControllerHandle {
            sender,
            cancel_token: cancel_token.clone(),
            signaling: signaling.clone(),
            view_rx,
            peer_id: settings.peer_id.clone(),
        };

        let actor = Self {
            settings,
            receiver,
            cancel_token,
            signaling,
            engine,
            transports,
            transport_events,
            producers: ProducerRegistry::new(),
            consumers: ConsumerRegistry::new(),
            prefs,
            joined: false,
            epoch: 0,
            last_applied_seq: 0,
            last_snapshot: PeerTable::new(),
            roster: Vec::new(),
            active_speaker: None,
            poll_status: PollStatus::Idle,
            poller: None,
            view_tx,
        };

        let task = tokio::spawn(actor.run());
        (handle, task)
    }

    #[instrument(skip_all, name = "sc.actor.session", fields(peer_id = %self.settings.peer_id))]
    async fn run(mut self) {
        info!(target: "sc.actor.session", "SessionControllerActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "sc.actor.session", "SessionControllerActor received cancellation signal");
                    self.leave(TeardownTrigger::Shutdown).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(target: "sc.actor.session", "All handles dropped, exiting");
                            self.leave(TeardownTrigger::Shutdown).await;
                            break;
                        }
                    }
                }

                Some(event) = self.transport_events.recv() => {
                    self.handle_transport_state(event).await;
                }

                event = next_poll_event(&mut self.poller) => {
                    match event {
                        Some(event) => self.handle_poll_event(event).await,
                        // Poller exited on its own.
                        None => self.poller = None,
                    }
                }
            }
        }

        self.stop_poller();
        info!(
            target: "sc.actor.session",
            epoch = self.epoch,
            "SessionControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join { respond_to } => {
                let result = self.join().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::SendCamera {
                video,
                audio,
                respond_to,
            } => {
                let result = self.send_camera(video, audio).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StartScreenShare {
                video,
                audio,
                respond_to,
            } => {
                let result = self.start_screen_share(video, audio).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StopScreenShare { respond_to } => {
                self.stop_screen_share().await;
                let _ = respond_to.send(());
            }

            SessionMessage::ReplaceCameraTracks {
                video,
                audio,
                respond_to,
            } => {
                let result = self.replace_camera_tracks(video, audio).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StopStreams { respond_to } => {
                self.stop_streams().await;
                let _ = respond_to.send(());
            }

            SessionMessage::SetMediaPaused {
                media_tag,
                paused,
                respond_to,
            } => {
                self.set_media_paused(media_tag, paused).await;
                let _ = respond_to.send(());
            }

            SessionMessage::SetProducerMaxLayer {
                media_tag,
                spatial_layer,
                respond_to,
            } => {
                let result = self.set_producer_max_layer(media_tag, spatial_layer).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Subscribe { key, respond_to } => {
                let result = self.subscribe(key).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Unsubscribe { key, respond_to } => {
                self.unsubscribe(&key).await;
                let _ = respond_to.send(());
            }

            SessionMessage::SetConsumerPaused {
                key,
                paused,
                respond_to,
            } => {
                let result = self.set_consumer_paused(&key, paused).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::SetConsumerLayer {
                key,
                spatial_layer,
                respond_to,
            } => {
                let result = self.set_consumer_layer(&key, spatial_layer).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Leave { respond_to } => {
                self.leave(TeardownTrigger::User).await;
                let _ = respond_to.send(());
            }
        }
    }

    // ===== Join / Leave =====

    async fn join(&mut self) -> Result<(), SessionError> {
        if self.joined {
            return Ok(());
        }

        let joined = self.signaling.join_as_new_peer().await?;
        if !self.engine.is_loaded() {
            self.engine.load(joined.router_rtp_capabilities).await?;
        }

        self.joined = true;
        self.last_applied_seq = 0;
        self.start_poller();

        info!(target: "sc.actor.session", epoch = self.epoch, "Joined room");
        self.publish_view();
        Ok(())
    }

    async fn leave(&mut self, trigger: TeardownTrigger) {
        if !self.joined {
            debug!(target: "sc.actor.session", trigger = trigger.as_str(), "Leave ignored, not joined");
            return;
        }

        info!(
            target: "sc.actor.session",
            trigger = trigger.as_str(),
            producers = self.producers.len(),
            consumers = self.consumers.len(),
            "Leaving room"
        );

        self.stop_poller();
        if let Err(e) = self.signaling.leave().await {
            warn!(target: "sc.actor.session", error = %e, "leave signaling failed");
        }
        self.transports.close_all().await;

        self.producers.clear();
        self.consumers.clear();
        self.last_snapshot = PeerTable::new();
        self.roster.clear();
        self.active_speaker = None;
        self.poll_status = PollStatus::Idle;
        self.joined = false;
        self.epoch += 1;
        self.last_applied_seq = 0;

        metrics::record_session_teardown(trigger.as_str());
        self.publish_view();
    }

    // ===== Reconciliation =====

    fn start_poller(&mut self) {
        self.stop_poller();

        let cancel = self.cancel_token.child_token();
        // Detached: the loop exits on cancellation or when `events` drops.
        let (_task, events) = spawn_sync_loop(
            self.signaling.clone(),
            self.settings.poll_interval,
            self.epoch,
            cancel.clone(),
        );
        self.poller = Some(ActivePoller { cancel, events });
        self.poll_status = PollStatus::Running;
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel.cancel();
        }
    }

    async fn handle_poll_event(&mut self, event: PollEvent) {
        if is_stale_poll(
            self.joined,
            self.epoch,
            self.last_applied_seq,
            event.epoch(),
            event.seq(),
        ) {
            debug!(
                target: "sc.actor.session",
                epoch = event.epoch(),
                seq = event.seq(),
                current_epoch = self.epoch,
                last_applied_seq = self.last_applied_seq,
                "Discarding stale poll result"
            );
            metrics::record_poll_tick("stale");
            return;
        }
        self.last_applied_seq = event.seq();

        match event {
            PollEvent::Snapshot { sync, .. } => {
                let started = Instant::now();
                self.apply_snapshot(sync).await;
                metrics::record_poll_apply_duration(started.elapsed());
                metrics::record_poll_tick("applied");
            }
            PollEvent::Failed { error, .. } => {
                error!(target: "sc.actor.session", error = %error, "Room polling stopped");
                self.stop_poller();
                self.poll_status = PollStatus::Failed(error.to_string());
                self.publish_view();
            }
        }
    }

    /// Replace the room snapshot and close consumers whose peer or track
    /// is gone.
    async fn apply_snapshot(&mut self, sync: SyncResponse) {
        let SyncResponse {
            peers,
            active_speaker,
        } = sync;
        self.active_speaker = active_speaker.peer_id;

        let diff = RosterDiff::between(&self.last_snapshot, &peers);
        for peer_id in &diff.joined {
            info!(target: "sc.actor.session", peer_id = %peer_id, "Peer joined");
        }
        for peer_id in &diff.departed {
            info!(target: "sc.actor.session", peer_id = %peer_id, "Peer departed");
        }
        if diff.roster_changed {
            self.roster = peers.sorted_roster();
        }

        // Both rules are planned against the same previous snapshot before
        // anything is closed.
        let keys = self.consumers.keys();
        let closures = plan_consumer_closures(&self.last_snapshot, &peers, &keys);
        for (key, reason) in closures {
            self.consumers.close(&key, reason, &self.signaling).await;
        }

        self.last_snapshot = peers;
        self.publish_view();
    }

    async fn handle_transport_state(&mut self, event: TransportStateEvent) {
        if !self.transports.is_current(event.direction, &event.transport_id) {
            debug!(
                target: "sc.actor.session",
                direction = %event.direction,
                transport_id = %event.transport_id,
                state = %event.state,
                "Ignoring state change of replaced transport"
            );
            return;
        }

        debug!(
            target: "sc.actor.session",
            direction = %event.direction,
            transport_id = %event.transport_id,
            state = %event.state,
            "Transport state changed"
        );

        if event.state.is_terminal() {
            warn!(
                target: "sc.actor.session",
                direction = %event.direction,
                transport_id = %event.transport_id,
                state = %event.state,
                "Transport lost, tearing down session"
            );
            self.leave(TeardownTrigger::TransportState).await;
        }
    }

    // ===== Consumers =====

    async fn subscribe(&mut self, key: ConsumerKey) -> Result<SubscribeOutcome, SessionError> {
        if !self.joined {
            return Err(SessionError::NotJoined);
        }
        if self.consumers.contains(&key) {
            debug!(target: "sc.actor.session", key = %key, "Already subscribed");
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        self.transports.ensure(TransportDirection::Recv).await?;
        let rtp_capabilities = self.engine.rtp_capabilities()?;
        let parameters = self
            .signaling
            .recv_track(key.media_tag, &key.peer_id, rtp_capabilities)
            .await?;
        let consumer_id = parameters.id.clone();

        let transport = self
            .transports
            .get(TransportDirection::Recv)
            .ok_or(SessionError::TransportClosed(TransportDirection::Recv))?;

        let consumer = match transport
            .consume(ConsumeOptions {
                parameters,
                app_data: ConsumerAppData {
                    peer_id: key.peer_id.clone(),
                    media_tag: key.media_tag,
                },
            })
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                if let Err(se) = self.signaling.close_consumer(&consumer_id).await {
                    debug!(target: "sc.actor.session", error = %se, "close-consumer after failed consume");
                }
                return Err(e.into());
            }
        };

        if let Err(e) = await_connected(
            transport,
            self.settings.readiness_poll_interval,
            self.settings.readiness_timeout,
        )
        .await
        {
            warn!(
                target: "sc.actor.session",
                key = %key,
                consumer_id = %consumer_id,
                error = %e,
                "Receive transport not ready, abandoning consumer"
            );
            if let Err(se) = self.signaling.close_consumer(&consumer_id).await {
                debug!(target: "sc.actor.session", error = %se, "close-consumer after readiness failure");
            }
            consumer.close().await;
            return Err(e);
        }

        if let Err(e) = self.signaling.resume_consumer(&consumer_id).await {
            warn!(
                target: "sc.actor.session",
                consumer_id = %consumer_id,
                error = %e,
                "resume-consumer failed, consumer stays paused"
            );
        } else if let Err(e) = consumer.resume().await {
            warn!(
                target: "sc.actor.session",
                consumer_id = %consumer_id,
                error = %e,
                "Engine failed to resume consumer"
            );
        }

        if let Err(duplicate) = self.consumers.insert(RemoteConsumer::new(key.clone(), consumer)) {
            warn!(target: "sc.actor.session", key = %key, "Consumer registered concurrently, dropping new one");
            if let Err(e) = self.signaling.close_consumer(duplicate.id()).await {
                debug!(target: "sc.actor.session", error = %e, "close-consumer for duplicate failed");
            }
            duplicate.engine().close().await;
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        info!(target: "sc.actor.session", key = %key, consumer_id = %consumer_id, "Subscribed");
        self.publish_view();
        Ok(SubscribeOutcome::Subscribed(consumer_id))
    }

    async fn unsubscribe(&mut self, key: &ConsumerKey) {
        if self
            .consumers
            .close(key, CloseReason::Unsubscribed, &self.signaling)
            .await
        {
            self.publish_view();
        }
    }

    async fn set_consumer_paused(&mut self, key: &ConsumerKey, paused: bool) -> Result<(), SessionError> {
        if !self.consumers.contains(key) {
            debug!(target: "sc.actor.session", key = %key, "No consumer to pause/resume");
            return Ok(());
        }

        if !paused {
            let transport = self
                .transports
                .get(TransportDirection::Recv)
                .ok_or(SessionError::TransportClosed(TransportDirection::Recv))?;
            await_connected(
                transport,
                self.settings.readiness_poll_interval,
                self.settings.readiness_timeout,
            )
            .await?;
        }

        if self.consumers.set_paused(key, paused, &self.signaling).await {
            self.publish_view();
        }
        Ok(())
    }

    async fn set_consumer_layer(&mut self, key: &ConsumerKey, spatial_layer: u8) -> Result<(), SessionError> {
        let consumer = self.consumers.get(key).ok_or_else(|| SessionError::NoConsumer {
            peer_id: key.peer_id.to_string(),
            media_tag: key.media_tag,
        })?;

        self.signaling
            .consumer_set_layers(consumer.id(), spatial_layer)
            .await?;
        debug!(target: "sc.actor.session", key = %key, spatial_layer, "Requested consumer layer");
        Ok(())
    }

    // ===== Producers =====

    async fn send_camera(&mut self, video: MediaTrack, audio: MediaTrack) -> Result<(), SessionError> {
        self.join().await?;

        if let Some(tag) = [MediaTag::CamVideo, MediaTag::CamAudio]
            .into_iter()
            .find(|tag| self.producers.contains(*tag))
        {
            return Err(SessionError::AlreadySending(tag));
        }

        self.transports.ensure(TransportDirection::Send).await?;
        self.start_local_producer(MediaTag::CamVideo, video).await?;
        if let Err(e) = self.start_local_producer(MediaTag::CamAudio, audio).await {
            self.roll_back_producer(MediaTag::CamVideo, &e).await;
            return Err(e);
        }
        Ok(())
    }

    async fn start_screen_share(
        &mut self,
        video: MediaTrack,
        audio: Option<MediaTrack>,
    ) -> Result<(), SessionError> {
        self.join().await?;

        if self.producers.contains(MediaTag::ScreenVideo) {
            return Err(SessionError::AlreadySending(MediaTag::ScreenVideo));
        }

        self.transports.ensure(TransportDirection::Send).await?;
        self.start_local_producer(MediaTag::ScreenVideo, video).await?;
        if let Some(audio) = audio {
            if let Err(e) = self.start_local_producer(MediaTag::ScreenAudio, audio).await {
                self.roll_back_producer(MediaTag::ScreenVideo, &e).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Undo the first half of a paired start so the pair can be retried.
    async fn roll_back_producer(&mut self, tag: MediaTag, cause: &SessionError) {
        warn!(
            target: "sc.actor.session",
            media_tag = %tag,
            error = %cause,
            "Paired producer failed, closing"
        );
        if self.producers.close(tag, &self.signaling).await {
            self.publish_view();
        }
    }

    async fn start_local_producer(&mut self, tag: MediaTag, track: MediaTrack) -> Result<(), SessionError> {
        let transport = self
            .transports
            .get(TransportDirection::Send)
            .ok_or(SessionError::TransportClosed(TransportDirection::Send))?;

        let producer = transport
            .produce(ProduceOptions {
                track,
                encodings: encodings_for(tag, &self.settings.simulcast),
                app_data: ProducerAppData { media_tag: tag },
            })
            .await?;

        if self.prefs.initial_paused(tag) {
            if let Err(e) = producer.pause().await {
                warn!(target: "sc.actor.session", media_tag = %tag, error = %e, "Failed to apply initial pause");
            }
        }

        info!(
            target: "sc.actor.session",
            media_tag = %tag,
            producer_id = %producer.id(),
            paused = producer.is_paused(),
            "Producer started"
        );

        if let Some(replaced) = self.producers.insert(LocalProducer::new(tag, producer)) {
            replaced.engine().close().await;
        }
        self.publish_view();
        Ok(())
    }

    async fn stop_screen_share(&mut self) {
        let video = self
            .producers
            .close(MediaTag::ScreenVideo, &self.signaling)
            .await;
        let audio = self
            .producers
            .close(MediaTag::ScreenAudio, &self.signaling)
            .await;
        if video || audio {
            self.publish_view();
        }
    }

    async fn replace_camera_tracks(
        &mut self,
        video: MediaTrack,
        audio: MediaTrack,
    ) -> Result<(), SessionError> {
        if !self.producers.contains(MediaTag::CamVideo) {
            warn!(target: "sc.actor.session", "Cannot replace camera tracks, camera not started");
            return Err(SessionError::NoCameraProducer);
        }

        self.producers
            .replace_track(MediaTag::CamVideo, video)
            .await?;
        if self.producers.contains(MediaTag::CamAudio) {
            self.producers
                .replace_track(MediaTag::CamAudio, audio)
                .await?;
        }
        info!(target: "sc.actor.session", "Camera tracks replaced");
        Ok(())
    }

    async fn stop_streams(&mut self) {
        let Some(transport_id) = self.transports.id(TransportDirection::Send) else {
            debug!(target: "sc.actor.session", "No send transport, nothing to stop");
            return;
        };

        if let Err(e) = self.signaling.close_transport(&transport_id).await {
            warn!(
                target: "sc.actor.session",
                transport_id = %transport_id,
                error = %e,
                "close-transport signaling failed, closing locally"
            );
        }
        self.transports.close(TransportDirection::Send).await;
        self.producers.clear();
        self.publish_view();
    }

    async fn set_media_paused(&mut self, tag: MediaTag, paused: bool) {
        self.prefs.set_paused(tag, paused);
        if self.producers.contains(tag) {
            self.producers.set_paused(tag, paused, &self.signaling).await;
        }
        self.publish_view();
    }

    async fn set_producer_max_layer(&mut self, tag: MediaTag, spatial_layer: u8) -> Result<(), SessionError> {
        self.producers
            .set_max_spatial_layer(tag, spatial_layer)
            .await?;
        self.publish_view();
        Ok(())
    }

    // ===== View =====

    fn publish_view(&self) {
        let peer_id = &self.settings.peer_id;
        let next = SessionView {
            peer_id: peer_id.clone(),
            joined: self.joined,
            poll_status: self.poll_status.clone(),
            active_speaker: self.active_speaker.clone(),
            roster: self.roster.clone(),
            producers: producer_views(&self.producers, &self.last_snapshot, peer_id),
            consumers: consumer_views(&self.consumers, &self.last_snapshot, peer_id),
        };

        metrics::set_active_producers(self.producers.len());
        metrics::set_active_consumers(self.consumers.len());

        self.view_tx.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }
}

/// A poll result is stale when the session is not joined, when it was
/// fetched for a previous epoch, or when a newer result was already applied.
fn is_stale_poll(
    joined: bool,
    current_epoch: u64,
    last_applied_seq: u64,
    epoch: u64,
    seq: u64,
) -> bool {
    !joined || epoch != current_epoch || seq <= last_applied_seq
}

/// Next event from the active poller; pending forever when there is none.
async fn next_poll_event(poller: &mut Option<ActivePoller>) -> Option<PollEvent> {
    match poller {
        Some(poller) => poller.events.recv().await,
        None => std::future::pending().await,
    }
}
