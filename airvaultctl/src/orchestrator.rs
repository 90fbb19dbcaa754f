use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use airvault_core::signals::{self, MAX_GRACEFUL_SIGNALS};
use airvault_core::worker::run_evented;
use airvault_core::workers::relay::resolve_transport;
use airvault_core::{
    AirvaultConfig, ArchiverWorker, Event, EventMessage, PlayerState, PlayerWorker,
    ProcessorWorker, RelayWorker, Runner, StatusWorker, SubscriptionSpec, SupervisorError,
    SystemCommandExecutor, TrackStore, UpstreamClient,
};

use crate::{AppError, Result};

const STATUS_WORKER: &str = "status";
const RELAY_WORKER: &str = "relay";
const ARCHIVER_WORKER: &str = "archiver";
const PROCESSOR_WORKER: &str = "processor";

const INBOX_POLL: Duration = Duration::from_millis(100);

/// Runs the whole capture pipeline until a shutdown signal arrives.
pub async fn run(config: AirvaultConfig, initial_channel: Option<String>) -> Result<()> {
    let mut orchestrator = Orchestrator::new(config)?;
    orchestrator.run(initial_channel).await
}

/// Owns the supervisor and reacts to the event stream.
///
/// Workers never talk to each other directly: everything flows through the
/// supervisor inbox, and this loop decides what gets mirrored, fanned out,
/// spawned, or torn down.
struct Orchestrator {
    config: AirvaultConfig,
    runner: Runner,
    state: PlayerState,
    upstream: UpstreamClient,
    executor: Arc<SystemCommandExecutor>,
    socket_dir: PathBuf,
    ffmpeg: PathBuf,
    tracks_reset_pending: bool,
    upstream_restore_pending: bool,
}

impl Orchestrator {
    fn new(config: AirvaultConfig) -> Result<Self> {
        let upstream = UpstreamClient::new(
            config.upstream.client_host(),
            config.upstream.port,
        )?;
        let ffmpeg = PathBuf::from(&config.stream.ffmpeg_path);
        let tracks_reset_pending = config.processor.reset_tracks;
        Ok(Self {
            config,
            runner: Runner::new(),
            state: PlayerState::new(),
            upstream,
            executor: Arc::new(SystemCommandExecutor),
            socket_dir: std::env::temp_dir().join("airvault"),
            ffmpeg,
            tracks_reset_pending,
            upstream_restore_pending: false,
        })
    }

    async fn run(&mut self, initial_channel: Option<String>) -> Result<()> {
        for dir in [
            self.config.stream_dir(),
            self.config.archive_dir(),
            self.config.processed_dir(),
            self.socket_dir.clone(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let global = self.runner.global_shutdown();
        let signal_task = signals::install(global.clone(), MAX_GRACEFUL_SIGNALS);

        self.state.upstream_running = true;
        match self.upstream.channels().await {
            Ok(channels) => self.state.update_channels(Some(channels)),
            Err(err) => warn!(error = %err, "initial channel fetch failed"),
        }

        self.spawn_status().await?;

        if let Some(channel) = initial_channel {
            let protocol = self.config.stream.protocol.clone();
            let sender = self.runner.event_sender();
            sender.try_put(EventMessage::new(
                "orchestrator",
                Event::TriggerHlsStream {
                    channel_id: channel,
                    protocol,
                },
            ));
        }

        let mut inbox = self
            .runner
            .take_inbox()
            .ok_or_else(|| AppError::MissingResource("supervisor inbox".to_string()))?;

        info!(node = %self.config.system.node_name, "pipeline running");
        while !global.is_set() {
            self.runner.reap_finished().await;
            self.maybe_restore_upstream();
            if let Some(message) = inbox.get(INBOX_POLL).await {
                self.handle(message).await;
            }
        }

        info!("shutting down workers");
        let (failed, terminated) = self.runner.stop_workers().await;
        if !terminated.is_empty() {
            warn!(?terminated, "workers needed forced termination");
        }
        signal_task.abort();
        if !failed.is_empty() {
            // Workers we could not stop mean the process must not exit 0.
            return Err(SupervisorError::ShutdownIncomplete(failed).into());
        }
        Ok(())
    }

    async fn handle(&mut self, message: EventMessage) {
        debug!(%message, "handling event");
        match message.event {
            Event::UpstreamStatus(running) => {
                self.state.upstream_running = running;
                self.fan_out(&message_with(message.source, Event::UpstreamStatus(running)));
            }
            Event::UpdateChannels(channels) => {
                self.state.update_channels(channels.clone());
                self.runner.publish_status(&message_with(
                    message.source,
                    Event::UpdateChannels(channels),
                ));
            }
            Event::UpdateMetadata(snapshot) => {
                self.state
                    .update_live(snapshot.as_ref().clone(), chrono::Utc::now());
                self.runner.publish_stream(&message_with(
                    message.source,
                    Event::UpdateMetadata(snapshot),
                ));
            }
            Event::HlsStreamStarted { channel_id, url } => {
                self.state.update_stream(Some(airvault_core::ActiveStream {
                    channel_id: channel_id.clone(),
                    url: url.clone(),
                }));
                self.state.reset_failures();
                self.runner.publish_stream(&message_with(
                    message.source,
                    Event::HlsStreamStarted {
                        channel_id: channel_id.clone(),
                        url,
                    },
                ));
                if self.config.stream.capture_enabled {
                    if let Err(err) = self.spawn_pipeline(&channel_id).await {
                        warn!(error = %err, "failed to start archive pipeline");
                    }
                }
            }
            Event::TriggerHlsStream {
                channel_id,
                protocol,
            } => {
                if let Err(err) = self.trigger_stream(&channel_id, &protocol).await {
                    warn!(channel = %channel_id, error = %err, "stream trigger failed");
                    self.state.mark_failure();
                    let wait = self.state.increase_cooldown();
                    info!(wait, "stream retry cooldown applied");
                }
            }
            Event::KillHlsStream => {
                self.state.update_stream(None);
                self.runner
                    .publish_stream(&message_with(message.source, Event::KillHlsStream));
                self.stop_stream_workers().await;
                self.state.mark_failure();
                let wait = self.state.increase_cooldown();
                info!(wait, "stream lost, retry cooldown applied");
            }
            Event::HlsStderrLines(lines) => {
                for line in &lines {
                    debug!(line, "relay stderr");
                }
                if lines.iter().any(|line| line.contains("503")) {
                    self.reset_upstream("relay rate limited by upstream").await;
                }
            }
            Event::ResetUpstream { reason } => {
                self.reset_upstream(&reason).await;
            }
            Event::DebugStartPlayer {
                player_name,
                channel_id,
                filename,
                protocol,
            } => {
                if let Err(err) = self
                    .spawn_player(&player_name, &channel_id, &filename, &protocol)
                    .await
                {
                    warn!(player = %player_name, error = %err, "failed to start player");
                }
            }
            Event::DebugStopPlayer(name) => {
                self.runner.publish_status(&message_with(
                    message.source,
                    Event::DebugStopPlayer(name),
                ));
            }
        }
    }

    fn fan_out(&self, message: &EventMessage) {
        self.runner.publish_status(message);
        self.runner.publish_stream(message);
    }

    fn maybe_restore_upstream(&mut self) {
        if self.upstream_restore_pending && self.state.can_connect() {
            self.upstream_restore_pending = false;
            self.state.upstream_running = true;
            info!("upstream cooldown over, resuming checks");
            self.fan_out(&EventMessage::new(
                "orchestrator",
                Event::UpstreamStatus(true),
            ));
        }
    }

    async fn reset_upstream(&mut self, reason: &str) {
        warn!(reason, "resetting upstream");
        self.state.upstream_running = false;
        self.fan_out(&EventMessage::new(
            "orchestrator",
            Event::UpstreamStatus(false),
        ));
        self.stop_stream_workers().await;
        if self.runner.has_worker(RELAY_WORKER) {
            let _ = self.runner.full_stop(RELAY_WORKER).await;
        }
        self.state.mark_failure();
        let wait = self.state.increase_cooldown();
        info!(wait, "upstream reset cooldown applied");
        self.upstream_restore_pending = true;
    }

    async fn stop_stream_workers(&mut self) {
        for name in [ARCHIVER_WORKER, PROCESSOR_WORKER, RELAY_WORKER] {
            if self.runner.has_worker(name) {
                if let Err(err) = self.runner.full_stop(name).await {
                    warn!(worker = name, error = %err, "failed to stop worker");
                }
            }
        }
    }

    async fn spawn_status(&mut self) -> Result<()> {
        let worker = StatusWorker::new(
            self.upstream.clone(),
            Duration::from_secs(self.config.upstream.check_interval_seconds),
            self.config.upstream.max_status_failures,
        );
        self.runner
            .create_worker(STATUS_WORKER, SubscriptionSpec::COMBO, |ctx, subs| {
                run_evented(worker, ctx, subs)
            })
            .await?;
        self.fan_out(&EventMessage::new(
            "orchestrator",
            Event::UpstreamStatus(true),
        ));
        Ok(())
    }

    async fn trigger_stream(&mut self, channel_id: &str, protocol: &str) -> Result<()> {
        if self.runner.has_worker(RELAY_WORKER) {
            debug!(channel = channel_id, "relay already running, ignoring trigger");
            return Ok(());
        }
        if !self.state.upstream_running {
            debug!(channel = channel_id, "upstream down, ignoring trigger");
            return Ok(());
        }
        if !self.state.can_connect() {
            debug!(channel = channel_id, "in cooldown, ignoring trigger");
            return Ok(());
        }
        let Some(channel) = self.state.get_channel(channel_id).cloned() else {
            return Err(AppError::MissingResource(format!(
                "unknown channel: {channel_id}"
            )));
        };

        let hls_url = self.upstream.hls_url(&channel.id)?;
        let transport = resolve_transport(
            protocol,
            self.config.upstream.client_host(),
            self.config.upstream.port,
            &self.socket_dir,
        );
        let capture_file = self
            .config
            .stream
            .capture_enabled
            .then(|| self.config.stream_dir().join(format!("{}.mp3", channel.id)));

        info!(channel = %channel.id, url = %hls_url, "starting relay");
        let worker = RelayWorker::new(
            channel.id.clone(),
            hls_url.to_string(),
            transport,
            capture_file,
            self.ffmpeg.clone(),
        );
        self.runner
            .create_worker(RELAY_WORKER, SubscriptionSpec::STREAM, |ctx, subs| {
                run_evented(worker, ctx, subs)
            })
            .await?;
        Ok(())
    }

    async fn spawn_pipeline(&mut self, channel_id: &str) -> Result<()> {
        if !self.runner.has_worker(ARCHIVER_WORKER) {
            let mut worker = ArchiverWorker::new(
                channel_id,
                self.config.stream_dir(),
                self.config.archive_dir(),
                self.ffmpeg.clone(),
                self.executor.clone(),
            );
            self.seed_state(worker.state_mut());
            self.runner
                .create_worker(ARCHIVER_WORKER, SubscriptionSpec::STREAM, |ctx, subs| {
                    run_evented(worker, ctx, subs)
                })
                .await?;
        }

        if !self.runner.has_worker(PROCESSOR_WORKER) {
            let store = TrackStore::new(self.config.processed_dir().join("tracks.db"))?;
            let reset = self.tracks_reset_pending;
            self.tracks_reset_pending = false;
            let mut worker = ProcessorWorker::new(
                channel_id,
                self.config.archive_dir(),
                self.config.processed_dir(),
                self.ffmpeg.clone(),
                self.executor.clone(),
                store,
                reset,
            );
            self.seed_state(worker.state_mut());
            self.runner
                .create_worker(PROCESSOR_WORKER, SubscriptionSpec::STREAM, |ctx, subs| {
                    run_evented(worker, ctx, subs)
                })
                .await?;
        }
        Ok(())
    }

    /// Fresh workers start from the orchestrator's current view instead of
    /// waiting a full poll interval for their first events.
    fn seed_state(&self, target: &mut PlayerState) {
        target.upstream_running = self.state.upstream_running;
        target.update_channels(self.state.raw_channels().cloned());
        target.update_stream(self.state.active_stream().cloned());
        target.restore_live(self.state.live_handoff());
    }

    async fn spawn_player(
        &mut self,
        player_name: &str,
        channel_id: &str,
        filename: &str,
        protocol: &str,
    ) -> Result<()> {
        if self.runner.has_worker(player_name) {
            debug!(player = player_name, "player already running");
            return Ok(());
        }
        let mut target = PathBuf::from(filename);
        if target.is_relative() {
            target = self.config.processed_dir().join(target);
        }
        let mut worker = PlayerWorker::new(
            player_name,
            channel_id,
            target,
            protocol,
            self.ffmpeg.clone(),
        );
        self.seed_state(worker.state_mut());
        let name = player_name.to_string();
        self.runner
            .create_worker(&name, SubscriptionSpec::COMBO, |ctx, subs| {
                run_evented(worker, ctx, subs)
            })
            .await?;
        Ok(())
    }
}

fn message_with(source: String, event: Event) -> EventMessage {
    EventMessage::new(source, event)
}
