use crate::config::Config;
use crate::files::RemoteFileCache;
use crate::lifecycle::{LifecycleEvent, SessionLifecycle};
use crate::model::{
    ButtonName, FileType, HmiStatus, Image, Inbound, InboundKind, LockScreenStatus, Notification,
    Request, RequestKind, ResponsePayload, ShowFields, TerminationReason,
};
use crate::playback::{CompletionHook, MediaFactory, PlaybackController};
use crate::resources::ResourceProvider;
use crate::sequencer::RequestSequencer;
use crate::status::{update_status, StatusHandle};
use crate::transport::Transport;
use crate::watchdog::ConnectionWatchdog;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything the session loop consumes, in arrival order.
#[derive(Debug, Clone)]
pub enum SessionInput {
    Inbound(Inbound),
    WatchdogExpired,
    TrackCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Ended(TerminationReason),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub watchdog_timeout: Duration,
    pub icon_name: String,
    pub welcome_image_name: String,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            watchdog_timeout: config.session.watchdog_timeout(),
            icon_name: config.resources.icon_name.clone(),
            welcome_image_name: config.resources.welcome_image_name.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A named image the app needs on the head unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAsset {
    pub filename: String,
    pub file_type: FileType,
    pub persistent: bool,
}

impl RemoteAsset {
    pub fn png(filename: impl Into<String>, persistent: bool) -> Self {
        Self {
            filename: filename.into(),
            file_type: FileType::GraphicPng,
            persistent,
        }
    }
}

type Handler = fn(&mut SessionOrchestrator, Inbound) -> SessionFlow;

/// Owns one head-unit session at a time and routes every input to the
/// lifecycle, file cache, playback and sequencer.
///
/// Must only be driven from a single task; the per-session input channel is
/// the serialization point for the transport reader, watchdog and player.
pub struct SessionOrchestrator {
    settings: SessionSettings,
    sequencer: RequestSequencer,
    files: RemoteFileCache,
    lifecycle: SessionLifecycle,
    playback: PlaybackController,
    watchdog: ConnectionWatchdog,
    resources: Arc<dyn ResourceProvider>,
    media: Box<dyn MediaFactory>,
    inputs: Option<mpsc::UnboundedSender<SessionInput>>,
    handlers: HashMap<InboundKind, Handler>,
    file_support: bool,
    app_icon_checked: bool,
    lock_screen: LockScreenStatus,
    active: bool,
    status: StatusHandle,
}

impl SessionOrchestrator {
    pub fn new(
        settings: SessionSettings,
        resources: Arc<dyn ResourceProvider>,
        media: Box<dyn MediaFactory>,
        status: StatusHandle,
    ) -> Self {
        let mut handlers: HashMap<InboundKind, Handler> = HashMap::new();
        handlers.insert(InboundKind::HmiStatus, Self::on_hmi_status);
        handlers.insert(InboundKind::ButtonPress, Self::on_button_press);
        handlers.insert(InboundKind::LockScreen, Self::on_lock_screen);
        handlers.insert(InboundKind::ListFilesResponse, Self::on_list_files_response);
        handlers.insert(InboundKind::PutFileResponse, Self::on_put_file_response);
        handlers.insert(InboundKind::DeleteFileResponse, Self::on_delete_file_response);
        handlers.insert(InboundKind::Terminated, Self::on_terminated);

        Self {
            settings,
            sequencer: RequestSequencer::new(),
            files: RemoteFileCache::new(),
            lifecycle: SessionLifecycle::new(),
            playback: PlaybackController::new(),
            watchdog: ConnectionWatchdog::new(),
            resources,
            media,
            inputs: None,
            handlers,
            file_support: false,
            app_icon_checked: false,
            lock_screen: LockScreenStatus::Off,
            active: false,
            status,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle.flags().connected
    }

    /// Starts a session on a fresh transport. The watchdog is armed before
    /// anything can be read from it.
    pub fn begin(
        &mut self,
        transport: Box<dyn Transport>,
        inputs: mpsc::UnboundedSender<SessionInput>,
    ) {
        if self.active {
            self.teardown();
        }

        let watchdog_inputs = inputs.clone();
        self.watchdog.arm(self.settings.watchdog_timeout, move || {
            let _ = watchdog_inputs.send(SessionInput::WatchdogExpired);
        });
        self.sequencer.attach(transport);
        self.inputs = Some(inputs);
        self.active = true;

        tracing::info!("session started");
        update_status(&self.status, |s| {
            s.sessions_started += 1;
            s.last_end_reason = None;
        });
        self.refresh_status();
    }

    /// Ends the session from outside the input stream (process shutdown).
    pub fn shutdown(&mut self) -> SessionFlow {
        if !self.active {
            return SessionFlow::Ended(TerminationReason::Shutdown);
        }
        self.end(TerminationReason::Shutdown)
    }

    pub fn handle(&mut self, input: SessionInput) -> SessionFlow {
        if !self.active {
            tracing::debug!(?input, "input without active session dropped");
            return SessionFlow::Continue;
        }

        let flow = match input {
            SessionInput::Inbound(inbound) => self.dispatch(inbound),
            // An expiry queued just before the first status arrived is stale.
            SessionInput::WatchdogExpired if self.lifecycle.flags().connected => {
                tracing::debug!("watchdog expiry after connect ignored");
                SessionFlow::Continue
            }
            SessionInput::WatchdogExpired => {
                tracing::warn!("no status notification before watchdog timeout");
                self.end(TerminationReason::WatchdogTimeout)
            }
            SessionInput::TrackCompleted => {
                let requests = self.playback.track_completed();
                self.send_all(requests);
                SessionFlow::Continue
            }
        };

        if flow == SessionFlow::Continue {
            self.refresh_status();
        }
        flow
    }

    fn dispatch(&mut self, inbound: Inbound) -> SessionFlow {
        let kind = inbound.kind();
        if let Some(handler) = self.handlers.get(&kind).copied() {
            return handler(self, inbound);
        }
        match inbound {
            Inbound::Response(response) => {
                if !response.success {
                    tracing::debug!(
                        correlation_id = response.correlation_id,
                        info = ?response.info,
                        "request failed on head unit"
                    );
                }
                self.sequencer.on_response(&response, &mut self.files);
            }
            other => {
                tracing::trace!(?other, "unhandled inbound message");
            }
        }
        SessionFlow::Continue
    }

    fn on_hmi_status(&mut self, inbound: Inbound) -> SessionFlow {
        let Inbound::Notification(Notification::HmiStatus(status)) = inbound else {
            return SessionFlow::Continue;
        };
        for event in self.lifecycle.on_hmi_status(&status) {
            match event {
                LifecycleEvent::Connected => self.on_connected(&status),
                other => self.apply_lifecycle_event(other),
            }
        }
        SessionFlow::Continue
    }

    fn apply_lifecycle_event(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::LevelChanged { from, to } => {
                tracing::info!(from = ?from, hmi_level = ?to, "hmi level changed");
                let requests = self.playback.hmi_level_changed(to);
                self.send_all(requests);
            }
            LifecycleEvent::AudioChanged { from, to } => {
                tracing::info!(from = ?from, state = ?to, "audio streaming state changed");
                let requests = self.playback.audio_streaming_changed(to.is_audible());
                self.send_all(requests);
            }
            LifecycleEvent::ContextChanged { from, to } => {
                tracing::debug!(from = ?from, context = ?to, "system context changed");
            }
            LifecycleEvent::Started { first_run } => self.on_started(first_run),
            LifecycleEvent::Stopped => {
                tracing::info!("app stopped on head unit");
            }
            LifecycleEvent::Connected | LifecycleEvent::Disconnected => {
                tracing::info!(event = ?event, "session edge");
            }
        }
    }

    fn on_connected(&mut self, status: &HmiStatus) {
        self.watchdog.disarm();

        self.file_support = match self.sequencer.query_file_support() {
            Ok(supported) => supported,
            Err(err) => {
                tracing::warn!(error = %err, "file support unknown, file operations disabled");
                false
            }
        };
        tracing::info!(file_support = self.file_support, "app connected");

        let inputs = self.inputs.clone();
        let on_complete: CompletionHook = Arc::new(move || {
            if let Some(tx) = &inputs {
                let _ = tx.send(SessionInput::TrackCompleted);
            }
        });
        self.playback.attach(self.media.create(on_complete));

        // The level delta of this same notification reached playback before the player existed.
        let mut requests = self.playback.hmi_level_changed(status.hmi_level);
        if !status.audio_streaming_state.is_audible() {
            requests.extend(self.playback.audio_streaming_changed(false));
        }
        self.send_all(requests);

        if self.file_support {
            self.send(Request::new(RequestKind::ListFiles));
        }
    }

    fn on_started(&mut self, first_run: bool) {
        tracing::info!(first_run, "app started on head unit");
        if !first_run {
            return;
        }

        for button in [ButtonName::Ok, ButtonName::SeekLeft, ButtonName::SeekRight] {
            self.send(Request::new(RequestKind::SubscribeButton { button }));
        }

        let image_name = self.settings.welcome_image_name.clone();
        let mut welcome = ShowFields {
            main_field_1: Some("Welcome to".to_string()),
            main_field_2: Some("Hello SDL".to_string()),
            ..Default::default()
        };

        if self.file_support && self.files.contains(&image_name) {
            welcome.graphic = Some(Image::dynamic(&image_name));
            self.send(Request::new(RequestKind::Show(welcome)));
            return;
        }

        self.send(Request::new(RequestKind::Show(welcome)));
        if self.file_support {
            let show_image = Request::new(RequestKind::Show(ShowFields {
                graphic: Some(Image::dynamic(&image_name)),
                ..Default::default()
            }));
            self.ensure_resources(&[RemoteAsset::png(image_name, false)], vec![show_image]);
        }
    }

    fn on_button_press(&mut self, inbound: Inbound) -> SessionFlow {
        let Inbound::Notification(Notification::ButtonPress { button }) = inbound else {
            return SessionFlow::Continue;
        };
        match button {
            ButtonName::Ok => {
                let requests = self.playback.user_toggle();
                self.send_all(requests);
            }
            other => tracing::debug!(button = ?other, "button press ignored"),
        }
        SessionFlow::Continue
    }

    fn on_lock_screen(&mut self, inbound: Inbound) -> SessionFlow {
        if let Inbound::Notification(Notification::LockScreen { status }) = inbound {
            if status != self.lock_screen {
                tracing::info!(lock_screen = ?status, "lock screen status changed");
            }
            self.lock_screen = status;
        }
        SessionFlow::Continue
    }

    fn on_list_files_response(&mut self, inbound: Inbound) -> SessionFlow {
        let Inbound::Response(response) = inbound else {
            return SessionFlow::Continue;
        };

        if response.success {
            if let ResponsePayload::ListFiles { filenames } = &response.payload {
                let names = filenames.clone().unwrap_or_default();
                tracing::info!(count = names.len(), "remote file listing received");
                self.files.replace_all(names);
            }
        } else {
            tracing::warn!(info = ?response.info, "remote file listing failed");
        }

        if !self.app_icon_checked {
            self.app_icon_checked = true;
            self.send_app_icon();
        }

        self.sequencer.on_response(&response, &mut self.files);
        SessionFlow::Continue
    }

    fn on_put_file_response(&mut self, inbound: Inbound) -> SessionFlow {
        let Inbound::Response(response) = inbound else {
            return SessionFlow::Continue;
        };
        if let Some(filename) = self.files.resolve_pending(response.correlation_id) {
            if response.success {
                tracing::info!(filename = %filename, "upload confirmed");
            } else {
                tracing::warn!(filename = %filename, info = ?response.info, "upload failed");
            }
            self.files.record_upload_result(&filename, response.success);
        }
        self.sequencer.on_response(&response, &mut self.files);
        SessionFlow::Continue
    }

    fn on_delete_file_response(&mut self, inbound: Inbound) -> SessionFlow {
        let Inbound::Response(response) = inbound else {
            return SessionFlow::Continue;
        };
        if let Some(filename) = self.files.resolve_pending(response.correlation_id) {
            tracing::info!(filename = %filename, success = response.success, "delete result");
            self.files.record_delete_result(&filename, response.success);
        }
        self.sequencer.on_response(&response, &mut self.files);
        SessionFlow::Continue
    }

    fn on_terminated(&mut self, inbound: Inbound) -> SessionFlow {
        match inbound {
            Inbound::Terminated { reason } => self.end(reason),
            _ => SessionFlow::Continue,
        }
    }

    fn send_app_icon(&mut self) {
        if !self.file_support {
            return;
        }
        let icon = self.settings.icon_name.clone();
        let set_icon = Request::new(RequestKind::SetAppIcon {
            filename: icon.clone(),
        });
        self.ensure_resources(&[RemoteAsset::png(icon, true)], vec![set_icon]);
    }

    /// Uploads every asset not yet known on the head unit, then sends `then`,
    /// all as one sequential chain. Without file support nothing is sent.
    /// If the bytes of a missing asset cannot be loaded the whole chain is
    /// dropped, since the follow-up requests would reference a missing file.
    pub fn ensure_resources(&mut self, assets: &[RemoteAsset], then: Vec<Request>) {
        if !self.file_support {
            tracing::debug!("no file support, skipping resource upload");
            return;
        }

        let mut chain = Vec::with_capacity(assets.len() + then.len());
        for asset in assets {
            if self.files.contains(&asset.filename) {
                tracing::debug!(filename = %asset.filename, "resource already on head unit");
                continue;
            }
            let Some(bulk_data) = self.resources.load(&asset.filename) else {
                tracing::warn!(
                    filename = %asset.filename,
                    "resource bytes unavailable, dependent requests dropped"
                );
                return;
            };
            chain.push(Request::new(RequestKind::PutFile {
                filename: asset.filename.clone(),
                file_type: asset.file_type,
                persistent: asset.persistent,
                system_file: false,
                bulk_data,
            }));
        }
        chain.extend(then);
        self.sequencer.send_chain(chain, true, &mut self.files);
    }

    fn send(&mut self, request: Request) {
        let _ = self.sequencer.send(request, &mut self.files);
    }

    fn send_all(&mut self, requests: Vec<Request>) {
        self.sequencer.send_chain(requests, false, &mut self.files);
    }

    fn end(&mut self, reason: TerminationReason) -> SessionFlow {
        tracing::info!(reason = %reason, "session ended");
        self.teardown();
        let recorded = reason.clone();
        update_status(&self.status, |s| s.last_end_reason = Some(recorded));
        SessionFlow::Ended(reason)
    }

    fn teardown(&mut self) {
        self.watchdog.disarm();
        let event = self.lifecycle.reset();
        self.apply_lifecycle_event(event);
        self.playback.release();
        self.sequencer.reset();
        self.files.clear();
        self.lock_screen = LockScreenStatus::Off;
        self.file_support = false;
        self.app_icon_checked = false;
        self.inputs = None;
        self.active = false;
        self.refresh_status();
    }

    fn refresh_status(&self) {
        let flags = self.lifecycle.flags();
        update_status(&self.status, |s| {
            s.connected = flags.connected;
            s.started = flags.started;
            s.hmi_level = self.lifecycle.level();
            s.audio_streaming_state = self.lifecycle.audio();
            s.system_context = self.lifecycle.context();
            s.playback = self.playback.state();
            s.lock_screen = self.lock_screen;
            s.file_support = self.file_support;
            s.remote_files = self.files.names();
            s.pending_requests = self.sequencer.pending_len();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AudioStreamingState, HmiLevel, Response, SystemContext};
    use crate::playback::tests::FakeFactory;
    use crate::playback::PlaybackState;
    use crate::resources::tests::StaticResources;
    use crate::sequencer::tests::RecordingTransport;
    use crate::status::{new_status, snapshot};

    struct Harness {
        orchestrator: SessionOrchestrator,
        transport: RecordingTransport,
        rx: mpsc::UnboundedReceiver<SessionInput>,
        status: StatusHandle,
    }

    fn resources() -> StaticResources {
        StaticResources::new()
            .with("ic_launcher.png", vec![1, 1])
            .with("sdl_icon.png", vec![2, 2])
            .with("icon.png", vec![3, 3])
            .with("newimg.png", vec![4, 4])
    }

    fn harness_with(
        settings: SessionSettings,
        transport: RecordingTransport,
        resources: StaticResources,
    ) -> Harness {
        let status = new_status();
        let mut orchestrator = SessionOrchestrator::new(
            settings,
            Arc::new(resources),
            Box::new(FakeFactory::default()),
            status.clone(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        orchestrator.begin(Box::new(transport.clone()), tx);
        Harness {
            orchestrator,
            transport,
            rx,
            status,
        }
    }

    fn harness(file_support: bool) -> Harness {
        harness_with(
            SessionSettings::default(),
            RecordingTransport::with_file_support(file_support),
            resources(),
        )
    }

    fn hmi(level: HmiLevel, first_run: bool) -> SessionInput {
        SessionInput::Inbound(Inbound::Notification(Notification::HmiStatus(HmiStatus {
            hmi_level: level,
            audio_streaming_state: AudioStreamingState::Audible,
            system_context: SystemContext::Main,
            first_run,
        })))
    }

    fn response(correlation_id: u16, success: bool, payload: ResponsePayload) -> SessionInput {
        SessionInput::Inbound(Inbound::Response(Response {
            correlation_id,
            success,
            info: None,
            payload,
        }))
    }

    fn listing(correlation_id: u16, names: &[&str]) -> SessionInput {
        response(
            correlation_id,
            true,
            ResponsePayload::ListFiles {
                filenames: Some(names.iter().map(|n| n.to_string()).collect()),
            },
        )
    }

    fn functions(requests: &[Request]) -> Vec<&'static str> {
        requests.iter().map(Request::function_name).collect()
    }

    fn id_of(requests: &[Request], function: &str) -> u16 {
        requests
            .iter()
            .rev()
            .find(|r| r.function_name() == function)
            .and_then(|r| r.correlation_id)
            .expect("request was not sent")
    }

    fn uploaded_name(request: &Request) -> Option<&str> {
        match &request.kind {
            RequestKind::PutFile { filename, .. } => Some(filename),
            _ => None,
        }
    }

    #[tokio::test]
    async fn first_full_status_connects_plays_lists_and_welcomes() {
        let mut h = harness(true);
        assert!(h.orchestrator.watchdog.is_armed());

        let flow = h.orchestrator.handle(hmi(HmiLevel::Full, true));
        assert_eq!(flow, SessionFlow::Continue);
        assert!(!h.orchestrator.watchdog.is_armed());

        let sent = h.transport.sent();
        assert_eq!(
            functions(&sent),
            vec![
                "SetMediaClockTimer",
                "Show",
                "ListFiles",
                "SubscribeButton",
                "SubscribeButton",
                "SubscribeButton",
                "Show",
                "PutFile",
            ]
        );
        assert_eq!(uploaded_name(&sent[7]), Some("sdl_icon.png"));
        // The graphic show waits for the upload.
        assert_eq!(h.orchestrator.sequencer.pending_len(), 1);
        assert_eq!(h.orchestrator.playback.state(), PlaybackState::Playing);

        let status = snapshot(&h.status);
        assert!(status.connected);
        assert!(status.started);
        assert!(status.file_support);
        assert_eq!(status.hmi_level, Some(HmiLevel::Full));
        assert_eq!(status.sessions_started, 1);
    }

    #[tokio::test]
    async fn welcome_image_is_used_directly_when_already_known() {
        let mut h = harness(true);
        h.orchestrator.handle(hmi(HmiLevel::None, false));
        let list_id = id_of(&h.transport.sent(), "ListFiles");
        h.orchestrator
            .handle(listing(list_id, &["sdl_icon.png", "ic_launcher.png"]));
        h.transport.clear();

        h.orchestrator.handle(hmi(HmiLevel::Full, true));
        let sent = h.transport.sent();
        let welcome = sent
            .iter()
            .find_map(|r| match &r.kind {
                RequestKind::Show(fields) if fields.main_field_1.is_some() => Some(fields.clone()),
                _ => None,
            })
            .expect("welcome show");
        assert_eq!(welcome.graphic, Some(Image::dynamic("sdl_icon.png")));
        assert!(!functions(&sent).contains(&"PutFile"));
    }

    #[tokio::test]
    async fn listing_response_sets_app_icon_exactly_once() {
        let mut h = harness(true);
        h.orchestrator.handle(hmi(HmiLevel::Background, false));
        let list_id = id_of(&h.transport.sent(), "ListFiles");
        h.transport.clear();

        h.orchestrator.handle(listing(list_id, &[]));
        let sent = h.transport.sent();
        assert_eq!(functions(&sent), vec!["PutFile"]);
        assert_eq!(uploaded_name(&sent[0]), Some("ic_launcher.png"));
        match &sent[0].kind {
            RequestKind::PutFile { persistent, .. } => assert!(*persistent),
            other => panic!("unexpected request: {other:?}"),
        }
        let upload_id = sent[0].correlation_id.unwrap();

        // A second listing does not trigger the routine again.
        h.orchestrator.handle(listing(list_id.wrapping_add(500), &[]));
        assert_eq!(h.transport.sent().len(), 1);

        h.orchestrator
            .handle(response(upload_id, true, ResponsePayload::PutFile));
        let sent = h.transport.sent();
        assert_eq!(functions(&sent), vec!["PutFile", "SetAppIcon"]);
        assert!(h.orchestrator.files.contains("ic_launcher.png"));
        assert_eq!(h.orchestrator.files.pending_len(), 0);
    }

    #[tokio::test]
    async fn failed_listing_keeps_cache_and_still_ensures_icon() {
        let mut h = harness(true);
        h.orchestrator.handle(hmi(HmiLevel::Background, false));
        let list_id = id_of(&h.transport.sent(), "ListFiles");
        h.transport.clear();

        h.orchestrator.handle(response(
            list_id,
            false,
            ResponsePayload::ListFiles { filenames: None },
        ));
        assert!(h.orchestrator.files.names().is_empty());
        assert_eq!(functions(&h.transport.sent()), vec!["PutFile"]);
    }

    #[tokio::test]
    async fn ensures_only_missing_resources_before_using_them() {
        let settings = SessionSettings {
            icon_name: "icon.png".to_string(),
            ..SessionSettings::default()
        };
        let mut h = harness_with(
            settings,
            RecordingTransport::with_file_support(true),
            resources(),
        );
        h.orchestrator.handle(hmi(HmiLevel::Background, false));
        let list_id = id_of(&h.transport.sent(), "ListFiles");
        h.orchestrator.handle(listing(list_id, &["icon.png"]));
        // icon.png is already there, so the app icon is set without an upload.
        assert_eq!(
            functions(&h.transport.sent()).last().copied(),
            Some("SetAppIcon")
        );
        h.transport.clear();

        let use_image = Request::new(RequestKind::Show(ShowFields {
            graphic: Some(Image::dynamic("newimg.png")),
            ..Default::default()
        }));
        h.orchestrator.ensure_resources(
            &[
                RemoteAsset::png("icon.png", true),
                RemoteAsset::png("newimg.png", false),
            ],
            vec![use_image.clone()],
        );

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(uploaded_name(&sent[0]), Some("newimg.png"));
        let upload_id = sent[0].correlation_id.unwrap();

        // Unrelated traffic in between does not release the dependent show.
        h.orchestrator.handle(hmi(HmiLevel::Background, false));
        assert_eq!(h.transport.sent().len(), 1);

        h.orchestrator
            .handle(response(upload_id, true, ResponsePayload::PutFile));
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].kind, use_image.kind);
        assert!(h.orchestrator.files.contains("newimg.png"));
    }

    #[tokio::test]
    async fn missing_resource_bytes_drop_the_dependent_chain() {
        let mut h = harness_with(
            SessionSettings::default(),
            RecordingTransport::with_file_support(true),
            StaticResources::new(),
        );
        h.orchestrator.handle(hmi(HmiLevel::Background, false));
        let list_id = id_of(&h.transport.sent(), "ListFiles");
        h.transport.clear();

        h.orchestrator.handle(listing(list_id, &[]));
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.orchestrator.sequencer.pending_len(), 0);
    }

    #[tokio::test]
    async fn no_file_support_skips_every_file_operation() {
        let mut h = harness(false);
        h.orchestrator.handle(hmi(HmiLevel::Full, true));
        let sent = h.transport.sent();
        assert!(!functions(&sent).contains(&"ListFiles"));
        assert!(!functions(&sent).contains(&"PutFile"));
        assert_eq!(functions(&sent).last().copied(), Some("Show"));
        assert_eq!(h.orchestrator.sequencer.pending_len(), 0);
    }

    #[tokio::test]
    async fn capability_query_failure_counts_as_no_file_support() {
        let mut h = harness_with(
            SessionSettings::default(),
            RecordingTransport::default(),
            resources(),
        );
        h.orchestrator.handle(hmi(HmiLevel::Full, false));
        assert!(!h.orchestrator.file_support);
        assert!(!functions(&h.transport.sent()).contains(&"ListFiles"));
    }

    #[tokio::test]
    async fn watchdog_tears_down_a_silent_session() {
        let settings = SessionSettings {
            watchdog_timeout: Duration::from_millis(40),
            ..SessionSettings::default()
        };
        let mut h = harness_with(
            settings,
            RecordingTransport::with_file_support(true),
            resources(),
        );

        let input = tokio::time::timeout(Duration::from_secs(1), h.rx.recv())
            .await
            .expect("watchdog did not fire")
            .expect("session queue closed");
        assert!(matches!(input, SessionInput::WatchdogExpired));

        let flow = h.orchestrator.handle(input);
        assert_eq!(flow, SessionFlow::Ended(TerminationReason::WatchdogTimeout));
        assert!(!h.orchestrator.is_active());
        let status = snapshot(&h.status);
        assert_eq!(status.last_end_reason, Some(TerminationReason::WatchdogTimeout));
    }

    #[tokio::test]
    async fn first_status_disarms_the_watchdog() {
        let settings = SessionSettings {
            watchdog_timeout: Duration::from_millis(60),
            ..SessionSettings::default()
        };
        let mut h = harness_with(
            settings,
            RecordingTransport::with_file_support(false),
            resources(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.orchestrator.handle(hmi(HmiLevel::None, false));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(h.rx.try_recv().is_err());
        assert!(h.orchestrator.is_active());
    }

    #[tokio::test]
    async fn watchdog_expiry_queued_before_connect_is_ignored() {
        let mut h = harness(false);
        h.orchestrator.handle(hmi(HmiLevel::None, false));

        let flow = h.orchestrator.handle(SessionInput::WatchdogExpired);
        assert_eq!(flow, SessionFlow::Continue);
        assert!(h.orchestrator.is_active());
        assert!(h.orchestrator.is_connected());
        assert_eq!(snapshot(&h.status).last_end_reason, None);
    }

    #[tokio::test]
    async fn delete_response_removes_file_and_releases_continuation() {
        let mut h = harness(true);
        h.orchestrator.handle(hmi(HmiLevel::Background, false));
        let list_id = id_of(&h.transport.sent(), "ListFiles");
        h.orchestrator
            .handle(listing(list_id, &["old.png", "ic_launcher.png"]));
        h.transport.clear();

        let delete = Request::new(RequestKind::DeleteFile {
            filename: "old.png".to_string(),
        });
        let show = Request::new(RequestKind::Show(ShowFields {
            main_field_1: Some("cleaned".to_string()),
            ..Default::default()
        }));
        let orchestrator = &mut h.orchestrator;
        orchestrator
            .sequencer
            .send_chain(vec![delete, show.clone()], true, &mut orchestrator.files);
        let sent = h.transport.sent();
        assert_eq!(functions(&sent), vec!["DeleteFile"]);
        let delete_id = sent[0].correlation_id.unwrap();
        assert_eq!(h.orchestrator.files.pending_len(), 1);

        h.orchestrator
            .handle(response(delete_id, true, ResponsePayload::DeleteFile));
        let sent = h.transport.sent();
        assert_eq!(functions(&sent), vec!["DeleteFile", "Show"]);
        assert_eq!(sent[1].kind, show.kind);
        assert!(!h.orchestrator.files.contains("old.png"));
        assert!(h.orchestrator.files.contains("ic_launcher.png"));
        assert_eq!(h.orchestrator.files.pending_len(), 0);

        // A duplicate response finds nothing left to resolve or release.
        h.orchestrator
            .handle(response(delete_id, true, ResponsePayload::DeleteFile));
        assert_eq!(h.transport.sent().len(), 2);
        assert_eq!(snapshot(&h.status).remote_files, vec!["ic_launcher.png"]);
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_file() {
        let mut h = harness(true);
        h.orchestrator.handle(hmi(HmiLevel::Background, false));
        let list_id = id_of(&h.transport.sent(), "ListFiles");
        h.orchestrator
            .handle(listing(list_id, &["old.png", "ic_launcher.png"]));
        h.transport.clear();

        let orchestrator = &mut h.orchestrator;
        let delete_id = orchestrator
            .sequencer
            .send(
                Request::new(RequestKind::DeleteFile {
                    filename: "old.png".to_string(),
                }),
                &mut orchestrator.files,
            )
            .unwrap();

        h.orchestrator
            .handle(response(delete_id, false, ResponsePayload::DeleteFile));
        assert!(h.orchestrator.files.contains("old.png"));
        assert_eq!(h.orchestrator.files.pending_len(), 0);
    }

    #[tokio::test]
    async fn failed_upload_leaves_cache_and_still_releases_dependent_request() {
        let mut h = harness(true);
        h.orchestrator.handle(hmi(HmiLevel::Background, false));
        let list_id = id_of(&h.transport.sent(), "ListFiles");
        h.orchestrator.handle(listing(list_id, &["ic_launcher.png"]));
        h.transport.clear();

        let use_image = Request::new(RequestKind::Show(ShowFields {
            graphic: Some(Image::dynamic("newimg.png")),
            ..Default::default()
        }));
        h.orchestrator.ensure_resources(
            &[RemoteAsset::png("newimg.png", false)],
            vec![use_image.clone()],
        );
        let upload_id = id_of(&h.transport.sent(), "PutFile");
        assert_eq!(h.orchestrator.files.pending_len(), 1);

        h.orchestrator
            .handle(response(upload_id, false, ResponsePayload::PutFile));
        let sent = h.transport.sent();
        assert_eq!(functions(&sent), vec!["PutFile", "Show"]);
        assert_eq!(sent[1].kind, use_image.kind);
        assert!(!h.orchestrator.files.contains("newimg.png"));
        assert_eq!(h.orchestrator.files.names(), vec!["ic_launcher.png"]);
        assert_eq!(h.orchestrator.files.pending_len(), 0);

        // Resolved once: a repeated failure changes nothing.
        h.orchestrator
            .handle(response(upload_id, false, ResponsePayload::PutFile));
        assert_eq!(h.transport.sent().len(), 2);
        assert_eq!(h.orchestrator.files.pending_len(), 0);
    }

    #[tokio::test]
    async fn termination_resets_all_session_state() {
        let mut h = harness(true);
        h.orchestrator.handle(hmi(HmiLevel::Full, true));
        h.orchestrator.handle(SessionInput::Inbound(Inbound::Notification(
            Notification::LockScreen {
                status: LockScreenStatus::Required,
            },
        )));
        let list_id = id_of(&h.transport.sent(), "ListFiles");
        h.orchestrator.handle(listing(list_id, &["a.png"]));
        assert_eq!(snapshot(&h.status).lock_screen, LockScreenStatus::Required);
        assert!(h.orchestrator.sequencer.pending_len() > 0);

        let flow = h.orchestrator.handle(SessionInput::Inbound(Inbound::Terminated {
            reason: TerminationReason::TransportClosed,
        }));
        assert_eq!(flow, SessionFlow::Ended(TerminationReason::TransportClosed));

        assert!(!h.orchestrator.playback.has_player());
        assert_eq!(h.orchestrator.sequencer.pending_len(), 0);
        assert!(matches!(
            h.orchestrator.sequencer.query_file_support(),
            Err(crate::error::SessionError::TransportUnavailable)
        ));
        assert!(h.orchestrator.files.names().is_empty());
        assert!(!h.orchestrator.watchdog.is_armed());

        let status = snapshot(&h.status);
        assert!(!status.connected);
        assert!(!status.started);
        assert_eq!(status.lock_screen, LockScreenStatus::Off);
        assert_eq!(status.pending_requests, 0);
        assert!(status.remote_files.is_empty());
        assert_eq!(status.playback, PlaybackState::Idle);
        assert_eq!(status.last_end_reason, Some(TerminationReason::TransportClosed));

        // Late input from the dead session is ignored.
        let before = h.transport.sent().len();
        assert_eq!(
            h.orchestrator.handle(hmi(HmiLevel::Full, true)),
            SessionFlow::Continue
        );
        assert_eq!(h.transport.sent().len(), before);
    }

    #[tokio::test]
    async fn new_session_relists_and_keeps_counting_correlation_ids() {
        let mut h = harness(true);
        h.orchestrator.handle(hmi(HmiLevel::Full, false));
        let first_list = id_of(&h.transport.sent(), "ListFiles");
        h.orchestrator.handle(SessionInput::Inbound(Inbound::Terminated {
            reason: TerminationReason::ProxyReported("bye".to_string()),
        }));

        let next = RecordingTransport::with_file_support(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        h.orchestrator.begin(Box::new(next.clone()), tx);
        h.orchestrator.handle(hmi(HmiLevel::Full, false));

        let second_list = id_of(&next.sent(), "ListFiles");
        assert!(second_list > first_list);
        assert_eq!(snapshot(&h.status).sessions_started, 2);

        // The icon routine runs again in the new session.
        h.orchestrator.handle(listing(second_list, &[]));
        assert_eq!(functions(&next.sent()).last().copied(), Some("PutFile"));
    }

    #[tokio::test]
    async fn ok_button_toggles_and_user_pause_sticks() {
        let mut h = harness(false);
        h.orchestrator.handle(hmi(HmiLevel::Full, false));
        assert_eq!(h.orchestrator.playback.state(), PlaybackState::Playing);

        let press = |button| {
            SessionInput::Inbound(Inbound::Notification(Notification::ButtonPress { button }))
        };
        h.orchestrator.handle(press(ButtonName::Ok));
        assert_eq!(h.orchestrator.playback.state(), PlaybackState::PausedByUser);

        h.orchestrator.handle(press(ButtonName::SeekLeft));
        h.orchestrator.handle(hmi(HmiLevel::Limited, false));
        h.orchestrator.handle(hmi(HmiLevel::Full, false));
        assert_eq!(h.orchestrator.playback.state(), PlaybackState::PausedByUser);

        h.orchestrator.handle(press(ButtonName::Ok));
        assert_eq!(h.orchestrator.playback.state(), PlaybackState::Playing);
        assert_eq!(snapshot(&h.status).playback, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn inaudible_status_pauses_and_track_completion_clears() {
        let mut h = harness(false);
        h.orchestrator.handle(hmi(HmiLevel::Full, false));
        h.transport.clear();

        h.orchestrator.handle(SessionInput::Inbound(Inbound::Notification(
            Notification::HmiStatus(HmiStatus {
                hmi_level: HmiLevel::Full,
                audio_streaming_state: AudioStreamingState::NotAudible,
                system_context: SystemContext::Main,
                first_run: false,
            }),
        )));
        assert_eq!(h.orchestrator.playback.state(), PlaybackState::PausedAuto);
        assert_eq!(functions(&h.transport.sent()), vec!["SetMediaClockTimer", "Show"]);

        h.orchestrator.handle(SessionInput::TrackCompleted);
        assert_eq!(h.orchestrator.playback.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn unknown_response_is_ignored() {
        let mut h = harness(true);
        h.orchestrator.handle(hmi(HmiLevel::Background, false));
        let before = h.transport.sent().len();
        let flow = h.orchestrator.handle(response(
            4242,
            false,
            ResponsePayload::Generic {
                name: "Show".to_string(),
            },
        ));
        assert_eq!(flow, SessionFlow::Continue);
        assert_eq!(h.transport.sent().len(), before);
    }
}
