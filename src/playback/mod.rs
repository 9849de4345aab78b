use crate::model::{ClockTime, HmiLevel, Request, RequestKind, ShowFields, UpdateMode};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Audio collaborator driven by the playback state machine.
pub trait MediaPlayer: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn current_position(&self) -> Duration;
    fn duration(&self) -> Duration;
    fn is_playing(&self) -> bool;
}

pub type CompletionHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// Builds one player per connected session. The hook is invoked when a track
/// reaches its end.
pub trait MediaFactory: Send {
    fn create(&self, on_complete: CompletionHook) -> Box<dyn MediaPlayer>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    PausedAuto,
    PausedByUser,
}

/// Media transport state machine.
///
/// Every call returns the requests that mirror the change on the head unit:
/// a media clock update and a status line in main field 3, sent unchained.
/// `PausedByUser` is only ever left through `user_toggle`.
#[derive(Default)]
pub struct PlaybackController {
    state: PlaybackState,
    player: Option<Box<dyn MediaPlayer>>,
    clock_cleared: bool,
}

impl PlaybackController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn has_player(&self) -> bool {
        self.player.is_some()
    }

    pub fn attach(&mut self, player: Box<dyn MediaPlayer>) {
        self.release();
        self.player = Some(player);
        self.state = PlaybackState::Idle;
        self.clock_cleared = true;
    }

    /// Stops playback and drops the player. Returns false if there was none.
    pub fn release(&mut self) -> bool {
        let Some(mut player) = self.player.take() else {
            return false;
        };
        if player.is_playing() {
            player.pause();
        }
        self.state = PlaybackState::Idle;
        self.clock_cleared = true;
        tracing::debug!("media player released");
        true
    }

    pub fn user_toggle(&mut self) -> Vec<Request> {
        match self.state {
            PlaybackState::Playing => self.pause(PlaybackState::PausedByUser),
            _ => self.start(),
        }
    }

    pub fn audio_streaming_changed(&mut self, audible: bool) -> Vec<Request> {
        match (audible, self.state) {
            (false, PlaybackState::Playing) => self.pause(PlaybackState::PausedAuto),
            (true, PlaybackState::PausedAuto) => self.start(),
            _ => Vec::new(),
        }
    }

    pub fn hmi_level_changed(&mut self, level: HmiLevel) -> Vec<Request> {
        if level == HmiLevel::Full {
            return match self.state {
                PlaybackState::Idle | PlaybackState::PausedAuto => self.start(),
                PlaybackState::Playing | PlaybackState::PausedByUser => Vec::new(),
            };
        }
        if !level.is_foreground_lost() {
            return Vec::new();
        }
        match self.state {
            PlaybackState::Playing | PlaybackState::Idle => self.stop(PlaybackState::PausedAuto),
            PlaybackState::PausedAuto if !self.clock_cleared => {
                self.stop(PlaybackState::PausedAuto)
            }
            _ => Vec::new(),
        }
    }

    pub fn track_completed(&mut self) -> Vec<Request> {
        if self.state == PlaybackState::Idle {
            return Vec::new();
        }
        self.stop(PlaybackState::Idle)
    }

    fn start(&mut self) -> Vec<Request> {
        let resume = self.state == PlaybackState::PausedAuto && !self.clock_cleared;
        let Some(player) = self.player.as_mut() else {
            return Vec::new();
        };
        player.play();
        let clock = if resume {
            clock_request(UpdateMode::Resume, None, None)
        } else {
            clock_request(
                UpdateMode::Countup,
                Some(ClockTime::from_millis(player.current_position().as_millis() as u64)),
                Some(ClockTime::from_millis(player.duration().as_millis() as u64)),
            )
        };
        self.transition(PlaybackState::Playing, false);
        vec![clock, status_line("Playing")]
    }

    fn pause(&mut self, next: PlaybackState) -> Vec<Request> {
        let Some(player) = self.player.as_mut() else {
            return Vec::new();
        };
        player.pause();
        self.transition(next, false);
        vec![
            clock_request(UpdateMode::Pause, None, None),
            status_line("Paused"),
        ]
    }

    fn stop(&mut self, next: PlaybackState) -> Vec<Request> {
        let Some(player) = self.player.as_mut() else {
            return Vec::new();
        };
        player.pause();
        self.transition(next, true);
        vec![
            clock_request(UpdateMode::Clear, None, None),
            status_line("Stopped"),
        ]
    }

    fn transition(&mut self, next: PlaybackState, clock_cleared: bool) {
        if self.state != next {
            tracing::info!(from = ?self.state, state = ?next, "playback state changed");
        }
        self.state = next;
        self.clock_cleared = clock_cleared;
    }
}

fn clock_request(
    update_mode: UpdateMode,
    start_time: Option<ClockTime>,
    end_time: Option<ClockTime>,
) -> Request {
    Request::new(RequestKind::SetMediaClockTimer {
        update_mode,
        start_time,
        end_time,
    })
}

fn status_line(text: &str) -> Request {
    Request::new(RequestKind::Show(ShowFields {
        main_field_3: Some(text.to_string()),
        ..Default::default()
    }))
}

/// Clock-driven stand-in for an audio track: it tracks position in wall time
/// and fires the completion hook when the track length has elapsed.
pub struct ClockTrack {
    length: Duration,
    played: Duration,
    resumed_at: Option<Instant>,
    on_complete: CompletionHook,
    timer: Option<JoinHandle<()>>,
}

impl ClockTrack {
    pub fn new(length: Duration, on_complete: CompletionHook) -> Self {
        Self {
            length,
            played: Duration::ZERO,
            resumed_at: None,
            on_complete,
            timer: None,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl MediaPlayer for ClockTrack {
    fn play(&mut self) {
        if self.is_playing() {
            return;
        }
        // Folds a finished run back into `played`.
        self.pause();
        if self.played >= self.length {
            self.played = Duration::ZERO;
        }
        self.resumed_at = Some(Instant::now());
        let remaining = self.length - self.played;
        let on_complete = self.on_complete.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            on_complete();
        }));
    }

    fn pause(&mut self) {
        self.played = self.current_position();
        self.resumed_at = None;
        self.cancel_timer();
    }

    fn current_position(&self) -> Duration {
        let running = self
            .resumed_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO);
        (self.played + running).min(self.length)
    }

    fn duration(&self) -> Duration {
        self.length
    }

    fn is_playing(&self) -> bool {
        self.resumed_at.is_some() && self.current_position() < self.length
    }
}

impl Drop for ClockTrack {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

pub struct ClockTrackFactory {
    pub length: Duration,
}

impl MediaFactory for ClockTrackFactory {
    fn create(&self, on_complete: CompletionHook) -> Box<dyn MediaPlayer> {
        Box::new(ClockTrack::new(self.length, on_complete))
    }
}
