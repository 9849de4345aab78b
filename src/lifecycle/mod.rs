use crate::model::{AudioStreamingState, HmiLevel, HmiStatus, SystemContext};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    pub connected: bool,
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    LevelChanged {
        from: Option<HmiLevel>,
        to: HmiLevel,
    },
    AudioChanged {
        from: Option<AudioStreamingState>,
        to: AudioStreamingState,
    },
    ContextChanged {
        from: Option<SystemContext>,
        to: SystemContext,
    },
    Connected,
    Started {
        first_run: bool,
    },
    Stopped,
    Disconnected,
}

/// Turns the raw HMI status stream into edge events.
///
/// Within one notification the deltas come first, then connect, start and
/// stop, each check seeing the flags left by the previous one.
#[derive(Debug, Default)]
pub struct SessionLifecycle {
    flags: SessionFlags,
    level: Option<HmiLevel>,
    audio: Option<AudioStreamingState>,
    context: Option<SystemContext>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub fn level(&self) -> Option<HmiLevel> {
        self.level
    }

    pub fn audio(&self) -> Option<AudioStreamingState> {
        self.audio
    }

    pub fn context(&self) -> Option<SystemContext> {
        self.context
    }

    pub fn on_hmi_status(&mut self, status: &HmiStatus) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();

        if self.level != Some(status.hmi_level) {
            events.push(LifecycleEvent::LevelChanged {
                from: self.level,
                to: status.hmi_level,
            });
            self.level = Some(status.hmi_level);
        }
        if self.audio != Some(status.audio_streaming_state) {
            events.push(LifecycleEvent::AudioChanged {
                from: self.audio,
                to: status.audio_streaming_state,
            });
            self.audio = Some(status.audio_streaming_state);
        }
        if self.context != Some(status.system_context) {
            events.push(LifecycleEvent::ContextChanged {
                from: self.context,
                to: status.system_context,
            });
            self.context = Some(status.system_context);
        }

        if !self.flags.connected {
            self.flags.connected = true;
            events.push(LifecycleEvent::Connected);
        }
        if status.hmi_level == HmiLevel::Full && !self.flags.started {
            self.flags.started = true;
            events.push(LifecycleEvent::Started {
                first_run: status.first_run,
            });
        }
        if status.hmi_level == HmiLevel::None && self.flags.started {
            self.flags.started = false;
            events.push(LifecycleEvent::Stopped);
        }

        events
    }

    /// Transport is gone: forget everything. Always reports `Disconnected`.
    pub fn reset(&mut self) -> LifecycleEvent {
        *self = Self::default();
        LifecycleEvent::Disconnected
    }
}
