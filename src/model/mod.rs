use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HmiLevel {
    Full,
    Limited,
    Background,
    None,
}

impl HmiLevel {
    pub fn is_foreground_lost(self) -> bool {
        matches!(self, HmiLevel::Background | HmiLevel::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioStreamingState {
    Audible,
    Attenuated,
    NotAudible,
}

impl AudioStreamingState {
    pub fn is_audible(self) -> bool {
        !matches!(self, AudioStreamingState::NotAudible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemContext {
    Main,
    VrSession,
    Menu,
    HmiObscured,
    Alert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ButtonName {
    Ok,
    SeekLeft,
    SeekRight,
    TuneUp,
    TuneDown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockScreenStatus {
    Required,
    Optional,
    #[default]
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateMode {
    Countup,
    Countdown,
    Pause,
    Resume,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    GraphicBmp,
    GraphicJpeg,
    GraphicPng,
    AudioWave,
    AudioMp3,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageType {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub image_type: ImageType,
    pub value: String,
}

impl Image {
    pub fn dynamic(filename: impl Into<String>) -> Self {
        Self {
            image_type: ImageType::Dynamic,
            value: filename.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockTime {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl ClockTime {
    pub fn from_millis(ms: u64) -> Self {
        const SECOND: u64 = 1000;
        const MINUTE: u64 = 60 * SECOND;
        const HOUR: u64 = 60 * MINUTE;
        Self {
            hours: (ms / HOUR) as u32,
            minutes: ((ms % HOUR) / MINUTE) as u32,
            seconds: ((ms % MINUTE) / SECOND) as u32,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_field_1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_field_2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_field_3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graphic: Option<Image>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum RequestKind {
    ListFiles,
    PutFile {
        filename: String,
        file_type: FileType,
        persistent: bool,
        system_file: bool,
        bulk_data: Vec<u8>,
    },
    DeleteFile {
        filename: String,
    },
    SetAppIcon {
        filename: String,
    },
    Show(ShowFields),
    SetMediaClockTimer {
        update_mode: UpdateMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<ClockTime>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<ClockTime>,
    },
    SubscribeButton {
        button: ButtonName,
    },
}

/// Outbound message. `correlation_id` is stamped by the sequencer when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub correlation_id: Option<u16>,
    #[serde(flatten)]
    pub kind: RequestKind,
}

impl Request {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            correlation_id: None,
            kind,
        }
    }

    /// Filename touched by a file-mutating request (upload or delete).
    pub fn mutated_file(&self) -> Option<&str> {
        match &self.kind {
            RequestKind::PutFile { filename, .. } | RequestKind::DeleteFile { filename } => {
                Some(filename)
            }
            _ => None,
        }
    }

    pub fn function_name(&self) -> &'static str {
        match self.kind {
            RequestKind::ListFiles => "ListFiles",
            RequestKind::PutFile { .. } => "PutFile",
            RequestKind::DeleteFile { .. } => "DeleteFile",
            RequestKind::SetAppIcon { .. } => "SetAppIcon",
            RequestKind::Show(_) => "Show",
            RequestKind::SetMediaClockTimer { .. } => "SetMediaClockTimer",
            RequestKind::SubscribeButton { .. } => "SubscribeButton",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HmiStatus {
    pub hmi_level: HmiLevel,
    pub audio_streaming_state: AudioStreamingState,
    pub system_context: SystemContext,
    #[serde(default)]
    pub first_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notification", rename_all = "snake_case")]
pub enum Notification {
    HmiStatus(HmiStatus),
    ButtonPress { button: ButtonName },
    LockScreen { status: LockScreenStatus },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum ResponsePayload {
    ListFiles {
        #[serde(default)]
        filenames: Option<Vec<String>>,
    },
    PutFile,
    DeleteFile,
    Generic {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub correlation_id: u16,
    pub success: bool,
    #[serde(default)]
    pub info: Option<String>,
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TerminationReason {
    TransportClosed,
    ProxyReported(String),
    WatchdogTimeout,
    Shutdown,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransportClosed => write!(f, "transport closed"),
            Self::ProxyReported(reason) => write!(f, "proxy reported: {reason}"),
            Self::WatchdogTimeout => write!(f, "watchdog timeout"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Everything the transport collaborator can deliver into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Notification(Notification),
    Response(Response),
    Terminated { reason: TerminationReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    HmiStatus,
    ButtonPress,
    LockScreen,
    OtherNotification,
    ListFilesResponse,
    PutFileResponse,
    DeleteFileResponse,
    GenericResponse,
    Terminated,
}

impl Inbound {
    pub fn kind(&self) -> InboundKind {
        match self {
            Inbound::Notification(Notification::HmiStatus(_)) => InboundKind::HmiStatus,
            Inbound::Notification(Notification::ButtonPress { .. }) => InboundKind::ButtonPress,
            Inbound::Notification(Notification::LockScreen { .. }) => InboundKind::LockScreen,
            Inbound::Notification(Notification::Other) => InboundKind::OtherNotification,
            Inbound::Response(r) => match r.payload {
                ResponsePayload::ListFiles { .. } => InboundKind::ListFilesResponse,
                ResponsePayload::PutFile => InboundKind::PutFileResponse,
                ResponsePayload::DeleteFile => InboundKind::DeleteFileResponse,
                ResponsePayload::Generic { .. } => InboundKind::GenericResponse,
            },
            Inbound::Terminated { .. } => InboundKind::Terminated,
        }
    }
}
