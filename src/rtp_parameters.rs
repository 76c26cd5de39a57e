//! RTP capability/parameter types.
//!
//! Codecs are modeled as a kind-tagged enum (`RtpCodecCapability::Audio { .. }` /
//! `::Video { .. }`) rather than a flat struct with an `Option<u8> channels` field: this mirrors
//! how the teacher's own worker test (`worker.rs`'s `#[cfg(test)] mod tests`) constructs codecs
//! and avoids a whole class of "video codec accidentally has channels" bugs the flat shape
//! invites.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::{NonZeroU32, NonZeroU8};

/// Media kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum MimeTypeAudio {
    Opus,
    PCMU,
    PCMA,
    ISAC,
    G722,
    iLBC,
    SILK,
    CN,
    Telephone,
    Multiopus,
}

impl MimeTypeAudio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opus => "audio/opus",
            Self::PCMU => "audio/PCMU",
            Self::PCMA => "audio/PCMA",
            Self::ISAC => "audio/ISAC",
            Self::G722 => "audio/G722",
            Self::iLBC => "audio/iLBC",
            Self::SILK => "audio/SILK",
            Self::CN => "audio/CN",
            Self::Telephone => "audio/telephone-event",
            Self::Multiopus => "audio/multiopus",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum MimeTypeVideo {
    VP8,
    VP9,
    H264,
    #[serde(rename = "H264-SVC")]
    H264Svc,
    H265,
    RTX,
}

impl MimeTypeVideo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VP8 => "video/VP8",
            Self::VP9 => "video/VP9",
            Self::H264 => "video/H264",
            Self::H264Svc => "video/H264-SVC",
            Self::H265 => "video/H265",
            Self::RTX => "video/rtx",
        }
    }
}

/// Codec-specific parameters bag (packetization-mode, profile-level-id, apt, num_streams, ...).
/// Stored untyped (matching what the worker accepts) with typed accessors for the fields ORTC
/// matching cares about.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RtpCodecParametersParameters(HashMap<String, CodecParameterValue>);

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CodecParameterValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl RtpCodecParametersParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<CodecParameterValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&CodecParameterValue> {
        self.0.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            CodecParameterValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            CodecParameterValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Copies every entry of `other` into `self`, overwriting any key already present.
    pub fn merge_from(&mut self, other: &RtpCodecParametersParameters) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

impl From<u32> for CodecParameterValue {
    fn from(value: u32) -> Self {
        CodecParameterValue::Number(value as f64)
    }
}

impl From<&str> for CodecParameterValue {
    fn from(value: &str) -> Self {
        CodecParameterValue::String(value.to_string())
    }
}

/// RTCP feedback mechanism advertised by a codec.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RtcpFeedback {
    Nack,
    NackPli,
    CcmFir,
    TransportCC,
    GoogRemb,
}

/// One entry of a router's or an endpoint's supported codecs.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind")]
pub enum RtpCodecCapability {
    #[serde(rename = "audio")]
    Audio {
        mime_type: MimeTypeAudio,
        #[serde(skip_serializing_if = "Option::is_none")]
        preferred_payload_type: Option<u8>,
        clock_rate: NonZeroU32,
        channels: NonZeroU8,
        #[serde(default)]
        parameters: RtpCodecParametersParameters,
        #[serde(default)]
        rtcp_feedback: Vec<RtcpFeedback>,
    },
    #[serde(rename = "video")]
    Video {
        mime_type: MimeTypeVideo,
        #[serde(skip_serializing_if = "Option::is_none")]
        preferred_payload_type: Option<u8>,
        clock_rate: NonZeroU32,
        #[serde(default)]
        parameters: RtpCodecParametersParameters,
        #[serde(default)]
        rtcp_feedback: Vec<RtcpFeedback>,
    },
}

impl RtpCodecCapability {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Audio { .. } => MediaKind::Audio,
            Self::Video { .. } => MediaKind::Video,
        }
    }

    pub fn mime_type_str(&self) -> &'static str {
        match self {
            Self::Audio { mime_type, .. } => mime_type.as_str(),
            Self::Video { mime_type, .. } => mime_type.as_str(),
        }
    }

    pub fn clock_rate(&self) -> u32 {
        match self {
            Self::Audio { clock_rate, .. } => clock_rate.get(),
            Self::Video { clock_rate, .. } => clock_rate.get(),
        }
    }

    pub fn preferred_payload_type(&self) -> Option<u8> {
        match self {
            Self::Audio {
                preferred_payload_type,
                ..
            }
            | Self::Video {
                preferred_payload_type,
                ..
            } => *preferred_payload_type,
        }
    }

    pub fn set_preferred_payload_type(&mut self, payload_type: u8) {
        match self {
            Self::Audio {
                preferred_payload_type,
                ..
            }
            | Self::Video {
                preferred_payload_type,
                ..
            } => *preferred_payload_type = Some(payload_type),
        }
    }

    pub fn parameters(&self) -> &RtpCodecParametersParameters {
        match self {
            Self::Audio { parameters, .. } | Self::Video { parameters, .. } => parameters,
        }
    }

    /// Merges operator-supplied parameters (e.g. a non-default `profile-level-id`) on top of the
    /// built-in supported codec's defaults.
    pub fn merge_parameters(&mut self, other: &RtpCodecParametersParameters) {
        match self {
            Self::Audio { parameters, .. } | Self::Video { parameters, .. } => {
                parameters.merge_from(other)
            }
        }
    }

    pub fn rtcp_feedback(&self) -> &[RtcpFeedback] {
        match self {
            Self::Audio { rtcp_feedback, .. } | Self::Video { rtcp_feedback, .. } => rtcp_feedback,
        }
    }

    pub fn is_rtx(&self) -> bool {
        matches!(
            self,
            Self::Video {
                mime_type: MimeTypeVideo::RTX,
                ..
            }
        )
    }
}

/// Direction of an RTP header extension.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RtpHeaderExtensionDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

/// URI of a well-known RTP header extension (the subset ORTC matching cares about by name).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum RtpHeaderExtensionUri {
    #[serde(rename = "urn:ietf:params:rtp-hdrext:sdes:mid")]
    Mid,
    #[serde(rename = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time")]
    AbsSendTime,
    #[serde(rename = "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01")]
    TransportWideCc01,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    pub uri: RtpHeaderExtensionUri,
    pub preferred_id: u16,
    #[serde(default)]
    pub preferred_encrypt: bool,
    pub direction: RtpHeaderExtensionDirection,
}

/// What a remote endpoint says it can receive/decode.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
    #[serde(default)]
    pub fec_mechanisms: Vec<String>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct RtpEncodingParametersRtx {
    pub ssrc: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_payload_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtx: Option<RtpEncodingParametersRtx>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtx: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtensionParameters {
    pub uri: RtpHeaderExtensionUri,
    pub id: u16,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default = "default_true")]
    pub reduced_size: bool,
    #[serde(default = "default_true")]
    pub mux: bool,
}

fn default_true() -> bool {
    true
}

/// A codec entry within an endpoint's or producer's RTP parameters: carries a concrete
/// `payload_type` (unlike [`RtpCodecCapability`], which only has a *preferred* one).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind")]
pub enum RtpCodecParameters {
    #[serde(rename = "audio")]
    Audio {
        mime_type: MimeTypeAudio,
        payload_type: u8,
        clock_rate: NonZeroU32,
        channels: NonZeroU8,
        #[serde(default)]
        parameters: RtpCodecParametersParameters,
        #[serde(default)]
        rtcp_feedback: Vec<RtcpFeedback>,
    },
    #[serde(rename = "video")]
    Video {
        mime_type: MimeTypeVideo,
        payload_type: u8,
        clock_rate: NonZeroU32,
        #[serde(default)]
        parameters: RtpCodecParametersParameters,
        #[serde(default)]
        rtcp_feedback: Vec<RtcpFeedback>,
    },
}

impl RtpCodecParameters {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Audio { .. } => MediaKind::Audio,
            Self::Video { .. } => MediaKind::Video,
        }
    }

    pub fn mime_type_str(&self) -> &'static str {
        match self {
            Self::Audio { mime_type, .. } => mime_type.as_str(),
            Self::Video { mime_type, .. } => mime_type.as_str(),
        }
    }

    pub fn payload_type(&self) -> u8 {
        match self {
            Self::Audio { payload_type, .. } | Self::Video { payload_type, .. } => *payload_type,
        }
    }

    pub fn clock_rate(&self) -> u32 {
        match self {
            Self::Audio { clock_rate, .. } => clock_rate.get(),
            Self::Video { clock_rate, .. } => clock_rate.get(),
        }
    }

    pub fn channels(&self) -> Option<u8> {
        match self {
            Self::Audio { channels, .. } => Some(channels.get()),
            Self::Video { .. } => None,
        }
    }

    pub fn parameters(&self) -> &RtpCodecParametersParameters {
        match self {
            Self::Audio { parameters, .. } | Self::Video { parameters, .. } => parameters,
        }
    }

    pub fn parameters_mut(&mut self) -> &mut RtpCodecParametersParameters {
        match self {
            Self::Audio { parameters, .. } | Self::Video { parameters, .. } => parameters,
        }
    }

    pub fn rtcp_feedback(&self) -> &[RtcpFeedback] {
        match self {
            Self::Audio { rtcp_feedback, .. } | Self::Video { rtcp_feedback, .. } => rtcp_feedback,
        }
    }

    pub fn rtcp_feedback_mut(&mut self) -> &mut Vec<RtcpFeedback> {
        match self {
            Self::Audio { rtcp_feedback, .. } | Self::Video { rtcp_feedback, .. } => rtcp_feedback,
        }
    }

    pub fn is_rtx(&self) -> bool {
        matches!(
            self,
            Self::Video {
                mime_type: MimeTypeVideo::RTX,
                ..
            }
        )
    }

    pub fn set_payload_type(&mut self, payload_type: u8) {
        match self {
            Self::Audio { payload_type: pt, .. } | Self::Video { payload_type: pt, .. } => {
                *pt = payload_type
            }
        }
    }
}

/// RTP parameters of one side of a media stream: what a producer sends, or what a consumer
/// receives.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtcp: Option<RtcpParameters>,
}
