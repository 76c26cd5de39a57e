//! Typed configuration the engine needs to construct [`crate::worker::WorkerSettings`],
//! [`crate::router::RouterOptions`] and [`crate::router::webrtc_server::WebRtcServerOptions`].
//!
//! The core crate never reads a config file or the process environment itself (`spec.md` §6
//! leaves CLI/file IO to the outer binary); callers `serde_json::from_reader` straight into
//! [`Config`] and call [`Config::apply_env_overrides`] with whatever environment map they see
//! fit to pass in, which keeps this crate testable without touching real process state.

use crate::data_structures::{AppData, ListenInfo};
use crate::router::plain_transport::SrtpCryptoSuite;
use crate::router::webrtc_server::WebRtcServerOptions;
use crate::router::RouterOptions;
use crate::rtp_parameters::RtpCodecCapability;
use crate::sctp_parameters::NumSctpStreams;
use crate::worker::{WorkerLogLevel, WorkerLogTag, WorkerSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub mediasoup: MediasoupConfig,
    /// Address the signaling listener advertises to peers; overridable by `EXTERNAL_ADDRESS`.
    #[serde(default)]
    pub external_address: Option<String>,
    /// Port the signaling listener advertises to peers; overridable by `EXTERNAL_PORT`.
    #[serde(default)]
    pub external_port: Option<u16>,
    /// TLS private key path; overridable by `TLS_FILE_PRIVATE_KEY`.
    #[serde(default)]
    pub tls_file_private_key: Option<PathBuf>,
    /// TLS certificate chain path; overridable by `TLS_FILE_CERT_CHAIN`.
    #[serde(default)]
    pub tls_file_cert_chain: Option<PathBuf>,
    /// Path the outer binary serves room statistics on; overridable by `URL_STATS_PATH`.
    #[serde(default)]
    pub url_stats_path: Option<String>,
}

impl Config {
    /// Applies the environment-variable overrides named in `spec.md` §6. Callers pass
    /// `std::env::vars().collect()` (or a subset, in tests); the core crate never touches the
    /// process environment directly.
    pub fn apply_env_overrides(&mut self, env: &HashMap<String, String>) {
        if let Some(value) = env.get("EXTERNAL_ADDRESS") {
            self.external_address = Some(value.clone());
        }
        if let Some(value) = env.get("EXTERNAL_PORT") {
            if let Ok(port) = value.parse() {
                self.external_port = Some(port);
            }
        }
        if let Some(value) = env.get("TLS_FILE_PRIVATE_KEY") {
            self.tls_file_private_key = Some(PathBuf::from(value));
        }
        if let Some(value) = env.get("TLS_FILE_CERT_CHAIN") {
            self.tls_file_cert_chain = Some(PathBuf::from(value));
        }
        if let Some(value) = env.get("URL_STATS_PATH") {
            self.url_stats_path = Some(value.clone());
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediasoupConfig {
    /// Number of worker processes to spawn (`spec.md` §4.6's `N`); defaults to 1 if unset.
    #[serde(default)]
    pub num_workers: Option<u16>,
    pub worker: WorkerSettingsConfig,
    pub router: RouterOptionsConfig,
    /// Present iff single-port WebRTC mode is enabled for the pool.
    #[serde(default)]
    pub webrtc_server: Option<WebRtcServerOptionsConfig>,
    pub webrtc_transport: WebRtcTransportOptionsConfig,
    pub plain_transport: PlainTransportOptionsConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSettingsConfig {
    #[serde(default)]
    pub log_level: WorkerLogLevelConfig,
    #[serde(default)]
    pub log_tags: Vec<WorkerLogTagConfig>,
    #[serde(default = "default_rtc_min_port")]
    pub rtc_min_port: u16,
    #[serde(default = "default_rtc_max_port")]
    pub rtc_max_port: u16,
    #[serde(default)]
    pub dtls_certificate_file: Option<PathBuf>,
    #[serde(default)]
    pub dtls_private_key_file: Option<PathBuf>,
}

fn default_rtc_min_port() -> u16 {
    10000
}

fn default_rtc_max_port() -> u16 {
    59999
}

impl WorkerSettingsConfig {
    pub fn into_settings(self) -> WorkerSettings {
        WorkerSettings {
            app_data: AppData::default(),
            log_level: self.log_level.into(),
            log_tags: self.log_tags.into_iter().map(Into::into).collect(),
            rtc_min_port: self.rtc_min_port,
            rtc_max_port: self.rtc_max_port,
            dtls_certificate_file: self.dtls_certificate_file,
            dtls_private_key_file: self.dtls_private_key_file,
        }
    }
}

/// Mirrors [`WorkerLogLevel`] for config deserialization; `WorkerLogLevel` itself is
/// serialize-only (it's only ever sent to the worker, never read back).
#[derive(Debug, Copy, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerLogLevelConfig {
    Debug,
    Warn,
    #[default]
    Error,
    None,
}

impl From<WorkerLogLevelConfig> for WorkerLogLevel {
    fn from(value: WorkerLogLevelConfig) -> Self {
        match value {
            WorkerLogLevelConfig::Debug => WorkerLogLevel::Debug,
            WorkerLogLevelConfig::Warn => WorkerLogLevel::Warn,
            WorkerLogLevelConfig::Error => WorkerLogLevel::Error,
            WorkerLogLevelConfig::None => WorkerLogLevel::None,
        }
    }
}

#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerLogTagConfig {
    Info,
    Ice,
    Dtls,
    Rtp,
    Srtp,
    Rtcp,
    Rtx,
    Bwe,
    Score,
    Simulcast,
    Svc,
    Sctp,
    Message,
}

impl From<WorkerLogTagConfig> for WorkerLogTag {
    fn from(value: WorkerLogTagConfig) -> Self {
        match value {
            WorkerLogTagConfig::Info => WorkerLogTag::Info,
            WorkerLogTagConfig::Ice => WorkerLogTag::Ice,
            WorkerLogTagConfig::Dtls => WorkerLogTag::Dtls,
            WorkerLogTagConfig::Rtp => WorkerLogTag::Rtp,
            WorkerLogTagConfig::Srtp => WorkerLogTag::Srtp,
            WorkerLogTagConfig::Rtcp => WorkerLogTag::Rtcp,
            WorkerLogTagConfig::Rtx => WorkerLogTag::Rtx,
            WorkerLogTagConfig::Bwe => WorkerLogTag::Bwe,
            WorkerLogTagConfig::Score => WorkerLogTag::Score,
            WorkerLogTagConfig::Simulcast => WorkerLogTag::Simulcast,
            WorkerLogTagConfig::Svc => WorkerLogTag::Svc,
            WorkerLogTagConfig::Sctp => WorkerLogTag::Sctp,
            WorkerLogTagConfig::Message => WorkerLogTag::Message,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterOptionsConfig {
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl RouterOptionsConfig {
    pub fn into_options(self) -> RouterOptions {
        RouterOptions::new(self.media_codecs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcServerOptionsConfig {
    pub listen_infos: Vec<ListenInfo>,
}

impl WebRtcServerOptionsConfig {
    pub fn into_options(self) -> WebRtcServerOptions {
        WebRtcServerOptions::new(self.listen_infos)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcTransportOptionsConfig {
    pub listen_infos: Vec<ListenInfo>,
    #[serde(default = "default_initial_outgoing_bitrate")]
    pub initial_available_outgoing_bitrate: u32,
    #[serde(default)]
    pub enable_sctp: bool,
    #[serde(default)]
    pub num_sctp_streams: NumSctpStreams,
    #[serde(default = "default_sctp_message_size")]
    pub max_sctp_message_size: u32,
}

fn default_initial_outgoing_bitrate() -> u32 {
    600_000
}

fn default_sctp_message_size() -> u32 {
    262_144
}

impl WebRtcTransportOptionsConfig {
    pub fn into_options(self) -> crate::router::webrtc_transport::WebRtcTransportOptions {
        let mut options = crate::router::webrtc_transport::WebRtcTransportOptions::new(self.listen_infos);
        options.initial_available_outgoing_bitrate = self.initial_available_outgoing_bitrate;
        options.enable_sctp = self.enable_sctp;
        options.num_sctp_streams = self.num_sctp_streams;
        options.max_sctp_message_size = self.max_sctp_message_size;
        options
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainTransportOptionsConfig {
    pub listen_info: ListenInfo,
    #[serde(default)]
    pub rtcp_mux: bool,
    #[serde(default)]
    pub comedia: bool,
    #[serde(default)]
    pub enable_srtp: bool,
    #[serde(default)]
    pub srtp_crypto_suite: SrtpCryptoSuite,
}

impl PlainTransportOptionsConfig {
    pub fn into_options(self) -> crate::router::plain_transport::PlainTransportOptions {
        let mut options = crate::router::plain_transport::PlainTransportOptions::new(self.listen_info);
        options.rtcp_mux = self.rtcp_mux;
        options.comedia = self.comedia;
        options.enable_srtp = self.enable_srtp;
        options.srtp_crypto_suite = self.srtp_crypto_suite;
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_apply_only_to_present_keys() {
        let mut config = Config::default();
        let mut env = HashMap::new();
        env.insert("EXTERNAL_ADDRESS".to_string(), "203.0.113.9".to_string());
        env.insert("EXTERNAL_PORT".to_string(), "4443".to_string());

        config.apply_env_overrides(&env);

        assert_eq!(config.external_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(config.external_port, Some(4443));
        assert!(config.tls_file_cert_chain.is_none());
    }
}
