mod webrtc_transport {
    use futures_lite::future;
    use sfu_core::data_structures::{AppData, ListenInfo, TransportProtocol};
    use sfu_core::router::webrtc_transport::{
        DtlsState, IceCandidateType, IceState, SctpState, WebRtcTransportOptions,
    };
    use sfu_core::router::{Router, RouterOptions};
    use sfu_core::rtp_parameters::{
        MimeTypeAudio, MimeTypeVideo, RtpCodecCapability, RtpCodecParametersParameters,
    };
    use sfu_core::sctp_parameters::{NumSctpStreams, SctpParameters};
    use sfu_core::worker::WorkerSettings;
    use sfu_core::worker_manager::WorkerManager;
    use std::env;
    use std::net::IpAddr;
    use std::num::{NonZeroU32, NonZeroU8};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn media_codecs() -> Vec<RtpCodecCapability> {
        let mut opus_parameters = RtpCodecParametersParameters::new();
        opus_parameters.insert("useinbandfec", 1u32);
        opus_parameters.insert("foo", "bar");

        let mut h264_parameters = RtpCodecParametersParameters::new();
        h264_parameters.insert("level-asymmetry-allowed", 1u32);
        h264_parameters.insert("packetization-mode", 1u32);
        h264_parameters.insert("profile-level-id", "4d0032");
        h264_parameters.insert("foo", "bar");

        vec![
            RtpCodecCapability::Audio {
                mime_type: MimeTypeAudio::Opus,
                preferred_payload_type: None,
                clock_rate: NonZeroU32::new(48000).unwrap(),
                channels: NonZeroU8::new(2).unwrap(),
                parameters: opus_parameters,
                rtcp_feedback: vec![],
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::VP8,
                preferred_payload_type: None,
                clock_rate: NonZeroU32::new(90000).unwrap(),
                parameters: RtpCodecParametersParameters::new(),
                rtcp_feedback: vec![],
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::H264,
                preferred_payload_type: None,
                clock_rate: NonZeroU32::new(90000).unwrap(),
                parameters: h264_parameters,
                rtcp_feedback: vec![],
            },
        ]
    }

    async fn init() -> (WorkerManager, Router) {
        {
            let mut builder = env_logger::builder();
            if env::var(env_logger::DEFAULT_FILTER_ENV).is_err() {
                builder.filter_level(log::LevelFilter::Off);
            }
            let _ = builder.is_test(true).try_init();
        }

        let executor = Arc::new(async_executor::Executor::new());
        let worker_binary = env::var("MEDIASOUP_WORKER_BIN")
            .map(|path| path.into())
            .unwrap_or_else(|_| "../worker/out/Release/mediasoup-worker".into());

        let worker_manager =
            WorkerManager::new_uniform(executor, worker_binary, 1, WorkerSettings::default())
                .await
                .expect("Failed to start worker manager");

        let router = worker_manager
            .create_router(RouterOptions::new(media_codecs()))
            .await
            .expect("Failed to create router");

        (worker_manager, router)
    }

    #[test]
    fn create_webrtc_transport_succeeds() {
        future::block_on(async move {
            let (_worker_manager, router) = init().await;

            {
                let _transport = router
                    .create_webrtc_transport(WebRtcTransportOptions::new(vec![ListenInfo {
                        protocol: TransportProtocol::Udp,
                        ip: "127.0.0.1".to_string(),
                        announced_ip: Some("9.9.9.1".parse().unwrap()),
                        port: None,
                    }]))
                    .await
                    .expect("Failed to create WebRTC transport");
            }

            {
                let new_transports_count = Arc::new(AtomicUsize::new(0));

                router
                    .on_new_transport({
                        let new_transports_count = Arc::clone(&new_transports_count);

                        move |_transport_id| {
                            new_transports_count.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .detach();

                let transport1 = router
                    .create_webrtc_transport({
                        let mut webrtc_transport_options = WebRtcTransportOptions::new(vec![
                            ListenInfo {
                                protocol: TransportProtocol::Udp,
                                ip: "127.0.0.1".to_string(),
                                announced_ip: Some("9.9.9.1".parse().unwrap()),
                                port: None,
                            },
                            ListenInfo {
                                protocol: TransportProtocol::Udp,
                                ip: "0.0.0.0".to_string(),
                                announced_ip: Some("9.9.9.2".parse().unwrap()),
                                port: None,
                            },
                            ListenInfo {
                                protocol: TransportProtocol::Tcp,
                                ip: "127.0.0.1".to_string(),
                                announced_ip: None,
                                port: None,
                            },
                        ]);
                        webrtc_transport_options.enable_sctp = true;
                        webrtc_transport_options.num_sctp_streams =
                            NumSctpStreams { os: 2048, mis: 2048 };
                        webrtc_transport_options.max_sctp_message_size = 1_000_000;
                        webrtc_transport_options.app_data =
                            AppData::new(serde_json::json!({ "foo": "bar" }));

                        webrtc_transport_options
                    })
                    .await
                    .expect("Failed to create WebRTC transport");

                assert_eq!(new_transports_count.load(Ordering::SeqCst), 1);
                assert_eq!(
                    transport1.app_data().get("foo").and_then(|value| value.as_str()),
                    Some("bar"),
                );
                assert!(transport1.ice_parameters().ice_lite);
                assert_eq!(
                    transport1.sctp_parameters(),
                    Some(SctpParameters {
                        port: 5000,
                        os: 2048,
                        mis: 2048,
                        max_message_size: 1_000_000,
                    }),
                );

                let ice_candidates = transport1.ice_candidates();
                assert!(!ice_candidates.is_empty());
                assert_eq!(ice_candidates[0].ip, "9.9.9.1".parse::<IpAddr>().unwrap());
                assert_eq!(ice_candidates[0].r#type, IceCandidateType::Host);

                assert_eq!(transport1.ice_state(), IceState::New);
                assert_eq!(transport1.dtls_parameters().role, None);
                assert_eq!(transport1.dtls_state(), DtlsState::New);
                assert_eq!(transport1.sctp_state(), Some(SctpState::New));
            }
        });
    }
}
