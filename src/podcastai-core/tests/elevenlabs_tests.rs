//! ElevenLabs client against a local mock server.

use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use podcastai_core::audio::{AudioFormat, decode_wav};
use podcastai_core::{ElevenLabsSynthesizer, SpeechSynthesizer, SynthesisError, VoiceProfile};

fn julia() -> VoiceProfile {
    VoiceProfile::new("Julia", "voice-julia", 0.35, 0.75, 0.65, true).unwrap()
}

fn client(server: &MockServer) -> ElevenLabsSynthesizer {
    ElevenLabsSynthesizer::new(
        server.uri(),
        "test-key",
        "eleven_multilingual_v2",
        24_000,
        Duration::from_secs(5),
    )
    .unwrap()
}

/// 100 ms of 16-bit little-endian PCM at 24 kHz.
fn pcm_body() -> Vec<u8> {
    (0..2_400i16)
        .flat_map(|i| ((i % 200) * 50).to_le_bytes())
        .collect()
}

async fn respond_with(status: u16, body: &str) -> Result<Vec<u8>, SynthesisError> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-julia"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;
    client(&server).synthesize("Hello", &julia()).await
}

#[tokio::test]
async fn test_pcm_response_is_wrapped_as_wav() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-julia"))
        .and(header("xi-api-key", "test-key"))
        .and(query_param("output_format", "pcm_24000"))
        .and(body_partial_json(serde_json::json!({
            "text": "Hello",
            "model_id": "eleven_multilingual_v2",
            "voice_settings": { "use_speaker_boost": true }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm_body()))
        .expect(1)
        .mount(&server)
        .await;

    let wav = client(&server).synthesize("Hello", &julia()).await.unwrap();
    let audio = decode_wav(&wav).unwrap();
    assert_eq!(audio.format, AudioFormat::new(24_000, 1));
    assert_eq!(audio.frames(), 2_400);
    assert_eq!(audio.duration_ms(), 100);
}

#[tokio::test]
async fn test_rate_limit_and_server_errors_are_retryable() {
    for status in [408, 429, 500, 503] {
        let err = respond_with(status, "try later").await.unwrap_err();
        assert!(err.is_retryable(), "status {status} should be retryable: {err}");
    }
}

#[tokio::test]
async fn test_client_errors_are_permanent() {
    for status in [400, 401, 404, 422] {
        let err = respond_with(status, r#"{"detail":"invalid"}"#)
            .await
            .unwrap_err();
        assert!(!err.is_retryable(), "status {status} should be permanent: {err}");
    }
}

#[tokio::test]
async fn test_error_detail_is_kept() {
    let err = respond_with(401, "invalid api key").await.unwrap_err();
    assert_eq!(
        err,
        SynthesisError::Permanent("HTTP 401 Unauthorized: invalid api key".to_string())
    );
}

#[tokio::test]
async fn test_empty_body_is_retryable() {
    let err = respond_with(200, "").await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_server_is_retryable() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let synth = ElevenLabsSynthesizer::new(
        format!("http://127.0.0.1:{port}"),
        "test-key",
        "eleven_multilingual_v2",
        24_000,
        Duration::from_secs(5),
    )
    .unwrap();

    let err = synth.synthesize("Hello", &julia()).await.unwrap_err();
    assert!(err.is_retryable());
}
