use super::defaults::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use super::validation::sanitize_voice;
use super::{AppConfig, EngineConfig, DEFAULT_MODEL, DEFAULT_VOICE};
use clap::Parser;

fn parse(args: &[&str]) -> AppConfig {
    let mut argv = vec!["test-app"];
    argv.extend_from_slice(args);
    AppConfig::parse_from(argv)
}

#[test]
fn defaults_validate() {
    let mut cfg = parse(&[]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.model, DEFAULT_MODEL);
    assert_eq!(cfg.voice, DEFAULT_VOICE);
}

#[test]
fn rejects_block_size_out_of_bounds() {
    let below = (MIN_BLOCK_SIZE - 1).to_string();
    let mut cfg = parse(&["--block-size", &below]);
    assert!(cfg.validate().is_err());

    let above = (MAX_BLOCK_SIZE + 1).to_string();
    let mut cfg = parse(&["--block-size", &above]);
    assert!(cfg.validate().is_err());
}

#[test]
fn accepts_block_size_bounds() {
    let min = MIN_BLOCK_SIZE.to_string();
    let mut cfg = parse(&["--block-size", &min]);
    assert!(cfg.validate().is_ok());

    let max = MAX_BLOCK_SIZE.to_string();
    let mut cfg = parse(&["--block-size", &max]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_negative_volume_gain() {
    let mut cfg = parse(&["--volume-gain=-1"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_outbound_capacity_out_of_bounds() {
    let mut cfg = parse(&["--outbound-capacity", "1"]);
    assert!(cfg.validate().is_err());
    let mut cfg = parse(&["--outbound-capacity", "4096"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_non_websocket_endpoint() {
    let mut cfg = parse(&["--endpoint", "https://example.com/live"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parse(&["--endpoint", " ws://127.0.0.1:9000/live "]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.endpoint, "ws://127.0.0.1:9000/live");
}

#[test]
fn rejects_model_with_whitespace() {
    let mut cfg = parse(&["--model", "models/a b"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn voice_names_are_trimmed_and_checked() {
    assert_eq!(sanitize_voice("  Puck ").unwrap(), "Puck");
    assert!(sanitize_voice("").is_err());
    assert!(sanitize_voice("Kore; rm").is_err());
    assert!(sanitize_voice(&"a".repeat(65)).is_err());
}

#[test]
fn rejects_blank_api_key() {
    let mut cfg = parse(&["--api-key", "   "]);
    assert!(cfg.validate().is_err());
}

#[test]
fn session_config_requires_api_key() {
    let mut cfg = parse(&[]);
    cfg.api_key = None;
    assert!(cfg.session_config().is_err());

    cfg.api_key = Some("secret".to_string());
    let session = cfg.session_config().expect("session config");
    assert_eq!(session.credential_token(), "secret");
    assert_eq!(session.persona_voice_id(), DEFAULT_VOICE);
}

#[test]
fn rejects_multiline_device_names() {
    let mut cfg = parse(&["--input-device", "mic\nother"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn engine_config_mirrors_cli_values() {
    let mut cfg = parse(&[
        "--block-size",
        "2048",
        "--volume-gain",
        "10",
        "--transcribe-input",
        "--output-device",
        "Speakers",
    ]);
    cfg.validate().expect("valid config");
    let engine = cfg.engine_config();
    assert_eq!(engine.block_size, 2048);
    assert_eq!(engine.volume_gain, 10.0);
    assert!(engine.transcribe_input);
    assert_eq!(engine.output_device.as_deref(), Some("Speakers"));
    assert_eq!(engine.model, EngineConfig::default().model);
}
