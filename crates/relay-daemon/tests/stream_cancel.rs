//! Verifies that dropping the response body for an in-flight stream kills
//! the transcoder's whole process group promptly, instead of leaking a
//! child process behind a disconnected client.
//!
//! Stands a fake "ffmpeg" in for the real binary via `FFMPEG_PATH`: a
//! long-running script that ignores nothing, so the only way it exits is
//! the relay's kill sequence.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use relay_daemon::auth::AuthClient;
use relay_daemon::endpoints::Endpoints;
use relay_daemon::stream::{self, PlayQuery};
use relay_proto::config::StreamConfig;
use relay_proto::model::Station;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_fake_ffmpeg() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("ffmpeg");
    let mut f = std::fs::File::create(&script_path).unwrap();
    // Sleeps well past the test's patience; only SIGTERM/SIGKILL end it.
    writeln!(f, "#!/bin/sh").unwrap();
    writeln!(f, "trap '' TERM").unwrap();
    writeln!(f, "while true; do printf 'x'; sleep 0.05; done").unwrap();
    drop(f);
    std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
    dir
}

fn station() -> Station {
    Station {
        station_id: "TBS".to_string(),
        ascii_name: "TBS".to_string(),
        display_name: "TBS RADIO".to_string(),
        region_name: "Kanto".to_string(),
        area_id: "JP13".to_string(),
        area_display: "Tokyo".to_string(),
        banner_url: None,
        logo_url: None,
        areafree_flag: false,
        timefree_flag: true,
    }
}

fn stream_config() -> StreamConfig {
    StreamConfig {
        delay_sec: 20,
        aa_type: relay_proto::config::AlbumArtType::ProgramThenLogo,
        timeshift_past_days: 7,
        timeshift_future_days: 0,
    }
}

#[tokio::test]
async fn dropping_the_body_reaps_the_transcoder_within_two_seconds() {
    let ffmpeg_dir = write_fake_ffmpeg();
    std::env::set_var("FFMPEG_PATH", ffmpeg_dir.path().join("ffmpeg"));

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/api/auth1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-radiko-authtoken", "tok")
                .insert_header("x-radiko-keyoffset", "0")
                .insert_header("x-radiko-keylength", "16"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/api/auth2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("JP13,TOKYO,1,1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/api/ts/playlist.m3u8"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("#EXTM3U\n{}/chunk.m3u8\n", server.uri().replace("http", "https"))),
        )
        .mount(&server)
        .await;

    let endpoints = Endpoints::new(server.uri());
    let auth = AuthClient::with_endpoints(endpoints.clone());
    auth.refresh().await.expect("handshake should succeed against the mock");

    let process = stream::start(
        &reqwest::Client::new(),
        &auth,
        &endpoints,
        &stream_config(),
        &station(),
        PlayQuery::default(),
    )
    .await
    .expect("transcoder should spawn against the fake ffmpeg");

    let ffmpeg_path_str = ffmpeg_dir.path().join("ffmpeg").to_string_lossy().to_string();
    let body = process.into_body();

    // Give the fake ffmpeg a moment to actually start before we simulate a
    // client disconnect by dropping its body.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let running_before_drop = std::process::Command::new("pgrep")
        .arg("-f")
        .arg(&ffmpeg_path_str)
        .output()
        .map(|o| !o.stdout.is_empty())
        .unwrap_or(false);
    assert!(running_before_drop, "fake ffmpeg should be running before the body is dropped");

    drop(body);
    tokio::time::sleep(std::time::Duration::from_millis(2000)).await;

    let alive = std::process::Command::new("pgrep")
        .arg("-f")
        .arg(&ffmpeg_path_str)
        .output()
        .map(|o| !o.stdout.is_empty())
        .unwrap_or(false);

    assert!(!alive, "fake ffmpeg should have been killed within 2s of the stream dropping");

    std::env::remove_var("FFMPEG_PATH");
}
