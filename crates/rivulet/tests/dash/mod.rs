use rivulet::{
    dash::{manifest, DashSource, RepresentationKey},
    HttpClient, RivuletError, StreamOptions, StreamReader,
};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::read_to_end;

async fn setup_mock_server(manifest: &str) -> (String, MockServer) {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(manifest))
        .mount(&mock_server)
        .await;

    (format!("{}/manifest.mpd", mock_server.uri()), mock_server)
}

async fn mock_media(server: &MockServer, mock_path: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(mock_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

fn video_key() -> RepresentationKey {
    RepresentationKey {
        id: "video".to_string(),
        mime_type: "video/mp4".to_string(),
    }
}

#[tokio::test]
async fn test_static_segment_list_end_to_end() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/dash/static-list.mpd");
    let (uri, server) = setup_mock_server(data).await;
    mock_media(&server, "/init.mp4", b"II").await;
    mock_media(&server, "/chunk-0.m4s", b"aa").await;
    mock_media(&server, "/chunk-1.m4s", b"bb").await;

    let options = StreamOptions::default();
    let source = DashSource::new(
        HttpClient::default(),
        uri.parse()?,
        video_key(),
        options.clone(),
    );
    let mut reader = StreamReader::open(source, &options).await?;

    let bytes = read_to_end(&mut reader).await;
    assert_eq!(
        bytes, b"IIaabb",
        "the init segment precedes the first chunk, then end-of-stream"
    );
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_static_template_enumerates_by_duration() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/dash/static-template.mpd");
    let (uri, server) = setup_mock_server(data).await;
    mock_media(&server, "/seg-1.m4s", b"aa").await;
    mock_media(&server, "/seg-2.m4s", b"bb").await;

    let options = StreamOptions::default().segment_threads(2);
    let source = DashSource::new(
        HttpClient::default(),
        uri.parse()?,
        video_key(),
        options.clone(),
    );
    let mut reader = StreamReader::open(source, &options).await?;

    let bytes = read_to_end(&mut reader).await;
    assert_eq!(bytes, b"aabb");
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_missing_representation_is_fatal() {
    let data = include_str!("../fixtures/dash/static-list.mpd");
    let (uri, _server) = setup_mock_server(data).await;

    let options = StreamOptions::default();
    let source = DashSource::new(
        HttpClient::default(),
        uri.parse().unwrap(),
        RepresentationKey {
            id: "nope".to_string(),
            mime_type: "video/mp4".to_string(),
        },
        options.clone(),
    );
    let result = StreamReader::open(source, &options).await;
    assert!(matches!(result, Err(RivuletError::NoRepresentation(_))));
}

#[tokio::test]
async fn test_manifest_parsing_selects_representations() -> anyhow::Result<()> {
    let manifest_xml = r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT4S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <Representation id="v_low" bandwidth="400000"/>
      <Representation id="v_high" bandwidth="1600000"/>
    </AdaptationSet>
    <AdaptationSet contentType="audio" mimeType="audio/mp4" lang="en">
      <Representation id="a_en" bandwidth="128000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let (uri, _server) = setup_mock_server(manifest_xml).await;

    let url: reqwest::Url = uri.parse()?;
    let mpd = manifest::load_manifest(&HttpClient::default(), &url).await?;
    let streams = manifest::collect_streams(&mpd, &url)?;

    assert_eq!(manifest::select_video(&streams).unwrap().key.id, "v_high");
    assert_eq!(
        manifest::select_audio(&streams, Some("en-GB")).unwrap().key.id,
        "a_en"
    );
    Ok(())
}
