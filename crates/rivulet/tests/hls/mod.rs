use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use rivulet::{
    hls::HlsSource, HttpClient, RivuletError, StreamOptions, StreamReader,
};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, Request, Respond, ResponseTemplate,
};

use crate::{read_exact, read_to_end};

async fn setup_mock_server(playlist: &str) -> (String, MockServer) {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(playlist))
        .mount(&mock_server)
        .await;

    (format!("{}/playlist.m3u8", mock_server.uri()), mock_server)
}

trait HlsMock {
    async fn mock_segment(&self, mock_path: &str, body: impl Into<Vec<u8>>) -> &Self;
}

impl HlsMock for MockServer {
    async fn mock_segment(&self, mock_path: &str, body: impl Into<Vec<u8>>) -> &Self {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into()))
            .mount(self)
            .await;
        self
    }
}

/// Serves one body per request, sticking to the last one once exhausted.
struct RotatingPlaylist {
    bodies: Vec<String>,
    hits: AtomicUsize,
}

impl RotatingPlaylist {
    fn new<S: Into<String>>(bodies: impl IntoIterator<Item = S>) -> Self {
        Self {
            bodies: bodies.into_iter().map(Into::into).collect(),
            hits: AtomicUsize::new(0),
        }
    }
}

impl Respond for RotatingPlaylist {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let hit = self.hits.fetch_add(1, Ordering::SeqCst);
        let body = &self.bodies[hit.min(self.bodies.len() - 1)];
        ResponseTemplate::new(200).set_body_string(body.clone())
    }
}

async fn open(uri: &str, options: StreamOptions) -> Result<StreamReader, RivuletError> {
    let source = HlsSource::new(HttpClient::default(), uri.parse().unwrap(), options.clone());
    StreamReader::open(source, &options).await
}

#[tokio::test]
async fn test_static_playlist_end_to_end() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/hls/static.m3u8");
    let (uri, server) = setup_mock_server(data).await;

    // delay the first segment so later fetches finish earlier in the pool
    Mock::given(method("GET"))
        .and(path("/seg0.ts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"aa".to_vec())
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;
    server.mock_segment("/seg1.ts", *b"bb").await;
    server.mock_segment("/seg2.ts", *b"cc").await;

    let options = StreamOptions::default().segment_threads(2);
    let source = HlsSource::new(HttpClient::default(), uri.parse()?, options.clone());
    let mut reader = StreamReader::open(source, &options).await?;

    let bytes = read_to_end(&mut reader).await;
    assert_eq!(bytes, b"aabbcc", "bytes must arrive in segment order");

    // end-of-stream is sticky
    assert!(reader.read(16).await?.is_empty());
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_live_edge_starts_three_from_the_end() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/hls/live-window.m3u8");
    let (uri, server) = setup_mock_server(data).await;
    for i in 0..10 {
        server
            .mock_segment(&format!("/seg{i}.ts"), format!("s{i}").into_bytes())
            .await;
    }

    let mut reader = open(&uri, StreamOptions::default()).await?;
    let bytes = read_exact(&mut reader, 6).await;
    assert_eq!(bytes, b"s7s8s9", "live playback starts at the live edge");
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_live_restart_starts_at_the_beginning() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/hls/live-window.m3u8");
    let (uri, server) = setup_mock_server(data).await;
    for i in 0..10 {
        server
            .mock_segment(&format!("/seg{i}.ts"), format!("s{i}").into_bytes())
            .await;
    }

    let mut reader = open(&uri, StreamOptions::default().live_restart(true)).await?;
    let bytes = read_exact(&mut reader, 6).await;
    assert_eq!(bytes, b"s0s1s2");
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_live_window_advance_yields_each_segment_once() -> anyhow::Result<()> {
    let window = |first: usize, end: bool| {
        let mut body = format!(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:{first}\n"
        );
        for i in first..first + 2 {
            body.push_str(&format!("#EXTINF:1,\nseg{i}.ts\n"));
        }
        if end {
            body.push_str("#EXT-X-ENDLIST\n");
        }
        body
    };

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/playlist.m3u8"))
        .respond_with(RotatingPlaylist::new([window(0, false), window(1, true)]))
        .mount(&server)
        .await;
    for i in 0..3 {
        server
            .mock_segment(&format!("/seg{i}.ts"), format!("s{i}").into_bytes())
            .await;
    }

    let uri = format!("{}/playlist.m3u8", server.uri());
    let mut reader = open(&uri, StreamOptions::default()).await?;

    let bytes = read_to_end(&mut reader).await;
    assert_eq!(
        bytes, b"s0s1s2",
        "the overlapping segment must not be emitted twice"
    );
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_encrypted_segment_round_trip() -> anyhow::Result<()> {
    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    let material: [u8; 16] = *b"0123456789abcdef";
    let plaintext = b"clear media payload";
    // the playlist declares no IV, so it derives from media sequence 5
    let iv = (5u128).to_be_bytes();
    let ciphertext = Aes128CbcEnc::new((&material).into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let data = include_str!("../fixtures/hls/encrypted.m3u8");
    let (uri, server) = setup_mock_server(data).await;
    server.mock_segment("/key.bin", material.to_vec()).await;
    server.mock_segment("/seg5.ts", ciphertext).await;

    let mut reader = open(&uri, StreamOptions::default()).await?;
    let bytes = read_to_end(&mut reader).await;
    assert_eq!(bytes, plaintext);
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_relative_byte_ranges_continue_from_previous() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/hls/byterange.m3u8");
    let (uri, server) = setup_mock_server(data).await;

    Mock::given(method("GET"))
        .and(path("/media.bin"))
        .and(header("Range", "bytes=0-3"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"AAAA".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media.bin"))
        .and(header("Range", "bytes=4-7"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"BBBB".to_vec()))
        .mount(&server)
        .await;

    let mut reader = open(&uri, StreamOptions::default()).await?;
    let bytes = read_to_end(&mut reader).await;
    assert_eq!(bytes, b"AAAABBBB");
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_ignored_segment_names_are_skipped() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/hls/ignore-names.m3u8");
    let (uri, server) = setup_mock_server(data).await;
    server.mock_segment("/seg0.ts", *b"s0").await;
    server.mock_segment("/seg2.ts", *b"s2").await;
    // ad1.ts is never requested

    let mut reader = open(&uri, StreamOptions::default().ignore_names(["ad1"])).await?;
    let bytes = read_to_end(&mut reader).await;
    assert_eq!(bytes, b"s0s2");
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_multivariant_playlist_is_fatal() {
    let data = include_str!("../fixtures/hls/multivariant.m3u8");
    let (uri, _server) = setup_mock_server(data).await;

    let result = open(&uri, StreamOptions::default()).await;
    assert!(matches!(result, Err(RivuletError::MultivariantPlaylist)));
}

#[tokio::test]
async fn test_iframes_only_playlist_is_fatal() {
    let data = include_str!("../fixtures/hls/iframes-only.m3u8");
    let (uri, _server) = setup_mock_server(data).await;

    let result = open(&uri, StreamOptions::default()).await;
    assert!(matches!(result, Err(RivuletError::IframesOnlyPlaylist)));
}

#[tokio::test]
async fn test_first_load_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let uri = format!("{}/playlist.m3u8", server.uri());
    let result = open(&uri, StreamOptions::default()).await;
    assert!(matches!(result, Err(RivuletError::PlaylistFetchError)));
}

#[tokio::test]
async fn test_duration_limit_stops_the_stream() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/hls/static.m3u8");
    let (uri, server) = setup_mock_server(data).await;
    server.mock_segment("/seg0.ts", *b"aa").await;
    server.mock_segment("/seg1.ts", *b"bb").await;
    server.mock_segment("/seg2.ts", *b"cc").await;

    // each segment is one second long; a 2s cap keeps the first two
    let mut reader = open(&uri, StreamOptions::default().duration_limit(2.0)).await?;
    let bytes = read_to_end(&mut reader).await;
    assert_eq!(bytes, b"aabb");
    reader.close().await;
    Ok(())
}
