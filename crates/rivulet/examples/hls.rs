use std::time::Duration;

use rivulet::{hls::HlsSource, HttpClient, StreamOptions, StreamReader};
use tokio::io::AsyncWriteExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .expect("usage: hls <media-playlist-url>");

    let options = StreamOptions::default()
        .segment_threads(2)
        .stream_timeout(Duration::from_secs(30));
    let source = HlsSource::new(HttpClient::default(), url.parse()?, options.clone());
    let mut reader = StreamReader::open(source, &options).await?;

    let mut stdout = tokio::io::stdout();
    loop {
        let chunk = reader.read(64 * 1024).await?;
        if chunk.is_empty() {
            break;
        }
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;
    reader.close().await;

    Ok(())
}
