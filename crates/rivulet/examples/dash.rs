use rivulet::{
    dash::{manifest, DashSource},
    HttpClient, StreamOptions, StreamReader,
};
use tokio::io::AsyncWriteExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url: reqwest::Url = std::env::args()
        .nth(1)
        .expect("usage: dash <mpd-url>")
        .parse()?;

    let client = HttpClient::default();
    let mpd = manifest::load_manifest(&client, &url).await?;
    let streams = manifest::collect_streams(&mpd, &url)?;
    let video = manifest::select_video(&streams).expect("no video representation in manifest");
    eprintln!("selected representation: {} @ {} bps", video.key.id, video.bandwidth);

    let options = StreamOptions::default();
    let source = DashSource::new(client, url, video.key.clone(), options.clone());
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
