use imgtier_media::{Codec, JpegCodec};
use imgtier_queue::{AmqpChannel, ChannelConfig, TaskChannel};
use imgtier_storage::{open_store, BlobStore, StorageConfig};
use imgtier_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();
    let storage = StorageConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with backend={:?} qualities={:?}",
        storage.backend, config.qualities
    );

    ensure_storage(&storage).await?;
    ensure_codec()?;
    if std::env::var("SELFCHECK_SKIP_BROKER").is_err() {
        ensure_broker().await?;
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_storage(config: &StorageConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    store
        .check_connectivity()
        .await
        .map_err(|e| anyhow::anyhow!("{} store unreachable: {}", store.backend(), e))?;
    Ok(())
}

fn ensure_codec() -> anyhow::Result<()> {
    let probe = image::DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));
    let mut png = std::io::Cursor::new(Vec::new());
    probe.write_to(&mut png, image::ImageOutputFormat::Png)?;

    let codec = JpegCodec::new();
    codec
        .transcode(png.get_ref(), 50)
        .map_err(|e| anyhow::anyhow!("codec probe failed: {}", e))?;
    Ok(())
}

async fn ensure_broker() -> anyhow::Result<()> {
    let channel = AmqpChannel::open(ChannelConfig::from_env())
        .await
        .map_err(|e| anyhow::anyhow!("broker unreachable: {}", e))?;
    channel.close().await?;
    Ok(())
}
