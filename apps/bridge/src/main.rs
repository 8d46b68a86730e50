use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use rand::{distributions::Alphanumeric, Rng};
use tracing::info;

use bridge_core::{
    media::CommandLineTranscoder, AccountRegistry, AudioTranscoder, EngineOptions, EventStore,
    MissingAudioTranscoder, MissingRemoteConnector, PuppetBridge,
};
use shared::{domain::PuppetId, protocol::ReceiveParams};
use storage::Storage;

mod config;

#[derive(Parser, Debug)]
#[command(about = "Matrix puppet bridge for QQ")]
struct Args {
    /// Generate the appservice registration file and exit.
    #[arg(short, long)]
    register: bool,
    #[arg(short = 'f', long, default_value = "qq-registration.yaml")]
    registration_file: PathBuf,
    #[arg(short, long, default_value = "bridge.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();
    let settings = config::load_settings(&args.config);

    if args.register {
        std::fs::write(&args.registration_file, render_registration(&settings))
            .with_context(|| {
                format!(
                    "failed to write registration file {}",
                    args.registration_file.display()
                )
            })?;
        println!(
            "wrote appservice registration to {}",
            args.registration_file.display()
        );
        return Ok(());
    }

    let database_url = config::normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await?;
    storage.health_check().await?;
    info!(database_url = %database_url, "event store ready");

    let store: Arc<dyn EventStore> = Arc::new(storage);
    let _registry = AccountRegistry::new_with_dependencies(
        Arc::new(LoggingBridge),
        store,
        Arc::new(MissingRemoteConnector),
        build_transcoder(&settings),
        EngineOptions::default(),
        PathBuf::from(&settings.media_dir),
    );
    info!(
        bind_address = %settings.bind_address,
        port = settings.port,
        "bridge core initialized"
    );

    println!("Appservice HTTP transport wiring is TODO in this minimal skeleton.");
    Ok(())
}

fn build_transcoder(settings: &config::Settings) -> Arc<dyn AudioTranscoder> {
    match (
        &settings.ffmpeg,
        &settings.silk_encoder,
        &settings.silk_decoder,
    ) {
        (Some(ffmpeg), Some(encoder), Some(decoder)) => Arc::new(CommandLineTranscoder {
            ffmpeg: ffmpeg.into(),
            silk_encoder: encoder.into(),
            silk_decoder: decoder.into(),
            work_dir: PathBuf::from(&settings.media_dir).join("transcode"),
        }),
        _ => {
            info!("ffmpeg/silk binaries not configured, voice messages degrade to files");
            Arc::new(MissingAudioTranscoder)
        }
    }
}

fn render_registration(settings: &config::Settings) -> String {
    let as_token = random_token();
    let hs_token = random_token();
    format!(
        "id: qq-puppet\n\
         url: http://{bind}:{port}\n\
         as_token: {as_token}\n\
         hs_token: {hs_token}\n\
         sender_localpart: _qq_bot\n\
         rate_limited: false\n\
         namespaces:\n\
           users:\n\
             - exclusive: true\n\
               regex: '@_qq_.*'\n\
           rooms: []\n\
           aliases: []\n",
        bind = settings.bind_address,
        port = settings.port,
    )
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// Dry-run adapter: logs every local-network call instead of talking to a
/// homeserver. Stands in until the appservice transport is wired up.
struct LoggingBridge;

#[async_trait]
impl PuppetBridge for LoggingBridge {
    async fn send_message(&self, params: &ReceiveParams, body: &str) -> Result<()> {
        info!(room_id = %params.room.room_id, body, "bridge: message");
        Ok(())
    }

    async fn send_image(&self, params: &ReceiveParams, url: &str) -> Result<()> {
        info!(room_id = %params.room.room_id, url, "bridge: image");
        Ok(())
    }

    async fn send_file(&self, params: &ReceiveParams, url: &str, filename: &str) -> Result<()> {
        info!(room_id = %params.room.room_id, url, filename, "bridge: file");
        Ok(())
    }

    async fn send_audio(&self, params: &ReceiveParams, url: &str) -> Result<()> {
        info!(room_id = %params.room.room_id, url, "bridge: audio");
        Ok(())
    }

    async fn send_reaction(
        &self,
        params: &ReceiveParams,
        remote_event_id: &str,
        text: &str,
    ) -> Result<()> {
        info!(room_id = %params.room.room_id, remote_event_id, text, "bridge: reaction");
        Ok(())
    }

    async fn remove_all_reactions(
        &self,
        params: &ReceiveParams,
        remote_event_id: &str,
    ) -> Result<()> {
        info!(room_id = %params.room.room_id, remote_event_id, "bridge: clear reactions");
        Ok(())
    }

    async fn send_read_receipt(&self, params: &ReceiveParams) -> Result<()> {
        info!(room_id = %params.room.room_id, event_id = ?params.event_id, "bridge: read receipt");
        Ok(())
    }

    async fn send_status_message(&self, puppet_id: PuppetId, text: &str) -> Result<()> {
        info!(puppet_id = puppet_id.0, text, "bridge: status notice");
        Ok(())
    }

    async fn set_user_id(&self, puppet_id: PuppetId, remote_account_id: &str) -> Result<()> {
        info!(puppet_id = puppet_id.0, remote_account_id, "bridge: set user id");
        Ok(())
    }
}
