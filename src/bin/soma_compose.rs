// soma_compose - BODY organ daemon
// Media composition service accessible via Unix Domain Socket

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use soma_compose::organ::{ComposeOrgan, Organ, Response, Stimulus};
use soma_compose::{CancelHandle, Composer, ComposerConfig, FfmpegEngine};

/// Largest request frame accepted from a client.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "soma_compose", version, about = "SOMA Compose Daemon - FFmpeg Composition Organ")]
struct Args {
    /// Unix socket path for UDS server
    #[arg(long, default_value = "/tmp/soma_compose.sock")]
    socket_path: PathBuf,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Parent directory for per-job scratch space
    #[arg(long)]
    work_root: Option<PathBuf>,

    /// Directory for finished videos
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// ffprobe binary
    #[arg(long)]
    ffprobe: Option<PathBuf>,
}

impl Args {
    async fn load_config(&self) -> Result<ComposerConfig> {
        let mut config = match &self.config {
            Some(path) => ComposerConfig::from_file(path)
                .await
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ComposerConfig::default(),
        };

        if let Some(dir) = &self.work_root {
            config.work_root = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(bin) = &self.ffmpeg {
            config.ffmpeg_bin = bin.clone();
        }
        if let Some(bin) = &self.ffprobe {
            config.ffprobe_bin = bin.clone();
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.load_config().await?;

    info!("Starting SOMA Compose Daemon");
    info!("   Socket: {}", args.socket_path.display());
    info!("   Work root: {}", config.work_root.display());
    info!("   Output dir: {}", config.output_dir.display());

    tokio::fs::create_dir_all(&config.work_root)
        .await
        .context("Failed to create work root")?;
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .context("Failed to create output directory")?;

    let engine = FfmpegEngine::new(&config.ffmpeg_bin, &config.ffprobe_bin);
    match engine.verify().await {
        Ok(()) => info!("   ✓ ffmpeg and ffprobe available"),
        Err(e) => warn!("   {} (compose requests will fail until it is installed)", e),
    }

    let start_time = std::time::Instant::now();
    let composer = Composer::new(Arc::new(engine), config);
    let organ = Arc::new(ComposeOrgan::new(Arc::new(composer)));

    if args.socket_path.exists() {
        std::fs::remove_file(&args.socket_path).context("Failed to remove old socket")?;
    }
    let listener = UnixListener::bind(&args.socket_path).context("Failed to bind Unix socket")?;

    info!("   ✓ Listening on {}", args.socket_path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let organ = Arc::clone(&organ);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, organ, start_time).await {
                        error!("Connection error: {:#}", e);
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

/// Handle a single UDS connection
async fn handle_connection(
    mut stream: UnixStream,
    organ: Arc<ComposeOrgan>,
    start_time: std::time::Instant,
) -> Result<()> {
    let mut buffer = vec![0u8; 65536];

    loop {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_BYTES {
            anyhow::bail!("Request frame of {} bytes exceeds limit", len);
        }
        if len > buffer.len() {
            buffer.resize(len, 0);
        }
        stream.read_exact(&mut buffer[..len]).await?;

        let stimulus: Stimulus =
            serde_json::from_slice(&buffer[..len]).context("Failed to parse stimulus")?;

        debug!("Received: op={}", stimulus.op);

        let response = if stimulus.op == "health" || stimulus.op == "health.check" {
            Response {
                ok: true,
                output: serde_json::json!({
                    "status": "healthy",
                    "organ": "soma_compose",
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime_ms": start_time.elapsed().as_millis() as u64,
                }),
                latency_ms: 0,
                cost: None,
            }
        } else {
            match serve_watching_peer(&mut stream, &organ, stimulus).await {
                Some(response) => response,
                // Peer is gone or broke protocol; the job has already cleaned up.
                None => return Ok(()),
            }
        };

        let response_bytes =
            serde_json::to_vec(&response).context("Failed to serialize response")?;

        let len_bytes = (response_bytes.len() as u32).to_be_bytes();
        stream.write_all(&len_bytes).await?;
        stream.write_all(&response_bytes).await?;
        stream.flush().await?;

        debug!("Sent: ok={}, latency={}ms", response.ok, response.latency_ms);
    }
}

/// Run a stimulus while watching the connection.
///
/// Clients send one request and wait. EOF or any byte arriving before the
/// response is ready cancels the job; `None` means the connection should be
/// dropped without answering.
///
/// Protocol requirement: a client must keep its write half open until the
/// response frame arrives. A `shutdown(Write)` after sending reads as EOF
/// here, so a half-closed client has its job cancelled and gets no reply.
async fn serve_watching_peer(
    stream: &mut UnixStream,
    organ: &ComposeOrgan,
    stimulus: Stimulus,
) -> Option<Response> {
    let cancel = CancelHandle::new();
    let work = organ.stimulate_with_cancel(stimulus, &cancel);
    tokio::pin!(work);

    let mut peek = [0u8; 1];
    let mut abandoned = false;

    let result = loop {
        tokio::select! {
            result = &mut work => break result,
            read = stream.read(&mut peek), if !abandoned => {
                match read {
                    Ok(0) => warn!("Client disconnected mid-request, cancelling job"),
                    Ok(_) => warn!("Client sent data before the response, cancelling job"),
                    Err(e) => warn!("Client connection failed mid-request ({}), cancelling job", e),
                }
                cancel.cancel();
                abandoned = true;
            }
        }
    };

    if abandoned {
        return None;
    }

    Some(result.unwrap_or_else(|e| {
        error!("Stimulate error: {}", e);
        Response {
            ok: false,
            output: e.to_output(),
            latency_ms: 0,
            cost: None,
        }
    }))
}
