//! lockbox: client for the lockbox vault daemon
//!
//! Commands:
//!   add-user <username>          - register (needs the vault's master key), prints a token
//!   login <username>             - authenticate, prints a token
//!   upload <path> [--name NAME]  - store a local file
//!   download <name> [<dest>]     - fetch a stored file (never overwrites)
//!   ls                           - list stored files
//!
//! Storage commands read the token from --token or LOCKBOX_TOKEN.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Request;

use lockbox_core::bridge::{self, DEFAULT_CHUNK_SIZE};
use lockbox_core::proto::{
    auth_service_client::AuthServiceClient, storage_service_client::StorageServiceClient,
    upload_request, AddUserRequest, AuthenticateRequest, DownloadRequest, FileChunk, ListRequest,
    UploadRequest,
};
use lockbox_core::AUTHORIZATION_HEADER;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "lockbox",
    version,
    about = "lockbox encrypted file vault client"
)]
struct Cli {
    /// lockboxd gRPC endpoint
    #[arg(long, env = "LOCKBOX_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Session token from `add-user` or `login`
    #[arg(long, env = "LOCKBOX_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a new user; prompts for a passphrase and the master key
    #[command(name = "add-user")]
    AddUser {
        username: String,
        /// Master key printed by lockboxd on first start (prompted if unset)
        #[arg(long, env = "LOCKBOX_MASTER_KEY", hide_env_values = true)]
        master_key: Option<String>,
    },

    /// Log in and print a session token
    Login { username: String },

    /// Upload a local file
    Upload {
        path: PathBuf,
        /// Name to store the file under (default: the local file name)
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Download a stored file
    Download {
        name: String,
        /// Local destination (default: ./<name>); must not exist
        dest: Option<PathBuf>,
    },

    /// List stored files
    Ls,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::AddUser {
            username,
            master_key,
        } => cmd_add_user(&cli.server, username, master_key.as_deref()).await,
        Commands::Login { username } => cmd_login(&cli.server, username).await,
        Commands::Upload { path, name } => {
            let token = require_token(&cli)?;
            cmd_upload(&cli.server, token, path, name.as_deref()).await
        }
        Commands::Download { name, dest } => {
            let token = require_token(&cli)?;
            let dest = dest.clone().unwrap_or_else(|| PathBuf::from(name));
            cmd_download(&cli.server, token, name, &dest).await
        }
        Commands::Ls => {
            let token = require_token(&cli)?;
            cmd_ls(&cli.server, token).await
        }
    }
}

fn require_token(cli: &Cli) -> Result<&str> {
    cli.token
        .as_deref()
        .filter(|t| !t.is_empty())
        .context("no session token: run `lockbox login <username>` and export LOCKBOX_TOKEN")
}

// ── gRPC connection ───────────────────────────────────────────────────────────

async fn auth_client(server: &str) -> Result<AuthServiceClient<Channel>> {
    AuthServiceClient::connect(server.to_owned())
        .await
        .with_context(|| format!("connecting to {server}  (is lockboxd running?)"))
}

async fn storage_client(server: &str) -> Result<StorageServiceClient<Channel>> {
    StorageServiceClient::connect(server.to_owned())
        .await
        .with_context(|| format!("connecting to {server}  (is lockboxd running?)"))
}

fn authed<T>(message: T, token: &str) -> Result<Request<T>> {
    let mut request = Request::new(message);
    request.metadata_mut().insert(
        AUTHORIZATION_HEADER,
        token.parse().context("token contains invalid characters")?,
    );
    Ok(request)
}

fn prompt_secret(prompt: &str) -> Result<SecretString> {
    let value = rpassword::prompt_password(prompt).context("reading from terminal")?;
    if value.is_empty() {
        bail!("empty input");
    }
    Ok(SecretString::from(value))
}

// ── `lockbox add-user` / `lockbox login` ──────────────────────────────────────

async fn cmd_add_user(server: &str, username: &str, master_key: Option<&str>) -> Result<()> {
    let passphrase = prompt_secret("Passphrase: ")?;
    let confirm = prompt_secret("Confirm passphrase: ")?;
    if passphrase.expose_secret() != confirm.expose_secret() {
        bail!("passphrases do not match");
    }
    let master_key = match master_key {
        Some(key) => SecretString::from(key),
        None => prompt_secret("Master key: ")?,
    };

    let token = auth_client(server)
        .await?
        .add_user(AddUserRequest {
            username: username.to_owned(),
            passphrase: passphrase.expose_secret().to_owned(),
            master_key: master_key.expose_secret().to_owned(),
        })
        .await
        .context("registration failed")?
        .into_inner()
        .token;

    eprintln!("registered {username}");
    println!("{token}");
    Ok(())
}

async fn cmd_login(server: &str, username: &str) -> Result<()> {
    let passphrase = prompt_secret("Passphrase: ")?;

    let token = auth_client(server)
        .await?
        .authenticate(AuthenticateRequest {
            username: username.to_owned(),
            passphrase: passphrase.expose_secret().to_owned(),
        })
        .await
        .context("login failed")?
        .into_inner()
        .token;

    println!("{token}");
    Ok(())
}

// ── `lockbox upload` ──────────────────────────────────────────────────────────

async fn cmd_upload(server: &str, token: &str, path: &Path, name: Option<&str>) -> Result<()> {
    let name = match name {
        Some(name) => name.to_owned(),
        None => default_upload_name(path)?,
    };

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let size = file.metadata().await?.len();

    let pb = make_progress_bar(size, "upload")?;
    pb.set_message(name.clone());
    let mut src = pb.wrap_async_read(file);

    let (tx, rx) = mpsc::channel(4);
    tx.send(UploadRequest {
        data: Some(upload_request::Data::Filename(name.clone())),
    })
    .await
    .context("upload queue closed")?;

    let mut writer = bridge::writer_to_sink(
        tx,
        DEFAULT_CHUNK_SIZE,
        |chunk: Bytes| UploadRequest {
            data: Some(upload_request::Data::Chunk(chunk.to_vec())),
        },
        CancellationToken::new(),
    );

    // The request stream only ends once the whole file was read. A failed
    // read leaves it open, so dropping the call cancels the RPC rather than
    // letting the server store a truncated file.
    let (finished_tx, finished_rx) = oneshot::channel::<()>();
    let outbound = ReceiverStream::new(rx).chain(futures::stream::once(finished_rx).filter_map(
        |finished| async move {
            if finished.is_err() {
                std::future::pending::<()>().await;
            }
            None::<UploadRequest>
        },
    ));

    let feed = async {
        tokio::io::copy(&mut src, &mut writer)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        writer.shutdown().await.context("finishing upload stream")?;
        let _ = finished_tx.send(());
        Ok::<_, anyhow::Error>(())
    };
    let call = async {
        let mut client = storage_client(server).await?;
        let response = client
            .upload(authed(outbound, token)?)
            .await
            .context("upload failed")?;
        Ok::<_, anyhow::Error>(response.into_inner())
    };

    let ((), response) = tokio::try_join!(feed, call)?;
    pb.finish_and_clear();

    println!("Uploaded {name} ({})", fmt_bytes(response.bytes_received));
    Ok(())
}

fn default_upload_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .with_context(|| format!("cannot derive a name from {}; pass --name", path.display()))
}

// ── `lockbox download` ────────────────────────────────────────────────────────

async fn cmd_download(server: &str, token: &str, name: &str, dest: &Path) -> Result<()> {
    let mut client = storage_client(server).await?;
    let stream = client
        .download(authed(
            DownloadRequest {
                filename: name.to_owned(),
            },
            token,
        )?)
        .await
        .context("download failed")?
        .into_inner();

    // create_new: never clobber an existing local file
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await
        .with_context(|| format!("creating {} (refusing to overwrite)", dest.display()))?;

    let pb = make_spinner("download")?;
    pb.set_message(name.to_owned());
    let mut dst = pb.wrap_async_write(file);

    let mut reader = bridge::stream_to_reader(
        stream,
        |chunk: FileChunk| Ok(Bytes::from(chunk.data)),
        CancellationToken::new(),
    );

    let copied = async {
        let n = tokio::io::copy(&mut reader, &mut dst).await?;
        dst.flush().await?;
        Ok::<_, std::io::Error>(n)
    }
    .await;
    pb.finish_and_clear();

    match copied {
        Ok(n) => {
            println!("Downloaded {name} -> {} ({})", dest.display(), fmt_bytes(n));
            Ok(())
        }
        Err(e) => {
            drop(dst);
            let _ = tokio::fs::remove_file(dest).await;
            Err(e).context("download failed")
        }
    }
}

// ── `lockbox ls` ──────────────────────────────────────────────────────────────

async fn cmd_ls(server: &str, token: &str) -> Result<()> {
    let filenames = storage_client(server)
        .await?
        .list(authed(ListRequest {}, token)?)
        .await
        .context("list failed")?
        .into_inner()
        .filenames;

    for name in filenames {
        println!("{name}");
    }
    Ok(())
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn make_spinner(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{prefix:.bold} {spinner} {bytes} {msg}")?);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
