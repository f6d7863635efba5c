//! tonic gRPC services over TCP
//!
//! `AuthService` is open; `StorageService` sits behind [`TokenInterceptor`],
//! which resolves the bearer token to a [`User`] before any handler runs.
//! Failures from the vault are logged here with full detail and returned to
//! the client as an opaque `Internal` status.

use anyhow::Result;
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::service::Interceptor;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

use lockbox_core::bridge;
use lockbox_core::proto::{
    auth_service_server::{AuthService, AuthServiceServer},
    storage_service_server::{StorageService, StorageServiceServer},
    upload_request, AddUserRequest, AuthenticateRequest, DownloadRequest, FileChunk, ListRequest,
    ListResponse, TokenResponse, UploadRequest, UploadResponse,
};
use lockbox_core::AUTHORIZATION_HEADER;
use lockbox_vault::{AuthError, Authenticator, Storage, StorageError, TokenManager, User};
use secrecy::SecretString;

const MISSING_TOKEN: &str = "provide token in \"authorization\" header";

/// Outgoing download chunks buffered ahead of the client
const DOWNLOAD_QUEUE_DEPTH: usize = 4;

// ── AuthService ──────────────────────────────────────────────────────────

pub struct AuthServiceImpl {
    auth: Arc<Authenticator>,
    tokens: Arc<TokenManager>,
}

impl AuthServiceImpl {
    pub fn new(auth: Arc<Authenticator>, tokens: Arc<TokenManager>) -> Self {
        Self { auth, tokens }
    }

    fn issue(&self, user: &User) -> Result<String, Status> {
        user.to_payload()
            .and_then(|payload| self.tokens.issue(&payload))
            .map_err(|e| {
                error!(username = %user.username(), error = %e, "token issue failed");
                Status::internal("")
            })
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn add_user(
        &self,
        request: Request<AddUserRequest>,
    ) -> Result<Response<TokenResponse>, Status> {
        let req = request.into_inner();
        let username = req.username;
        let passphrase = SecretString::from(req.passphrase);
        let master_key = SecretString::from(req.master_key);

        // Key derivation and marker I/O are blocking work
        let auth = self.auth.clone();
        let name = username.clone();
        let user = tokio::task::spawn_blocking(move || {
            auth.add_user(&name, &passphrase, &master_key)
        })
        .await
        .map_err(|e| {
            error!(error = %e, "add_user task failed");
            Status::internal("")
        })?
        .map_err(|e| auth_status("add_user", &username, e))?;

        let token = self.issue(&user)?;
        Ok(Response::new(TokenResponse { token }))
    }

    async fn authenticate(
        &self,
        request: Request<AuthenticateRequest>,
    ) -> Result<Response<TokenResponse>, Status> {
        let req = request.into_inner();
        let username = req.username;
        let passphrase = SecretString::from(req.passphrase);

        let auth = self.auth.clone();
        let name = username.clone();
        let user = tokio::task::spawn_blocking(move || auth.authenticate(&name, &passphrase))
            .await
            .map_err(|e| {
                error!(error = %e, "authenticate task failed");
                Status::internal("")
            })?
            .map_err(|e| auth_status("authenticate", &username, e))?;

        let token = self.issue(&user)?;
        Ok(Response::new(TokenResponse { token }))
    }
}

fn auth_status(op: &str, username: &str, e: AuthError) -> Status {
    if e.is_validation() {
        return Status::invalid_argument(e.to_string());
    }
    match e {
        AuthError::Io(_) | AuthError::Crypto(_) | AuthError::DataDirNotEmpty { .. } => {
            error!(op, username, error = %e, "vault error");
        }
        _ => warn!(op, username, error = %e, "request rejected"),
    }
    Status::internal("")
}

// ── Token interceptor ────────────────────────────────────────────────────

/// Resolves `authorization: <token>` (optionally `Bearer <token>`) to a
/// [`User`] stored in the request extensions.
#[derive(Clone)]
pub struct TokenInterceptor {
    auth: Arc<Authenticator>,
    tokens: Arc<TokenManager>,
}

impl TokenInterceptor {
    pub fn new(auth: Arc<Authenticator>, tokens: Arc<TokenManager>) -> Self {
        Self { auth, tokens }
    }
}

impl Interceptor for TokenInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let token = request
            .metadata()
            .get(AUTHORIZATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Status::unauthenticated(MISSING_TOKEN))?;

        let user = self
            .tokens
            .validate(token)
            .and_then(|payload| self.auth.user_from_payload(&payload))
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                Status::unauthenticated("invalid token")
            })?;

        request.extensions_mut().insert(user);
        Ok(request)
    }
}

fn authenticated_user<T>(request: &Request<T>) -> Result<User, Status> {
    request
        .extensions()
        .get::<User>()
        .cloned()
        .ok_or_else(|| Status::unauthenticated(MISSING_TOKEN))
}

// ── StorageService ───────────────────────────────────────────────────────

pub struct StorageServiceImpl {
    storage: Storage,
    chunk_size: usize,
}

impl StorageServiceImpl {
    pub fn new(storage: Storage, chunk_size: usize) -> Self {
        Self {
            storage,
            chunk_size,
        }
    }
}

#[tonic::async_trait]
impl StorageService for StorageServiceImpl {
    async fn upload(
        &self,
        request: Request<Streaming<UploadRequest>>,
    ) -> Result<Response<UploadResponse>, Status> {
        let user = authenticated_user(&request)?;
        let mut stream = request.into_inner();

        let filename = match stream.message().await? {
            Some(UploadRequest {
                data: Some(upload_request::Data::Filename(name)),
            }) => name,
            _ => return Err(Status::invalid_argument("first message must carry the filename")),
        };

        // Dropping the handler (client went away) cancels the pump, which
        // fails the upload and removes the partial file.
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();

        let mut reader = bridge::stream_to_reader(
            stream,
            |message: UploadRequest| match message.data {
                Some(upload_request::Data::Chunk(chunk)) => Ok(Bytes::from(chunk)),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "expected a chunk after the filename",
                )),
            },
            cancel,
        );

        let storage = self.storage.clone();
        let task = tokio::spawn(async move {
            let result = storage.upload(&user, &filename, &mut reader).await;
            result.map_err(|e| storage_status("upload", &user, &filename, e))
        });

        let bytes_received = task.await.map_err(|e| {
            error!(error = %e, "upload task failed");
            Status::internal("")
        })??;

        Ok(Response::new(UploadResponse { bytes_received }))
    }

    type DownloadStream = ReceiverStream<Result<FileChunk, Status>>;

    async fn download(
        &self,
        request: Request<DownloadRequest>,
    ) -> Result<Response<Self::DownloadStream>, Status> {
        let user = authenticated_user(&request)?;
        let filename = request.into_inner().filename;

        let (tx, rx) = mpsc::channel(DOWNLOAD_QUEUE_DEPTH);
        let cancel = CancellationToken::new();
        let mut writer = bridge::writer_to_sink(
            tx.clone(),
            self.chunk_size,
            |data: Bytes| Ok(FileChunk { data: data.to_vec() }),
            cancel.clone(),
        );

        let storage = self.storage.clone();
        tokio::spawn(async move {
            match storage.download(&user, &filename, &mut writer).await {
                Ok(_) => {
                    if let Err(e) = writer.shutdown().await {
                        debug!(filename = %filename, error = %e, "download pipe closed early");
                    }
                }
                Err(e) => {
                    // Stop relaying data; the error is the last thing the client sees.
                    cancel.cancel();
                    let status = storage_status("download", &user, &filename, e);
                    let _ = tx.send(Err(status)).await;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn list(&self, request: Request<ListRequest>) -> Result<Response<ListResponse>, Status> {
        let user = authenticated_user(&request)?;
        let filenames = self
            .storage
            .list(&user)
            .await
            .map_err(|e| storage_status("list", &user, "", e))?;
        Ok(Response::new(ListResponse { filenames }))
    }
}

fn storage_status(op: &str, user: &User, filename: &str, e: StorageError) -> Status {
    match e {
        StorageError::InvalidFilename(_) => Status::invalid_argument(e.to_string()),
        StorageError::FileExists(_) | StorageError::FileNotFound(_) => {
            warn!(op, username = %user.username(), filename, error = %e, "request rejected");
            Status::internal("")
        }
        StorageError::Crypto(_) | StorageError::Io(_) => {
            error!(op, username = %user.username(), filename, error = %e, "storage error");
            Status::internal("")
        }
    }
}

/// Serve both services on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    auth: AuthServiceImpl,
    storage: StorageServiceImpl,
    interceptor: TokenInterceptor,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let addr = listener.local_addr()?;
    let incoming = TcpListenerStream::new(listener);

    info!(%addr, "gRPC server ready");

    Server::builder()
        .add_service(AuthServiceServer::new(auth))
        .add_service(StorageServiceServer::with_interceptor(storage, interceptor))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("gRPC server error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_vault::Bootstrap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tonic::metadata::MetadataValue;

    fn interceptor(tmp: &TempDir) -> (TokenInterceptor, Arc<Authenticator>, Arc<TokenManager>) {
        let (auth, _) = Authenticator::open(tmp.path().join("data")).unwrap();
        let auth = Arc::new(auth);
        let tokens = Arc::new(TokenManager::new(b"unit-test", Duration::from_secs(60)).unwrap());
        (TokenInterceptor::new(auth.clone(), tokens.clone()), auth, tokens)
    }

    #[test]
    fn test_interceptor_requires_token() {
        let tmp = TempDir::new().unwrap();
        let (mut interceptor, _, _) = interceptor(&tmp);

        let status = interceptor.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(status.message(), MISSING_TOKEN);
    }

    #[test]
    fn test_interceptor_rejects_garbage_token() {
        let tmp = TempDir::new().unwrap();
        let (mut interceptor, _, _) = interceptor(&tmp);

        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(AUTHORIZATION_HEADER, MetadataValue::from_static("not-a-token"));
        let status = interceptor.call(request).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(status.message(), "invalid token");
    }

    #[test]
    fn test_interceptor_attaches_user() {
        let tmp = TempDir::new().unwrap();
        let data_dir = tmp.path().join("data");
        let (_, state) = Authenticator::open(&data_dir).unwrap();
        let Bootstrap::Created(master_key) = state else {
            panic!("fresh directory must be bootstrapped");
        };
        let (mut interceptor, auth, tokens) = interceptor(&tmp);

        let user = auth
            .add_user("alice", &SecretString::from("pw1"), &master_key)
            .unwrap();
        let token = tokens.issue(&user.to_payload().unwrap()).unwrap();

        for header in [token.clone(), format!("Bearer {token}")] {
            let mut request = Request::new(());
            request
                .metadata_mut()
                .insert(AUTHORIZATION_HEADER, header.parse().unwrap());
            let request = interceptor.call(request).unwrap();
            let attached = authenticated_user(&request).unwrap();
            assert_eq!(attached.username(), "alice");
            assert_eq!(attached.key(), user.key());
        }
    }

    #[test]
    fn test_auth_status_is_opaque() {
        let status = auth_status("authenticate", "alice", AuthError::InvalidPassphrase);
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(status.message().is_empty());

        let status = auth_status("add_user", "", AuthError::EmptyUsername);
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
