//! Server side of one connection.
//!
//! A session owns the replica opened by its client. Nothing is shared
//! between connections, so one server can serve several roots at once.

use replica_core::replica::validate_path;
use replica_core::{FsError, LocalReplica, Replica, SyncError};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::message::{CHUNK_SIZE, Request, Response};
use crate::native_fs::{NativeFs, map_err};

/// File content in the middle of a chunked transfer.
struct Transfer {
    path: String,
    data: Vec<u8>,
}

pub struct Session {
    conn_id: String,
    replica: Option<LocalReplica<NativeFs>>,
    /// Chunks staged by `PutChunk`, written out by the next `PutFile`
    upload: Option<Transfer>,
    /// File being served by successive `FetchFile` calls
    download: Option<Transfer>,
    closed: bool,
}

impl Session {
    pub fn new(conn_id: impl Into<String>) -> Self {
        Self {
            conn_id: conn_id.into(),
            replica: None,
            upload: None,
            download: None,
            closed: false,
        }
    }

    /// Whether the client asked to end the session.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run one request against this session's replica.
    pub async fn handle(&mut self, request: Request) -> Response {
        debug!("[{}] {}", self.conn_id, request.name());
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("[{}] Request failed: {}", self.conn_id, e);
                Response::Error(e.to_string())
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<Response, SyncError> {
        let response = match request {
            Request::InitRoot { root } => self.open(root).await?,
            Request::GetState => Response::State(self.replica()?.get_state().await?),
            Request::PutState(state) => {
                self.replica()?.put_state(&state).await?;
                Response::Ok
            }
            Request::PutChunk { path, offset, data } => {
                self.stage_chunk(path, offset, data)?;
                Response::Ok
            }
            Request::PutFile {
                path,
                content,
                mode,
            } => {
                let content = match self.upload.take() {
                    Some(mut upload) if upload.path == path => {
                        upload.data.extend_from_slice(&content);
                        upload.data
                    }
                    _ => content,
                };
                Response::Written(self.replica()?.put_file(&path, &content, mode).await?)
            }
            Request::PutDir { path, mode } => {
                self.replica()?.put_dir(&path, mode).await?;
                Response::Ok
            }
            Request::RemoveFile { path } => {
                self.replica()?.remove_file(&path).await?;
                Response::Ok
            }
            Request::RemoveDir { path } => {
                self.replica()?.remove_dir(&path).await?;
                Response::Ok
            }
            Request::ReportConflict { path } => {
                self.replica()?.report_conflict(&path).await?;
                Response::Ok
            }
            Request::FetchFile { path, offset } => self.fetch_chunk(path, offset).await?,
            Request::Shutdown => {
                if let Some(replica) = &self.replica {
                    replica.shutdown().await?;
                }
                self.closed = true;
                Response::Ok
            }
        };
        Ok(response)
    }

    fn replica(&self) -> Result<&LocalReplica<NativeFs>, SyncError> {
        self.replica.as_ref().ok_or(SyncError::NotInitialized)
    }

    /// Append one piece of an upload. A chunk at offset 0 starts a new one.
    fn stage_chunk(&mut self, path: String, offset: u64, data: Vec<u8>) -> Result<(), SyncError> {
        self.replica()?;
        validate_path(&path)?;

        if offset == 0 {
            self.upload = Some(Transfer { path, data });
            return Ok(());
        }

        match self.upload.as_mut() {
            Some(upload) if upload.path == path && upload.data.len() as u64 == offset => {
                upload.data.extend_from_slice(&data);
                Ok(())
            }
            _ => {
                self.upload = None;
                Err(SyncError::Transport(format!(
                    "out-of-order chunk for {} at offset {}",
                    path, offset
                )))
            }
        }
    }

    /// Serve the piece of `path` starting at `offset`.
    ///
    /// The file is read once, when its first piece is asked for, and kept
    /// until the last piece has been sent.
    async fn fetch_chunk(&mut self, path: String, offset: u64) -> Result<Response, SyncError> {
        let download = match self.download.take() {
            Some(download) if download.path == path && offset > 0 => download,
            _ => Transfer {
                data: self.replica()?.fetch_file(&path).await?,
                path,
            },
        };

        let total = download.data.len() as u64;
        if offset > total {
            return Err(SyncError::Transport(format!(
                "offset {} is past the end of {} ({} bytes)",
                offset, download.path, total
            )));
        }

        let start = offset as usize;
        let end = download.data.len().min(start + CHUNK_SIZE);
        let data = download.data[start..end].to_vec();
        if end < download.data.len() {
            self.download = Some(download);
        }
        Ok(Response::Chunk { data, total })
    }

    /// Open `root` and load its state. Re-opening replaces the previous replica.
    async fn open(&mut self, root: String) -> Result<Response, SyncError> {
        let path = PathBuf::from(&root);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_err(&root, e))?;
        if !metadata.is_dir() {
            return Err(FsError::NotDirectory(root).into());
        }

        info!("[{}] Opening root {}", self.conn_id, root);
        let replica = LocalReplica::new(root, NativeFs::new(path));
        let outcome = replica.init_root().await?;
        self.replica = Some(replica);
        Ok(Response::Init(outcome))
    }
}
