// Cumulus file transfer engine.
// Copyright 2024-2026 Cumulus contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Access to objects on AWS S3 or compatible stores.
//!
//! Roots use the `/{bucket}/{key}` grammar; the bucket is the first
//! segment and directory keys end with `/` (or are empty at the bucket
//! root). The engine is thread-based, so each handle owns a private
//! current-thread tokio runtime and every call blocks the calling thread
//! until the request completes. Streaming transfers run the SDK on a
//! background thread connected to the worker through a bounded pipe.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::thread;

use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadError;
use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadError;
use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadError;
use aws_sdk_s3::operation::delete_object::DeleteObjectError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::operation::upload_part::UploadPartError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_types::region::Region;
use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};
use time::OffsetDateTime;
use tokio::runtime::Runtime;
use tracing::{debug, trace, trace_span, warn};

use super::{Backend, Error, ErrorKind, Meta, Result};
use crate::account::{Account, AccountKind, SecretStore};
use crate::sink::{chunk_pipe, Sink};
use crate::{PIPE_DEPTH, S3_MAX_ATTEMPTS, S3_PAGE_SIZE, S3_PART_SIZE};

pub struct S3Backend {
    account: Account,
    /// `/{bucket}` or `/{bucket}/{key...}`; directory keys end with `/`.
    root: String,
    name: String,
    bucket: String,
    key: String,
    is_dir: bool,
    meta: Meta,

    /// Tokio runtime private to this handle and its clones.
    ///
    /// The SDK is built on tokio but the rest of Cumulus uses threads;
    /// each call blocks the calling thread until the request completes.
    runtime: Arc<Runtime>,
    client: Arc<aws_sdk_s3::Client>,
}

impl fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Backend")
            .field("root", &self.root)
            .field("is_dir", &self.is_dir)
            .finish()
    }
}

impl Clone for S3Backend {
    fn clone(&self) -> S3Backend {
        S3Backend {
            account: self.account.clone(),
            root: self.root.clone(),
            name: self.name.clone(),
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            is_dir: self.is_dir,
            meta: self.meta.clone(),
            runtime: self.runtime.clone(),
            client: self.client.clone(),
        }
    }
}

impl S3Backend {
    /// Build a client for `account` and anchor a handle at its root.
    ///
    /// Fails without issuing any request if the account has no access
    /// key or the vault has no secret for it.
    pub fn open(
        account: Account,
        is_dir: bool,
        secrets: &dyn SecretStore,
    ) -> crate::Result<S3Backend> {
        let access_key = account
            .access_key
            .clone()
            .ok_or_else(|| crate::Error::MissingSecret {
                access_key: account.nickname.clone(),
            })?;
        let secret = secrets
            .get_secret(&access_key)
            .ok_or_else(|| crate::Error::MissingSecret {
                access_key: access_key.clone(),
            })?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::io_error(&account.root, err))?;

        let region = account
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_owned());
        let credentials = Credentials::new(access_key, secret, None, None, "cumulus");
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::standard().with_max_attempts(S3_MAX_ATTEMPTS));
        if let Some(endpoint) = &account.endpoint {
            // Compatible stores are more reliably reached by path-style
            // addressing under a custom endpoint.
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());
        debug!(root = %account.root, kind = %account.kind, "opened S3 client");

        Ok(Self::anchored(
            account,
            is_dir,
            Meta::default(),
            Arc::new(runtime),
            Arc::new(client),
        ))
    }

    fn anchored(
        mut account: Account,
        is_dir: bool,
        meta: Meta,
        runtime: Arc<Runtime>,
        client: Arc<aws_sdk_s3::Client>,
    ) -> S3Backend {
        let root = clean_root(&account.root);
        account.root = root.clone();
        let (bucket, mut key) = split_root(&root);
        if is_dir && !key.is_empty() && !key.ends_with('/') {
            key.push('/');
        }
        let name = super::basename(AccountKind::S3, &root).to_owned();
        S3Backend {
            account,
            root,
            name,
            bucket,
            key,
            is_dir,
            meta,
            runtime,
            client,
        }
    }

    fn child(&self, key: &str, is_dir: bool, meta: Meta) -> S3Backend {
        let root = format!("/{}/{}", self.bucket, key);
        Self::anchored(
            self.account.with_root(&root),
            is_dir,
            meta,
            self.runtime.clone(),
            self.client.clone(),
        )
    }
}

/// Normalize an incoming root to `/{bucket}/{key}` form.
fn clean_root(root: &str) -> String {
    let cleaned = root.replace('\\', "/");
    if cleaned.starts_with('/') {
        cleaned
    } else {
        format!("/{cleaned}")
    }
}

/// Split a clean root into bucket and key.
fn split_root(root: &str) -> (String, String) {
    let trimmed = root.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, key)) => (bucket.to_owned(), key.to_owned()),
        None => (trimmed.to_owned(), String::new()),
    }
}

fn object_meta(size: Option<i64>, modified: Option<&aws_sdk_s3::primitives::DateTime>) -> Meta {
    Meta {
        size: size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
        mtime: modified.and_then(|dt| OffsetDateTime::from_unix_timestamp(dt.secs()).ok()),
        ctime: None,
    }
}

impl Backend for S3Backend {
    fn kind(&self) -> AccountKind {
        self.account.kind
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn exists(&self) -> Result<bool> {
        match self.metadata() {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn metadata(&self) -> Result<Meta> {
        let _span = trace_span!("S3Backend::metadata", key = %self.key).entered();
        let request = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&self.key);
        match self.runtime.block_on(request.send()) {
            Ok(response) => Ok(object_meta(
                response.content_length(),
                response.last_modified(),
            )),
            Err(err) => Err(s3_error(self.root.clone(), err)),
        }
    }

    fn list_dir(&self) -> Result<Vec<Box<dyn Backend>>> {
        if !self.is_dir {
            return Err(Error::new(ErrorKind::NotADirectory, &self.root));
        }
        let _span = trace_span!("S3Backend::list_dir", prefix = %self.key).entered();
        let mut children: Vec<Box<dyn Backend>> = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.key)
                .delimiter("/")
                .max_keys(S3_PAGE_SIZE)
                .set_continuation_token(continuation.take());
            let response = self
                .runtime
                .block_on(request.send())
                .map_err(|err| s3_error(self.root.clone(), err))?;
            for common_prefix in response.common_prefixes() {
                let Some(prefix) = common_prefix.prefix() else {
                    continue;
                };
                trace!(%prefix, "S3 common prefix");
                children.push(Box::new(self.child(prefix, true, Meta::default())));
            }
            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                if key == self.key {
                    // The marker object for this directory itself.
                    continue;
                }
                trace!(%key, "S3 object");
                let is_dir = key.ends_with('/');
                let meta = object_meta(object.size(), object.last_modified());
                children.push(Box::new(self.child(key, is_dir, meta)));
            }
            if response.is_truncated() == Some(true) {
                continuation = response
                    .next_continuation_token()
                    .map(|token| token.to_owned());
                trace!("following continuation token");
            } else {
                break;
            }
        }
        trace!(n_children = children.len(), "list_dir complete");
        Ok(children)
    }

    fn make_dirs(&self) -> Result<()> {
        if self.key.is_empty() {
            // Bucket roots are not created here.
            return Ok(());
        }
        let _span = trace_span!("S3Backend::make_dirs", key = %self.key).entered();
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(ByteStream::from_static(b""));
        self.runtime
            .block_on(request.send())
            .map_err(|err| s3_error(self.root.clone(), err))?;
        Ok(())
    }

    fn download(&self) -> Result<Box<dyn Iterator<Item = Result<Bytes>> + Send>> {
        let (tx, reader) = chunk_pipe(PIPE_DEPTH);
        let client = self.client.clone();
        let runtime = self.runtime.clone();
        let bucket = self.bucket.clone();
        let key = self.key.clone();
        let root = self.root.clone();
        thread::spawn(move || {
            let outcome: Result<()> = runtime.block_on(async {
                let response = client
                    .get_object()
                    .bucket(&bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|err| s3_error(root.clone(), err))?;
                let mut body = response.body;
                loop {
                    match body.try_next().await {
                        Ok(Some(chunk)) => {
                            if tx.send(Ok(chunk)).is_err() {
                                // Consumer dropped the download mid-stream.
                                return Ok(());
                            }
                        }
                        Ok(None) => return Ok(()),
                        Err(err) => {
                            return Err(Error {
                                kind: ErrorKind::Transport,
                                path: root.clone(),
                                source: Some(Box::new(err)),
                            })
                        }
                    }
                }
            });
            if let Err(err) = outcome {
                // Surfaced on the consumer's next chunk fetch.
                let _ = tx.send(Err(err));
            }
        });
        Ok(Box::new(reader))
    }

    fn upload(&self) -> Result<Box<dyn Sink>> {
        let (tx, rx) = bounded::<Feed>(PIPE_DEPTH);
        let shared = Arc::new(UploadShared::default());
        let uploader = Uploader {
            client: self.client.clone(),
            runtime: self.runtime.clone(),
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            root: self.root.clone(),
            shared: shared.clone(),
        };
        let handle = thread::spawn(move || uploader.run(rx));
        Ok(Box::new(S3Sink {
            tx: Some(tx),
            handle: Some(handle),
            shared,
            observed: 0,
            root: self.root.clone(),
        }))
    }

    fn remove(&self) -> Result<()> {
        if self.is_dir {
            // Recursive prefix deletion is a known gap.
            return Err(Error::new(ErrorKind::NotImplemented, &self.root));
        }
        let _span = trace_span!("S3Backend::remove", key = %self.key).entered();
        let request = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&self.key);
        self.runtime
            .block_on(request.send())
            .map_err(|err| s3_error(self.root.clone(), err))?;
        Ok(())
    }

    fn with_root(&self, root: &str, is_dir: bool) -> Box<dyn Backend> {
        Box::new(Self::anchored(
            self.account.with_root(root),
            is_dir,
            Meta::default(),
            self.runtime.clone(),
            self.client.clone(),
        ))
    }

    fn boxed(&self) -> Box<dyn Backend> {
        Box::new(self.clone())
    }
}

enum Feed {
    Chunk(Bytes),
    Finish,
}

#[derive(Default)]
struct UploadShared {
    /// Bytes durably accepted by the store so far.
    committed: AtomicU64,
    error: Mutex<Option<Error>>,
}

impl UploadShared {
    fn fail(&self, err: Error) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_error(&self) -> Option<Error> {
        self.error.lock().unwrap().take()
    }
}

/// Background half of an S3 upload sink.
///
/// Buffers incoming chunks into parts; objects smaller than one part go
/// up with a single `PutObject`, larger ones as a multipart upload that
/// is aborted if the sink is dropped without finalizing.
struct Uploader {
    client: Arc<aws_sdk_s3::Client>,
    runtime: Arc<Runtime>,
    bucket: String,
    key: String,
    root: String,
    shared: Arc<UploadShared>,
}

impl Uploader {
    fn run(self, rx: Receiver<Feed>) {
        let mut buf: Vec<u8> = Vec::with_capacity(S3_PART_SIZE);
        let mut upload_id: Option<String> = None;
        let mut parts: Vec<CompletedPart> = Vec::new();
        let mut part_number: i32 = 1;

        while let Ok(feed) = rx.recv() {
            match feed {
                Feed::Chunk(chunk) => {
                    buf.extend_from_slice(&chunk);
                    while buf.len() >= S3_PART_SIZE {
                        if upload_id.is_none() {
                            match self.create_multipart() {
                                Ok(id) => upload_id = Some(id),
                                Err(err) => {
                                    self.shared.fail(err);
                                    return;
                                }
                            }
                        }
                        let part: Vec<u8> = buf.drain(..S3_PART_SIZE).collect();
                        let id = upload_id.as_deref().expect("multipart upload started");
                        match self.upload_part(id, part_number, part) {
                            Ok(completed) => {
                                parts.push(completed);
                                part_number += 1;
                            }
                            Err(err) => {
                                self.abort(upload_id.as_deref());
                                self.shared.fail(err);
                                return;
                            }
                        }
                    }
                }
                Feed::Finish => {
                    let outcome = match upload_id.as_deref() {
                        None => self.put_whole(std::mem::take(&mut buf)),
                        Some(id) => self.finish_multipart(id, std::mem::take(&mut buf), &mut parts, part_number),
                    };
                    if let Err(err) = outcome {
                        self.abort(upload_id.as_deref());
                        self.shared.fail(err);
                    }
                    return;
                }
            }
        }
        // Sender dropped without finalizing: the transfer was abandoned.
        self.abort(upload_id.as_deref());
    }

    fn create_multipart(&self) -> Result<String> {
        let _span = trace_span!("S3 create_multipart", key = %self.key).entered();
        let request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key);
        let response = self
            .runtime
            .block_on(request.send())
            .map_err(|err| s3_error(self.root.clone(), err))?;
        response
            .upload_id()
            .map(|id| id.to_owned())
            .ok_or_else(|| Error::new(ErrorKind::Other, &self.root))
    }

    fn upload_part(&self, upload_id: &str, part_number: i32, part: Vec<u8>) -> Result<CompletedPart> {
        let _span = trace_span!("S3 upload_part", part_number).entered();
        let len = part.len() as u64;
        let request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(part));
        let response = self
            .runtime
            .block_on(request.send())
            .map_err(|err| s3_error(self.root.clone(), err))?;
        self.shared.committed.fetch_add(len, Relaxed);
        Ok(CompletedPart::builder()
            .part_number(part_number)
            .e_tag(response.e_tag().unwrap_or_default())
            .build())
    }

    fn put_whole(&self, buf: Vec<u8>) -> Result<()> {
        let _span = trace_span!("S3 put_object", key = %self.key).entered();
        let len = buf.len() as u64;
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(ByteStream::from(buf));
        self.runtime
            .block_on(request.send())
            .map_err(|err| s3_error(self.root.clone(), err))?;
        self.shared.committed.fetch_add(len, Relaxed);
        trace!(len, "put whole object");
        Ok(())
    }

    fn finish_multipart(
        &self,
        upload_id: &str,
        tail: Vec<u8>,
        parts: &mut Vec<CompletedPart>,
        part_number: i32,
    ) -> Result<()> {
        if !tail.is_empty() {
            let completed = self.upload_part(upload_id, part_number, tail)?;
            parts.push(completed);
        }
        let _span = trace_span!("S3 complete_multipart", key = %self.key).entered();
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(parts)))
            .build();
        let request = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(completed);
        self.runtime
            .block_on(request.send())
            .map_err(|err| s3_error(self.root.clone(), err))?;
        Ok(())
    }

    fn abort(&self, upload_id: Option<&str>) {
        let Some(upload_id) = upload_id else { return };
        let request = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id);
        if let Err(err) = self.runtime.block_on(request.send()) {
            warn!(key = %self.key, ?err, "abort of multipart upload failed");
        }
    }
}

/// Worker-side half of an S3 upload sink.
struct S3Sink {
    tx: Option<Sender<Feed>>,
    handle: Option<thread::JoinHandle<()>>,
    shared: Arc<UploadShared>,
    /// Committed bytes already reported to the caller.
    observed: u64,
    root: String,
}

impl S3Sink {
    fn committed_delta(&mut self) -> u64 {
        let committed = self.shared.committed.load(Relaxed);
        let delta = committed - self.observed;
        self.observed = committed;
        delta
    }
}

impl Sink for S3Sink {
    fn write(&mut self, chunk: &[u8]) -> Result<u64> {
        if let Some(err) = self.shared.take_error() {
            return Err(err);
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(Error::new(ErrorKind::Other, &self.root));
        };
        if tx.send(Feed::Chunk(Bytes::copy_from_slice(chunk))).is_err() {
            return Err(self
                .shared
                .take_error()
                .unwrap_or_else(|| Error::new(ErrorKind::Transport, &self.root)));
        }
        Ok(self.committed_delta())
    }

    fn finalize(&mut self) -> Result<u64> {
        let Some(tx) = self.tx.take() else {
            return Ok(0);
        };
        // A failed send means the uploader already died; join it and
        // surface its error below.
        let _ = tx.send(Feed::Finish);
        drop(tx);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Err(Error::new(ErrorKind::Other, &self.root));
            }
        }
        if let Some(err) = self.shared.take_error() {
            return Err(err);
        }
        Ok(self.committed_delta())
    }
}

impl Drop for S3Sink {
    fn drop(&mut self) {
        // Dropping the sender without Finish makes the uploader abort
        // any open multipart upload.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn s3_error<E, R>(path: String, source: SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: fmt::Debug + Send + Sync + 'static,
    ErrorKind: for<'a> From<&'a E>,
{
    debug!(s3_error = ?source);
    let kind = match &source {
        SdkError::ServiceError(service_err) => {
            let err = service_err.err();
            if credentials_rejected(err.meta().code()) {
                ErrorKind::CredentialsRejected
            } else {
                ErrorKind::from(err)
            }
        }
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            ErrorKind::Transport
        }
        _ => ErrorKind::Other,
    };
    Error {
        kind,
        path,
        source: Some(source.into()),
    }
}

/// Service error codes meaning the backend refused our credentials.
///
/// These are not modeled as variants on the per-operation error types,
/// so they have to be matched by code.
fn credentials_rejected(code: Option<&str>) -> bool {
    matches!(
        code,
        Some("InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken" | "InvalidToken")
    )
}

impl From<&GetObjectError> for ErrorKind {
    fn from(source: &GetObjectError) -> Self {
        match source {
            GetObjectError::NoSuchKey(_) => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        }
    }
}

impl From<&HeadObjectError> for ErrorKind {
    fn from(source: &HeadObjectError) -> Self {
        match source {
            HeadObjectError::NotFound(..) => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        }
    }
}

impl From<&ListObjectsV2Error> for ErrorKind {
    fn from(source: &ListObjectsV2Error) -> Self {
        match source {
            ListObjectsV2Error::NoSuchBucket(_) => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        }
    }
}

impl From<&PutObjectError> for ErrorKind {
    fn from(_source: &PutObjectError) -> Self {
        ErrorKind::Other
    }
}

impl From<&DeleteObjectError> for ErrorKind {
    fn from(_source: &DeleteObjectError) -> Self {
        ErrorKind::Other
    }
}

impl From<&CreateMultipartUploadError> for ErrorKind {
    fn from(_source: &CreateMultipartUploadError) -> Self {
        ErrorKind::Other
    }
}

impl From<&UploadPartError> for ErrorKind {
    fn from(_source: &UploadPartError) -> Self {
        ErrorKind::Other
    }
}

impl From<&CompleteMultipartUploadError> for ErrorKind {
    fn from(_source: &CompleteMultipartUploadError) -> Self {
        ErrorKind::Other
    }
}

impl From<&AbortMultipartUploadError> for ErrorKind {
    fn from(_source: &AbortMultipartUploadError) -> Self {
        ErrorKind::Other
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clean_and_split_roots() {
        assert_eq!(clean_root("bucket/key"), "/bucket/key");
        assert_eq!(clean_root("/bucket\\dir\\a.txt"), "/bucket/dir/a.txt");
        assert_eq!(
            split_root("/bucket/dir/a.txt"),
            ("bucket".to_owned(), "dir/a.txt".to_owned())
        );
        assert_eq!(split_root("/bucket"), ("bucket".to_owned(), String::new()));
        assert_eq!(
            split_root("/bucket/dir/"),
            ("bucket".to_owned(), "dir/".to_owned())
        );
    }

    #[test]
    fn object_meta_from_listing_fields() {
        let dt = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        let meta = object_meta(Some(12), Some(&dt));
        assert_eq!(meta.size, 12);
        assert_eq!(meta.mtime.unwrap().unix_timestamp(), 1_700_000_000);
        let meta = object_meta(None, None);
        assert_eq!(meta.size, 0);
        assert!(meta.mtime.is_none());
    }

    fn service_error_with_code(code: &str) -> SdkError<GetObjectError, ()> {
        let meta = aws_sdk_s3::error::ErrorMetadata::builder().code(code).build();
        SdkError::service_error(GetObjectError::generic(meta), ())
    }

    #[test]
    fn rejected_credentials_classify_by_error_code() {
        for code in [
            "InvalidAccessKeyId",
            "SignatureDoesNotMatch",
            "ExpiredToken",
            "InvalidToken",
        ] {
            let translated = s3_error("/bucket/key".to_owned(), service_error_with_code(code));
            assert_eq!(translated.kind, ErrorKind::CredentialsRejected, "{code}");
        }
    }

    #[test]
    fn other_service_errors_keep_their_own_classification() {
        let translated = s3_error("/bucket/key".to_owned(), service_error_with_code("AccessDenied"));
        assert_eq!(translated.kind, ErrorKind::Other);

        let meta = aws_sdk_s3::error::ErrorMetadata::builder()
            .code("NoSuchKey")
            .build();
        let not_found = SdkError::service_error(
            GetObjectError::NoSuchKey(
                aws_sdk_s3::types::error::NoSuchKey::builder().meta(meta).build(),
            ),
            (),
        );
        let translated = s3_error("/bucket/key".to_owned(), not_found);
        assert_eq!(translated.kind, ErrorKind::NotFound);
    }
}
