use std::collections::HashMap;

use opendal::services::{Fs, Gcs, Memory, S3};
use opendal::{Builder, Operator};
use tracing::{debug, warn};

use crate::errors::LogShipError;

/// Object stores reached over the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudBackend {
    S3,
    Gcs,
}

/// Stores that live on this host; used for development and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalBackend {
    Fs,
    Memory,
}

/// Where sealed log files are shipped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Cloud {
        backend: CloudBackend,
        /// `s3://bucket[/prefix]` or `gcs://bucket[/prefix]`; a bare name is taken as the bucket.
        root: String,
        /// Endpoint, region and credential settings, keyed as in the agent config file.
        options: HashMap<String, String>,
    },
    Local {
        backend: LocalBackend,
        /// fs: directory objects are written under, with or without `file://`.
        /// memory: `memory://<prefix>`, the prefix is prepended to every key.
        root: String,
    },
}

const S3_OPTIONS: &[&str] = &["endpoint", "region", "access_key", "secret_key"];
const GCS_OPTIONS: &[&str] = &["endpoint", "credential_file"];

impl BackendConfig {
    /// Build the opendal operator and the key prefix applied on top of it.
    ///
    /// Bucket backends carry their prefix in the operator root, so only the memory backend
    /// returns a non-empty prefix.
    pub(crate) fn build_operator(&self) -> Result<(Operator, String), LogShipError> {
        match self {
            BackendConfig::Cloud {
                backend: CloudBackend::S3,
                root,
                options,
            } => Ok((s3_operator(root, options)?, String::new())),
            BackendConfig::Cloud {
                backend: CloudBackend::Gcs,
                root,
                options,
            } => Ok((gcs_operator(root, options)?, String::new())),
            BackendConfig::Local {
                backend: LocalBackend::Fs,
                root,
            } => Ok((fs_operator(root)?, String::new())),
            BackendConfig::Local {
                backend: LocalBackend::Memory,
                root,
            } => Ok((
                finish("memory", root, Memory::default())?,
                normalize_prefix(root.trim_start_matches("memory://")),
            )),
        }
    }
}

fn s3_operator(root: &str, options: &HashMap<String, String>) -> Result<Operator, LogShipError> {
    let (bucket, prefix) = split_bucket_prefix(root).map_err(LogShipError::Cloud)?;
    ignore_unknown_options("s3", options, S3_OPTIONS);

    let mut builder = S3::default().bucket(&bucket);
    if !prefix.is_empty() {
        builder = builder.root(&format!("/{}", prefix));
    }
    for (key, value) in options {
        builder = match key.as_str() {
            "endpoint" => builder.endpoint(value),
            "region" => builder.region(value),
            "access_key" => builder.access_key_id(value),
            "secret_key" => builder.secret_access_key(value),
            _ => builder,
        };
    }
    finish("s3", root, builder)
}

fn gcs_operator(root: &str, options: &HashMap<String, String>) -> Result<Operator, LogShipError> {
    let (bucket, prefix) = split_bucket_prefix(root).map_err(LogShipError::Cloud)?;
    ignore_unknown_options("gcs", options, GCS_OPTIONS);

    let mut builder = Gcs::default().bucket(&bucket);
    if !prefix.is_empty() {
        builder = builder.root(&format!("/{}", prefix));
    }
    for (key, value) in options {
        builder = match key.as_str() {
            "endpoint" => builder.endpoint(value),
            "credential_file" => builder.credential_path(value),
            _ => builder,
        };
    }
    finish("gcs", root, builder)
}

fn fs_operator(root: &str) -> Result<Operator, LogShipError> {
    let dir = split_fs_root(root).map_err(LogShipError::Cloud)?;
    finish("fs", root, Fs::default().root(&dir))
}

fn finish<B: Builder>(service: &str, root: &str, builder: B) -> Result<Operator, LogShipError> {
    let op = Operator::new(builder)
        .map_err(|e| LogShipError::Cloud(format!("building {} operator for {}: {}", service, root, e)))?
        .finish();
    debug!(target = "cloud_store", service, root, "object store operator ready");
    Ok(op)
}

fn ignore_unknown_options(service: &str, options: &HashMap<String, String>, known: &[&str]) {
    for key in options.keys().filter(|k| !known.contains(&k.as_str())) {
        warn!(
            target = "cloud_store",
            service,
            option = %key,
            known = ?known,
            "ignoring unrecognized backend option"
        );
    }
}

/// `s3://bucket/a/b/` -> `("bucket", "a/b")`; `bucket` -> `("bucket", "")`.
pub(crate) fn split_bucket_prefix(root: &str) -> Result<(String, String), String> {
    let rest = match root.split_once("://") {
        Some((_, rest)) => rest,
        None => root,
    };
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(format!("backend root {:?} names no bucket", root));
    }
    Ok((bucket.to_string(), normalize_prefix(prefix)))
}

/// Strip an optional `file://` scheme from an fs root.
pub(crate) fn split_fs_root(root: &str) -> Result<String, String> {
    let dir = root.strip_prefix("file://").unwrap_or(root);
    if dir.is_empty() {
        return Err(format!("backend root {:?} names no directory", root));
    }
    Ok(dir.to_string())
}

pub(crate) fn normalize_prefix(p: &str) -> String {
    p.trim_matches('/').to_string()
}
