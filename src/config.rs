//! Server configuration and query scope resolution.
use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 4711;
pub const DEFAULT_CATALOG: &str = "SystemIndex";
pub const DEFAULT_WORKERS: usize = 15;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("share '{0}' must have the form NAME=PATH")]
    MalformedShare(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope '{0}' is not a file:// or UNC path")]
    Malformed(String),

    #[error("share '{0}' is not exported")]
    UnknownShare(String),

    #[error("scope '{0}' leaves its share")]
    Traversal(String),
}

/// A directory exported under a share name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub name: String,
    pub path: PathBuf,
}

impl FromStr for Share {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => Ok(Self {
                name: name.trim().to_owned(),
                path: PathBuf::from(path.trim()),
            }),
            _ => Err(ConfigError::MalformedShare(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub catalog: String,
    pub shares: Vec<Share>,
    /// Shares that resolve but have no index behind them.
    pub unindexed: Vec<String>,
    /// Upper bound on rows per fetch, if any.
    pub max_results: Option<u32>,
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            catalog: DEFAULT_CATALOG.to_owned(),
            shares: Vec::new(),
            unindexed: Vec::new(),
            max_results: None,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// A scope URL mapped onto a configured share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScope {
    pub host: String,
    pub share: String,
    /// Directory the scope names on this machine.
    pub root: PathBuf,
    /// Part of the scope below the share.
    pub subpath: PathBuf,
    pub indexed: bool,
}

impl ServerConfig {
    pub fn share(&self, name: &str) -> Option<&Share> {
        self.shares.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn is_indexed(&self, share: &str) -> bool {
        !self.unindexed.iter().any(|s| s.eq_ignore_ascii_case(share))
    }

    /// Maps `file://host/share/dir` or `\\host\share\dir` onto a share.
    pub fn resolve_scope(&self, scope: &str) -> Result<ResolvedScope, ScopeError> {
        let segments = if let Some(rest) = scope.strip_prefix("file://") {
            rest.split('/').collect::<Vec<_>>()
        } else if let Some(rest) = scope.strip_prefix(r"\\") {
            rest.split('\\').collect::<Vec<_>>()
        } else {
            return Err(ScopeError::Malformed(scope.to_owned()));
        };

        let mut segments = segments.into_iter().filter(|s| !s.is_empty());
        let (Some(host), Some(share_name)) = (segments.next(), segments.next()) else {
            return Err(ScopeError::Malformed(scope.to_owned()));
        };

        let subpath = segments.collect::<PathBuf>();
        if subpath
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ScopeError::Traversal(scope.to_owned()));
        }

        let share = self
            .share(share_name)
            .ok_or_else(|| ScopeError::UnknownShare(share_name.to_owned()))?;

        Ok(ResolvedScope {
            host: host.to_owned(),
            share: share.name.clone(),
            root: join(&share.path, &subpath),
            subpath,
            indexed: self.is_indexed(&share.name),
        })
    }
}

fn join(base: &Path, sub: &Path) -> PathBuf {
    if sub.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(sub)
    }
}
