//! Module identity: the key of the module cache.

use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PluginError, PluginResult};

/// Number of hex characters of the SHA-256 digest kept as the module hash.
const HASH_PREFIX_LEN: usize = 16;

/// Immutable identity of a loadable module.
///
/// Two identities are equal when their qualified names match ignoring
/// case and they carry the same version or hash. The origin is
/// informational: identical copies in two directories are one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleIdentity {
    /// Unique, case-insensitive module name.
    qualified_name: String,
    /// File the module was (or will be) loaded from.
    origin_path: PathBuf,
    /// Declared version or content hash.
    version_or_hash: String,
}

impl ModuleIdentity {
    /// Creates an identity from explicit parts.
    pub fn new(
        qualified_name: impl Into<String>,
        origin_path: impl Into<PathBuf>,
        version_or_hash: impl Into<String>,
    ) -> PluginResult<Self> {
        let qualified_name = qualified_name.into();
        if qualified_name.trim().is_empty() {
            return Err(PluginError::InvalidArgument(
                "module identity requires a non-empty qualified name".to_string(),
            ));
        }

        Ok(Self {
            qualified_name,
            origin_path: origin_path.into(),
            version_or_hash: version_or_hash.into(),
        })
    }

    /// Derives an identity from a module file: the qualified name comes from
    /// the file name, the hash from the file contents.
    ///
    /// Blocking; call from `spawn_blocking` in async contexts.
    pub fn from_path(path: &Path) -> PluginResult<Self> {
        if path.as_os_str().is_empty() {
            return Err(PluginError::InvalidArgument(
                "module path must not be empty".to_string(),
            ));
        }

        let qualified_name = qualified_name_for(path).ok_or_else(|| {
            PluginError::InvalidArgument(format!(
                "cannot derive a module name from '{}'",
                path.display()
            ))
        })?;

        if !path.is_file() {
            return Err(PluginError::NotFound(path.display().to_string()));
        }

        let hash = content_hash(path)?;
        Self::new(qualified_name, path, hash)
    }

    /// Returns the qualified module name as declared.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Returns the origin path.
    pub fn origin_path(&self) -> &Path {
        &self.origin_path
    }

    /// Returns the version or content hash.
    pub fn version_or_hash(&self) -> &str {
        &self.version_or_hash
    }

    /// Case-folded name under which the cache and registry file the
    /// module. At most one build of a module is cached per key.
    pub fn cache_key(&self) -> String {
        self.qualified_name.to_lowercase()
    }

    /// Whether `other` names the same module but a different build.
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.cache_key() == other.cache_key() && self != other
    }
}

impl PartialEq for ModuleIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.cache_key() == other.cache_key()
            && self.version_or_hash.eq_ignore_ascii_case(&other.version_or_hash)
    }
}

impl Eq for ModuleIdentity {}

impl Hash for ModuleIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cache_key().hash(state);
        self.version_or_hash.to_lowercase().hash(state);
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version_or_hash.is_empty() {
            write!(f, "{}", self.qualified_name)
        } else {
            write!(f, "{}@{}", self.qualified_name, self.version_or_hash)
        }
    }
}

/// Derives the qualified module name from a file path.
///
/// `libvendor_codecs.so` and `vendor_codecs.dll` both map to
/// `vendor_codecs`.
pub fn qualified_name_for(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let prefix = std::env::consts::DLL_PREFIX;

    let name = if !prefix.is_empty() && stem.len() > prefix.len() && stem.starts_with(prefix) {
        &stem[prefix.len()..]
    } else {
        stem
    };

    (!name.is_empty()).then(|| name.to_string())
}

fn content_hash(path: &Path) -> PluginResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    let digest = hex::encode(hasher.finalize());
    Ok(digest[..HASH_PREFIX_LEN].to_string())
}
