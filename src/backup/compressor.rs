// dbrotate/src/backup/compressor.rs
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{CodecOverrides, CompressionConfig};
use crate::errors::{Result, RotateError};
use crate::utils::runas::{shell_quote, PrivilegeRunner};
use crate::utils::{find_executable, is_executable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Xz,
    Bzip2,
    Gzip,
    NoComp,
}

impl Codec {
    pub fn name(self) -> &'static str {
        match self {
            Codec::Xz => "xz",
            Codec::Bzip2 => "bzip2",
            Codec::Gzip => "gzip",
            Codec::NoComp => "nocomp",
        }
    }

    /// Default binary looked up on the search path.
    pub fn binary(self) -> Option<&'static str> {
        match self {
            Codec::NoComp => None,
            other => Some(other.name()),
        }
    }

    pub fn extension(self) -> Option<&'static str> {
        match self {
            Codec::Xz => Some("xz"),
            Codec::Bzip2 => Some("bz2"),
            Codec::Gzip => Some("gz"),
            Codec::NoComp => None,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = RotateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "xz" => Ok(Codec::Xz),
            "bzip2" => Ok(Codec::Bzip2),
            "gzip" => Ok(Codec::Gzip),
            "nocomp" => Ok(Codec::NoComp),
            other => Err(RotateError::UnavailableCodec(format!("unknown codec '{}'", other))),
        }
    }
}

/// `<path>.<ext>` for real codecs, `path` itself for `nocomp`.
pub fn compressed_name(path: &Path, codec: Codec) -> PathBuf {
    match codec.extension() {
        Some(ext) => {
            let mut name = path.as_os_str().to_os_string();
            name.push(".");
            name.push(ext);
            PathBuf::from(name)
        }
        None => path.to_path_buf(),
    }
}

/// Picks the first usable codec. Availability is re-checked on every call.
#[derive(Debug, Clone, Default)]
pub struct CompressorSelector {
    search_path: Option<OsString>,
}

impl CompressorSelector {
    /// Resolves binaries on the process `PATH` as it is when each call happens.
    pub fn from_env() -> Self {
        CompressorSelector { search_path: None }
    }

    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        CompressorSelector {
            search_path: Some(search_path.into()),
        }
    }

    /// Binary that would run for `codec`, if any.
    ///
    /// A set override must itself be an executable file; it is never
    /// replaced by a search-path lookup.
    pub fn binary_path(&self, codec: Codec, overrides: &CodecOverrides) -> Option<PathBuf> {
        let binary = codec.binary()?;
        match overrides.for_codec(codec).filter(|p| !p.as_os_str().is_empty()) {
            Some(path) => is_executable(path).then(|| path.to_path_buf()),
            None => find_executable(binary, self.search_path.as_deref()),
        }
    }

    pub fn is_usable(&self, codec: Codec, overrides: &CodecOverrides) -> bool {
        codec == Codec::NoComp || self.binary_path(codec, overrides).is_some()
    }

    /// Requested codec first, then the candidates in order; `nocomp` when nothing is usable.
    pub fn select(&self, config: &CompressionConfig) -> Codec {
        let requested = config.requested.as_deref().filter(|r| !r.is_empty());
        let names = requested
            .into_iter()
            .chain(config.candidates.iter().map(String::as_str));
        for name in names {
            match name.parse::<Codec>() {
                Ok(codec) if self.is_usable(codec, &config.overrides) => return codec,
                Ok(codec) => tracing::debug!("Compressor {} is not available", codec),
                Err(e) => tracing::warn!("{}", e),
            }
        }
        tracing::warn!(
            "No usable compressor among {:?}, storing uncompressed",
            config.candidates
        );
        Codec::NoComp
    }

    /// Binds `codec` to its binary and the runner that executes it.
    pub fn compressor<'a>(
        &self,
        codec: Codec,
        overrides: &CodecOverrides,
        runner: &'a PrivilegeRunner,
    ) -> Result<Compressor<'a>> {
        let binary = match codec {
            Codec::NoComp => None,
            _ => Some(self.binary_path(codec, overrides).ok_or_else(|| {
                RotateError::UnavailableCodec(format!("{} binary not found", codec))
            })?),
        };
        Ok(Compressor {
            codec,
            binary,
            runner,
        })
    }
}

/// A selected codec ready to compress files in place.
#[derive(Debug)]
pub struct Compressor<'a> {
    codec: Codec,
    binary: Option<PathBuf>,
    runner: &'a PrivilegeRunner,
}

impl Compressor<'_> {
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Compresses `path` into `<path>.<ext>` and returns the resulting file.
    ///
    /// With `nocomp` the file is left as it is and its own path is returned.
    pub fn compress(&self, path: &Path) -> Result<PathBuf> {
        let Some(binary) = &self.binary else {
            tracing::warn!("No compressor found, no compression done");
            return Ok(path.to_path_buf());
        };

        let as_str = |p: &Path| {
            p.to_str().map(str::to_string).ok_or_else(|| RotateError::Compression {
                path: path.to_path_buf(),
                reason: format!("path is not valid UTF-8: {}", p.display()),
            })
        };
        // The codec writes its output next to `path`, possibly as another user.
        if let Some(dir) = path.parent() {
            self.runner.hand_over(dir)?;
        }
        self.runner.hand_over(path)?;
        let command = format!(
            "{} -f {}",
            shell_quote(&as_str(binary)?),
            shell_quote(&as_str(path)?)
        );
        self.runner.run(&command).map_err(|e| match e {
            RotateError::Command { stderr, .. } => RotateError::Compression {
                path: path.to_path_buf(),
                reason: stderr,
            },
            other => other,
        })?;

        let output = compressed_name(path, self.codec);
        if !output.is_file() {
            return Err(RotateError::Compression {
                path: path.to_path_buf(),
                reason: format!("{} did not produce {}", self.codec, output.display()),
            });
        }
        tracing::info!("Compressed {} with {}", output.display(), self.codec);
        Ok(output)
    }
}
