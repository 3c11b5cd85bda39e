use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

pub mod container;

pub use container::PackageFile;

pub const PACKAGE_EXT: &str = "pkg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    #[default]
    App,
    Gadget,
    Kernel,
    Os,
}

impl PackageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageKind::App => "app",
            PackageKind::Gadget => "gadget",
            PackageKind::Kernel => "kernel",
            PackageKind::Os => "os",
        }
    }
}

/// Package revision. Zero is unset, positive values come from a store and
/// negative values mark locally sideloaded artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub i64);

impl Revision {
    pub const UNSET: Revision = Revision(0);
    pub const SIDELOAD: Revision = Revision(-1);

    pub fn is_unset(self) -> bool {
        self.0 == 0
    }

    pub fn is_local(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "unset"),
            n if self.is_local() => write!(f, "x{}", n.unsigned_abs()),
            n => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DownloadInfo {
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct PackageInfo {
    pub name: String,
    pub id: String,
    pub revision: Revision,
    pub channel: String,
    pub publisher_id: String,
    pub publisher: String,
    #[serde(rename = "type")]
    pub kind: PackageKind,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadInfo>,
}

impl PackageInfo {
    /// On-disk artifact name, e.g. `pc-kernel_33.pkg` or `hello_x1.pkg`.
    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.name, self.revision, PACKAGE_EXT)
    }

    /// The name becomes part of a file name, so it must be a single plain path component.
    pub fn check_name(&self) -> Result<()> {
        let name = self.name.trim();
        let bad = name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains(['/', '\\', '\0']);
        if bad {
            return Err(Error::new(
                ErrorKind::Decode,
                format!("invalid package name '{}'", self.name.escape_debug()),
            ));
        }
        Ok(())
    }
}
