use crate::weak_error;
use once_cell::sync;
use regex::Regex;
use std::fmt::{Display, Formatter};

/// Debugger SemVer version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub (u32, u32, u32));

impl Version {
    /// Parse gdb version from banner lines like:
    /// "GNU gdb (Ubuntu 12.1-0ubuntu1~22.04.2) 12.1" or "GNU gdb (GDB) 14.2".
    pub fn gdb_parse(s: &str) -> Option<Self> {
        static V_RE: sync::Lazy<Regex> = sync::Lazy::new(|| {
            Regex::new(r"GNU gdb (?:\([^)]*\) )?(\d+)\.(\d+)(?:\.(\d+))?").expect("must compile")
        });

        let caps = V_RE.captures(s)?;
        let major = weak_error!(caps[1].parse::<u32>())?;
        let minor = weak_error!(caps[2].parse::<u32>())?;
        let patch = match caps.get(3) {
            Some(p) => weak_error!(p.as_str().parse::<u32>())?,
            None => 0,
        };
        Some(Version((major, minor, patch)))
    }

    /// True if the debugger speaks MI2 (gdb 7.0 and newer).
    pub fn is_supported(&self) -> bool {
        *self >= MIN_SUPPORTED
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// First gdb release with the MI2 interpreter.
pub const MIN_SUPPORTED: Version = Version((7, 0, 0));
