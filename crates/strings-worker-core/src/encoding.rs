use serde::{Deserialize, Serialize};
use std::fmt;

/// Character encodings the `strings` tool is asked to scan for.
///
/// `strings(1)` codes: `s` = single-7-bit-byte, `S` = single-8-bit-byte,
/// `b`/`l` = 16-bit big/little endian, `B`/`L` = 32-bit big/little endian.
/// Only the two the pipeline exposes are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StringsEncoding {
    #[serde(rename = "UTF16LE")]
    Utf16Le,
    #[serde(rename = "ASCII")]
    Ascii,
}

impl StringsEncoding {
    pub const ALL: [StringsEncoding; 2] = [StringsEncoding::Utf16Le, StringsEncoding::Ascii];

    /// Name used as the task config key and in artifact names
    pub fn name(&self) -> &'static str {
        match self {
            StringsEncoding::Utf16Le => "UTF16LE",
            StringsEncoding::Ascii => "ASCII",
        }
    }

    /// Value passed to `strings --encoding`
    pub fn code(&self) -> &'static str {
        match self {
            StringsEncoding::Utf16Le => "l",
            StringsEncoding::Ascii => "s",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    pub fn label(&self) -> &'static str {
        match self {
            StringsEncoding::Utf16Le => "Extract Unicode strings",
            StringsEncoding::Ascii => "Extract ASCII strings",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StringsEncoding::Utf16Le => {
                "This will tell the strings command to extract UTF-16LE (little endian) encoded strings"
            }
            StringsEncoding::Ascii => {
                "This will tell the strings command to extract ASCII (single-7-bit-byte) encoded strings"
            }
        }
    }
}

impl Default for StringsEncoding {
    fn default() -> Self {
        StringsEncoding::Ascii
    }
}

impl fmt::Display for StringsEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
