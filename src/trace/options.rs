use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// File open flags. Code 0 is reserved for "absent".
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum OpenFlag {
    R = 1,
    RPlus,
    Rs,
    RsPlus,
    W,
    Wx,
    WPlus,
    WxPlus,
    A,
    Ax,
    APlus,
    AxPlus,
}

impl OpenFlag {
    pub const ALL: [OpenFlag; 12] = [
        OpenFlag::R,
        OpenFlag::RPlus,
        OpenFlag::Rs,
        OpenFlag::RsPlus,
        OpenFlag::W,
        OpenFlag::Wx,
        OpenFlag::WPlus,
        OpenFlag::WxPlus,
        OpenFlag::A,
        OpenFlag::Ax,
        OpenFlag::APlus,
        OpenFlag::AxPlus,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Result<Self> {
        Self::ALL
            .get(usize::from(code).wrapping_sub(1))
            .copied()
            .ok_or_else(|| Error::InvalidFlag(format!("code {code}")))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpenFlag::R => "r",
            OpenFlag::RPlus => "r+",
            OpenFlag::Rs => "rs",
            OpenFlag::RsPlus => "rs+",
            OpenFlag::W => "w",
            OpenFlag::Wx => "wx",
            OpenFlag::WPlus => "w+",
            OpenFlag::WxPlus => "wx+",
            OpenFlag::A => "a",
            OpenFlag::Ax => "ax",
            OpenFlag::APlus => "a+",
            OpenFlag::AxPlus => "ax+",
        }
    }

    pub fn readable(self) -> bool {
        !matches!(
            self,
            OpenFlag::W | OpenFlag::Wx | OpenFlag::A | OpenFlag::Ax
        )
    }

    pub fn writable(self) -> bool {
        !matches!(self, OpenFlag::R | OpenFlag::Rs)
    }

    pub fn creates(self) -> bool {
        self.writable() && !matches!(self, OpenFlag::RPlus | OpenFlag::RsPlus)
    }

    pub fn truncates(self) -> bool {
        matches!(
            self,
            OpenFlag::W | OpenFlag::Wx | OpenFlag::WPlus | OpenFlag::WxPlus
        )
    }

    pub fn appends(self) -> bool {
        matches!(
            self,
            OpenFlag::A | OpenFlag::Ax | OpenFlag::APlus | OpenFlag::AxPlus
        )
    }

    pub fn exclusive(self) -> bool {
        matches!(
            self,
            OpenFlag::Wx | OpenFlag::WxPlus | OpenFlag::Ax | OpenFlag::AxPlus
        )
    }
}

impl FromStr for OpenFlag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.as_str() == s)
            .ok_or_else(|| Error::InvalidFlag(s.to_owned()))
    }
}

impl fmt::Display for OpenFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text encodings a whole-file operation may request. Code 0 is "absent".
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum Encoding {
    Utf8 = 1,
    Ascii,
    Binary,
    Ucs2,
    Hex,
    Base64,
    Buffer,
}

impl Encoding {
    pub const ALL: [Encoding; 7] = [
        Encoding::Utf8,
        Encoding::Ascii,
        Encoding::Binary,
        Encoding::Ucs2,
        Encoding::Hex,
        Encoding::Base64,
        Encoding::Buffer,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Result<Self> {
        Self::ALL
            .get(usize::from(code).wrapping_sub(1))
            .copied()
            .ok_or_else(|| Error::InvalidEncoding(format!("code {code}")))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Ascii => "ascii",
            Encoding::Binary => "binary",
            Encoding::Ucs2 => "ucs2",
            Encoding::Hex => "hex",
            Encoding::Base64 => "base64",
            Encoding::Buffer => "buffer",
        }
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "ascii" => Ok(Encoding::Ascii),
            "binary" => Ok(Encoding::Binary),
            "ucs2" | "ucs-2" | "utf16le" | "utf-16le" => Ok(Encoding::Ucs2),
            "hex" => Ok(Encoding::Hex),
            "base64" => Ok(Encoding::Base64),
            "buffer" => Ok(Encoding::Buffer),
            _ => Err(Error::InvalidEncoding(s.to_owned())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional modifiers of a whole-file operation, packed into one argument
/// slot: flag code in the upper 16 bits, encoding code in the lower 16.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FileOptions {
    pub flag: Option<OpenFlag>,
    pub encoding: Option<Encoding>,
}

impl FileOptions {
    pub fn new(flag: Option<OpenFlag>, encoding: Option<Encoding>) -> Self {
        Self { flag, encoding }
    }

    pub fn pack(self) -> u32 {
        let mut packed = 0u32;
        if let Some(flag) = self.flag {
            packed |= u32::from(flag.code()) << 16;
        }
        if let Some(encoding) = self.encoding {
            packed |= u32::from(encoding.code());
        }
        packed
    }

    pub fn unpack(packed: u32) -> Result<Self> {
        let flag = match (packed >> 16) as u16 {
            0 => None,
            code => Some(OpenFlag::from_code(code)?),
        };
        let encoding = match (packed & 0xFFFF) as u16 {
            0 => None,
            code => Some(Encoding::from_code(code)?),
        };
        Ok(Self { flag, encoding })
    }
}
