//! Wire protocol: header grammar, tokenizer and validation.
//!
//! ```text
//! VERB SP NAME [SP LENGTH] SP LF
//! ```
//!
//! Parsing is split from I/O deliberately: [`parse_header`] only ever looks
//! at bytes already in memory, the same separation `fuser`'s `ll::request`
//! module draws between "find the frame boundary" and "read more bytes".

use crate::error::{Result, StoreError};

/// Header byte length cap, including the terminating `\n`.
pub const MAX_HEADER_LEN: usize = 267;

/// Byte length cap on a block/user name (filesystem `NAME_MAX` on Linux).
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Register,
    Store,
    Retrieve,
    Delete,
    Leave,
}

impl Verb {
    fn parse(token: &str) -> Option<Verb> {
        match token {
            "REGISTER" => Some(Verb::Register),
            "STORE" => Some(Verb::Store),
            "RETRIEVE" => Some(Verb::Retrieve),
            "DELETE" => Some(Verb::Delete),
            "LEAVE" => Some(Verb::Leave),
            _ => None,
        }
    }
}

/// A fully parsed request header. `header_len` is the number of bytes of
/// `buf` (passed to [`parse_header`]) that made up the header including the
/// trailing `\n` — any bytes past it in the same read are payload prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    pub verb: Verb,
    pub name: String,
    pub length: Option<u64>,
    pub header_len: usize,
}

/// Parses a request header out of the start of `buf`.
///
/// `buf` may contain more than just the header (the first bytes of a STORE
/// payload can be in the same read); only the bytes up to and including the
/// first `\n` are consumed by this function.
pub fn parse_header(buf: &[u8]) -> Result<ParsedHeader> {
    if buf.len() > MAX_HEADER_LEN && !buf[..MAX_HEADER_LEN].contains(&b'\n') {
        return Err(StoreError::BadArgument("header exceeds maximum length".into()));
    }
    let search_len = buf.len().min(MAX_HEADER_LEN);
    let nl_pos = buf[..search_len]
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| StoreError::BadArgument("header missing terminator".into()))?;

    let header_line = std::str::from_utf8(&buf[..nl_pos])
        .map_err(|_| StoreError::BadArgument("header is not valid UTF-8".into()))?;

    let mut tokens = header_line.split(' ').filter(|t| !t.is_empty());
    let verb_token = tokens
        .next()
        .ok_or_else(|| StoreError::BadArgument("missing verb".into()))?;
    let verb = Verb::parse(verb_token)
        .ok_or_else(|| StoreError::BadArgument(format!("unknown verb {verb_token:?}")))?;

    if verb == Verb::Leave {
        return Ok(ParsedHeader {
            verb,
            name: String::new(),
            length: None,
            header_len: nl_pos + 1,
        });
    }

    let name = tokens
        .next()
        .ok_or_else(|| StoreError::BadArgument("missing name".into()))?
        .to_owned();
    validate_name(&name)?;

    let length = if verb == Verb::Store {
        let length_token = tokens
            .next()
            .ok_or_else(|| StoreError::BadArgument("STORE missing length".into()))?;
        let length: u64 = length_token
            .parse()
            .map_err(|_| StoreError::BadArgument(format!("malformed length {length_token:?}")))?;
        if length == 0 {
            return Err(StoreError::BadArgument("STORE length must be nonzero".into()));
        }
        Some(length)
    } else {
        None
    };

    Ok(ParsedHeader {
        verb,
        name,
        length,
        header_len: nl_pos + 1,
    })
}

/// A name must be usable verbatim as a filename: nonempty, no path
/// separator, not `.`/`..`, within the filesystem's name length limit.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::BadArgument("empty name".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StoreError::BadArgument("name too long".into()));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(StoreError::BadArgument("name contains a path separator or NUL".into()));
    }
    if name == "." || name == ".." {
        return Err(StoreError::BadArgument("name is . or ..".into()));
    }
    Ok(())
}

/// Maximum response-header byte length for OK/KO/DATA.
pub const MAX_RESPONSE_HEADER_LEN: usize = 29;

pub fn ok_reply() -> Vec<u8> {
    b"OK \n".to_vec()
}

pub fn ko_reply(code: crate::error::ErrorCode) -> Vec<u8> {
    format!("KO {} \n", code).into_bytes()
}

pub fn data_header(length: u64) -> Vec<u8> {
    format!("DATA {length} \n").into_bytes()
}
