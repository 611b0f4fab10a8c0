//! Typed view of a decoded `.torrent` file.
//!
//! Only the single-file format is supported, and only the keys needed to
//! download from webseeds are kept. Top-level and `info` keys are normalized
//! before matching, so `piece length`, `piece-length` and `piece_length` are
//! the same key.
use crate::{bencode::Value, config::FinalPiece, error::Error};

/// Length of a SHA-1 hash, one per piece in `pieces`.
pub const HASH_LEN: usize = 20;

/// The `info` dictionary of a single-file torrent.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct TorrentInfo {
    /// length - bytes of the entire file
    pub length: u64,
    /// name of the file, raw bytes as found in the metainfo
    pub name: Vec<u8>,
    /// piece length - number of bytes in a piece
    pub piece_length: u64,
    /// A (byte) string consisting of the concatenation of all 20-byte SHA1
    /// hash values, one per piece.
    pub pieces: Vec<u8>,
}

impl TorrentInfo {
    /// How many pieces the file has.
    pub fn pieces_len(&self) -> usize {
        self.pieces.len() / HASH_LEN
    }

    /// The expected SHA-1 of piece `index`.
    pub fn piece_hash(&self, index: usize) -> Option<[u8; HASH_LEN]> {
        let b = index.checked_mul(HASH_LEN)?;
        let e = b.checked_add(HASH_LEN)?;
        self.pieces.get(b..e)?.try_into().ok()
    }

    /// Offset of the first byte of piece `index` inside the file.
    pub fn piece_offset(&self, index: usize) -> u64 {
        index as u64 * self.piece_length
    }

    /// How many bytes of piece `index` are requested and hashed.
    ///
    /// With [`FinalPiece::Trimmed`] the last piece only spans the bytes left
    /// in the file, with [`FinalPiece::Strict`] every piece spans
    /// `piece_length`.
    pub fn piece_len(&self, index: usize, policy: FinalPiece) -> u64 {
        match policy {
            FinalPiece::Strict => self.piece_length,
            FinalPiece::Trimmed => {
                let offset = self.piece_offset(index);
                self.piece_length.min(self.length.saturating_sub(offset))
            }
        }
    }

    /// The name of the file, invalid UTF-8 is replaced.
    pub fn file_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    fn from_value(value: &Value) -> Result<Self, Error> {
        let dict = value.as_dict().ok_or(Error::InvalidMetadata("info"))?;

        let mut length = None;
        let mut name = None;
        let mut piece_length = None;
        let mut pieces = None;

        for (key, value) in dict {
            match normalize_key(key).as_str() {
                "length" => length = value.as_int(),
                "name" => name = value.as_bytes().map(<[u8]>::to_vec),
                "piece_length" => piece_length = value.as_int(),
                "pieces" => pieces = value.as_bytes().map(<[u8]>::to_vec),
                _ => {}
            }
        }

        let length = length
            .and_then(|v| u64::try_from(v).ok())
            .ok_or(Error::InvalidMetadata("length"))?;

        let piece_length = piece_length
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or(Error::InvalidMetadata("piece length"))?;

        let name = name
            .filter(|n| is_safe_file_name(n))
            .ok_or(Error::InvalidMetadata("name"))?;

        let pieces = pieces
            .filter(|p| p.len() % HASH_LEN == 0)
            .filter(|p| {
                (p.len() / HASH_LEN) as u64 == length.div_ceil(piece_length)
            })
            .ok_or(Error::InvalidMetadata("pieces"))?;

        Ok(Self { length, name, piece_length, pieces })
    }
}

/// A `.torrent` file, with only the fields used by a webseed download.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct MetaInfo {
    pub info: TorrentInfo,
    /// Webseed endpoints (BEP 19), a single string is accepted too.
    pub url_list: Option<Vec<String>>,
    pub creation_date: Option<i64>,
    pub created_by: Option<String>,
    pub comment: Option<String>,
}

impl MetaInfo {
    /// Build the metainfo from the root of a decoded `.torrent` file.
    pub fn from_value(root: &Value) -> Result<Self, Error> {
        let dict = root.as_dict().ok_or(Error::InvalidMetadata("root"))?;

        let mut info = None;
        let mut meta = MetaInfo::default();

        for (key, value) in dict {
            match normalize_key(key).as_str() {
                "info" => info = Some(TorrentInfo::from_value(value)?),
                "url_list" => meta.url_list = url_list(value),
                "creation_date" => meta.creation_date = value.as_int(),
                "created_by" => meta.created_by = lossy(value),
                "comment" => meta.comment = lossy(value),
                _ => {}
            }
        }

        meta.info = info.ok_or(Error::InvalidMetadata("info"))?;

        Ok(meta)
    }
}

/// Replace spaces and hyphens with `_`, so keys can be matched regardless of
/// the separator the torrent creator used.
pub fn normalize_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).replace([' ', '-'], "_")
}

fn lossy(value: &Value) -> Option<String> {
    value.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned())
}

fn url_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::List(items) => Some(items.iter().filter_map(lossy).collect()),
        Value::Bytes(_) => lossy(value).map(|url| vec![url]),
        _ => None,
    }
}

/// The name is used as a file name inside the download dir, it must not be
/// able to point anywhere else.
fn is_safe_file_name(name: &[u8]) -> bool {
    !name.is_empty()
        && name != b"."
        && name != b".."
        && !name.iter().any(|b| matches!(b, b'/' | b'\\' | 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    fn info(length: i64, piece_length: i64, pieces: usize) -> Value {
        let mut d = std::collections::BTreeMap::new();
        d.insert(b"length".to_vec(), Value::Int(length));
        d.insert(b"name".to_vec(), Value::from("file.bin"));
        d.insert(b"piece length".to_vec(), Value::Int(piece_length));
        d.insert(b"pieces".to_vec(), Value::Bytes(vec![1; pieces * HASH_LEN]));
        Value::Dict(d)
    }

    fn root(info: Value, extra: Vec<(&str, Value)>) -> Value {
        let mut d = std::collections::BTreeMap::new();
        d.insert(b"info".to_vec(), info);
        for (k, v) in extra {
            d.insert(k.as_bytes().to_vec(), v);
        }
        Value::Dict(d)
    }

    #[test]
    fn parse_full_metainfo() {
        let buf = b"d7:comment5:hello10:created by4:test13:creation \
                    datei1700000000e4:infod6:lengthi40e4:name8:file.bin12:\
                    piece lengthi20e6:pieces40:\
                    aaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbe8:url-listl9:\
                    http://a/11:https://b/fee";
        let meta = MetaInfo::from_value(&decode(buf).unwrap()).unwrap();

        assert_eq!(meta.info.length, 40);
        assert_eq!(meta.info.file_name(), "file.bin");
        assert_eq!(meta.info.piece_length, 20);
        assert_eq!(meta.info.pieces_len(), 2);
        assert_eq!(meta.info.piece_hash(1), Some([b'b'; 20]));
        assert_eq!(meta.info.piece_hash(2), None);
        assert_eq!(meta.comment.as_deref(), Some("hello"));
        assert_eq!(meta.created_by.as_deref(), Some("test"));
        assert_eq!(meta.creation_date, Some(1_700_000_000));
        assert_eq!(
            meta.url_list,
            Some(vec!["http://a/".to_owned(), "https://b/f".to_owned()])
        );
    }

    #[test]
    fn url_list_as_single_string() {
        let v = root(
            info(40, 20, 2),
            vec![("url-list", Value::from("http://a/"))],
        );
        let meta = MetaInfo::from_value(&v).unwrap();
        assert_eq!(meta.url_list, Some(vec!["http://a/".to_owned()]));
    }

    #[test]
    fn piece_len_policies() {
        let v = root(info(45, 20, 3), vec![]);
        let info = MetaInfo::from_value(&v).unwrap().info;

        assert_eq!(info.piece_len(0, FinalPiece::Trimmed), 20);
        assert_eq!(info.piece_len(2, FinalPiece::Trimmed), 5);
        assert_eq!(info.piece_len(2, FinalPiece::Strict), 20);
        assert_eq!(info.piece_offset(2), 40);
    }

    #[test]
    fn invalid_metainfo() {
        let missing_info = root(Value::Int(1), vec![]);
        assert!(matches!(
            MetaInfo::from_value(&missing_info),
            Err(Error::InvalidMetadata("info"))
        ));

        assert!(matches!(
            MetaInfo::from_value(&Value::List(vec![])),
            Err(Error::InvalidMetadata("root"))
        ));

        // 40 bytes need 2 pieces
        assert!(matches!(
            MetaInfo::from_value(&root(info(40, 20, 3), vec![])),
            Err(Error::InvalidMetadata("pieces"))
        ));

        assert!(matches!(
            MetaInfo::from_value(&root(info(40, 0, 2), vec![])),
            Err(Error::InvalidMetadata("piece length"))
        ));

        assert!(matches!(
            MetaInfo::from_value(&root(info(-1, 20, 0), vec![])),
            Err(Error::InvalidMetadata("length"))
        ));
    }

    #[test]
    fn unsafe_names_are_rejected() {
        for name in ["", ".", "..", "../etc/passwd", "a/b", "a\\b"] {
            let mut i = info(40, 20, 2);
            if let Value::Dict(d) = &mut i {
                d.insert(b"name".to_vec(), Value::from(name));
            }
            assert!(
                matches!(
                    MetaInfo::from_value(&root(i, vec![])),
                    Err(Error::InvalidMetadata("name"))
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn normalize() {
        assert_eq!(normalize_key(b"piece length"), "piece_length");
        assert_eq!(normalize_key(b"url-list"), "url_list");
        assert_eq!(normalize_key(b"comment"), "comment");
    }
}
