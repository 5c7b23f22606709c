//! Wire message elements
//!
//! A message body is a list of elements, each framed as a `u16` tag, a `u32`
//! body length and a bincode body. Decoding is total: an unknown tag, a body
//! that does not deserialize, or a truncated tail all become
//! [`Elem::Unknown`] carrying the raw bytes.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::protocol::io::{ByteReader, ByteWriter};
use crate::types::Uin;

// ----------------------------------------------------------------------------
// Tags
// ----------------------------------------------------------------------------

pub mod tags {
    pub const TEXT: u16 = 1;
    pub const FACE: u16 = 2;
    pub const IMAGE: u16 = 4;
    pub const TRANS_ELEM: u16 = 5;
    pub const MARKET_FACE: u16 = 6;
    pub const CUSTOM: u16 = 8;
    pub const RICH_MSG: u16 = 12;
    pub const EXTRA_INFO: u16 = 16;
    pub const VIDEO_FILE: u16 = 19;
    pub const PTT: u16 = 20;
    pub const GENERAL_FLAGS: u16 = 37;
    pub const SRC_MSG: u16 = 45;
    pub const LIGHT_APP: u16 = 51;
    pub const COMMON_ELEM: u16 = 53;
    pub const ELEM_FLAGS2: u16 = 54;
    pub const PUB_ACC_INFO: u16 = 55;
    /// Tag recorded for bytes too short to hold a frame header
    pub const TRUNCATED: u16 = 0xFFFF;

    /// Tags that carry nothing displayable
    pub const IGNORED: &[u16] = &[EXTRA_INFO, ELEM_FLAGS2, PUB_ACC_INFO];
}

/// `service_type` values of [`Elem::CommonElem`]
pub mod common_service {
    pub const POKE: u32 = 2;
    pub const FLASH_IMAGE: u32 = 3;
    pub const VIP_FACE: u32 = 23;
    pub const SUPER_FACE: u32 = 33;
}

// ----------------------------------------------------------------------------
// Element Bodies
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextElem {
    pub text: String,
    /// Mention target; `Some(0)` mentions everyone
    pub at: Option<Uin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageElem {
    pub image_id: String,
    pub width: u32,
    pub height: u32,
    pub size: u32,
    pub image_type: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceElem {
    pub sequence: u32,
    pub random: u32,
    pub sender: Uin,
    pub target: Uin,
    pub time: u32,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PttElem {
    pub file_name: String,
    pub md5: Vec<u8>,
    pub size: u32,
    pub codec: u32,
    pub duration: u32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketFaceElem {
    pub name: String,
    pub face_id: Vec<u8>,
    pub tab_id: u32,
    pub sub_type: u32,
    pub media_type: u32,
    pub magic_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoElem {
    pub file_id: String,
    pub md5: Vec<u8>,
    pub name: String,
    pub size: u32,
    pub duration: u32,
    pub thumb_md5: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralFlagsElem {
    pub long_text_res_id: Option<String>,
    pub pb_reserve: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Element
// ----------------------------------------------------------------------------

/// One wire element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elem {
    Text(TextElem),
    Face { id: u32 },
    Image(ImageElem),
    /// Typed sub-element selected by `service_type`; payload is bincode
    CommonElem { service_type: u32, payload: Vec<u8> },
    /// XML template, first byte is the compression flag
    RichMsg { service_id: i32, template: Vec<u8> },
    /// JSON document, first byte is the compression flag
    LightApp { data: Vec<u8> },
    SrcMsg(SourceElem),
    Ptt(PttElem),
    /// File transfer notice; payload is bincode
    TransElem { elem_type: u32, payload: Vec<u8> },
    MarketFace(MarketFaceElem),
    VideoFile(VideoElem),
    GeneralFlags(GeneralFlagsElem),
    Custom { key: String, payload: Vec<u8> },
    /// Known tag without displayable content
    Ignored { tag: u16, raw: Vec<u8> },
    /// Unknown tag or undecodable body
    Unknown { tag: u16, raw: Vec<u8> },
}

#[derive(Serialize, Deserialize)]
struct CommonBody {
    service_type: u32,
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct RichBody {
    service_id: i32,
    template: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct TransBody {
    elem_type: u32,
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct CustomBody {
    key: String,
    payload: Vec<u8>,
}

impl Elem {
    pub fn tag(&self) -> u16 {
        match self {
            Elem::Text(_) => tags::TEXT,
            Elem::Face { .. } => tags::FACE,
            Elem::Image(_) => tags::IMAGE,
            Elem::CommonElem { .. } => tags::COMMON_ELEM,
            Elem::RichMsg { .. } => tags::RICH_MSG,
            Elem::LightApp { .. } => tags::LIGHT_APP,
            Elem::SrcMsg(_) => tags::SRC_MSG,
            Elem::Ptt(_) => tags::PTT,
            Elem::TransElem { .. } => tags::TRANS_ELEM,
            Elem::MarketFace(_) => tags::MARKET_FACE,
            Elem::VideoFile(_) => tags::VIDEO_FILE,
            Elem::GeneralFlags(_) => tags::GENERAL_FLAGS,
            Elem::Custom { .. } => tags::CUSTOM,
            Elem::Ignored { tag, .. } | Elem::Unknown { tag, .. } => *tag,
        }
    }

    /// Bincode body without the tag/length frame
    pub fn encode_body(&self) -> Result<Vec<u8>> {
        let body = match self {
            Elem::Text(e) => bincode::serialize(e)?,
            Elem::Face { id } => bincode::serialize(id)?,
            Elem::Image(e) => bincode::serialize(e)?,
            Elem::CommonElem {
                service_type,
                payload,
            } => bincode::serialize(&CommonBody {
                service_type: *service_type,
                payload: payload.clone(),
            })?,
            Elem::RichMsg {
                service_id,
                template,
            } => bincode::serialize(&RichBody {
                service_id: *service_id,
                template: template.clone(),
            })?,
            Elem::LightApp { data } => bincode::serialize(data)?,
            Elem::SrcMsg(e) => bincode::serialize(e)?,
            Elem::Ptt(e) => bincode::serialize(e)?,
            Elem::TransElem { elem_type, payload } => bincode::serialize(&TransBody {
                elem_type: *elem_type,
                payload: payload.clone(),
            })?,
            Elem::MarketFace(e) => bincode::serialize(e)?,
            Elem::VideoFile(e) => bincode::serialize(e)?,
            Elem::GeneralFlags(e) => bincode::serialize(e)?,
            Elem::Custom { key, payload } => bincode::serialize(&CustomBody {
                key: key.clone(),
                payload: payload.clone(),
            })?,
            Elem::Ignored { raw, .. } | Elem::Unknown { raw, .. } => raw.clone(),
        };
        Ok(body)
    }

    fn decode_body(tag: u16, body: &[u8]) -> Elem {
        let decoded: core::result::Result<Elem, bincode::Error> = match tag {
            tags::TEXT => bincode::deserialize(body).map(Elem::Text),
            tags::FACE => bincode::deserialize(body).map(|id| Elem::Face { id }),
            tags::IMAGE => bincode::deserialize(body).map(Elem::Image),
            tags::COMMON_ELEM => {
                bincode::deserialize::<CommonBody>(body).map(|b| Elem::CommonElem {
                    service_type: b.service_type,
                    payload: b.payload,
                })
            }
            tags::RICH_MSG => bincode::deserialize::<RichBody>(body).map(|b| Elem::RichMsg {
                service_id: b.service_id,
                template: b.template,
            }),
            tags::LIGHT_APP => bincode::deserialize(body).map(|data| Elem::LightApp { data }),
            tags::SRC_MSG => bincode::deserialize(body).map(Elem::SrcMsg),
            tags::PTT => bincode::deserialize(body).map(Elem::Ptt),
            tags::TRANS_ELEM => {
                bincode::deserialize::<TransBody>(body).map(|b| Elem::TransElem {
                    elem_type: b.elem_type,
                    payload: b.payload,
                })
            }
            tags::MARKET_FACE => bincode::deserialize(body).map(Elem::MarketFace),
            tags::VIDEO_FILE => bincode::deserialize(body).map(Elem::VideoFile),
            tags::GENERAL_FLAGS => bincode::deserialize(body).map(Elem::GeneralFlags),
            tags::CUSTOM => bincode::deserialize::<CustomBody>(body).map(|b| Elem::Custom {
                key: b.key,
                payload: b.payload,
            }),
            tag if tags::IGNORED.contains(&tag) => Ok(Elem::Ignored {
                tag,
                raw: body.to_vec(),
            }),
            _ => Ok(Elem::Unknown {
                tag,
                raw: body.to_vec(),
            }),
        };

        decoded.unwrap_or_else(|_| Elem::Unknown {
            tag,
            raw: body.to_vec(),
        })
    }
}

// ----------------------------------------------------------------------------
// Framing
// ----------------------------------------------------------------------------

/// Frame a list of elements
pub fn encode_elems(elems: &[Elem]) -> Result<Vec<u8>> {
    let mut writer = ByteWriter::new();
    for elem in elems {
        let body = elem.encode_body()?;
        writer
            .write_u16(elem.tag())
            .write_u32(body.len() as u32)
            .write_bytes(&body);
    }
    Ok(writer.into_bytes())
}

/// Parse framed elements; never fails
pub fn decode_elems(bytes: &[u8]) -> Vec<Elem> {
    let mut reader = ByteReader::new(bytes);
    let mut elems = Vec::new();
    while !reader.is_empty() {
        let start = reader.position();
        let frame = reader.read_u16().and_then(|tag| {
            let len = reader.read_u32()? as usize;
            Ok((tag, reader.take(len)?))
        });
        match frame {
            Ok((tag, body)) => elems.push(Elem::decode_body(tag, body)),
            Err(_) => {
                let raw = bytes[start..].to_vec();
                let tag = if raw.len() >= 2 {
                    u16::from_be_bytes([raw[0], raw[1]])
                } else {
                    tags::TRUNCATED
                };
                elems.push(Elem::Unknown { tag, raw });
                break;
            }
        }
    }
    elems
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_elements_survive_framing() {
        let elems = vec![
            Elem::Text(TextElem {
                text: "hello".into(),
                at: None,
            }),
            Elem::Face { id: 14 },
            Elem::RichMsg {
                service_id: 35,
                template: vec![0, b'<'],
            },
            Elem::Ignored {
                tag: tags::EXTRA_INFO,
                raw: vec![1, 2],
            },
        ];
        assert_eq!(decode_elems(&encode_elems(&elems).unwrap()), elems);
    }

    #[test]
    fn test_bad_body_becomes_unknown() {
        let mut writer = ByteWriter::new();
        writer.write_u16(tags::TEXT).write_u32(1).write_u8(0xff);
        let decoded = decode_elems(&writer.into_bytes());
        assert_eq!(
            decoded,
            vec![Elem::Unknown {
                tag: tags::TEXT,
                raw: vec![0xff]
            }]
        );
    }

    #[test]
    fn test_truncated_tail_becomes_unknown() {
        let mut bytes = encode_elems(&[Elem::Face { id: 1 }]).unwrap();
        bytes.extend_from_slice(&[0, 2, 0, 0, 0, 9, 1]);
        let decoded = decode_elems(&bytes);
        assert_eq!(decoded.len(), 2);
        assert!(matches!(decoded[1], Elem::Unknown { tag: 2, .. }));
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode_elems(&bytes);
        }
    }
}
