//! Built-in faces, super faces, VIP faces and market faces (including dice)

use serde::{Deserialize, Serialize};

use crate::errors::{MessageError, Result};
use crate::message::data::{MarketFace, SingleMessage, SuperFace, VipFace};
use crate::message::elem::{common_service, Elem, MarketFaceElem};
use crate::message::facade::{ComposeContext, ComposeOutput, DecodeContext, MessageProtocol};

use super::sub_body;

pub struct FaceProtocol;

impl MessageProtocol for FaceProtocol {
    fn name(&self) -> &'static str {
        "face"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        match elem {
            Elem::Face { id } => Ok(Some(vec![SingleMessage::Face { id: *id }])),
            _ => Ok(None),
        }
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::Face { id } = message else {
            return Ok(false);
        };
        out.push(Elem::Face { id: *id });
        Ok(true)
    }
}

// ----------------------------------------------------------------------------
// Super / VIP Faces
// ----------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct SuperFaceBody {
    face_id: u32,
    name: String,
}

pub struct SuperFaceProtocol;

impl MessageProtocol for SuperFaceProtocol {
    fn name(&self) -> &'static str {
        "super-face"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Elem::CommonElem {
            service_type: common_service::SUPER_FACE,
            payload,
        } = elem
        else {
            return Ok(None);
        };
        let body: SuperFaceBody = sub_body(self.name(), elem, payload)?;
        Ok(Some(vec![SingleMessage::SuperFace(SuperFace {
            face_id: body.face_id,
            name: body.name,
        })]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::SuperFace(face) = message else {
            return Ok(false);
        };
        out.push(Elem::CommonElem {
            service_type: common_service::SUPER_FACE,
            payload: bincode::serialize(&SuperFaceBody {
                face_id: face.face_id,
                name: face.name.clone(),
            })?,
        });
        Ok(true)
    }
}

#[derive(Serialize, Deserialize)]
struct VipFaceBody {
    kind_id: u32,
    name: String,
    count: u32,
}

pub struct VipFaceProtocol;

impl MessageProtocol for VipFaceProtocol {
    fn name(&self) -> &'static str {
        "vip-face"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Elem::CommonElem {
            service_type: common_service::VIP_FACE,
            payload,
        } = elem
        else {
            return Ok(None);
        };
        let body: VipFaceBody = sub_body(self.name(), elem, payload)?;
        Ok(Some(vec![SingleMessage::VipFace(VipFace {
            kind_id: body.kind_id,
            name: body.name,
            count: body.count,
        })]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::VipFace(face) = message else {
            return Ok(false);
        };
        out.push(Elem::CommonElem {
            service_type: common_service::VIP_FACE,
            payload: bincode::serialize(&VipFaceBody {
                kind_id: face.kind_id,
                name: face.name.clone(),
                count: face.count,
            })?,
        });
        Ok(true)
    }
}

// ----------------------------------------------------------------------------
// Market Faces
// ----------------------------------------------------------------------------

pub const DICE_TAB_ID: u32 = 11464;
const DICE_NAME: &str = "[骰子]";
const DICE_FACE_ID: [u8; 16] = [
    0x48, 0x23, 0xd3, 0xad, 0xb1, 0x5d, 0xf0, 0x80, 0x14, 0xce, 0x5d, 0x67, 0x96, 0xb7, 0x6e, 0xe1,
];
const DICE_MAGIC_PREFIX: &str = "rand_num=";

/// Dice value encoded in a market face, if it is one
fn dice_value(face: &MarketFaceElem) -> Option<u8> {
    if face.tab_id != DICE_TAB_ID {
        return None;
    }
    let rolled: u8 = face
        .magic_value
        .strip_prefix(DICE_MAGIC_PREFIX)?
        .trim()
        .parse()
        .ok()?;
    (rolled < 6).then_some(rolled + 1)
}

pub struct MarketFaceProtocol;

impl MessageProtocol for MarketFaceProtocol {
    fn name(&self) -> &'static str {
        "market-face"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Elem::MarketFace(face) = elem else {
            return Ok(None);
        };
        let message = match dice_value(face) {
            Some(value) => SingleMessage::Dice { value },
            None => SingleMessage::MarketFace(MarketFace {
                name: face.name.clone(),
                face_id: face.face_id.clone(),
                tab_id: face.tab_id,
                sub_type: face.sub_type,
                media_type: face.media_type,
                magic_value: face.magic_value.clone(),
            }),
        };
        Ok(Some(vec![message]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let elem = match message {
            SingleMessage::MarketFace(face) => MarketFaceElem {
                name: face.name.clone(),
                face_id: face.face_id.clone(),
                tab_id: face.tab_id,
                sub_type: face.sub_type,
                media_type: face.media_type,
                magic_value: face.magic_value.clone(),
            },
            SingleMessage::Dice { value } => {
                if !(1..=6).contains(value) {
                    return Err(MessageError::InvalidContent {
                        kind: "Dice".into(),
                        reason: format!("value {value} outside 1..=6"),
                    }
                    .into());
                }
                MarketFaceElem {
                    name: DICE_NAME.to_string(),
                    face_id: DICE_FACE_ID.to_vec(),
                    tab_id: DICE_TAB_ID,
                    sub_type: 3,
                    media_type: 0,
                    magic_value: format!("{DICE_MAGIC_PREFIX}{}", value - 1),
                }
            }
            _ => return Ok(false),
        };
        out.push(Elem::MarketFace(elem));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::data::MessageTarget;

    #[test]
    fn test_dice_round_trip() {
        let mut out = ComposeOutput::default();
        let ctx = ComposeContext::new(MessageTarget::Group(9));
        MarketFaceProtocol
            .compose(&SingleMessage::Dice { value: 6 }, &ctx, &mut out)
            .unwrap();
        let decoded = MarketFaceProtocol
            .decode(&out.elems[0], &DecodeContext::group(1, 9))
            .unwrap();
        assert_eq!(decoded, Some(vec![SingleMessage::Dice { value: 6 }]));
    }

    #[test]
    fn test_dice_out_of_range_rejected() {
        let mut out = ComposeOutput::default();
        let ctx = ComposeContext::new(MessageTarget::Group(9));
        assert!(MarketFaceProtocol
            .compose(&SingleMessage::Dice { value: 7 }, &ctx, &mut out)
            .is_err());
    }

    #[test]
    fn test_bad_magic_is_plain_market_face() {
        let elem = Elem::MarketFace(MarketFaceElem {
            name: DICE_NAME.into(),
            face_id: DICE_FACE_ID.to_vec(),
            tab_id: DICE_TAB_ID,
            sub_type: 3,
            media_type: 0,
            magic_value: "rand_num=9".into(),
        });
        let decoded = MarketFaceProtocol
            .decode(&elem, &DecodeContext::friend(1))
            .unwrap()
            .unwrap();
        assert!(matches!(decoded[0], SingleMessage::MarketFace(_)));
    }
}
