//! Poke (nudge) messages

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::message::data::{Poke, SingleMessage};
use crate::message::elem::{common_service, Elem};
use crate::message::facade::{ComposeContext, ComposeOutput, DecodeContext, MessageProtocol};

use super::sub_body;

#[derive(Serialize, Deserialize)]
struct PokeBody {
    name: String,
    poke_type: u32,
    id: u32,
}

pub struct PokeMessageProtocol;

impl MessageProtocol for PokeMessageProtocol {
    fn name(&self) -> &'static str {
        "poke"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Elem::CommonElem {
            service_type: common_service::POKE,
            payload,
        } = elem
        else {
            return Ok(None);
        };
        let body: PokeBody = sub_body(self.name(), elem, payload)?;
        Ok(Some(vec![SingleMessage::Poke(Poke {
            name: body.name,
            poke_type: body.poke_type,
            id: body.id,
        })]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::Poke(poke) = message else {
            return Ok(false);
        };
        out.push(Elem::CommonElem {
            service_type: common_service::POKE,
            payload: bincode::serialize(&PokeBody {
                name: poke.name.clone(),
                poke_type: poke.poke_type,
                id: poke.id,
            })?,
        });
        Ok(true)
    }
}
