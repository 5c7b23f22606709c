//! Application-defined elements carried opaquely under a type key

use crate::errors::{MessageError, Result};
use crate::message::data::SingleMessage;
use crate::message::elem::Elem;
use crate::message::facade::{ComposeContext, ComposeOutput, DecodeContext, MessageProtocol};

pub struct CustomMessageProtocol;

impl MessageProtocol for CustomMessageProtocol {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        match elem {
            Elem::Custom { key, payload } => Ok(Some(vec![SingleMessage::Custom {
                key: key.clone(),
                payload: payload.clone(),
            }])),
            _ => Ok(None),
        }
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::Custom { key, payload } = message else {
            return Ok(false);
        };
        if key.is_empty() {
            return Err(MessageError::InvalidContent {
                kind: "Custom".into(),
                reason: "empty type key".into(),
            }
            .into());
        }
        out.push(Elem::Custom {
            key: key.clone(),
            payload: payload.clone(),
        });
        Ok(true)
    }
}
