//! Quote replies

use crate::errors::Result;
use crate::message::data::{MessageSource, SingleMessage};
use crate::message::elem::{Elem, SourceElem};
use crate::message::facade::{ComposeContext, ComposeOutput, DecodeContext, MessageProtocol};

pub struct QuoteReplyProtocol;

impl MessageProtocol for QuoteReplyProtocol {
    fn name(&self) -> &'static str {
        "quote-reply"
    }

    fn decode(&self, elem: &Elem, ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Elem::SrcMsg(src) = elem else {
            return Ok(None);
        };
        Ok(Some(vec![SingleMessage::QuoteReply(MessageSource {
            kind: ctx.kind,
            from: src.sender,
            target: src.target,
            sequence: src.sequence,
            random: src.random,
            time: src.time,
            preview: src.preview.clone(),
        })]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::QuoteReply(source) = message else {
            return Ok(false);
        };
        out.push(Elem::SrcMsg(SourceElem {
            sequence: source.sequence,
            random: source.random,
            sender: source.from,
            target: source.target,
            time: source.time,
            preview: source.preview.clone(),
        }));
        Ok(true)
    }
}
