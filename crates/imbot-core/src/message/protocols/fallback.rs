//! Ignored elements, unsupported elements and the trailing general flags

use crate::errors::Result;
use crate::message::data::SingleMessage;
use crate::message::elem::{Elem, GeneralFlagsElem};
use crate::message::facade::{ComposeContext, ComposeOutput, DecodeContext, MessageProtocol};

/// Reserved bytes every official client sends in general flags
pub const GENERAL_FLAGS_RESERVE: [u8; 8] = [0x78, 0x00, 0xF8, 0x01, 0x00, 0xC8, 0x02, 0x00];

/// Known elements without displayable content decode to nothing
pub struct IgnoredMessagesProtocol;

impl MessageProtocol for IgnoredMessagesProtocol {
    fn name(&self) -> &'static str {
        "ignored-messages"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        match elem {
            Elem::Ignored { .. } => Ok(Some(Vec::new())),
            _ => Ok(None),
        }
    }

    fn compose(
        &self,
        _message: &SingleMessage,
        _ctx: &ComposeContext,
        _out: &mut ComposeOutput,
    ) -> Result<bool> {
        Ok(false)
    }
}

/// Unknown elements are kept verbatim so they survive a resend
pub struct UnsupportedMessageProtocol;

impl MessageProtocol for UnsupportedMessageProtocol {
    fn name(&self) -> &'static str {
        "unsupported-message"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        match elem {
            Elem::Unknown { tag, raw } => Ok(Some(vec![SingleMessage::Unsupported {
                tag: *tag,
                raw: raw.clone(),
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
        let SingleMessage::Unsupported { tag, raw } = message else {
            return Ok(false);
        };
        out.push(Elem::Unknown {
            tag: *tag,
            raw: raw.clone(),
        });
        Ok(true)
    }
}

pub struct GeneralFlagsProtocol;

impl MessageProtocol for GeneralFlagsProtocol {
    fn name(&self) -> &'static str {
        "general-flags"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        match elem {
            Elem::GeneralFlags(_) => Ok(Some(Vec::new())),
            _ => Ok(None),
        }
    }

    fn compose(
        &self,
        _message: &SingleMessage,
        _ctx: &ComposeContext,
        _out: &mut ComposeOutput,
    ) -> Result<bool> {
        Ok(false)
    }

    fn finish(&self, ctx: &ComposeContext, out: &mut ComposeOutput) -> Result<()> {
        if !ctx.with_general_flags || ctx.is_forward {
            return Ok(());
        }
        let flags = GeneralFlagsElem {
            long_text_res_id: out.long_text_res_id.clone(),
            pb_reserve: GENERAL_FLAGS_RESERVE.to_vec(),
        };
        out.push(Elem::GeneralFlags(flags));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::data::MessageTarget;

    #[test]
    fn test_flags_skipped_inside_forward() {
        let mut out = ComposeOutput::default();
        let ctx = ComposeContext::new(MessageTarget::Group(1)).in_forward();
        GeneralFlagsProtocol.finish(&ctx, &mut out).unwrap();
        assert!(out.elems.is_empty());
    }

    #[test]
    fn test_flags_carry_long_text_id() {
        let mut out = ComposeOutput {
            long_text_res_id: Some("res".into()),
            ..Default::default()
        };
        GeneralFlagsProtocol
            .finish(&ComposeContext::new(MessageTarget::Group(1)), &mut out)
            .unwrap();
        match &out.elems[..] {
            [Elem::GeneralFlags(flags)] => {
                assert_eq!(flags.long_text_res_id.as_deref(), Some("res"))
            }
            other => panic!("Expected general flags, got {other:?}"),
        }
    }
}
