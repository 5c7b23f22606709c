//! Plain text and mentions

use crate::errors::Result;
use crate::message::data::SingleMessage;
use crate::message::elem::{Elem, TextElem};
use crate::message::facade::{ComposeContext, ComposeOutput, DecodeContext, MessageProtocol};

/// Mention target meaning "everyone"
pub const AT_ALL_TARGET: u64 = 0;
pub const AT_ALL_DISPLAY: &str = "@全体成员";

pub struct TextProtocol;

impl MessageProtocol for TextProtocol {
    fn name(&self) -> &'static str {
        "text"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Elem::Text(text) = elem else {
            return Ok(None);
        };
        let message = match text.at {
            None => SingleMessage::text(text.text.clone()),
            Some(AT_ALL_TARGET) => SingleMessage::AtAll,
            Some(target) => SingleMessage::At {
                target,
                display: text.text.clone(),
            },
        };
        Ok(Some(vec![message]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        // Friends cannot be mentioned; the display text is sent instead
        let elem = match message {
            SingleMessage::PlainText { content } => TextElem {
                text: content.clone(),
                at: None,
            },
            SingleMessage::At { target, display } => TextElem {
                text: display.clone(),
                at: ctx.is_group().then_some(*target),
            },
            SingleMessage::AtAll => TextElem {
                text: AT_ALL_DISPLAY.to_string(),
                at: ctx.is_group().then_some(AT_ALL_TARGET),
            },
            _ => return Ok(false),
        };
        out.push(Elem::Text(elem));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::data::MessageTarget;

    #[test]
    fn test_at_in_friend_chat_becomes_text() {
        let mut out = ComposeOutput::default();
        let ctx = ComposeContext::new(MessageTarget::Friend(5));
        assert!(TextProtocol
            .compose(&SingleMessage::at(42), &ctx, &mut out)
            .unwrap());
        assert_eq!(
            out.elems,
            vec![Elem::Text(TextElem {
                text: "@42".into(),
                at: None
            })]
        );
    }

    #[test]
    fn test_at_all_decodes_from_zero_target() {
        let elem = Elem::Text(TextElem {
            text: AT_ALL_DISPLAY.into(),
            at: Some(0),
        });
        let decoded = TextProtocol
            .decode(&elem, &DecodeContext::group(1, 2))
            .unwrap();
        assert_eq!(decoded, Some(vec![SingleMessage::AtAll]));
    }
}
