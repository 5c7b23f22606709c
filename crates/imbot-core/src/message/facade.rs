//! Message protocol units and the facade that runs them
//!
//! Each [`MessageProtocol`] unit owns a family of element kinds. Decoding offers
//! every wire element to the units in priority order and the first unit that
//! claims it wins. Composition offers every chain element the same way, after
//! the chain has been normalised by the [`PrecedenceTable`].

use std::sync::Arc;

use tracing::{debug, warn};

use super::data::{MessageChain, MessageTarget, SingleMessage, SourceKind};
use super::elem::{self, Elem};
use super::precedence::PrecedenceTable;
use super::protocols;
use crate::errors::{MessageError, Result};
use crate::types::{GroupCode, Uin};

// ----------------------------------------------------------------------------
// Contexts
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposeContext {
    pub target: MessageTarget,
    /// Append a general flags element after the chain
    pub with_general_flags: bool,
    /// Composing a node inside a forward bundle
    pub is_forward: bool,
}

impl ComposeContext {
    pub fn new(target: MessageTarget) -> Self {
        Self {
            target,
            with_general_flags: true,
            is_forward: false,
        }
    }

    pub fn in_forward(mut self) -> Self {
        self.is_forward = true;
        self.with_general_flags = false;
        self
    }

    pub fn is_group(&self) -> bool {
        matches!(self.target, MessageTarget::Group(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeContext {
    pub kind: SourceKind,
    pub group_code: Option<GroupCode>,
    pub bot_uin: Uin,
}

impl DecodeContext {
    pub fn friend(bot_uin: Uin) -> Self {
        Self {
            kind: SourceKind::Friend,
            group_code: None,
            bot_uin,
        }
    }

    pub fn group(bot_uin: Uin, group_code: GroupCode) -> Self {
        Self {
            kind: SourceKind::Group,
            group_code: Some(group_code),
            bot_uin,
        }
    }
}

/// Elements produced so far, plus data units share with the finishing pass
#[derive(Debug, Default)]
pub struct ComposeOutput {
    pub elems: Vec<Elem>,
    pub long_text_res_id: Option<String>,
}

impl ComposeOutput {
    pub fn push(&mut self, elem: Elem) {
        self.elems.push(elem);
    }
}

// ----------------------------------------------------------------------------
// Unit Trait
// ----------------------------------------------------------------------------

pub trait MessageProtocol: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` leaves the element to later units; `Err` marks it malformed
    fn decode(&self, elem: &Elem, ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>>;

    /// Returns `true` if the unit handled `message`
    fn compose(
        &self,
        message: &SingleMessage,
        ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool>;

    /// Runs once after every element has been composed
    fn finish(&self, _ctx: &ComposeContext, _out: &mut ComposeOutput) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Facade
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct MessageProtocolFacade {
    units: Vec<Arc<dyn MessageProtocol>>,
    precedence: PrecedenceTable,
}

impl core::fmt::Debug for MessageProtocolFacade {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageProtocolFacade")
            .field("units", &self.unit_names())
            .field("precedence", &self.precedence)
            .finish()
    }
}

impl Default for MessageProtocolFacade {
    fn default() -> Self {
        Self::new(PrecedenceTable::default())
    }
}

impl MessageProtocolFacade {
    /// Facade with every built-in unit in priority order
    pub fn new(precedence: PrecedenceTable) -> Self {
        Self::with_units(protocols::default_units(), precedence)
    }

    pub fn with_units(units: Vec<Arc<dyn MessageProtocol>>, precedence: PrecedenceTable) -> Self {
        Self { units, precedence }
    }

    pub fn unit_names(&self) -> Vec<&'static str> {
        self.units.iter().map(|unit| unit.name()).collect()
    }

    pub fn precedence(&self) -> &PrecedenceTable {
        &self.precedence
    }

    pub fn compose(&self, chain: &MessageChain, ctx: &ComposeContext) -> Result<Vec<Elem>> {
        let normalized = self.precedence.normalize(chain);
        if normalized.len() != chain.len() {
            debug!(
                before = chain.len(),
                after = normalized.len(),
                "Chain normalised before composing"
            );
        }

        let mut out = ComposeOutput::default();
        for message in normalized.iter() {
            let mut claimed = false;
            for unit in &self.units {
                if unit.compose(message, ctx, &mut out)? {
                    claimed = true;
                    break;
                }
            }
            if !claimed {
                return Err(MessageError::Unclaimed {
                    kind: format!("{:?}", message.kind()),
                }
                .into());
            }
        }
        for unit in &self.units {
            unit.finish(ctx, &mut out)?;
        }
        Ok(out.elems)
    }

    /// Compose straight to framed element bytes
    pub fn compose_bytes(&self, chain: &MessageChain, ctx: &ComposeContext) -> Result<Vec<u8>> {
        elem::encode_elems(&self.compose(chain, ctx)?)
    }

    /// Decode wire elements; never fails
    pub fn decode(&self, elems: &[Elem], ctx: &DecodeContext) -> MessageChain {
        let mut messages = Vec::with_capacity(elems.len());
        for elem in elems {
            messages.extend(self.decode_one(elem, ctx));
        }
        MessageChain::new(messages)
    }

    pub fn decode_bytes(&self, bytes: &[u8], ctx: &DecodeContext) -> MessageChain {
        self.decode(&elem::decode_elems(bytes), ctx)
    }

    fn decode_one(&self, elem: &Elem, ctx: &DecodeContext) -> Vec<SingleMessage> {
        for unit in &self.units {
            match unit.decode(elem, ctx) {
                Ok(Some(messages)) => return messages,
                Ok(None) => continue,
                Err(error) => {
                    warn!(unit = unit.name(), tag = elem.tag(), %error, "Malformed message element");
                    return vec![unsupported(elem)];
                }
            }
        }
        debug!(tag = elem.tag(), "No unit claimed message element");
        vec![unsupported(elem)]
    }
}

fn unsupported(elem: &Elem) -> SingleMessage {
    SingleMessage::Unsupported {
        tag: elem.tag(),
        raw: elem.encode_body().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::elem::TextElem;

    struct Swallow;

    impl MessageProtocol for Swallow {
        fn name(&self) -> &'static str {
            "swallow"
        }

        fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
            match elem {
                Elem::Face { .. } => Err(MessageError::MalformedElement {
                    unit: "swallow",
                    tag: elem.tag(),
                    reason: "faces are not welcome".into(),
                }
                .into()),
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

    #[test]
    fn test_default_unit_order() {
        let facade = MessageProtocolFacade::default();
        let names = facade.unit_names();
        assert_eq!(names.first(), Some(&"quote-reply"));
        assert_eq!(names.last(), Some(&"general-flags"));
        let rich = names.iter().position(|n| *n == "rich-message").unwrap();
        let forward = names.iter().position(|n| *n == "forward-message").unwrap();
        assert!(rich < forward);
    }

    #[test]
    fn test_failing_unit_yields_unsupported() {
        let facade =
            MessageProtocolFacade::with_units(vec![Arc::new(Swallow)], PrecedenceTable::default());
        let chain = facade.decode(
            &[
                Elem::Face { id: 5 },
                Elem::Text(TextElem {
                    text: "x".into(),
                    at: None,
                }),
            ],
            &DecodeContext::friend(1),
        );
        assert_eq!(chain.len(), 2);
        assert!(chain
            .iter()
            .all(|m| matches!(m, SingleMessage::Unsupported { .. })));
    }

    #[test]
    fn test_unclaimed_compose_is_an_error() {
        let facade =
            MessageProtocolFacade::with_units(vec![Arc::new(Swallow)], PrecedenceTable::default());
        let result = facade.compose(
            &MessageChain::from("hi"),
            &ComposeContext::new(MessageTarget::Friend(1)),
        );
        assert!(result.is_err());
    }
}
