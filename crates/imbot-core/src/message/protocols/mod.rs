//! Built-in message protocol units

use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::elem::Elem;
use super::facade::MessageProtocol;
use crate::errors::{ImbotError, MessageError, Result};

pub mod custom;
pub mod face;
pub mod fallback;
pub mod image;
pub mod media;
pub mod poke;
pub mod quote;
pub mod rich;
pub mod text;

pub use rich::long_message;

/// Every built-in unit in decode priority order
pub fn default_units() -> Vec<Arc<dyn MessageProtocol>> {
    vec![
        Arc::new(quote::QuoteReplyProtocol),
        Arc::new(media::AudioProtocol),
        Arc::new(custom::CustomMessageProtocol),
        Arc::new(face::FaceProtocol),
        Arc::new(media::FileMessageProtocol),
        Arc::new(image::FlashImageProtocol),
        Arc::new(image::ImageProtocol),
        Arc::new(face::MarketFaceProtocol),
        Arc::new(face::SuperFaceProtocol),
        Arc::new(rich::MusicShareProtocol),
        Arc::new(poke::PokeMessageProtocol),
        Arc::new(media::VoiceProtocol),
        Arc::new(rich::RichMessageProtocol),
        Arc::new(media::ShortVideoProtocol),
        Arc::new(text::TextProtocol),
        Arc::new(face::VipFaceProtocol),
        Arc::new(rich::ForwardMessageProtocol),
        Arc::new(rich::LongMessageProtocol),
        Arc::new(fallback::IgnoredMessagesProtocol),
        Arc::new(fallback::UnsupportedMessageProtocol),
        Arc::new(fallback::GeneralFlagsProtocol),
    ]
}

pub(crate) fn malformed(unit: &'static str, elem: &Elem, reason: impl ToString) -> ImbotError {
    MessageError::MalformedElement {
        unit,
        tag: elem.tag(),
        reason: reason.to_string(),
    }
    .into()
}

/// Deserialize a typed sub-element payload
pub(crate) fn sub_body<T: DeserializeOwned>(
    unit: &'static str,
    elem: &Elem,
    payload: &[u8],
) -> Result<T> {
    bincode::deserialize(payload).map_err(|e| malformed(unit, elem, e))
}
