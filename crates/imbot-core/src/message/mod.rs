//! Message protocol pipeline: chain model, wire elements and the units that
//! translate between them

pub mod data;
pub mod elem;
pub mod facade;
pub mod precedence;
pub mod protocols;

pub use data::{
    Audio, FileMessage, ForwardMessage, Image, MarketFace, MessageChain, MessageKind,
    MessageSource, MessageTarget, MusicKind, MusicShare, Poke, ShortVideo, SingleMessage,
    SourceKind, SuperFace, VipFace,
};
pub use elem::{decode_elems, encode_elems, Elem};
pub use facade::{
    ComposeContext, ComposeOutput, DecodeContext, MessageProtocol, MessageProtocolFacade,
};
pub use precedence::{PrecedenceTable, Suppression};
pub use protocols::long_message;
