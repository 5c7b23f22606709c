//! Message data model
//!
//! A [`MessageChain`] is an ordered, immutable list of [`SingleMessage`]
//! elements. Equality is structural and order-sensitive.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{GroupCode, Uin};

// ----------------------------------------------------------------------------
// Message Sources
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Friend,
    Group,
}

/// Identity of a sent or received message, used for quoting and recall
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageSource {
    pub kind: SourceKind,
    pub from: Uin,
    /// Friend uin or group code
    pub target: u64,
    pub sequence: u32,
    pub random: u32,
    pub time: u32,
    /// Plain-text preview of the original message
    pub preview: String,
}

// ----------------------------------------------------------------------------
// Element Payloads
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Image {
    pub image_id: String,
    pub width: u32,
    pub height: u32,
    pub size: u32,
    pub image_type: u32,
}

impl Image {
    pub fn new(image_id: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            width: 0,
            height: 0,
            size: 0,
            image_type: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Audio {
    pub file_name: String,
    /// Empty for legacy voice messages
    pub md5: Vec<u8>,
    pub size: u32,
    pub codec: u32,
    /// Seconds
    pub duration: u32,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMessage {
    pub id: String,
    pub bus_id: u32,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketFace {
    pub name: String,
    pub face_id: Vec<u8>,
    pub tab_id: u32,
    pub sub_type: u32,
    pub media_type: u32,
    pub magic_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuperFace {
    pub face_id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VipFace {
    pub kind_id: u32,
    pub name: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Poke {
    pub name: String,
    pub poke_type: u32,
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShortVideo {
    pub file_id: String,
    pub md5: Vec<u8>,
    pub name: String,
    pub size: u32,
    pub duration: u32,
    pub thumb_md5: Vec<u8>,
}

/// Music platform of a [`MusicShare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MusicKind {
    NeteaseCloudMusic,
    QQMusic,
    MiguMusic,
    KugouMusic,
    KuwoMusic,
}

impl MusicKind {
    pub const ALL: [MusicKind; 5] = [
        MusicKind::NeteaseCloudMusic,
        MusicKind::QQMusic,
        MusicKind::MiguMusic,
        MusicKind::KugouMusic,
        MusicKind::KuwoMusic,
    ];

    pub fn app_id(self) -> u64 {
        match self {
            MusicKind::NeteaseCloudMusic => 100495085,
            MusicKind::QQMusic => 100497308,
            MusicKind::MiguMusic => 1101053067,
            MusicKind::KugouMusic => 205141,
            MusicKind::KuwoMusic => 100243533,
        }
    }

    pub fn from_app_id(app_id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.app_id() == app_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MusicShare {
    pub kind: MusicKind,
    pub title: String,
    pub summary: String,
    pub jump_url: String,
    pub picture_url: String,
    pub music_url: String,
    /// Preview text shown in the conversation list
    pub brief: String,
}

/// Reference to an uploaded forward bundle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardMessage {
    pub res_id: String,
    pub file_name: String,
    pub title: String,
    pub brief: String,
    pub summary: String,
    pub preview: Vec<String>,
}

// ----------------------------------------------------------------------------
// Single Message
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SingleMessage {
    PlainText { content: String },
    At { target: Uin, display: String },
    AtAll,
    Face { id: u32 },
    Image(Image),
    FlashImage(Image),
    QuoteReply(MessageSource),
    Audio(Audio),
    FileMessage(FileMessage),
    MarketFace(MarketFace),
    /// Dice market face, value in `1..=6`
    Dice { value: u8 },
    SuperFace(SuperFace),
    MusicShare(MusicShare),
    Poke(Poke),
    LightApp { content: String },
    SimpleService { service_id: i32, content: String },
    ShortVideo(ShortVideo),
    VipFace(VipFace),
    Forward(ForwardMessage),
    /// Reference to an uploaded long text; `content` is the rich template
    LongMessage { res_id: String, content: String },
    Custom { key: String, payload: Vec<u8> },
    /// Element no unit could decode, kept verbatim
    Unsupported { tag: u16, raw: Vec<u8> },
}

/// Discriminant of [`SingleMessage`], used by precedence rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    PlainText,
    At,
    AtAll,
    Face,
    Image,
    FlashImage,
    QuoteReply,
    Audio,
    FileMessage,
    MarketFace,
    Dice,
    SuperFace,
    MusicShare,
    Poke,
    LightApp,
    SimpleService,
    ShortVideo,
    VipFace,
    Forward,
    LongMessage,
    Custom,
    Unsupported,
}

impl SingleMessage {
    pub fn text(content: impl Into<String>) -> Self {
        SingleMessage::PlainText {
            content: content.into(),
        }
    }

    pub fn at(target: Uin) -> Self {
        SingleMessage::At {
            target,
            display: format!("@{target}"),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            SingleMessage::PlainText { .. } => MessageKind::PlainText,
            SingleMessage::At { .. } => MessageKind::At,
            SingleMessage::AtAll => MessageKind::AtAll,
            SingleMessage::Face { .. } => MessageKind::Face,
            SingleMessage::Image(_) => MessageKind::Image,
            SingleMessage::FlashImage(_) => MessageKind::FlashImage,
            SingleMessage::QuoteReply(_) => MessageKind::QuoteReply,
            SingleMessage::Audio(_) => MessageKind::Audio,
            SingleMessage::FileMessage(_) => MessageKind::FileMessage,
            SingleMessage::MarketFace(_) => MessageKind::MarketFace,
            SingleMessage::Dice { .. } => MessageKind::Dice,
            SingleMessage::SuperFace(_) => MessageKind::SuperFace,
            SingleMessage::MusicShare(_) => MessageKind::MusicShare,
            SingleMessage::Poke(_) => MessageKind::Poke,
            SingleMessage::LightApp { .. } => MessageKind::LightApp,
            SingleMessage::SimpleService { .. } => MessageKind::SimpleService,
            SingleMessage::ShortVideo(_) => MessageKind::ShortVideo,
            SingleMessage::VipFace(_) => MessageKind::VipFace,
            SingleMessage::Forward(_) => MessageKind::Forward,
            SingleMessage::LongMessage { .. } => MessageKind::LongMessage,
            SingleMessage::Custom { .. } => MessageKind::Custom,
            SingleMessage::Unsupported { .. } => MessageKind::Unsupported,
        }
    }

    /// Key that ties related elements together, e.g. a flash image and the
    /// plain image it was made from
    pub fn identity(&self) -> Option<&str> {
        match self {
            SingleMessage::Image(image) | SingleMessage::FlashImage(image) => {
                Some(image.image_id.as_str())
            }
            SingleMessage::Forward(forward) => Some(forward.res_id.as_str()),
            SingleMessage::LongMessage { res_id, .. } => Some(res_id.as_str()),
            _ => None,
        }
    }

    /// Human readable form used for previews and logs
    pub fn content_to_string(&self) -> String {
        match self {
            SingleMessage::PlainText { content } => content.clone(),
            SingleMessage::At { display, .. } => display.clone(),
            SingleMessage::AtAll => "@全体成员".to_string(),
            SingleMessage::Face { id } => format!("[face:{id}]"),
            SingleMessage::Image(_) => "[图片]".to_string(),
            SingleMessage::FlashImage(_) => "[闪照]".to_string(),
            SingleMessage::QuoteReply(_) => String::new(),
            SingleMessage::Audio(_) => "[语音消息]".to_string(),
            SingleMessage::FileMessage(file) => format!("[文件]{}", file.name),
            SingleMessage::MarketFace(face) => face.name.clone(),
            SingleMessage::Dice { value } => format!("[骰子:{value}]"),
            SingleMessage::SuperFace(face) => face.name.clone(),
            SingleMessage::MusicShare(share) => share.brief.clone(),
            SingleMessage::Poke(poke) => format!("[{}]", poke.name),
            SingleMessage::LightApp { content } => content.clone(),
            SingleMessage::SimpleService { content, .. } => content.clone(),
            SingleMessage::ShortVideo(_) => "[视频]".to_string(),
            SingleMessage::VipFace(face) => format!("[{}]x{}", face.name, face.count),
            SingleMessage::Forward(_) => "[转发消息]".to_string(),
            SingleMessage::LongMessage { .. } => "[长消息]".to_string(),
            SingleMessage::Custom { key, .. } => format!("[custom:{key}]"),
            SingleMessage::Unsupported { .. } => "[不支持的消息]".to_string(),
        }
    }
}

impl From<&str> for SingleMessage {
    fn from(text: &str) -> Self {
        SingleMessage::text(text)
    }
}

impl From<String> for SingleMessage {
    fn from(text: String) -> Self {
        SingleMessage::PlainText { content: text }
    }
}

// ----------------------------------------------------------------------------
// Message Chain
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageChain {
    messages: Vec<SingleMessage>,
}

impl MessageChain {
    pub fn new(messages: Vec<SingleMessage>) -> Self {
        Self { messages }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a new chain with `message` appended
    pub fn plus(&self, message: impl Into<SingleMessage>) -> Self {
        let mut messages = self.messages.clone();
        messages.push(message.into());
        Self { messages }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SingleMessage> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[SingleMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains_kind(&self, kind: MessageKind) -> bool {
        self.messages.iter().any(|m| m.kind() == kind)
    }

    pub fn quote(&self) -> Option<&MessageSource> {
        self.messages.iter().find_map(|m| match m {
            SingleMessage::QuoteReply(source) => Some(source),
            _ => None,
        })
    }

    pub fn content_to_string(&self) -> String {
        self.messages
            .iter()
            .map(SingleMessage::content_to_string)
            .collect()
    }

    pub fn into_vec(self) -> Vec<SingleMessage> {
        self.messages
    }
}

impl fmt::Display for MessageChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content_to_string())
    }
}

impl FromIterator<SingleMessage> for MessageChain {
    fn from_iter<I: IntoIterator<Item = SingleMessage>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<SingleMessage>> for MessageChain {
    fn from(messages: Vec<SingleMessage>) -> Self {
        Self { messages }
    }
}

impl From<&str> for MessageChain {
    fn from(text: &str) -> Self {
        Self {
            messages: vec![SingleMessage::text(text)],
        }
    }
}

impl<'a> IntoIterator for &'a MessageChain {
    type Item = &'a SingleMessage;
    type IntoIter = core::slice::Iter<'a, SingleMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// Where a chain is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageTarget {
    Friend(Uin),
    Group(GroupCode),
}

impl MessageTarget {
    pub fn source_kind(self) -> SourceKind {
        match self {
            MessageTarget::Friend(_) => SourceKind::Friend,
            MessageTarget::Group(_) => SourceKind::Group,
        }
    }

    pub fn id(self) -> u64 {
        match self {
            MessageTarget::Friend(uin) => uin,
            MessageTarget::Group(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_equality_is_order_sensitive() {
        let a = MessageChain::from("hi").plus(SingleMessage::Face { id: 1 });
        let b = MessageChain::new(vec![SingleMessage::Face { id: 1 }, SingleMessage::text("hi")]);
        assert_ne!(a, b);
        assert_eq!(a, MessageChain::from("hi").plus(SingleMessage::Face { id: 1 }));
    }

    #[test]
    fn test_plus_does_not_mutate() {
        let base = MessageChain::from("a");
        let extended = base.plus("b");
        assert_eq!(base.len(), 1);
        assert_eq!(extended.content_to_string(), "ab");
    }

    #[test]
    fn test_music_kind_app_ids_are_distinct() {
        for kind in MusicKind::ALL {
            assert_eq!(MusicKind::from_app_id(kind.app_id()), Some(kind));
        }
    }
}
