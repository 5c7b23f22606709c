//! Rich messages: XML service templates, JSON light apps, music shares, and the
//! service 35 references to forward bundles and long texts
//!
//! Rich payloads start with a compression flag byte: `0` raw UTF-8, `1` zlib.
//! Outgoing payloads are always zlib compressed.

use serde::{Deserialize, Serialize};

use crate::errors::{MessageError, Result};
use crate::message::data::{ForwardMessage, MusicKind, MusicShare, SingleMessage};
use crate::message::elem::Elem;
use crate::message::facade::{ComposeContext, ComposeOutput, DecodeContext, MessageProtocol};
use crate::protocol::wire;

use super::malformed;

/// Service id of forward bundles and long texts
pub const MULTI_MSG_SERVICE_ID: i32 = 35;

const FLAG_RAW: u8 = 0;
const FLAG_ZLIB: u8 = 1;

fn unpack(unit: &'static str, elem: &Elem, data: &[u8]) -> Result<String> {
    let Some((&flag, body)) = data.split_first() else {
        return Err(malformed(unit, elem, "empty rich payload"));
    };
    let bytes = match flag {
        FLAG_RAW => body.to_vec(),
        FLAG_ZLIB => wire::decompress(body).map_err(|e| malformed(unit, elem, e))?,
        other => return Err(malformed(unit, elem, format!("compression flag {other}"))),
    };
    String::from_utf8(bytes).map_err(|e| malformed(unit, elem, e))
}

fn pack(content: &str) -> Result<Vec<u8>> {
    let compressed = wire::compress(content.as_bytes())?;
    let mut out = Vec::with_capacity(compressed.len() + 1);
    out.push(FLAG_ZLIB);
    out.extend_from_slice(&compressed);
    Ok(out)
}

// ----------------------------------------------------------------------------
// XML Helpers
// ----------------------------------------------------------------------------

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Value of the first ` name="..."` attribute
fn find_attr(xml: &str, name: &str) -> Option<String> {
    let needle = format!(" {name}=\"");
    let start = xml.find(&needle)? + needle.len();
    let end = xml[start..].find('"')? + start;
    Some(unescape_xml(&xml[start..end]))
}

/// Text content of every `<tag ...>...</tag>` element in document order
fn find_elements(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut rest = xml;
    while let Some(pos) = rest.find(&open) {
        let after = &rest[pos + open.len()..];
        if !after.starts_with([' ', '>']) {
            rest = after;
            continue;
        }
        let Some(gt) = after.find('>') else { break };
        let body = &after[gt + 1..];
        let Some(end) = body.find(&close) else { break };
        found.push(unescape_xml(&body[..end]));
        rest = &body[end + close.len()..];
    }
    found
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultiMsgShape {
    Forward,
    Long,
}

fn classify_multi_msg(xml: &str) -> Option<MultiMsgShape> {
    let res_id = find_attr(xml, "m_resid").filter(|id| !id.is_empty());
    match res_id {
        Some(_) if find_attr(xml, "multiMsgFlag").as_deref() == Some("1") => {
            Some(MultiMsgShape::Long)
        }
        Some(_) => Some(MultiMsgShape::Forward),
        None if find_attr(xml, "action").as_deref() == Some("viewMultiMsg") => {
            Some(MultiMsgShape::Forward)
        }
        None => None,
    }
}

fn service_35<'a>(elem: &'a Elem) -> Option<&'a [u8]> {
    match elem {
        Elem::RichMsg {
            service_id: MULTI_MSG_SERVICE_ID,
            template,
        } => Some(template),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Templates
// ----------------------------------------------------------------------------

fn render_forward(forward: &ForwardMessage) -> String {
    let preview: String = forward
        .preview
        .iter()
        .map(|line| format!("<title color=\"#777777\" size=\"26\">{}</title>", escape_xml(line)))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <msg serviceID=\"35\" templateID=\"1\" action=\"viewMultiMsg\" brief=\"{brief}\" \
         m_resid=\"{res_id}\" m_fileName=\"{file_name}\" sourceMsgId=\"0\" url=\"\" flag=\"3\" \
         adverSign=\"0\" multiMsgFlag=\"0\">\
         <item layout=\"1\" advertiser_id=\"0\" aid=\"0\">\
         <title size=\"34\" maxLines=\"2\" lineSpace=\"12\">{title}</title>{preview}\
         <hr hidden=\"false\" style=\"0\" />\
         <summary size=\"26\" color=\"#777777\">{summary}</summary></item>\
         <source name=\"聊天记录\" icon=\"\" action=\"\" appid=\"-1\" /></msg>",
        brief = escape_xml(&forward.brief),
        res_id = escape_xml(&forward.res_id),
        file_name = escape_xml(&forward.file_name),
        title = escape_xml(&forward.title),
        summary = escape_xml(&forward.summary),
    )
}

fn parse_forward(xml: &str) -> ForwardMessage {
    let mut titles = find_elements(xml, "title").into_iter();
    ForwardMessage {
        res_id: find_attr(xml, "m_resid").unwrap_or_default(),
        file_name: find_attr(xml, "m_fileName").unwrap_or_default(),
        brief: find_attr(xml, "brief").unwrap_or_default(),
        title: titles.next().unwrap_or_default(),
        preview: titles.collect(),
        summary: find_elements(xml, "summary")
            .into_iter()
            .next()
            .unwrap_or_default(),
    }
}

/// Build a long message reference for an uploaded text
pub fn long_message(res_id: &str, brief: &str) -> SingleMessage {
    let content = format!(
        "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>\
         <msg serviceID=\"35\" templateID=\"1\" action=\"viewMultiMsg\" brief=\"{brief}\" \
         m_resid=\"{res_id}\" m_fileName=\"{res_id}\" sourceMsgId=\"0\" url=\"\" flag=\"3\" \
         adverSign=\"0\" multiMsgFlag=\"1\">\
         <item layout=\"1\"><title>{brief}</title>\
         <hr hidden=\"false\" style=\"0\" /><summary>点击查看完整消息</summary></item>\
         <source name=\"聊天记录\" icon=\"\" action=\"\" appid=\"-1\" /></msg>",
        brief = escape_xml(brief),
        res_id = escape_xml(res_id),
    );
    SingleMessage::LongMessage {
        res_id: res_id.to_string(),
        content,
    }
}

// ----------------------------------------------------------------------------
// Music Share
// ----------------------------------------------------------------------------

const MUSIC_APP: &str = "com.tencent.structmsg";
const MUSIC_VIEW: &str = "music";

#[derive(Debug, Serialize, Deserialize)]
struct MusicDocument {
    app: String,
    view: String,
    ver: String,
    prompt: String,
    meta: MusicMeta,
}

#[derive(Debug, Serialize, Deserialize)]
struct MusicMeta {
    music: MusicBody,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MusicBody {
    appid: u64,
    tag: String,
    title: String,
    desc: String,
    jump_url: String,
    preview: String,
    music_url: String,
}

fn music_tag(kind: MusicKind) -> &'static str {
    match kind {
        MusicKind::NeteaseCloudMusic => "网易云音乐",
        MusicKind::QQMusic => "QQ音乐",
        MusicKind::MiguMusic => "咪咕音乐",
        MusicKind::KugouMusic => "酷狗音乐",
        MusicKind::KuwoMusic => "酷我音乐",
    }
}

fn parse_music(json: &str) -> Option<MusicShare> {
    let document: MusicDocument = serde_json::from_str(json).ok()?;
    if document.app != MUSIC_APP || document.view != MUSIC_VIEW {
        return None;
    }
    let body = document.meta.music;
    Some(MusicShare {
        kind: MusicKind::from_app_id(body.appid)?,
        title: body.title,
        summary: body.desc,
        jump_url: body.jump_url,
        picture_url: body.preview,
        music_url: body.music_url,
        brief: document.prompt,
    })
}

fn render_music(share: &MusicShare) -> Result<String> {
    let document = MusicDocument {
        app: MUSIC_APP.to_string(),
        view: MUSIC_VIEW.to_string(),
        ver: "0.0.0.1".to_string(),
        prompt: share.brief.clone(),
        meta: MusicMeta {
            music: MusicBody {
                appid: share.kind.app_id(),
                tag: music_tag(share.kind).to_string(),
                title: share.title.clone(),
                desc: share.summary.clone(),
                jump_url: share.jump_url.clone(),
                preview: share.picture_url.clone(),
                music_url: share.music_url.clone(),
            },
        },
    };
    serde_json::to_string(&document).map_err(|e| {
        MessageError::InvalidContent {
            kind: "MusicShare".into(),
            reason: e.to_string(),
        }
        .into()
    })
}

pub struct MusicShareProtocol;

impl MessageProtocol for MusicShareProtocol {
    fn name(&self) -> &'static str {
        "music-share"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Elem::LightApp { data } = elem else {
            return Ok(None);
        };
        // Undecodable payloads are reported by the rich message unit
        let Ok(json) = unpack(self.name(), elem, data) else {
            return Ok(None);
        };
        Ok(parse_music(&json).map(|share| vec![SingleMessage::MusicShare(share)]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::MusicShare(share) = message else {
            return Ok(false);
        };
        out.push(Elem::LightApp {
            data: pack(&render_music(share)?)?,
        });
        Ok(true)
    }
}

// ----------------------------------------------------------------------------
// Generic Rich Messages
// ----------------------------------------------------------------------------

/// XML services and light apps not claimed by a more specific unit
pub struct RichMessageProtocol;

impl MessageProtocol for RichMessageProtocol {
    fn name(&self) -> &'static str {
        "rich-message"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        match elem {
            Elem::RichMsg {
                service_id,
                template,
            } => {
                let content = unpack(self.name(), elem, template)?;
                if *service_id == MULTI_MSG_SERVICE_ID && classify_multi_msg(&content).is_some() {
                    return Ok(None);
                }
                Ok(Some(vec![SingleMessage::SimpleService {
                    service_id: *service_id,
                    content,
                }]))
            }
            Elem::LightApp { data } => {
                let content = unpack(self.name(), elem, data)?;
                Ok(Some(vec![SingleMessage::LightApp { content }]))
            }
            _ => Ok(None),
        }
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let elem = match message {
            SingleMessage::SimpleService {
                service_id,
                content,
            } => Elem::RichMsg {
                service_id: *service_id,
                template: pack(content)?,
            },
            SingleMessage::LightApp { content } => Elem::LightApp {
                data: pack(content)?,
            },
            _ => return Ok(false),
        };
        out.push(elem);
        Ok(true)
    }
}

pub struct ForwardMessageProtocol;

impl MessageProtocol for ForwardMessageProtocol {
    fn name(&self) -> &'static str {
        "forward-message"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Some(template) = service_35(elem) else {
            return Ok(None);
        };
        let xml = unpack(self.name(), elem, template)?;
        if classify_multi_msg(&xml) != Some(MultiMsgShape::Forward) {
            return Ok(None);
        }
        Ok(Some(vec![SingleMessage::Forward(parse_forward(&xml))]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::Forward(forward) = message else {
            return Ok(false);
        };
        out.push(Elem::RichMsg {
            service_id: MULTI_MSG_SERVICE_ID,
            template: pack(&render_forward(forward))?,
        });
        Ok(true)
    }
}

pub struct LongMessageProtocol;

impl MessageProtocol for LongMessageProtocol {
    fn name(&self) -> &'static str {
        "long-message"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Some(template) = service_35(elem) else {
            return Ok(None);
        };
        let xml = unpack(self.name(), elem, template)?;
        if classify_multi_msg(&xml) != Some(MultiMsgShape::Long) {
            return Ok(None);
        }
        Ok(Some(vec![SingleMessage::LongMessage {
            res_id: find_attr(&xml, "m_resid").unwrap_or_default(),
            content: xml,
        }]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::LongMessage { res_id, content } = message else {
            return Ok(false);
        };
        out.push(Elem::RichMsg {
            service_id: MULTI_MSG_SERVICE_ID,
            template: pack(content)?,
        });
        out.long_text_res_id = Some(res_id.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::data::MessageTarget;

    fn create_test_forward() -> ForwardMessage {
        ForwardMessage {
            res_id: "res/abc".into(),
            file_name: "1700000000".into(),
            title: "群聊的聊天记录".into(),
            brief: "[聊天记录]".into(),
            summary: "查看2条转发消息".into(),
            preview: vec!["alice: hi <3".into(), "bob: \"yo\" & bye".into()],
        }
    }

    #[test]
    fn test_raw_flag_is_accepted() {
        let elem = Elem::RichMsg {
            service_id: 1,
            template: [&[FLAG_RAW][..], b"<msg/>"].concat(),
        };
        let decoded = RichMessageProtocol
            .decode(&elem, &DecodeContext::friend(1))
            .unwrap();
        assert_eq!(
            decoded,
            Some(vec![SingleMessage::SimpleService {
                service_id: 1,
                content: "<msg/>".into()
            }])
        );
    }

    #[test]
    fn test_unknown_compression_flag_is_malformed() {
        let elem = Elem::LightApp {
            data: vec![7, 1, 2],
        };
        assert!(RichMessageProtocol
            .decode(&elem, &DecodeContext::friend(1))
            .is_err());
    }

    #[test]
    fn test_forward_template_parses_back() {
        let forward = create_test_forward();
        assert_eq!(parse_forward(&render_forward(&forward)), forward);
    }

    #[test]
    fn test_rich_unit_leaves_forward_to_later_units() {
        let mut out = ComposeOutput::default();
        let ctx = ComposeContext::new(MessageTarget::Group(1));
        ForwardMessageProtocol
            .compose(&SingleMessage::Forward(create_test_forward()), &ctx, &mut out)
            .unwrap();
        let decode_ctx = DecodeContext::group(1, 1);
        assert_eq!(RichMessageProtocol.decode(&out.elems[0], &decode_ctx).unwrap(), None);
        assert_eq!(LongMessageProtocol.decode(&out.elems[0], &decode_ctx).unwrap(), None);
        assert!(ForwardMessageProtocol
            .decode(&out.elems[0], &decode_ctx)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_long_message_sets_general_flag_id() {
        let mut out = ComposeOutput::default();
        let ctx = ComposeContext::new(MessageTarget::Friend(1));
        LongMessageProtocol
            .compose(&long_message("long/1", "very long"), &ctx, &mut out)
            .unwrap();
        assert_eq!(out.long_text_res_id.as_deref(), Some("long/1"));
    }

    #[test]
    fn test_view_multi_msg_without_resid_is_forward() {
        let xml = "<msg serviceID=\"35\" action=\"viewMultiMsg\" m_fileName=\"x\"></msg>";
        assert_eq!(classify_multi_msg(xml), Some(MultiMsgShape::Forward));
        assert_eq!(classify_multi_msg("<msg serviceID=\"35\"></msg>"), None);
    }

    #[test]
    fn test_foreign_light_app_is_not_music() {
        let json = r#"{"app":"com.tencent.miniapp","view":"notification","ver":"1","prompt":"","meta":{}}"#;
        assert!(parse_music(json).is_none());
    }
}
