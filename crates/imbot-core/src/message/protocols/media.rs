//! Audio, legacy voice, short video and file messages

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::message::data::{Audio, FileMessage, ShortVideo, SingleMessage};
use crate::message::elem::{Elem, PttElem, VideoElem};
use crate::message::facade::{ComposeContext, ComposeOutput, DecodeContext, MessageProtocol};

use super::sub_body;

/// `elem_type` of a file transfer notice
pub const FILE_TRANS_TYPE: u32 = 24;

fn audio_from(ptt: &PttElem) -> SingleMessage {
    SingleMessage::Audio(Audio {
        file_name: ptt.file_name.clone(),
        md5: ptt.md5.clone(),
        size: ptt.size,
        codec: ptt.codec,
        duration: ptt.duration,
        url: (!ptt.url.is_empty()).then(|| ptt.url.clone()),
    })
}

/// Audio with a content hash
pub struct AudioProtocol;

impl MessageProtocol for AudioProtocol {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        match elem {
            Elem::Ptt(ptt) if !ptt.md5.is_empty() => Ok(Some(vec![audio_from(ptt)])),
            _ => Ok(None),
        }
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::Audio(audio) = message else {
            return Ok(false);
        };
        out.push(Elem::Ptt(PttElem {
            file_name: audio.file_name.clone(),
            md5: audio.md5.clone(),
            size: audio.size,
            codec: audio.codec,
            duration: audio.duration,
            url: audio.url.clone().unwrap_or_default(),
        }));
        Ok(true)
    }
}

/// Legacy voice elements that only carry a download url. Decode only; every
/// audio is composed by [`AudioProtocol`].
pub struct VoiceProtocol;

impl MessageProtocol for VoiceProtocol {
    fn name(&self) -> &'static str {
        "voice"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        match elem {
            Elem::Ptt(ptt) => Ok(Some(vec![audio_from(ptt)])),
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

pub struct ShortVideoProtocol;

impl MessageProtocol for ShortVideoProtocol {
    fn name(&self) -> &'static str {
        "short-video"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Elem::VideoFile(video) = elem else {
            return Ok(None);
        };
        Ok(Some(vec![SingleMessage::ShortVideo(ShortVideo {
            file_id: video.file_id.clone(),
            md5: video.md5.clone(),
            name: video.name.clone(),
            size: video.size,
            duration: video.duration,
            thumb_md5: video.thumb_md5.clone(),
        })]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::ShortVideo(video) = message else {
            return Ok(false);
        };
        out.push(Elem::VideoFile(VideoElem {
            file_id: video.file_id.clone(),
            md5: video.md5.clone(),
            name: video.name.clone(),
            size: video.size,
            duration: video.duration,
            thumb_md5: video.thumb_md5.clone(),
        }));
        Ok(true)
    }
}

#[derive(Serialize, Deserialize)]
struct FileBody {
    id: String,
    bus_id: u32,
    name: String,
    size: u64,
}

pub struct FileMessageProtocol;

impl MessageProtocol for FileMessageProtocol {
    fn name(&self) -> &'static str {
        "file-message"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        let Elem::TransElem {
            elem_type: FILE_TRANS_TYPE,
            payload,
        } = elem
        else {
            return Ok(None);
        };
        let body: FileBody = sub_body(self.name(), elem, payload)?;
        Ok(Some(vec![SingleMessage::FileMessage(FileMessage {
            id: body.id,
            bus_id: body.bus_id,
            name: body.name,
            size: body.size,
        })]))
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::FileMessage(file) = message else {
            return Ok(false);
        };
        out.push(Elem::TransElem {
            elem_type: FILE_TRANS_TYPE,
            payload: bincode::serialize(&FileBody {
                id: file.id.clone(),
                bus_id: file.bus_id,
                name: file.name.clone(),
                size: file.size,
            })?,
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_ptt(md5: Vec<u8>, url: &str) -> Elem {
        Elem::Ptt(PttElem {
            file_name: "a.amr".into(),
            md5,
            size: 10,
            codec: 1,
            duration: 2,
            url: url.into(),
        })
    }

    #[test]
    fn test_audio_claims_only_hashed_ptt() {
        let ctx = DecodeContext::friend(1);
        assert!(AudioProtocol
            .decode(&create_test_ptt(Vec::new(), "http://x"), &ctx)
            .unwrap()
            .is_none());
        assert!(AudioProtocol
            .decode(&create_test_ptt(vec![1; 16], ""), &ctx)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_voice_keeps_url() {
        let decoded = VoiceProtocol
            .decode(
                &create_test_ptt(Vec::new(), "http://x"),
                &DecodeContext::friend(1),
            )
            .unwrap()
            .unwrap();
        match &decoded[0] {
            SingleMessage::Audio(audio) => assert_eq!(audio.url.as_deref(), Some("http://x")),
            other => panic!("Expected audio, got {other:?}"),
        }
    }
}
