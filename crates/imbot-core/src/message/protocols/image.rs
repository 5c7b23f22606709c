//! Images and flash images

use crate::errors::Result;
use crate::message::data::{Image, SingleMessage};
use crate::message::elem::{common_service, Elem, ImageElem};
use crate::message::facade::{ComposeContext, ComposeOutput, DecodeContext, MessageProtocol};

use super::sub_body;

impl From<&ImageElem> for Image {
    fn from(elem: &ImageElem) -> Self {
        Image {
            image_id: elem.image_id.clone(),
            width: elem.width,
            height: elem.height,
            size: elem.size,
            image_type: elem.image_type,
        }
    }
}

impl From<&Image> for ImageElem {
    fn from(image: &Image) -> Self {
        ImageElem {
            image_id: image.image_id.clone(),
            width: image.width,
            height: image.height,
            size: image.size,
            image_type: image.image_type,
        }
    }
}

pub struct ImageProtocol;

impl MessageProtocol for ImageProtocol {
    fn name(&self) -> &'static str {
        "image"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        match elem {
            Elem::Image(image) => Ok(Some(vec![SingleMessage::Image(image.into())])),
            _ => Ok(None),
        }
    }

    fn compose(
        &self,
        message: &SingleMessage,
        _ctx: &ComposeContext,
        out: &mut ComposeOutput,
    ) -> Result<bool> {
        let SingleMessage::Image(image) = message else {
            return Ok(false);
        };
        out.push(Elem::Image(image.into()));
        Ok(true)
    }
}

pub struct FlashImageProtocol;

impl MessageProtocol for FlashImageProtocol {
    fn name(&self) -> &'static str {
        "flash-image"
    }

    fn decode(&self, elem: &Elem, _ctx: &DecodeContext) -> Result<Option<Vec<SingleMessage>>> {
        match elem {
            Elem::CommonElem {
                service_type: common_service::FLASH_IMAGE,
                payload,
            } => {
                let image: ImageElem = sub_body(self.name(), elem, payload)?;
                Ok(Some(vec![SingleMessage::FlashImage((&image).into())]))
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
        let SingleMessage::FlashImage(image) = message else {
            return Ok(false);
        };
        out.push(Elem::CommonElem {
            service_type: common_service::FLASH_IMAGE,
            payload: bincode::serialize(&ImageElem::from(image))?,
        });
        Ok(true)
    }
}
