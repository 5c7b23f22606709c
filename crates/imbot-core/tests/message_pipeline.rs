//! Compose/decode behaviour of the message pipeline across every element kind

use imbot_core::message::{
    long_message, Audio, ComposeContext, DecodeContext, FileMessage, ForwardMessage, Image,
    MarketFace, MessageChain, MessageProtocolFacade, MessageSource, MessageTarget, MusicKind,
    MusicShare, Poke, PrecedenceTable, ShortVideo, SingleMessage, SourceKind, SuperFace, VipFace,
};
use imbot_core::message::elem::{decode_elems, encode_elems, Elem};

const BOT: u64 = 10000;
const GROUP: u64 = 123456;

fn create_test_group_contexts() -> (ComposeContext, DecodeContext) {
    (
        ComposeContext::new(MessageTarget::Group(GROUP)),
        DecodeContext::group(BOT, GROUP),
    )
}

fn round_trip(facade: &MessageProtocolFacade, chain: &MessageChain) -> MessageChain {
    let (compose_ctx, decode_ctx) = create_test_group_contexts();
    let bytes = facade.compose_bytes(chain, &compose_ctx).unwrap();
    facade.decode_bytes(&bytes, &decode_ctx)
}

fn create_test_source() -> MessageSource {
    MessageSource {
        kind: SourceKind::Group,
        from: 20001,
        target: GROUP,
        sequence: 77,
        random: 0xdead_beef,
        time: 1_700_000_000,
        preview: "original text".into(),
    }
}

fn exclusive_samples() -> Vec<SingleMessage> {
    vec![
        SingleMessage::Audio(Audio {
            file_name: "voice.amr".into(),
            md5: vec![0xab; 16],
            size: 2048,
            codec: 1,
            duration: 4,
            url: Some("http://grouptalk.c2c.qq.com/voice".into()),
        }),
        SingleMessage::Audio(Audio {
            file_name: "legacy.amr".into(),
            md5: Vec::new(),
            size: 1024,
            codec: 0,
            duration: 2,
            url: Some("http://legacy/voice".into()),
        }),
        SingleMessage::FileMessage(FileMessage {
            id: "/abc-def".into(),
            bus_id: 102,
            name: "report.pdf".into(),
            size: 1 << 20,
        }),
        SingleMessage::Forward(ForwardMessage {
            res_id: "forward-res".into(),
            file_name: "1700000000".into(),
            title: "群聊的聊天记录".into(),
            brief: "[聊天记录]".into(),
            summary: "查看3条转发消息".into(),
            preview: vec!["a: 1".into(), "b: 2".into(), "c: 3".into()],
        }),
        long_message("long-res", "a very long text"),
        SingleMessage::MusicShare(MusicShare {
            kind: MusicKind::NeteaseCloudMusic,
            title: "Song".into(),
            summary: "Artist".into(),
            jump_url: "https://music.example/song".into(),
            picture_url: "https://music.example/cover.jpg".into(),
            music_url: "https://music.example/song.mp3".into(),
            brief: "[分享]Song".into(),
        }),
        SingleMessage::Poke(Poke {
            name: "戳一戳".into(),
            poke_type: 1,
            id: 0,
        }),
        SingleMessage::LightApp {
            content: r#"{"app":"com.tencent.miniapp","view":"notification"}"#.into(),
        },
        SingleMessage::SimpleService {
            service_id: 60,
            content: "<msg serviceID=\"60\"><item/></msg>".into(),
        },
        SingleMessage::ShortVideo(ShortVideo {
            file_id: "video-id".into(),
            md5: vec![1; 16],
            name: "clip.mp4".into(),
            size: 4096,
            duration: 12,
            thumb_md5: vec![2; 16],
        }),
        SingleMessage::MarketFace(MarketFace {
            name: "[开心]".into(),
            face_id: vec![3; 16],
            tab_id: 200,
            sub_type: 3,
            media_type: 0,
            magic_value: String::new(),
        }),
        SingleMessage::Dice { value: 4 },
    ]
}

#[test]
fn test_mixed_chain_round_trip_preserves_order() {
    let facade = MessageProtocolFacade::default();
    let chain = MessageChain::new(vec![
        SingleMessage::QuoteReply(create_test_source()),
        SingleMessage::at(20001),
        SingleMessage::text(" hello "),
        SingleMessage::AtAll,
        SingleMessage::Face { id: 14 },
        SingleMessage::Image(Image {
            image_id: "{01E9451B-70ED-EAE3-B37C-101F1EEBF5B5}.jpg".into(),
            width: 640,
            height: 480,
            size: 30_000,
            image_type: 1000,
        }),
        SingleMessage::FlashImage(Image::new("{FLASH}.jpg")),
        SingleMessage::SuperFace(SuperFace {
            face_id: 5,
            name: "/流泪".into(),
        }),
        SingleMessage::VipFace(VipFace {
            kind_id: 9,
            name: "榴莲".into(),
            count: 2,
        }),
        SingleMessage::Custom {
            key: "app.card".into(),
            payload: vec![1, 2, 3],
        },
        SingleMessage::text("bye"),
    ]);

    assert_eq!(round_trip(&facade, &chain), chain);
}

#[test]
fn test_every_exclusive_kind_round_trips_alone() {
    let facade = MessageProtocolFacade::default();
    for sample in exclusive_samples() {
        let chain = MessageChain::new(vec![sample.clone()]);
        let decoded = round_trip(&facade, &chain);
        assert_eq!(decoded.as_slice(), &[sample]);
    }
}

#[test]
fn test_unknown_elements_decode_to_unsupported_and_resend_verbatim() {
    let facade = MessageProtocolFacade::default();
    let elems = vec![
        Elem::Unknown {
            tag: 999,
            raw: vec![9, 9, 9],
        },
        Elem::Face { id: 1 },
    ];
    let bytes = encode_elems(&elems).unwrap();
    let (compose_ctx, decode_ctx) = create_test_group_contexts();

    let chain = facade.decode_bytes(&bytes, &decode_ctx);
    assert_eq!(
        chain.as_slice(),
        &[
            SingleMessage::Unsupported {
                tag: 999,
                raw: vec![9, 9, 9]
            },
            SingleMessage::Face { id: 1 },
        ]
    );

    let resent = facade.compose(&chain, &compose_ctx).unwrap();
    assert_eq!(&resent[..2], &elems[..]);
}

#[test]
fn test_decoding_garbage_is_total() {
    let facade = MessageProtocolFacade::default();
    let chain = facade.decode_bytes(&[0, 1, 0, 0, 0, 200, 1, 2], &DecodeContext::friend(BOT));
    assert_eq!(chain.len(), 1);
    assert!(matches!(chain.as_slice()[0], SingleMessage::Unsupported { .. }));
}

#[test]
fn test_general_flags_appended_once_at_end() {
    let facade = MessageProtocolFacade::default();
    let (compose_ctx, _) = create_test_group_contexts();
    let chain = MessageChain::from("a").plus("b");
    let elems = facade.compose(&chain, &compose_ctx).unwrap();
    let flags = elems
        .iter()
        .filter(|e| matches!(e, Elem::GeneralFlags(_)))
        .count();
    assert_eq!(flags, 1);
    assert!(matches!(elems.last(), Some(Elem::GeneralFlags(_))));
    assert_eq!(decode_elems(&encode_elems(&elems).unwrap()), elems);
}

#[test]
fn test_default_precedence_applied_before_compose() {
    let facade = MessageProtocolFacade::default();
    let chain = MessageChain::new(vec![
        SingleMessage::text("dropped"),
        SingleMessage::Dice { value: 1 },
        SingleMessage::Dice { value: 2 },
    ]);
    let decoded = round_trip(&facade, &chain);
    assert_eq!(decoded.as_slice(), &[SingleMessage::Dice { value: 2 }]);
}

#[test]
fn test_permissive_precedence_keeps_everything() {
    let facade = MessageProtocolFacade::new(PrecedenceTable::permissive());
    let chain = MessageChain::new(vec![
        SingleMessage::Dice { value: 1 },
        SingleMessage::Dice { value: 2 },
    ]);
    assert_eq!(round_trip(&facade, &chain), chain);
}

#[test]
fn test_friend_context_decodes_quote_as_friend_source() {
    let facade = MessageProtocolFacade::default();
    let mut source = create_test_source();
    source.kind = SourceKind::Friend;
    let chain = MessageChain::new(vec![SingleMessage::QuoteReply(source.clone())]);
    let ctx = ComposeContext::new(MessageTarget::Friend(20001));
    let bytes = facade.compose_bytes(&chain, &ctx).unwrap();
    let decoded = facade.decode_bytes(&bytes, &DecodeContext::friend(BOT));
    assert_eq!(decoded.quote(), Some(&source));
}
