//! Chain normalisation rules applied before composition
//!
//! Rules run in a fixed order: unique kinds keep their first occurrence,
//! suppressions remove losers that share an identity with a winner, and the
//! last exclusive element discards every other element except the kinds listed
//! in `exclusive_keeps`.

use serde::{Deserialize, Serialize};

use super::data::{MessageChain, MessageKind, SingleMessage};

/// `winner` removes any `loser` with the same identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    pub winner: MessageKind,
    pub loser: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecedenceTable {
    /// At most one element of each kind; the first wins
    pub unique_first: Vec<MessageKind>,
    pub suppressions: Vec<Suppression>,
    /// Kinds that must stand alone in a chain; the last one wins
    pub exclusive: Vec<MessageKind>,
    /// Kinds that survive next to an exclusive element
    pub exclusive_keeps: Vec<MessageKind>,
}

impl Default for PrecedenceTable {
    fn default() -> Self {
        Self {
            unique_first: vec![MessageKind::QuoteReply],
            suppressions: vec![Suppression {
                winner: MessageKind::FlashImage,
                loser: MessageKind::Image,
            }],
            exclusive: vec![
                MessageKind::Audio,
                MessageKind::FileMessage,
                MessageKind::Forward,
                MessageKind::LongMessage,
                MessageKind::MusicShare,
                MessageKind::Poke,
                MessageKind::LightApp,
                MessageKind::SimpleService,
                MessageKind::ShortVideo,
                MessageKind::MarketFace,
                MessageKind::Dice,
            ],
            exclusive_keeps: vec![MessageKind::QuoteReply],
        }
    }
}

impl PrecedenceTable {
    /// Table that leaves every chain untouched
    pub fn permissive() -> Self {
        Self {
            unique_first: Vec::new(),
            suppressions: Vec::new(),
            exclusive: Vec::new(),
            exclusive_keeps: Vec::new(),
        }
    }

    pub fn normalize(&self, chain: &MessageChain) -> MessageChain {
        let mut messages: Vec<&SingleMessage> = Vec::with_capacity(chain.len());

        let mut seen: Vec<MessageKind> = Vec::new();
        for message in chain.iter() {
            let kind = message.kind();
            if self.unique_first.contains(&kind) {
                if seen.contains(&kind) {
                    continue;
                }
                seen.push(kind);
            }
            messages.push(message);
        }

        for rule in &self.suppressions {
            let winners: Vec<Option<&str>> = messages
                .iter()
                .copied()
                .filter(|m| m.kind() == rule.winner)
                .map(|m| m.identity())
                .collect();
            if winners.is_empty() {
                continue;
            }
            messages.retain(|m| m.kind() != rule.loser || !winners.contains(&m.identity()));
        }

        let last_exclusive = messages
            .iter()
            .rposition(|m| self.exclusive.contains(&m.kind()));
        if let Some(winner) = last_exclusive {
            messages = messages
                .into_iter()
                .enumerate()
                .filter(|(index, m)| {
                    *index == winner || self.exclusive_keeps.contains(&m.kind())
                })
                .map(|(_, m)| m)
                .collect();
        }

        messages.into_iter().cloned().collect()
    }
}
