// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Session key algebra: pure functions over an opaque, colon-delimited
//! string (`<channel>:<userId>`, `cron:<taskId>:<token>`, …) plus optional
//! `:subagent:<token>` nesting suffixes.
//!
//! Every function here is total — malformed input never panics, it yields a
//! best-effort classification with empty fields.

pub const SEPARATOR: char = ':';
pub const SUBAGENT_SEGMENT: &str = "subagent";
pub const MAX_DEPTH: u32 = 3;

/// The parsed shape of a session key: root channel/id plus the chain of
/// subagent tokens appended after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub kind: String,
    pub id: String,
    pub subagent_tokens: Vec<String>,
}

impl ParsedKey {
    pub fn is_subagent(&self) -> bool {
        !self.subagent_tokens.is_empty()
    }

    pub fn depth(&self) -> u32 {
        self.subagent_tokens.len() as u32
    }

    pub fn can_spawn(&self, max_depth: u32) -> bool {
        self.depth() < max_depth
    }
}

/// Build a channel-surface key, e.g. `whatsapp:61400000000`.
///
/// Phone-number style user ids have one leading `+` stripped before
/// construction (spec §4.4); any other content passes through verbatim.
pub fn channel_key(channel: &str, user_id: &str) -> String {
    let normalized = normalize_user_id(user_id);
    format!("{channel}{SEPARATOR}{normalized}")
}

/// Strip exactly one leading `+` from a phone-number-shaped user id.
pub fn normalize_user_id(user_id: &str) -> String {
    user_id.strip_prefix('+').unwrap_or(user_id).to_string()
}

/// Build a cron-surface key: `cron:<taskId>:<token>`.
pub fn cron_key(task_id: &str, token: &str) -> String {
    format!("cron{SEPARATOR}{task_id}{SEPARATOR}{token}")
}

/// Build a webhook-surface key: `webhook:<token>`.
pub fn webhook_key(token: &str) -> String {
    format!("webhook{SEPARATOR}{token}")
}

/// Build a CLI-surface key: `cli:<token>`.
pub fn cli_key(token: &str) -> String {
    format!("cli{SEPARATOR}{token}")
}

/// Append a `:subagent:<token>` nesting segment to an existing key.
pub fn subagent_key(parent: &str, token: &str) -> String {
    format!("{parent}{SEPARATOR}{SUBAGENT_SEGMENT}{SEPARATOR}{token}")
}

/// Parse any session key into its root kind/id and subagent chain.
///
/// Total: a key with fewer than two segments yields an empty `kind`/`id`
/// rather than panicking or erroring.
pub fn parse(key: &str) -> ParsedKey {
    let segments: Vec<&str> = key.split(SEPARATOR).collect();
    if segments.len() < 2 {
        return ParsedKey {
            kind: String::new(),
            id: String::new(),
            subagent_tokens: Vec::new(),
        };
    }

    // Walk from the end, peeling off trailing `subagent:<token>` pairs.
    let mut end = segments.len();
    let mut tokens = Vec::new();
    while end >= 2 && segments[end - 2] == SUBAGENT_SEGMENT {
        tokens.push(segments[end - 1].to_string());
        end -= 2;
    }
    tokens.reverse();

    if end < 2 {
        return ParsedKey {
            kind: String::new(),
            id: String::new(),
            subagent_tokens: tokens,
        };
    }

    let kind = segments[0].to_string();
    let id = segments[1..end].join(&SEPARATOR.to_string());
    ParsedKey {
        kind,
        id,
        subagent_tokens: tokens,
    }
}

/// Recover the root key (strips every trailing `:subagent:*` segment).
pub fn root(key: &str) -> String {
    let parsed = parse(key);
    if parsed.kind.is_empty() {
        return key.to_string();
    }
    format!("{}{SEPARATOR}{}", parsed.kind, parsed.id)
}

pub fn is_subagent(key: &str) -> bool {
    parse(key).is_subagent()
}

pub fn depth(key: &str) -> u32 {
    parse(key).depth()
}

pub fn can_spawn(key: &str, max_depth: u32) -> bool {
    parse(key).can_spawn(max_depth)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
