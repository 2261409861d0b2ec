//! Message ids: opaque 32-bit hashes of human readable names.
//!
//! Routing only ever compares hashes. For logging, names registered through
//! [`register_name`] (and every well-known id in [`msg`]) are resolved back
//! by [`MessageId`]'s `Display` impl.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// 32-bit FNV-1a over the UTF-8 bytes of `name`.
pub const fn hash_name(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash: u32 = 0x811c_9dc5;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x0100_0193);
        i += 1;
    }
    hash
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u32);

impl MessageId {
    pub const fn from_name(name: &str) -> Self {
        MessageId(hash_name(name))
    }

    pub const fn from_raw(raw: u32) -> Self {
        MessageId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Registered name for this hash, if any.
    pub fn name(self) -> Option<&'static str> {
        NAMES.read().get(&self.0).copied()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "#{:08x}", self.0),
        }
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}

/// Well-known message ids consumed by the scheduling core.
pub mod msg {
    use super::MessageId;

    pub const FIN: MessageId = MessageId::from_name("fin");
    pub const INSERT_TASK: MessageId = MessageId::from_name("insert_task__");
    pub const REMOVE_TASK: MessageId = MessageId::from_name("remove_task__");
    pub const REQUEST_SET_TASK_OWNER: MessageId = MessageId::from_name("request_set_task_owner__");
    pub const CONFIRM_SET_TASK_OWNER: MessageId = MessageId::from_name("confirm_set_task_owner__");
    pub const REQUEST_SET_PARENT: MessageId = MessageId::from_name("request_set_parent__");
    pub const CONFIRM_SET_PARENT: MessageId = MessageId::from_name("confirm_set_parent__");
    pub const SHUTDOWN: MessageId = MessageId::from_name("shutdown__");
    pub const TOGGLE_PAUSE: MessageId = MessageId::from_name("toggle_pause__");
    pub const SET_TASK_STATUS: MessageId = MessageId::from_name("set_task_status");

    pub(super) const ALL: &[(&str, MessageId)] = &[
        ("fin", FIN),
        ("insert_task__", INSERT_TASK),
        ("remove_task__", REMOVE_TASK),
        ("request_set_task_owner__", REQUEST_SET_TASK_OWNER),
        ("confirm_set_task_owner__", CONFIRM_SET_TASK_OWNER),
        ("request_set_parent__", REQUEST_SET_PARENT),
        ("confirm_set_parent__", CONFIRM_SET_PARENT),
        ("shutdown__", SHUTDOWN),
        ("toggle_pause__", TOGGLE_PAUSE),
        ("set_task_status", SET_TASK_STATUS),
    ];
}

static NAMES: LazyLock<RwLock<HashMap<u32, &'static str>>> = LazyLock::new(|| {
    let map = msg::ALL
        .iter()
        .map(|(name, id)| (id.raw(), *name))
        .collect();
    RwLock::new(map)
});

/// Register `name` for reverse lookup in logs and return its id.
///
/// A hash collision with a different, already registered name keeps the
/// first name and logs a warning.
pub fn register_name(name: &'static str) -> MessageId {
    let id = MessageId::from_name(name);
    let mut names = NAMES.write();
    match names.get(&id.raw()) {
        Some(existing) if *existing != name => {
            tracing::warn!(%existing, new = %name, hash = id.raw(), "message id hash collision");
        }
        Some(_) => {}
        None => {
            names.insert(id.raw(), name);
        }
    }
    id
}
