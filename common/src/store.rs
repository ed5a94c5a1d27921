use log::warn;

use crate::{error::StoreError, types::PersistedState};

pub const STATE_NAMESPACE: &str = "roompanel";
pub const KEY_LAST_MESSAGE: &str = "message";
pub const KEY_LAST_VOLTAGE: &str = "voltage";
pub const MAX_MESSAGE_BYTES: usize = 256;

/// Single-writer record that survives deep sleep. `save` must leave the
/// previously stored value intact if power is lost before it returns.
pub trait StateStore {
    fn load(&mut self) -> Result<PersistedState, StoreError>;
    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError>;
}

pub fn load_or_default(store: &mut dyn StateStore) -> PersistedState {
    store.load().unwrap_or_else(|err| {
        warn!("failed to load panel state: {err}");
        PersistedState::default()
    })
}

/// Cuts `message` to the stored size limit on a char boundary.
pub fn clamp_message(message: &str) -> &str {
    if message.len() <= MAX_MESSAGE_BYTES {
        return message;
    }
    let mut end = MAX_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}
