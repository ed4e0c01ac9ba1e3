//! Alias tables and the pending-ticket registry of a client connection.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::codec::client::{AliasedAttribute, AliasedWorldData};
use crate::error::WorldModelError;
use crate::model::{Attribute, WorldState};

pub(super) type SlotResult = Result<WorldState, WorldModelError>;

/// A live request, keyed by ticket.
///
/// Single requests accumulate partial responses until the completion
/// marker fulfils the slot with the merged state. Stream requests
/// forward every response as it arrives; the completion marker enqueues
/// an empty state as the end-of-stream sentinel.
enum Pending {
    Single {
        partial: WorldState,
        slot: oneshot::Sender<SlotResult>,
    },
    Stream {
        slots: mpsc::UnboundedSender<SlotResult>,
    },
}

/// State shared between user tasks and the receive task.
///
/// One lock guards all of it: the alias tables, the pending registry,
/// and the per-ticket error map, matching the dispatch order of the
/// receive loop.
#[derive(Default)]
pub(super) struct ClientState {
    attributes: HashMap<u32, String>,
    origins: HashMap<u32, String>,
    pending: HashMap<u32, Pending>,
    errors: HashMap<u32, WorldModelError>,
}

impl ClientState {
    pub(super) fn register_single(&mut self, ticket: u32) -> oneshot::Receiver<SlotResult> {
        let (slot, rx) = oneshot::channel();
        self.errors.remove(&ticket);
        self.pending.insert(
            ticket,
            Pending::Single {
                partial: WorldState::new(),
                slot,
            },
        );
        rx
    }

    pub(super) fn register_stream(&mut self, ticket: u32) -> mpsc::UnboundedReceiver<SlotResult> {
        let (slots, rx) = mpsc::unbounded_channel();
        self.errors.remove(&ticket);
        self.pending.insert(ticket, Pending::Stream { slots });
        rx
    }

    /// Merge alias declarations; a redeclared alias takes the new name.
    pub(super) fn merge_attribute_aliases(&mut self, aliases: Vec<(u32, String)>) {
        self.attributes.extend(aliases);
    }

    pub(super) fn merge_origin_aliases(&mut self, aliases: Vec<(u32, String)>) {
        self.origins.extend(aliases);
    }

    fn resolve(&self, attribute: AliasedAttribute) -> Attribute {
        let name = self
            .attributes
            .get(&attribute.name_alias)
            .cloned()
            .unwrap_or_else(|| {
                log::warn!("undeclared attribute alias {}", attribute.name_alias);
                String::new()
            });
        let origin = self
            .origins
            .get(&attribute.origin_alias)
            .cloned()
            .unwrap_or_else(|| {
                log::warn!("undeclared origin alias {}", attribute.origin_alias);
                String::new()
            });
        Attribute {
            name,
            creation: attribute.creation,
            expiration: attribute.expiration,
            origin,
            data: attribute.data,
        }
    }

    /// Route a data response to its ticket.
    pub(super) fn data_response(&mut self, data: AliasedWorldData, ticket: u32) {
        let AliasedWorldData {
            object_uri,
            attributes,
        } = data;
        let attributes: Vec<Attribute> = attributes
            .into_iter()
            .map(|attribute| self.resolve(attribute))
            .collect();
        match self.pending.get_mut(&ticket) {
            Some(Pending::Single { partial, .. }) => {
                partial.insert(object_uri, attributes);
            }
            Some(Pending::Stream { slots }) => {
                let mut state = WorldState::new();
                state.insert(object_uri, attributes);
                let _ = slots.send(Ok(state));
            }
            None => log::debug!("data response for unknown ticket {ticket}"),
        }
    }

    /// Fulfil the ticket: single requests get their merged state, streams
    /// get the empty end-of-stream state.
    pub(super) fn request_complete(&mut self, ticket: u32) {
        match self.pending.get(&ticket) {
            Some(Pending::Stream { slots }) => {
                let _ = slots.send(Ok(WorldState::new()));
            }
            Some(Pending::Single { .. }) => {
                if let Some(Pending::Single { partial, slot }) = self.pending.remove(&ticket) {
                    let _ = slot.send(Ok(partial));
                }
            }
            None => log::debug!("completion for unknown ticket {ticket}"),
        }
    }

    /// Record `error` for the ticket and deliver it through the slot.
    pub(super) fn fail(&mut self, ticket: u32, error: WorldModelError) {
        match self.pending.get(&ticket) {
            Some(Pending::Single { .. }) => {
                if let Some(Pending::Single { slot, .. }) = self.pending.remove(&ticket) {
                    let _ = slot.send(Err(error.clone()));
                }
            }
            Some(Pending::Stream { slots }) => {
                let _ = slots.send(Err(error.clone()));
            }
            None => {}
        }
        self.errors.insert(ticket, error);
    }

    /// Fail every live ticket, e.g. when the transport dies.
    pub(super) fn fail_all(&mut self, error: &WorldModelError) {
        let tickets: Vec<u32> = self.pending.keys().copied().collect();
        for ticket in tickets {
            self.fail(ticket, error.clone());
        }
    }

    /// Release everything held for a ticket once its handle is done.
    pub(super) fn finish(&mut self, ticket: u32) {
        self.pending.remove(&ticket);
        self.errors.remove(&ticket);
    }

    pub(super) fn is_live(&self, ticket: u32) -> bool { self.pending.contains_key(&ticket) }

    pub(super) fn error(&self, ticket: u32) -> Option<WorldModelError> {
        self.errors.get(&ticket).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliased(name_alias: u32, origin_alias: u32) -> AliasedWorldData {
        AliasedWorldData {
            object_uri: "u1".to_string(),
            attributes: vec![AliasedAttribute {
                name_alias,
                creation: 5,
                expiration: 0,
                origin_alias,
                data: vec![1],
            }],
        }
    }

    #[test]
    fn single_request_merges_partials_until_complete() {
        let mut state = ClientState::default();
        let mut rx = state.register_single(0);
        state.merge_attribute_aliases(vec![(1, "loc".to_string())]);
        state.merge_origin_aliases(vec![(9, "tracker".to_string())]);

        state.data_response(aliased(1, 9), 0);
        assert!(rx.try_recv().is_err());

        state.request_complete(0);
        let world = rx.try_recv().expect("slot fulfilled").expect("no error");
        assert_eq!(world["u1"][0].name, "loc");
        assert_eq!(world["u1"][0].origin, "tracker");
        assert!(!state.is_live(0));
    }

    #[test]
    fn undeclared_alias_resolves_to_empty_string() {
        let mut state = ClientState::default();
        let mut rx = state.register_single(3);
        state.data_response(aliased(42, 43), 3);
        state.request_complete(3);
        let world = rx.try_recv().expect("slot fulfilled").expect("no error");
        assert_eq!(world["u1"][0].name, "");
        assert_eq!(world["u1"][0].origin, "");
    }

    #[test]
    fn stream_receives_each_response_then_empty_sentinel() {
        let mut state = ClientState::default();
        let mut rx = state.register_stream(7);
        state.merge_attribute_aliases(vec![(1, "loc".to_string())]);
        state.merge_origin_aliases(vec![(1, "tracker".to_string())]);

        state.data_response(aliased(1, 1), 7);
        state.data_response(aliased(1, 1), 7);
        state.request_complete(7);

        assert!(!rx.try_recv().expect("first update").expect("ok").is_empty());
        assert!(!rx.try_recv().expect("second update").expect("ok").is_empty());
        assert!(rx.try_recv().expect("sentinel").expect("ok").is_empty());
        assert!(state.is_live(7), "entry survives until the handle is done");
    }

    #[test]
    fn fail_all_reaches_every_live_ticket() {
        let mut state = ClientState::default();
        let mut single = state.register_single(0);
        let mut stream = state.register_stream(1);

        state.fail_all(&WorldModelError::closed("torn down"));

        assert!(single.try_recv().expect("delivered").is_err());
        assert!(stream.try_recv().expect("delivered").is_err());
        assert!(state.error(0).is_some());
        assert!(state.error(1).is_some());
    }
}
