//! Room membership and event fanout

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ws::protocol::{Frame, PlayerInfo, Position, ServerMsg};

use super::registry::ConnectionRegistry;
use super::LobbyError;

/// Fraction of movement updates that get logged
const MOVE_LOG_SAMPLE_RATE: f64 = 0.1;

/// A named broadcast scope
#[derive(Debug, Clone)]
pub struct Room {
    id: String,
    /// Members in join order
    members: IndexMap<Uuid, PlayerInfo>,
}

impl Room {
    fn new(id: String) -> Self {
        Self {
            id,
            members: IndexMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.members.contains_key(&id)
    }

    #[cfg(test)]
    pub fn member(&self, id: Uuid) -> Option<&PlayerInfo> {
        self.members.get(&id)
    }

    pub fn players(&self) -> Vec<PlayerInfo> {
        self.members.values().cloned().collect()
    }

    fn member_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.members.keys().copied()
    }
}

/// Owns the configured rooms and routes events to their members
#[derive(Debug)]
pub struct RoomBroadcaster {
    rooms: IndexMap<String, Room>,
    /// Joins are refused once a room holds this many members
    capacity: Option<usize>,
}

impl RoomBroadcaster {
    pub fn new<I, S>(room_ids: I, capacity: Option<usize>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rooms = room_ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                (id.clone(), Room::new(id))
            })
            .collect();

        Self { rooms, capacity }
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    /// Put a connection into `room_id`, leaving its current room first
    pub fn join(
        &mut self,
        registry: &mut ConnectionRegistry,
        id: Uuid,
        room_id: &str,
        position: Option<Position>,
    ) -> Result<(), LobbyError> {
        registry.lookup(id)?;

        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.to_string()))?;

        if let Some(capacity) = self.capacity {
            let others = room.len() - usize::from(room.contains(id));
            if others >= capacity {
                return Err(LobbyError::RoomFull {
                    room_id: room_id.to_string(),
                    capacity,
                });
            }
        }

        self.leave(registry, id);

        let connection = registry.lookup_mut(id)?;
        connection.current_room = Some(room_id.to_string());
        connection.position = position.unwrap_or_default();

        let record = PlayerInfo {
            id,
            socket_id: connection.session_id.clone(),
            username: connection.username.clone(),
            position: connection.position,
            frame: connection.frame,
            joined_at: Utc::now(),
        };

        let Some(room) = self.rooms.get_mut(room_id) else {
            return Err(LobbyError::RoomNotFound(room_id.to_string()));
        };
        room.members.insert(id, record.clone());
        let player_count = room.len();

        info!(
            client_id = %id,
            username = %record.username,
            room_id,
            player_count,
            "Player joined room"
        );

        registry.send(
            id,
            ServerMsg::RoomState {
                room_id: room_id.to_string(),
                players: room.players(),
                player_count,
            },
        );

        self.fanout(
            registry,
            room_id,
            Some(id),
            ServerMsg::PlayerJoined { player: record },
        );

        registry.broadcast(&ServerMsg::RoomUpdate {
            room_id: room_id.to_string(),
            player_count,
        });

        Ok(())
    }

    /// Take a connection out of its room. Returns false if it was not in one.
    pub fn leave(&mut self, registry: &mut ConnectionRegistry, id: Uuid) -> bool {
        let Ok(connection) = registry.lookup_mut(id) else {
            return false;
        };
        let Some(room_id) = connection.current_room.take() else {
            return false;
        };

        let Some(room) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        room.members.shift_remove(&id);
        let player_count = room.len();

        info!(client_id = %id, room_id = %room_id, player_count, "Player left room");

        self.fanout(registry, &room_id, None, ServerMsg::PlayerLeft { player_id: id });

        registry.broadcast(&ServerMsg::RoomUpdate {
            room_id,
            player_count,
        });

        true
    }

    /// Record a movement and relay it to the other members of the room
    pub fn move_player(
        &mut self,
        registry: &mut ConnectionRegistry,
        id: Uuid,
        position: Position,
        frame: Frame,
    ) {
        let Some(room_id) = Self::current_room(registry, id) else {
            return;
        };
        let Some(record) = self
            .rooms
            .get_mut(&room_id)
            .and_then(|room| room.members.get_mut(&id))
        else {
            return;
        };

        record.position = position;
        record.frame = frame;
        registry.update_position(id, position, frame);

        if rand::random::<f64>() < MOVE_LOG_SAMPLE_RATE {
            debug!(client_id = %id, room_id = %room_id, x = position.x, y = position.y, "Player moved");
        }

        self.fanout(
            registry,
            &room_id,
            Some(id),
            ServerMsg::PlayerMoved {
                player_id: id,
                position,
                frame,
            },
        );
    }

    /// Relay an animation cue to the other members of the room
    pub fn animate(&self, registry: &ConnectionRegistry, id: Uuid, animation: String, frame: Frame) {
        let Some(room_id) = Self::current_room(registry, id) else {
            return;
        };

        debug!(client_id = %id, room_id = %room_id, animation = %animation, "Player animation");

        self.fanout(
            registry,
            &room_id,
            Some(id),
            ServerMsg::PlayerAnimation {
                player_id: id,
                animation,
                frame,
            },
        );
    }

    /// Leave the current room and drop the registry entry
    pub fn disconnect(&mut self, registry: &mut ConnectionRegistry, id: Uuid) -> bool {
        self.leave(registry, id);
        registry.remove(id).is_some()
    }

    fn current_room(registry: &ConnectionRegistry, id: Uuid) -> Option<String> {
        registry.lookup(id).ok()?.current_room.clone()
    }

    /// Send to every member of `room_id` except `except`
    fn fanout(
        &self,
        registry: &ConnectionRegistry,
        room_id: &str,
        except: Option<Uuid>,
        msg: ServerMsg,
    ) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };

        for member in room.member_ids().filter(|m| Some(*m) != except) {
            registry.send(member, msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::registry::Outbox;
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    const ROOM_1: &str = "Main_Screen";
    const ROOM_2: &str = "House_Screen";

    struct Harness {
        registry: ConnectionRegistry,
        rooms: RoomBroadcaster,
    }

    struct Client {
        id: Uuid,
        rx: mpsc::Receiver<ServerMsg>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerMsg> {
            let mut msgs = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                msgs.push(msg);
            }
            msgs
        }
    }

    impl Harness {
        fn new(capacity: Option<usize>) -> Self {
            Self {
                registry: ConnectionRegistry::new(),
                rooms: RoomBroadcaster::new([ROOM_1, ROOM_2], capacity),
            }
        }

        fn connect(&mut self) -> Client {
            let (tx, rx): (Outbox, _) = mpsc::channel(64);
            let id = self.registry.register(format!("sock-{}", self.registry.len()), tx);
            Client { id, rx }
        }

        fn join(&mut self, client: &Client, room_id: &str) -> Result<(), LobbyError> {
            self.rooms.join(&mut self.registry, client.id, room_id, None)
        }

        /// Every connection's room field agrees with exactly one room's membership
        fn assert_consistent(&self) {
            for connection in self.registry.iter() {
                let holders: Vec<&str> = self
                    .rooms
                    .rooms()
                    .filter(|room| room.contains(connection.id))
                    .map(Room::id)
                    .collect();

                match &connection.current_room {
                    Some(room_id) => assert_eq!(holders, vec![room_id.as_str()]),
                    None => assert!(holders.is_empty()),
                }
            }
        }
    }

    fn ids(players: &[PlayerInfo]) -> Vec<Uuid> {
        players.iter().map(|p| p.id).collect()
    }

    #[test]
    fn first_joiner_gets_roster_of_one() {
        let mut h = Harness::new(None);
        let mut a = h.connect();

        assert_ok!(h.join(&a, ROOM_1));

        let msgs = a.drain();
        match &msgs[0] {
            ServerMsg::RoomState {
                room_id,
                players,
                player_count,
            } => {
                assert_eq!(room_id, ROOM_1);
                assert_eq!(ids(players), vec![a.id]);
                assert_eq!(*player_count, 1);
                assert_eq!(players[0].position, Position { x: 192.0, y: 160.0 });
            }
            other => panic!("expected room_state, got {:?}", other),
        }
        assert_eq!(
            msgs[1],
            ServerMsg::RoomUpdate {
                room_id: ROOM_1.to_string(),
                player_count: 1
            }
        );
        h.assert_consistent();
    }

    #[test]
    fn second_joiner_is_announced_to_peers_and_everyone_gets_update() {
        let mut h = Harness::new(None);
        let mut a = h.connect();
        let mut b = h.connect();
        let mut lobby_only = h.connect();

        h.join(&a, ROOM_1).unwrap();
        a.drain();
        b.drain();
        lobby_only.drain();

        h.join(&b, ROOM_1).unwrap();

        let update = ServerMsg::RoomUpdate {
            room_id: ROOM_1.to_string(),
            player_count: 2,
        };

        let a_msgs = a.drain();
        assert!(matches!(&a_msgs[0], ServerMsg::PlayerJoined { player } if player.id == b.id));
        assert_eq!(a_msgs[1], update);

        let b_msgs = b.drain();
        match &b_msgs[0] {
            ServerMsg::RoomState { players, player_count, .. } => {
                assert_eq!(ids(players), vec![a.id, b.id]);
                assert_eq!(*player_count, 2);
            }
            other => panic!("expected room_state, got {:?}", other),
        }
        assert_eq!(b_msgs[1], update);

        assert_eq!(lobby_only.drain(), vec![update]);
    }

    #[test]
    fn join_with_position_overrides_default() {
        let mut h = Harness::new(None);
        let a = h.connect();
        let spawn = Position { x: 5.0, y: 6.0 };

        h.rooms
            .join(&mut h.registry, a.id, ROOM_1, Some(spawn))
            .unwrap();

        assert_eq!(h.registry.lookup(a.id).unwrap().position, spawn);
        assert_eq!(h.rooms.room(ROOM_1).unwrap().member(a.id).unwrap().position, spawn);
    }

    #[test]
    fn unknown_room_leaves_state_untouched() {
        let mut h = Harness::new(None);
        let mut a = h.connect();
        let mut b = h.connect();
        h.join(&a, ROOM_1).unwrap();
        a.drain();
        b.drain();

        let err = assert_err!(h.join(&a, "roomX"));
        assert!(matches!(err, LobbyError::RoomNotFound(ref r) if r == "roomX"));

        assert_eq!(
            h.registry.lookup(a.id).unwrap().current_room.as_deref(),
            Some(ROOM_1)
        );
        assert!(h.rooms.room(ROOM_1).unwrap().contains(a.id));
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
        h.assert_consistent();
    }

    #[test]
    fn switching_rooms_announces_leave_before_join() {
        let mut h = Harness::new(None);
        let a = h.connect();
        let mut old_peer = h.connect();
        let new_peer = h.connect();
        let mut observer = h.connect();

        h.join(&a, ROOM_1).unwrap();
        h.join(&old_peer, ROOM_1).unwrap();
        h.join(&new_peer, ROOM_2).unwrap();
        old_peer.drain();
        observer.drain();

        h.join(&a, ROOM_2).unwrap();

        assert_eq!(
            old_peer.drain(),
            vec![
                ServerMsg::PlayerLeft { player_id: a.id },
                ServerMsg::RoomUpdate {
                    room_id: ROOM_1.to_string(),
                    player_count: 1
                },
                ServerMsg::RoomUpdate {
                    room_id: ROOM_2.to_string(),
                    player_count: 2
                },
            ]
        );

        // The global updates show the old room shrinking before the new one grows
        assert_eq!(
            observer.drain(),
            vec![
                ServerMsg::RoomUpdate {
                    room_id: ROOM_1.to_string(),
                    player_count: 1
                },
                ServerMsg::RoomUpdate {
                    room_id: ROOM_2.to_string(),
                    player_count: 2
                },
            ]
        );

        assert!(!h.rooms.room(ROOM_1).unwrap().contains(a.id));
        assert!(h.rooms.room(ROOM_2).unwrap().contains(a.id));
        h.assert_consistent();
    }

    #[test]
    fn move_reaches_peers_but_not_sender() {
        let mut h = Harness::new(None);
        let mut a = h.connect();
        let mut b = h.connect();
        let mut elsewhere = h.connect();
        h.join(&a, ROOM_1).unwrap();
        h.join(&b, ROOM_1).unwrap();
        h.join(&elsewhere, ROOM_2).unwrap();
        a.drain();
        b.drain();
        elsewhere.drain();

        let target = Position { x: 10.0, y: 20.0 };
        h.rooms.move_player(&mut h.registry, a.id, target, 3.0);

        assert_eq!(
            b.drain(),
            vec![ServerMsg::PlayerMoved {
                player_id: a.id,
                position: target,
                frame: 3.0
            }]
        );
        assert!(a.drain().is_empty());
        assert!(elsewhere.drain().is_empty());

        let connection = h.registry.lookup(a.id).unwrap();
        let record = h.rooms.room(ROOM_1).unwrap().member(a.id).unwrap();
        assert_eq!(connection.position, target);
        assert_eq!(record.position, target);
        assert_eq!(record.frame, connection.frame);
    }

    #[test]
    fn move_and_animate_outside_a_room_are_ignored() {
        let mut h = Harness::new(None);
        let a = h.connect();
        let mut b = h.connect();

        h.rooms
            .move_player(&mut h.registry, a.id, Position { x: 1.0, y: 1.0 }, 1.0);
        h.rooms.animate(&h.registry, a.id, "wave".to_string(), 1.0);

        assert_eq!(h.registry.lookup(a.id).unwrap().position, Position::default());
        assert!(b.drain().is_empty());
    }

    #[test]
    fn animation_is_relayed_without_being_stored() {
        let mut h = Harness::new(None);
        let mut a = h.connect();
        let mut b = h.connect();
        h.join(&a, ROOM_1).unwrap();
        h.join(&b, ROOM_1).unwrap();
        a.drain();
        b.drain();

        h.rooms.animate(&h.registry, a.id, "jump".to_string(), 7.0);

        assert_eq!(
            b.drain(),
            vec![ServerMsg::PlayerAnimation {
                player_id: a.id,
                animation: "jump".to_string(),
                frame: 7.0
            }]
        );
        assert!(a.drain().is_empty());
        assert_eq!(h.rooms.room(ROOM_1).unwrap().member(a.id).unwrap().frame, 0.0);
    }

    #[test]
    fn departed_member_receives_no_further_room_traffic() {
        let mut h = Harness::new(None);
        let mut a = h.connect();
        let b = h.connect();
        h.join(&a, ROOM_1).unwrap();
        h.join(&b, ROOM_1).unwrap();

        assert!(h.rooms.leave(&mut h.registry, a.id));
        a.drain();

        h.rooms
            .move_player(&mut h.registry, b.id, Position { x: 3.0, y: 4.0 }, 1.0);
        h.rooms.animate(&h.registry, b.id, "wave".to_string(), 2.0);

        assert!(a.drain().is_empty());
        assert!(!h.rooms.leave(&mut h.registry, a.id));
        h.assert_consistent();
    }

    #[test]
    fn sole_member_disconnect_empties_room() {
        let mut h = Harness::new(None);
        let a = h.connect();
        h.join(&a, ROOM_1).unwrap();

        assert!(h.rooms.disconnect(&mut h.registry, a.id));
        assert!(!h.rooms.disconnect(&mut h.registry, a.id));
        assert!(h.rooms.room(ROOM_1).unwrap().is_empty());

        let mut c = h.connect();
        h.join(&c, ROOM_1).unwrap();
        match &c.drain()[0] {
            ServerMsg::RoomState { players, .. } => assert_eq!(ids(players), vec![c.id]),
            other => panic!("expected room_state, got {:?}", other),
        }
    }

    #[test]
    fn capacity_policy_refuses_join_when_full() {
        let mut h = Harness::new(Some(1));
        let a = h.connect();
        let b = h.connect();

        h.join(&a, ROOM_1).unwrap();
        let err = assert_err!(h.join(&b, ROOM_1));
        assert!(matches!(err, LobbyError::RoomFull { capacity: 1, .. }));
        assert_eq!(err.to_string(), format!("Room {} is full (1 players)", ROOM_1));
        assert!(h.registry.lookup(b.id).unwrap().current_room.is_none());

        // Rejoining the room you already occupy is not blocked by your own seat
        assert_ok!(h.join(&a, ROOM_1));
        assert_eq!(h.rooms.room(ROOM_1).unwrap().len(), 1);
        h.assert_consistent();
    }

    #[test]
    fn unknown_identity_cannot_join() {
        let mut h = Harness::new(None);
        let err = assert_err!(h.rooms.join(&mut h.registry, Uuid::new_v4(), ROOM_1, None));
        assert!(matches!(err, LobbyError::UnknownIdentity(_)));
        assert!(h.rooms.room(ROOM_1).unwrap().is_empty());
    }
}
