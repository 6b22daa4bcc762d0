//! In-game state replication
//!
//! The host streams its simulation to every follower as framed batches
//! terminated by `FrameComplete`; followers stream their players' orders back
//! as `UnitOrders`.

mod follower;
mod host;

use tracing::{trace, warn};

use crate::{
    packet::{self, NetPacket},
    socket::Socket,
};

pub use follower::{FollowerReplicator, LocalOrder, OrderTap, StatusOverride};
pub use host::HostReplicator;

fn send(socket: &mut Socket, packet: &NetPacket) {
    match packet::encode(packet) {
        Ok(bytes) => {
            trace!(peer = socket.peer(), kind = packet.kind(), "game send");
            socket.send(bytes);
        }
        Err(e) => warn!(error = %e, kind = packet.kind(), "failed to encode game packet"),
    }
}

/// Read up to `limit` packets, dropping anything that does not decode.
fn receive(socket: &mut Socket, limit: usize) -> Vec<NetPacket> {
    let mut packets = Vec::new();
    while packets.len() < limit {
        let Some(bytes) = socket.try_receive() else {
            break;
        };
        match packet::decode(&bytes) {
            Ok(packet) => packets.push(packet),
            Err(e) => warn!(peer = socket.peer(), error = %e, "dropping malformed packet"),
        }
    }
    packets
}
