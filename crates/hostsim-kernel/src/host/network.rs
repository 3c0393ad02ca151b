//! Moving packets between the network stack and the event queue.

use super::Host;
use crate::error::SimError;
use crate::event::EventKind;
use crate::net::topology::LOOPBACK_LATENCY;
use crate::net::{NetEffects, Packet};
use crate::verified::net::is_dropped;
use log::debug;
use rand::Rng;

impl Host {
    /// Send produced packets, then wake whoever the operation unblocked.
    pub(crate) fn apply_net_effects(&mut self, fx: NetEffects) -> Result<(), SimError> {
        for packet in fx.outgoing {
            self.transmit(packet)?;
        }
        for reason in fx.wake {
            self.notify(reason)?;
        }
        Ok(())
    }

    /// Put a packet on the wire.
    ///
    /// It leaves the interface once earlier packets have drained at the
    /// host's bandwidth and arrives one link latency later.  Datagrams may
    /// be lost; stream segments never are.
    fn transmit(&mut self, packet: Packet) -> Result<(), SimError> {
        let now = self.now();
        if self.net.is_local(packet.dst.addr) {
            self.stats.packets_sent += 1;
            self.schedule(
                now.saturating_add(LOOPBACK_LATENCY),
                EventKind::PacketArrival { packet },
            )?;
            return Ok(());
        }

        let Some(dst) = self.shared.topology.host_by_addr(packet.dst.addr) else {
            debug!("{}: no route to {}, dropping", self.name, packet.dst);
            self.stats.packets_dropped += 1;
            return Ok(());
        };
        let departure = self.net.interface.transmit(now, packet.wire_len());
        self.stats.packets_sent += 1;

        let loss_ppm = self.shared.topology.loss_ppm(self.id, dst);
        if packet.is_datagram() && loss_ppm > 0 {
            let draw = self.rng.gen_range(0..1_000_000u32);
            if is_dropped(loss_ppm, draw) {
                debug!("{}: lost datagram {} -> {}", self.name, packet.src, packet.dst);
                self.stats.packets_dropped += 1;
                return Ok(());
            }
        }
        let arrival = departure.saturating_add(self.shared.topology.latency(self.id, dst));
        self.schedule_remote(dst, arrival, EventKind::PacketArrival { packet });
        Ok(())
    }

    /// Whether a packet to `addr` has anywhere to go.
    pub(crate) fn is_reachable(&self, addr: [u8; 4]) -> bool {
        self.net.is_local(addr) || self.shared.topology.host_by_addr(addr).is_some()
    }

    pub(super) fn deliver_packet(&mut self, packet: Packet) -> Result<(), SimError> {
        let mut fx = NetEffects::default();
        self.net.deliver(packet, &mut fx);
        self.apply_net_effects(fx)
    }
}
