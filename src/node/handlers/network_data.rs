//! Network data flooding.

use super::CommandDest;
use crate::identity::ExtAddr;
use crate::network_data::MergeResult;
use crate::node::MeshNode;
use crate::protocol::{CommandBody, MeshHeader, NetworkDataUpdate};
use crate::timer::TimerKind;
use rand::Rng;
use tracing::{debug, trace};

impl MeshNode {
    /// Originate (or update) a prefix record and flood it.
    pub fn publish_prefix(
        &mut self,
        prefix: [u8; 16],
        prefix_len: u8,
        border_router: bool,
        cost: u16,
    ) {
        let record = self
            .network_data
            .publish(self.sid, prefix, prefix_len, border_router, cost);
        debug!(record = %record, "Publishing network data");
        self.flood_queue.push((record, None));
        self.schedule_flood();
    }

    fn schedule_flood(&mut self) {
        let max_delay = self.config.network_data.reflood_max_delay_ms;
        let delay = self.rng.gen_range(0..=max_delay);
        self.timers
            .schedule_if_idle(TimerKind::NetworkDataFlood, self.now_ms + delay);
    }

    pub(in crate::node) fn handle_network_data(
        &mut self,
        src: ExtAddr,
        header: &MeshHeader,
        update: NetworkDataUpdate,
    ) {
        if header.netid != self.netid || !self.device_state.is_attached() {
            return;
        }
        if let Some(net_info) = update.net_info {
            self.network_data.accept_net_info(net_info);
        }
        if let Some(stable) = update.stable {
            self.network_data.accept_stable(stable);
        }

        let mut queued = false;
        for record in update.records {
            match self.network_data.merge(record) {
                MergeResult::Applied => {
                    trace!(record = %record, from = %src, "Network data record applied");
                    self.flood_queue.retain(|(r, _)| r.key() != record.key());
                    self.flood_queue.push((record, Some(src)));
                    queued = true;
                }
                MergeResult::Unchanged | MergeResult::Stale => {}
            }
        }
        if queued {
            self.schedule_flood();
        }
    }

    /// Re-flood queued records to every network neighbor except where each
    /// record came from.
    pub(in crate::node) fn on_flood_timer(&mut self) {
        if self.flood_queue.is_empty() || !self.device_state.is_attached() {
            self.flood_queue.clear();
            return;
        }
        let queue = std::mem::take(&mut self.flood_queue);
        let netid = self.netid;
        let targets: Vec<ExtAddr> = self
            .neighbors
            .iter()
            .filter(|n| n.admitted && n.netid == netid && n.sid.is_unique())
            .map(|n| n.ext)
            .collect();

        let net_info = self.network_data.net_info();
        let stable = self.network_data.stable();
        for target in targets {
            let records: Vec<_> = queue
                .iter()
                .filter(|(_, from)| *from != Some(target))
                .map(|(record, _)| *record)
                .collect();
            if records.is_empty() {
                continue;
            }
            trace!(to = %target, records = records.len(), "Flooding network data");
            let update = NetworkDataUpdate {
                net_info: Some(net_info),
                stable: Some(stable),
                records,
            };
            self.send_command(CommandDest::Neighbor(target), CommandBody::NetworkDataUpdate(update));
        }
    }
}
