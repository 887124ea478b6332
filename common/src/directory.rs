//! Directory of discovered bus endpoints and their group memberships.
//!
//! Rebuilt wholesale by a bus scan at boot and after commissioning.
//! Higher-level operations skip absent slaves entirely, so a stale
//! `present` flag only costs a missed endpoint until the next scan.

use crate::{
    address::{BusTarget, MAX_SHORT_ADDRESS},
    bus,
    hal::LampBus,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaveRecord {
    pub present: bool,
    pub groups: u16,
}

#[derive(Debug, Clone)]
pub struct SlaveDirectory {
    slaves: [SlaveRecord; MAX_SHORT_ADDRESS as usize],
}

impl Default for SlaveDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl SlaveDirectory {
    pub fn new() -> Self {
        Self {
            slaves: [SlaveRecord::default(); MAX_SHORT_ADDRESS as usize],
        }
    }

    pub fn record(&self, short: u8) -> SlaveRecord {
        self.slaves
            .get(short as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn set(&mut self, short: u8, record: SlaveRecord) {
        if let Some(slot) = self.slaves.get_mut(short as usize) {
            *slot = record;
        }
    }

    pub fn is_present(&self, short: u8) -> bool {
        self.record(short).present
    }

    /// Queries every short address and overwrites the whole table. An
    /// endpoint is present iff it answers the status query; group bits
    /// come from the two group queries, with absent replies read as 0.
    pub fn scan<B: LampBus>(&mut self, bus: &mut B) {
        for short in 0..MAX_SHORT_ADDRESS {
            let target = BusTarget::Short(short);
            let present = bus.command(target, bus::QUERY_STATUS).is_some();
            let groups = if present {
                let low = bus.command(target, bus::QUERY_GROUPS_0_7).unwrap_or(0);
                let high = bus.command(target, bus::QUERY_GROUPS_8_15).unwrap_or(0);
                u16::from(low) | (u16::from(high) << 8)
            } else {
                0
            };
            self.slaves[short as usize] = SlaveRecord { present, groups };
        }
    }

    pub fn present_shorts(&self) -> impl Iterator<Item = u8> + '_ {
        self.slaves
            .iter()
            .enumerate()
            .filter(|(_, record)| record.present)
            .map(|(short, _)| short as u8)
    }

    /// Present slaves whose group bitmask contains `group`, ascending.
    pub fn group_members(&self, group: u8) -> impl Iterator<Item = u8> + '_ {
        let bit = 1u16 << (group as u32 % 16);
        self.slaves
            .iter()
            .enumerate()
            .filter(move |(_, record)| record.present && record.groups & bit != 0)
            .map(|(short, _)| short as u8)
    }

    /// Groups with at least one present member, ascending.
    pub fn groups_in_use(&self) -> impl Iterator<Item = u8> + '_ {
        (0..16u8).filter(|group| self.group_members(*group).next().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct ScriptedBus;

    impl LampBus for ScriptedBus {
        fn command(&mut self, target: BusTarget, opcode: u8) -> Option<u8> {
            // Slaves 1 and 4 answer; slave 4 is in groups 2 and 9.
            let short = match target {
                BusTarget::Short(short) => short,
                BusTarget::Group(_) => return None,
            };
            match (short, opcode) {
                (1 | 4, bus::QUERY_STATUS) => Some(0),
                (4, bus::QUERY_GROUPS_0_7) => Some(1 << 2),
                (4, bus::QUERY_GROUPS_8_15) => Some(1 << 1),
                (1, bus::QUERY_GROUPS_0_7 | bus::QUERY_GROUPS_8_15) => Some(0),
                _ => None,
            }
        }

        fn set_level(&mut self, _target: BusTarget, _level: u8) {}
        fn send_special(&mut self, _opcode: u8, _data: u8) {}
        fn commission(&mut self, _only_unassigned: bool) {}
    }

    #[test]
    fn scan_marks_presence_and_groups() {
        let mut directory = SlaveDirectory::new();
        directory.set(9, SlaveRecord { present: true, groups: 0xFFFF });

        directory.scan(&mut ScriptedBus);

        assert_eq!(directory.present_shorts().collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(directory.record(4).groups, (1 << 2) | (1 << 9));
        // Previous contents are overwritten wholesale.
        assert!(!directory.is_present(9));
    }

    #[test]
    fn group_queries_list_only_present_members() {
        let mut directory = SlaveDirectory::new();
        directory.scan(&mut ScriptedBus);

        assert_eq!(directory.group_members(2).collect::<Vec<_>>(), vec![4]);
        assert_eq!(directory.group_members(3).count(), 0);
        assert_eq!(directory.groups_in_use().collect::<Vec<_>>(), vec![2, 9]);
    }
}
