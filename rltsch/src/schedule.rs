//! Slotframe and link bookkeeping on top of a [`MacSchedule`].
//!
//! The executor only hands out opaque handles, so this keeps the handle and the
//! [`LinkSpec`] of every installed link, indexed by timeslot. That is what lets
//! the slot tracker replace a link while preserving its options, type and address.

use alloc::vec;
use alloc::vec::Vec;

use log::{info, warn};

use crate::slots::SlotRecord;
use crate::traits::MacSchedule;
use crate::types::{
    LinkAddr, LinkHandle, LinkOptions, LinkSpec, LinkType, SlotConfig, SlotframeHandle,
    ADVERTISING_SLOT, SLOTFRAME_INDEX,
};

#[derive(Debug, Clone, Copy)]
struct InstalledLink {
    handle: LinkHandle,
    spec: LinkSpec,
}

/// The node's single slotframe and its links.
pub struct Schedule<M> {
    mac: M,
    slotframe: Option<SlotframeHandle>,
    links: Vec<Option<InstalledLink>>,
}

impl<M: MacSchedule> Schedule<M> {
    /// Wrap an executor. Nothing is installed until [`rebuild`](Self::rebuild).
    pub fn new(mac: M) -> Self {
        Self {
            mac,
            slotframe: None,
            links: Vec::new(),
        }
    }

    pub fn mac(&self) -> &M {
        &self.mac
    }

    /// True once the executor accepted a slotframe.
    pub fn is_installed(&self) -> bool {
        self.slotframe.is_some()
    }

    /// Installed slotframe length (0 when none).
    pub fn size(&self) -> u16 {
        self.links.len() as u16
    }

    pub fn has_link(&self, slot: u16) -> bool {
        self.link(slot).is_some()
    }

    pub fn link(&self, slot: u16) -> Option<&LinkSpec> {
        self.links
            .get(slot as usize)
            .and_then(|l| l.as_ref())
            .map(|l| &l.spec)
    }

    /// Installed links, in timeslot order.
    pub fn links(&self) -> impl Iterator<Item = &LinkSpec> {
        self.links.iter().flatten().map(|l| &l.spec)
    }

    /// Replace the executor's schedule with one slotframe of `size` timeslots.
    ///
    /// Slot 0 is always the advertising link. Every other slot follows its record:
    /// Inactive slots get no link, dedicated slots a unicast link to their primary
    /// neighbor, everything else a shared broadcast link on the slot's channel.
    /// Returns the number of links installed.
    pub fn rebuild(&mut self, size: u16, records: &[SlotRecord]) -> usize {
        self.mac.remove_all_slotframes();
        self.links.clear();

        self.slotframe = self.mac.add_slotframe(SLOTFRAME_INDEX, size);
        let Some(sf) = self.slotframe else {
            warn!("slotframe of size {} refused", size);
            return 0;
        };

        self.links = vec![None; size as usize];
        let mut installed = 0;
        for slot in 0..size {
            let Some(spec) = desired_link(slot, records.get(slot as usize)) else {
                continue;
            };
            match self.mac.add_link(sf, &spec) {
                Some(handle) => {
                    self.links[slot as usize] = Some(InstalledLink { handle, spec });
                    installed += 1;
                }
                None => warn!("slot {}: link refused", slot),
            }
        }

        info!("schedule rebuilt: size={} links={}", size, installed);
        installed
    }

    /// Remove the link at `slot`. Returns false if there was none.
    pub fn remove_link(&mut self, slot: u16) -> bool {
        let Some(sf) = self.slotframe else {
            return false;
        };
        match self.links.get_mut(slot as usize).and_then(Option::take) {
            Some(old) => {
                self.mac.remove_link(sf, old.handle);
                true
            }
            None => false,
        }
    }

    /// Swap the link at `slot` for `spec`.
    ///
    /// Returns false if the executor refused the new link; the slot is then left
    /// without one.
    pub fn replace_link(&mut self, slot: u16, spec: LinkSpec) -> bool {
        let Some(sf) = self.slotframe else {
            return false;
        };
        if slot as usize >= self.links.len() {
            return false;
        }
        self.remove_link(slot);

        let spec = LinkSpec {
            timeslot: slot,
            ..spec
        };
        match self.mac.add_link(sf, &spec) {
            Some(handle) => {
                self.links[slot as usize] = Some(InstalledLink { handle, spec });
                true
            }
            None => false,
        }
    }
}

/// Link a slot should carry given its record, or `None` for no link.
fn desired_link(slot: u16, record: Option<&SlotRecord>) -> Option<LinkSpec> {
    if slot == ADVERTISING_SLOT {
        return Some(LinkSpec {
            options: LinkOptions::SHARED,
            link_type: LinkType::Advertising,
            address: LinkAddr::BROADCAST,
            timeslot: slot,
            channel_offset: 0,
        });
    }

    let record = record.copied().unwrap_or(SlotRecord {
        config: SlotConfig::Shared,
        ..SlotRecord::default()
    });

    let (options, address) = match record.config {
        SlotConfig::Inactive => return None,
        SlotConfig::DedicatedTx if record.primary_neighbor.is_unicast() => {
            (LinkOptions::TX_ONLY, record.primary_neighbor)
        }
        SlotConfig::DedicatedRx if record.primary_neighbor.is_unicast() => (
            LinkOptions {
                tx: false,
                rx: true,
                shared: false,
            },
            record.primary_neighbor,
        ),
        _ => (LinkOptions::SHARED, LinkAddr::BROADCAST),
    };

    Some(LinkSpec {
        options,
        link_type: LinkType::Normal,
        address,
        timeslot: slot,
        channel_offset: record.channel_offset,
    })
}
