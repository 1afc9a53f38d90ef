use crate::connections::{self, PortConnection, PortConnectionsManager};
use crate::error::{ConnectionError, EngineError};
use crate::graph::GraphSetup;
use crate::port::{Port, PortDescriptor, PortId};
use crate::routing;
use crate::unit::{ProcessingUnit, UnitCell, UnitUid};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Generation-checked reference into the unit arena. A handle to a removed
/// unit stays invalid even after its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    cell: Option<Arc<UnitCell>>,
}

#[derive(Debug, Default)]
pub struct UnitRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_uid: HashMap<UnitUid, UnitHandle>,
}

impl UnitRegistry {
    pub fn insert(&mut self, cell: Arc<UnitCell>) -> Result<UnitHandle, EngineError> {
        let uid = cell.uid();
        if self.by_uid.contains_key(&uid) {
            return Err(EngineError::DuplicateUnit(uid));
        }
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.cell = Some(cell);
                UnitHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    cell: Some(cell),
                });
                UnitHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        self.by_uid.insert(uid, handle);
        Ok(handle)
    }

    pub fn remove(&mut self, handle: UnitHandle) -> Option<Arc<UnitCell>> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let cell = slot.cell.take()?;
        self.by_uid.remove(&cell.uid());
        self.free.push(handle.index);
        Some(cell)
    }

    pub fn get(&self, handle: UnitHandle) -> Option<&Arc<UnitCell>> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.cell.as_ref()
    }

    pub fn handle_of(&self, uid: UnitUid) -> Option<UnitHandle> {
        self.by_uid.get(&uid).copied()
    }

    pub fn by_uid(&self, uid: UnitUid) -> Option<&Arc<UnitCell>> {
        self.get(self.handle_of(uid)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<UnitCell>> {
        self.slots.iter().filter_map(|s| s.cell.as_ref())
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }
}

/// Units and their connections as edited by the control side. Every edit
/// is checked here; graph builds downstream assume a valid, acyclic input.
#[derive(Debug)]
pub struct Topology {
    registry: UnitRegistry,
    connections: PortConnectionsManager,
    sample_rate: u32,
    max_block: usize,
    next_uid: u64,
}

impl Topology {
    pub fn new(sample_rate: u32, max_block: usize) -> Self {
        Self {
            registry: UnitRegistry::default(),
            connections: PortConnectionsManager::new(),
            sample_rate,
            max_block,
            next_uid: 1,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn max_block(&self) -> usize {
        self.max_block
    }

    pub fn allocate_uid(&mut self) -> UnitUid {
        while self.registry.handle_of(UnitUid(self.next_uid)).is_some() {
            self.next_uid += 1;
        }
        let uid = UnitUid(self.next_uid);
        self.next_uid += 1;
        uid
    }

    pub fn add_unit(&mut self, unit: Box<dyn ProcessingUnit>) -> Result<UnitUid, EngineError> {
        let uid = self.allocate_uid();
        self.add_unit_with_uid(uid, unit)?;
        Ok(uid)
    }

    pub fn add_unit_with_uid(
        &mut self,
        uid: UnitUid,
        unit: Box<dyn ProcessingUnit>,
    ) -> Result<UnitHandle, EngineError> {
        if self.registry.handle_of(uid).is_some() {
            return Err(EngineError::DuplicateUnit(uid));
        }
        let cell = Arc::new(UnitCell::new(uid, unit, self.sample_rate, self.max_block));
        self.insert_cell(cell)
    }

    pub fn insert_cell(&mut self, cell: Arc<UnitCell>) -> Result<UnitHandle, EngineError> {
        self.next_uid = self.next_uid.max(cell.uid().0 + 1);
        self.registry.insert(cell)
    }

    /// Removes the unit and eagerly drops every connection touching its
    /// ports, locked ones included.
    pub fn remove_unit(&mut self, uid: UnitUid) -> Result<Arc<UnitCell>, EngineError> {
        let handle = self
            .registry
            .handle_of(uid)
            .ok_or(EngineError::UnknownUnit(uid))?;
        let cell = self
            .registry
            .remove(handle)
            .ok_or(EngineError::UnknownUnit(uid))?;
        let pruned: usize = cell
            .ports()
            .iter()
            .map(|p| self.connections.remove_all(p.id()))
            .sum();
        if pruned > 0 {
            debug!("Removed {} connection(s) of unit {}", pruned, uid);
        }
        Ok(cell)
    }

    pub fn unit(&self, uid: UnitUid) -> Option<&Arc<UnitCell>> {
        self.registry.by_uid(uid)
    }

    pub fn unit_by_handle(&self, handle: UnitHandle) -> Option<&Arc<UnitCell>> {
        self.registry.get(handle)
    }

    pub fn handle_of(&self, uid: UnitUid) -> Option<UnitHandle> {
        self.registry.handle_of(uid)
    }

    pub fn units(&self) -> impl Iterator<Item = &Arc<UnitCell>> {
        self.registry.iter()
    }

    pub fn unit_count(&self) -> usize {
        self.registry.len()
    }

    pub fn port(&self, id: PortId) -> Option<&Arc<Port>> {
        self.unit(id.unit)?.port(id.index)
    }

    pub fn descriptor(&self, id: PortId) -> Result<PortDescriptor, ConnectionError> {
        self.port(id)
            .map(|p| p.descriptor())
            .ok_or(ConnectionError::UnknownPort(id))
    }

    pub fn connect(
        &mut self,
        src: PortId,
        dest: PortId,
        multiplier: f32,
        locked: bool,
        enabled: bool,
    ) -> Result<&PortConnection, ConnectionError> {
        let src_desc = self.descriptor(src)?;
        let dest_desc = self.descriptor(dest)?;
        if !connections::compatible(&src_desc, &dest_desc) {
            return Err(ConnectionError::InvalidConnection { src, dest });
        }
        if self.connections.get(src, dest).is_none()
            && would_close_cycle(&self.connections, src.unit, dest.unit)
        {
            return Err(ConnectionError::WouldCreateCycle { src, dest });
        }
        self.connections
            .add_or_update(src_desc, dest_desc, multiplier, locked, enabled)
    }

    pub fn disconnect(&mut self, src: PortId, dest: PortId) -> Result<PortConnection, ConnectionError> {
        self.connections.remove(src, dest)
    }

    pub fn disconnect_all(&mut self, port: PortId) -> usize {
        self.connections.remove_all(port)
    }

    pub fn sources_of(&self, dest: PortId) -> Vec<&PortConnection> {
        self.connections.sources_of(dest)
    }

    pub fn destinations_of(&self, src: PortId) -> Vec<&PortConnection> {
        self.connections.destinations_of(src)
    }

    pub fn connections(&self) -> &PortConnectionsManager {
        &self.connections
    }

    /// Replaces all connections with `list`, validated as a batch. On error
    /// the current connections are left untouched.
    pub fn load_connections(&mut self, list: Vec<PortConnection>) -> Result<(), ConnectionError> {
        let mut scratch = PortConnectionsManager::new();
        for conn in list {
            let src = self.descriptor(conn.src)?;
            let dest = self.descriptor(conn.dest)?;
            if scratch.get(conn.src, conn.dest).is_none()
                && connections::compatible(&src, &dest)
                && would_close_cycle(&scratch, conn.src.unit, conn.dest.unit)
            {
                return Err(ConnectionError::WouldCreateCycle {
                    src: conn.src,
                    dest: conn.dest,
                });
            }
            scratch.add_or_update(src, dest, conn.multiplier, conn.locked, conn.enabled)?;
        }
        self.connections = scratch;
        Ok(())
    }

    /// Owned copy of everything a graph build needs. Unit latencies are
    /// re-read here so every rebuild sees what the units report now.
    pub fn snapshot(&self, drop_unconnected_hw: bool) -> GraphSetup {
        for unit in self.registry.iter() {
            let before = unit.latency();
            let now = unit.refresh_latency();
            if before != now {
                debug!("Unit {} latency changed: {} -> {}", unit.uid(), before, now);
            }
        }
        GraphSetup {
            units: self.registry.iter().cloned().collect(),
            connections: self
                .connections
                .connections()
                .iter()
                .filter(|c| c.enabled)
                .cloned()
                .collect(),
            drop_unconnected_hw,
        }
    }
}

/// Disabled connections count too: enabling one later skips this check.
fn would_close_cycle(connections: &PortConnectionsManager, from: UnitUid, to: UnitUid) -> bool {
    routing::would_create_cycle(&from, &to, |unit: &UnitUid| {
        connections
            .connections()
            .iter()
            .filter(|c| c.src.unit == *unit)
            .map(|c| c.dest.unit)
            .collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{Fader, Track};

    fn topo() -> Topology {
        Topology::new(48_000, 64)
    }

    #[test]
    fn stale_handles_do_not_resolve_after_reuse() {
        let mut t = topo();
        let a = t.add_unit(Box::new(Fader::new("a", 1))).unwrap();
        let old = t.handle_of(a).unwrap();
        t.remove_unit(a).unwrap();
        let b = t.add_unit(Box::new(Fader::new("b", 1))).unwrap();
        let new = t.handle_of(b).unwrap();
        assert!(t.unit_by_handle(old).is_none());
        assert_eq!(t.unit_by_handle(new).map(|c| c.name()), Some("b"));
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_uid_is_rejected() {
        let mut t = topo();
        t.add_unit_with_uid(UnitUid(5), Box::new(Fader::new("a", 1)))
            .unwrap();
        assert!(matches!(
            t.add_unit_with_uid(UnitUid(5), Box::new(Fader::new("b", 1))),
            Err(EngineError::DuplicateUnit(UnitUid(5)))
        ));
        assert_eq!(t.allocate_uid(), UnitUid(6));
    }

    #[test]
    fn removing_a_unit_prunes_its_connections() {
        let mut t = topo();
        let track = t.add_unit(Box::new(Track::new("t", 1, 1, false))).unwrap();
        let bus = t.add_unit(Box::new(Fader::new("bus", 1))).unwrap();
        t.connect(PortId::new(track, 1), PortId::new(bus, 0), 1.0, true, true)
            .unwrap();
        t.remove_unit(bus).unwrap();
        assert!(t.connections().is_empty());
        assert!(matches!(
            t.remove_unit(bus),
            Err(EngineError::UnknownUnit(_))
        ));
    }

    #[test]
    fn unknown_ports_are_reported() {
        let mut t = topo();
        let a = t.add_unit(Box::new(Fader::new("a", 1))).unwrap();
        let missing = PortId::new(a, 9);
        assert_eq!(
            t.connect(PortId::new(a, 1), missing, 1.0, false, true)
                .unwrap_err(),
            ConnectionError::UnknownPort(missing)
        );
    }

    #[test]
    fn cycle_through_disabled_edge_is_rejected() {
        let mut t = topo();
        let a = t.add_unit(Box::new(Fader::new("a", 1))).unwrap();
        let b = t.add_unit(Box::new(Fader::new("b", 1))).unwrap();
        t.connect(PortId::new(a, 1), PortId::new(b, 0), 1.0, false, false)
            .unwrap();
        assert!(matches!(
            t.connect(PortId::new(b, 1), PortId::new(a, 0), 1.0, false, true),
            Err(ConnectionError::WouldCreateCycle { .. })
        ));
        // Re-enabling the existing edge is an update, not a new edge.
        t.connect(PortId::new(a, 1), PortId::new(b, 0), 1.0, false, true)
            .unwrap();
        assert_eq!(t.snapshot(false).connections.len(), 1);
    }

    #[test]
    fn batch_load_is_all_or_nothing() {
        let mut t = topo();
        let a = t.add_unit(Box::new(Fader::new("a", 1))).unwrap();
        let b = t.add_unit(Box::new(Fader::new("b", 1))).unwrap();
        t.connect(PortId::new(a, 1), PortId::new(b, 0), 1.0, false, true)
            .unwrap();
        let bad = vec![
            PortConnection::new(PortId::new(b, 1), PortId::new(a, 0)),
            PortConnection::new(PortId::new(a, 1), PortId::new(a, 0)),
        ];
        assert!(t.load_connections(bad).is_err());
        assert_eq!(t.connections().len(), 1);
        assert!(t.connections().get(PortId::new(a, 1), PortId::new(b, 0)).is_some());
    }
}
