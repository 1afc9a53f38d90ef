use crate::error::ConnectionError;
use crate::kind::PortFlow;
use crate::port::{PortDescriptor, PortId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Directed, weighted edge between an output port and an input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConnection {
    pub src: PortId,
    pub dest: PortId,
    pub multiplier: f32,
    #[serde(default)]
    pub locked: bool,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl PortConnection {
    pub fn new(src: PortId, dest: PortId) -> Self {
        Self {
            src,
            dest,
            multiplier: 1.0,
            locked: false,
            enabled: true,
        }
    }
}

pub fn compatible(src: &PortDescriptor, dest: &PortDescriptor) -> bool {
    src.flow == PortFlow::Output
        && dest.flow == PortFlow::Input
        && src.id.unit != dest.id.unit
        && src.kind.can_feed(dest.kind)
}

/// Owns the connection list. The two indices are rebuilt before every
/// mutating call returns, so lookups never observe a stale view.
#[derive(Debug, Clone, Default)]
pub struct PortConnectionsManager {
    connections: Vec<PortConnection>,
    by_src: HashMap<PortId, Vec<usize>>,
    by_dest: HashMap<PortId, Vec<usize>>,
}

impl PortConnectionsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_or_update(
        &mut self,
        src: PortDescriptor,
        dest: PortDescriptor,
        multiplier: f32,
        locked: bool,
        enabled: bool,
    ) -> Result<&PortConnection, ConnectionError> {
        if !compatible(&src, &dest) {
            return Err(ConnectionError::InvalidConnection {
                src: src.id,
                dest: dest.id,
            });
        }
        let index = match self.position(src.id, dest.id) {
            Some(index) => {
                let conn = &mut self.connections[index];
                conn.multiplier = multiplier;
                conn.locked = locked;
                conn.enabled = enabled;
                index
            }
            None => {
                self.connections.push(PortConnection {
                    src: src.id,
                    dest: dest.id,
                    multiplier,
                    locked,
                    enabled,
                });
                self.connections.len() - 1
            }
        };
        self.rebuild_indices();
        Ok(&self.connections[index])
    }

    pub fn remove(&mut self, src: PortId, dest: PortId) -> Result<PortConnection, ConnectionError> {
        let index = self
            .position(src, dest)
            .ok_or(ConnectionError::NotFound { src, dest })?;
        if self.connections[index].locked {
            return Err(ConnectionError::Locked { src, dest });
        }
        let removed = self.connections.remove(index);
        self.rebuild_indices();
        Ok(removed)
    }

    /// Drops every connection touching `port`, locked or not.
    pub fn remove_all(&mut self, port: PortId) -> usize {
        let before = self.connections.len();
        self.connections.retain(|c| c.src != port && c.dest != port);
        let removed = before - self.connections.len();
        if removed > 0 {
            self.rebuild_indices();
        }
        removed
    }

    pub fn sources_of(&self, dest: PortId) -> Vec<&PortConnection> {
        self.by_dest
            .get(&dest)
            .map(|indices| indices.iter().map(|i| &self.connections[*i]).collect())
            .unwrap_or_default()
    }

    pub fn destinations_of(&self, src: PortId) -> Vec<&PortConnection> {
        self.by_src
            .get(&src)
            .map(|indices| indices.iter().map(|i| &self.connections[*i]).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, src: PortId, dest: PortId) -> Option<&PortConnection> {
        self.position(src, dest).map(|i| &self.connections[i])
    }

    pub fn contains_port(&self, port: PortId) -> bool {
        self.by_src.contains_key(&port) || self.by_dest.contains_key(&port)
    }

    pub fn connections(&self) -> &[PortConnection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
        self.rebuild_indices();
    }

    /// Installs an already validated list, keeping its order. A repeated
    /// `(src, dest)` pair updates the earlier entry.
    pub fn replace_all(&mut self, connections: Vec<PortConnection>) {
        self.connections.clear();
        for conn in connections {
            match self
                .connections
                .iter_mut()
                .find(|c| c.src == conn.src && c.dest == conn.dest)
            {
                Some(existing) => *existing = conn,
                None => self.connections.push(conn),
            }
        }
        self.rebuild_indices();
    }

    fn position(&self, src: PortId, dest: PortId) -> Option<usize> {
        self.by_src
            .get(&src)?
            .iter()
            .copied()
            .find(|i| self.connections[*i].dest == dest)
    }

    fn rebuild_indices(&mut self) {
        self.by_src.clear();
        self.by_dest.clear();
        for (index, conn) in self.connections.iter().enumerate() {
            self.by_src.entry(conn.src).or_default().push(index);
            self.by_dest.entry(conn.dest).or_default().push(index);
        }
    }
}
